use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::{check_move, now_ms, require_status, validate_complaint};
use super::{EngineError, QueueEngine};

fn record<T>(op: &'static str, result: &Result<T, EngineError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(crate::observability::QUEUE_OPS_TOTAL, "op" => op, "status" => status)
        .increment(1);
}

impl QueueEngine {
    /// Register a walk-in. Urgent entries go after the last urgent entry,
    /// everything else joins the back of the queue.
    pub async fn add(
        &self,
        clinic_id: Ulid,
        patient_id: Ulid,
        chief_complaint: String,
        is_urgent: bool,
    ) -> Result<QueueEntry, EngineError> {
        let result = self.add_inner(clinic_id, patient_id, chief_complaint, is_urgent).await;
        record("add", &result);
        result
    }

    async fn add_inner(
        &self,
        clinic_id: Ulid,
        patient_id: Ulid,
        chief_complaint: String,
        is_urgent: bool,
    ) -> Result<QueueEntry, EngineError> {
        validate_complaint(&chief_complaint)?;
        let guard = {
            let _gate = self.clinic_gate.read().await;
            self.clinic_or_insert(clinic_id).write_owned().await
        };
        if guard.active_count() >= MAX_ACTIVE_ENTRIES_PER_CLINIC {
            return Err(EngineError::LimitExceeded("too many patients in the waiting room"));
        }

        let event = QueueEvent::Added {
            id: Ulid::new(),
            clinic_id,
            patient_id,
            chief_complaint,
            is_urgent,
            arrived_at: now_ms(),
        };
        self.commit(guard, event).await
    }

    pub async fn move_up(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let result = self.move_entry(id, Direction::Up).await;
        record("move_up", &result);
        result
    }

    pub async fn move_down(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let result = self.move_entry(id, Direction::Down).await;
        record("move_down", &result);
        result
    }

    /// Swap with the adjacent waiting entry. Moving past either end returns
    /// the entry unchanged; crossing the urgent boundary is rejected.
    async fn move_entry(&self, id: Ulid, direction: Direction) -> Result<QueueEntry, EngineError> {
        let guard = self.resolve_entry_write(&id).await?;
        if !check_move(&guard, &id, direction)? {
            debug!(%id, ?direction, "move at queue boundary ignored");
            return guard.get(&id).cloned().ok_or(EngineError::NotFound(id));
        }
        let event = QueueEvent::Moved {
            id,
            clinic_id: guard.clinic_id,
            direction,
        };
        self.commit(guard, event).await
    }

    /// Patient left before being seen.
    pub async fn remove(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let result = self.remove_inner(id).await;
        record("remove", &result);
        result
    }

    async fn remove_inner(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let guard = self.resolve_entry_write(&id).await?;
        require_status(&guard, &id, QueueStatus::Waiting)?;
        let event = QueueEvent::Removed {
            id,
            clinic_id: guard.clinic_id,
            at: now_ms(),
        };
        self.commit(guard, event).await
    }

    /// A vet takes the patient. Fails with `Conflict` while the vet is still
    /// seeing someone else, in this clinic or any other.
    pub async fn call(&self, id: Ulid, vet_id: Ulid) -> Result<QueueEntry, EngineError> {
        self.call_at(id, vet_id, now_ms()).await
    }

    pub async fn call_at(&self, id: Ulid, vet_id: Ulid, at: Ms) -> Result<QueueEntry, EngineError> {
        let result = self.call_inner(id, vet_id, at).await;
        record("call", &result);
        result
    }

    async fn call_inner(&self, id: Ulid, vet_id: Ulid, at: Ms) -> Result<QueueEntry, EngineError> {
        let guard = self.resolve_entry_write(&id).await?;
        require_status(&guard, &id, QueueStatus::Waiting)?;
        let event = QueueEvent::Called {
            id,
            clinic_id: guard.clinic_id,
            vet_id,
            at,
        };
        self.commit(guard, event).await
    }

    /// Visit finished.
    pub async fn dismiss(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let result = self.dismiss_inner(id).await;
        record("dismiss", &result);
        result
    }

    async fn dismiss_inner(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let guard = self.resolve_entry_write(&id).await?;
        require_status(&guard, &id, QueueStatus::InProgress)?;
        let event = QueueEvent::Dismissed {
            id,
            clinic_id: guard.clinic_id,
            at: now_ms(),
        };
        self.commit(guard, event).await
    }

    /// Compact the WAL to one `Restored` record per entry, terminal ones included.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.clinic_gate.write().await;
        let queues: Vec<_> = self.clinics.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(queues.len());
        for q in &queues {
            guards.push(q.read().await);
        }

        let events: Vec<QueueEvent> = guards
            .iter()
            .flat_map(|g| g.entries().cloned())
            .map(|entry| QueueEvent::Restored { entry })
            .collect();
        let count = events.len();

        // Read guards stay held so no mutation slips in between snapshot and swap.
        self.wal.compact(events).await?;
        drop(guards);

        tracing::info!(entries = count, "queue WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
