use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, QueueEngine};

impl QueueEngine {
    /// Non-terminal entries: waiting in canonical order, then in progress.
    /// Unknown clinics have an empty queue.
    pub async fn list(&self, clinic_id: Ulid) -> Vec<QueueEntry> {
        let Some(queue) = self.clinic(&clinic_id) else {
            return Vec::new();
        };
        let guard = queue.read().await;
        guard.active()
    }

    /// Head of the canonical order: who gets called next.
    pub async fn next(&self, clinic_id: Ulid) -> Option<QueueEntry> {
        let queue = self.clinic(&clinic_id)?;
        let guard = queue.read().await;
        let head = guard.waiting().first().map(|e| (*e).clone());
        head
    }

    pub async fn get(&self, id: Ulid) -> Result<QueueEntry, EngineError> {
        let clinic_id = self.clinic_for_entry(&id).ok_or(EngineError::NotFound(id))?;
        let queue = self.clinic(&clinic_id).ok_or(EngineError::NotFound(clinic_id))?;
        let guard = queue.read().await;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Finished and removed entries, kept for audit.
    pub async fn history(&self, clinic_id: Ulid) -> Vec<QueueEntry> {
        let Some(queue) = self.clinic(&clinic_id) else {
            return Vec::new();
        };
        let guard = queue.read().await;
        guard.terminal()
    }

    /// The entry `vet_id` is currently seeing, in any clinic.
    pub async fn active_visit(&self, vet_id: Ulid) -> Option<QueueEntry> {
        // Copy the id out; never hold a DashMap ref across an await.
        let entry_id = self.active_vets.get(&vet_id).map(|e| *e.value())?;
        let entry = self.get(entry_id).await.ok()?;
        (entry.status == QueueStatus::InProgress).then_some(entry)
    }

    pub async fn has_active_visit(&self, vet_id: Ulid) -> bool {
        self.active_visit(vet_id).await.is_some()
    }

    /// Live queue events for a clinic.
    pub fn subscribe(&self, clinic_id: Ulid) -> broadcast::Receiver<QueueEvent> {
        self.notify.subscribe(clinic_id)
    }
}
