use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::EngineError;
use crate::limits::OVERLAP_WINDOW_MS;
use crate::model::*;
use crate::provider::AppointmentSource;
use crate::queue::{now_ms, QueueEngine};

/// Result of calling a walk-in through the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallOutcome {
    pub entry: QueueEntry,
    /// The vet has a scheduled appointment covering the call time.
    /// Informational only; the call has already gone through.
    pub overlaps_scheduled_appointment: bool,
}

/// Ties the waiting-room queue to the vets' appointment books.
pub struct VisitOrchestrator {
    queue: Arc<QueueEngine>,
    appointments: Arc<dyn AppointmentSource>,
}

impl VisitOrchestrator {
    pub fn new(queue: Arc<QueueEngine>, appointments: Arc<dyn AppointmentSource>) -> Self {
        Self { queue, appointments }
    }

    pub async fn call(&self, id: Ulid, vet_id: Ulid) -> Result<CallOutcome, EngineError> {
        self.call_at(id, vet_id, now_ms()).await
    }

    /// Call `id` for `vet_id` at `at`. Queue errors (`NotFound`,
    /// `InvalidState`, `Conflict`) pass through untouched; an overlapping
    /// appointment never blocks the call.
    pub async fn call_at(
        &self,
        id: Ulid,
        vet_id: Ulid,
        at: Ms,
    ) -> Result<CallOutcome, EngineError> {
        let overlaps = self.overlaps_appointment(vet_id, at).await;
        let entry = self.queue.call_at(id, vet_id, at).await?;

        if overlaps {
            metrics::counter!(crate::observability::VISIT_OVERLAP_WARNINGS_TOTAL).increment(1);
            info!(%id, %vet_id, "walk-in called during a scheduled appointment");
        }
        Ok(CallOutcome {
            entry,
            overlaps_scheduled_appointment: overlaps,
        })
    }

    pub async fn has_active_visit(&self, vet_id: Ulid) -> bool {
        self.queue.has_active_visit(vet_id).await
    }

    async fn overlaps_appointment(&self, vet_id: Ulid, at: Ms) -> bool {
        let window = Span::new(at, at + OVERLAP_WINDOW_MS);
        match self.appointments.list_booked(vet_id, window).await {
            Ok(booked) => booked
                .iter()
                .any(|b| b.kind == BookingKind::Appointment && b.span.contains_instant(at)),
            Err(e) => {
                warn!(%vet_id, error = %e, "appointment lookup failed, skipping overlap check");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use crate::provider::InMemoryCalendar;
    use async_trait::async_trait;
    use std::path::PathBuf;

    const HOUR: Ms = 60 * MINUTE_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("vetdesk_test_visit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn queue(name: &str) -> Arc<QueueEngine> {
        Arc::new(QueueEngine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap())
    }

    fn appointment(clinic_id: Ulid, vet_id: Ulid, start: Ms, end: Ms, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            clinic_id,
            vet_id,
            room_id: None,
            starts_at: start,
            ends_at: end,
            status,
        }
    }

    struct FailingSource;

    #[async_trait]
    impl AppointmentSource for FailingSource {
        async fn list_booked(&self, _subject_id: Ulid, _range: Span) -> Result<Vec<BookedInterval>, EngineError> {
            Err(EngineError::Source("calendar offline".into()))
        }
    }

    #[tokio::test]
    async fn call_during_appointment_warns_but_succeeds() {
        let queue = queue("overlap_warns.wal");
        let calendar = Arc::new(InMemoryCalendar::new());
        let clinic = Ulid::new();
        let vet = Ulid::new();
        calendar
            .upsert_appointment(appointment(clinic, vet, 10 * HOUR, 11 * HOUR, AppointmentStatus::Confirmed))
            .unwrap();
        let orchestrator = VisitOrchestrator::new(queue.clone(), calendar);

        let entry = queue.add(clinic, Ulid::new(), "limping".into(), true).await.unwrap();
        let outcome = orchestrator.call_at(entry.id, vet, 10 * HOUR + 5 * MINUTE_MS).await.unwrap();
        assert!(outcome.overlaps_scheduled_appointment);
        assert_eq!(outcome.entry.status, QueueStatus::InProgress);
        assert_eq!(outcome.entry.called_at, Some(10 * HOUR + 5 * MINUTE_MS));
        assert!(orchestrator.has_active_visit(vet).await);
    }

    #[tokio::test]
    async fn appointment_end_is_not_an_overlap() {
        let queue = queue("overlap_boundary.wal");
        let calendar = Arc::new(InMemoryCalendar::new());
        let clinic = Ulid::new();
        let vet = Ulid::new();
        calendar
            .upsert_appointment(appointment(clinic, vet, 10 * HOUR, 11 * HOUR, AppointmentStatus::Scheduled))
            .unwrap();
        let orchestrator = VisitOrchestrator::new(queue.clone(), calendar);

        let entry = queue.add(clinic, Ulid::new(), String::new(), false).await.unwrap();
        let outcome = orchestrator.call_at(entry.id, vet, 11 * HOUR).await.unwrap();
        assert!(!outcome.overlaps_scheduled_appointment);
    }

    #[tokio::test]
    async fn cancelled_appointment_and_visit_blocks_do_not_warn() {
        let queue = queue("overlap_ignored.wal");
        let calendar = Arc::new(InMemoryCalendar::new());
        let clinic = Ulid::new();
        let vet = Ulid::new();
        calendar
            .upsert_appointment(appointment(clinic, vet, 9 * HOUR, 12 * HOUR, AppointmentStatus::Cancelled))
            .unwrap();
        calendar.block(vet, Span::new(9 * HOUR, 12 * HOUR), BookingKind::Visit);
        let orchestrator = VisitOrchestrator::new(queue.clone(), calendar);

        let entry = queue.add(clinic, Ulid::new(), String::new(), false).await.unwrap();
        let outcome = orchestrator.call_at(entry.id, vet, 10 * HOUR).await.unwrap();
        assert!(!outcome.overlaps_scheduled_appointment);
    }

    #[tokio::test]
    async fn source_failure_does_not_block_call() {
        let queue = queue("overlap_source_down.wal");
        let orchestrator = VisitOrchestrator::new(queue.clone(), Arc::new(FailingSource));
        let entry = queue.add(Ulid::new(), Ulid::new(), "bleeding".into(), true).await.unwrap();

        let outcome = orchestrator.call(entry.id, Ulid::new()).await.unwrap();
        assert!(!outcome.overlaps_scheduled_appointment);
        assert_eq!(outcome.entry.status, QueueStatus::InProgress);
    }

    #[tokio::test]
    async fn queue_conflict_passes_through() {
        let queue = queue("orchestrator_conflict.wal");
        let orchestrator = VisitOrchestrator::new(queue.clone(), Arc::new(InMemoryCalendar::new()));
        let clinic = Ulid::new();
        let vet = Ulid::new();
        let a = queue.add(clinic, Ulid::new(), String::new(), false).await.unwrap();
        let b = queue.add(clinic, Ulid::new(), String::new(), false).await.unwrap();

        orchestrator.call(a.id, vet).await.unwrap();
        let second = orchestrator.call(b.id, vet).await;
        assert!(matches!(second, Err(EngineError::Conflict { .. })));

        queue.dismiss(a.id).await.unwrap();
        assert!(!orchestrator.has_active_visit(vet).await);
        assert!(orchestrator.call(b.id, vet).await.is_ok());
    }

    #[tokio::test]
    async fn vet_seeing_a_patient_elsewhere_cannot_be_called() {
        let queue = queue("orchestrator_two_clinics.wal");
        let orchestrator = VisitOrchestrator::new(queue.clone(), Arc::new(InMemoryCalendar::new()));
        let vet = Ulid::new();
        let downtown = queue.add(Ulid::new(), Ulid::new(), String::new(), false).await.unwrap();
        let uptown = queue.add(Ulid::new(), Ulid::new(), String::new(), false).await.unwrap();

        orchestrator.call(downtown.id, vet).await.unwrap();
        assert!(orchestrator.has_active_visit(vet).await);

        let elsewhere = orchestrator.call(uptown.id, vet).await;
        assert!(matches!(
            elsewhere,
            Err(EngineError::Conflict { active_entry, .. }) if active_entry == downtown.id
        ));
        assert_eq!(queue.get(uptown.id).await.unwrap().status, QueueStatus::Waiting);
    }
}
