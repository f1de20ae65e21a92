use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use vetdesk::availability::{AvailabilityEngine, ScheduleSettings};
use vetdesk::compactor;
use vetdesk::error::EngineError;
use vetdesk::model::*;
use vetdesk::notify::NotifyHub;
use vetdesk::provider::InMemoryCalendar;
use vetdesk::queue::QueueEngine;
use vetdesk::visit::VisitOrchestrator;

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vetdesk_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
}

fn at(hour: u32, minute: u32) -> Ms {
    monday().and_hms_opt(hour, minute, 0).unwrap().and_utc().timestamp_millis()
}

struct Clinic {
    id: Ulid,
    vet: Ulid,
    room: Ulid,
    calendar: Arc<InMemoryCalendar>,
}

/// Clinic open 08:00-18:00 on Mondays, one vet with a 10:00-10:30 consult in the only room.
fn clinic(dir: &std::path::Path) -> Clinic {
    let id = Ulid::new();
    let vet = Ulid::new();
    let room = Ulid::new();
    let raw = format!(
        r#"{{
            "clinic_id": "{id}",
            "rooms": ["{room}"],
            "hours": [
                {{"subject_id": "{id}", "weekday": "Mon", "schedule": {{"open": {{"start": "08:00:00", "end": "18:00:00"}}}}}}
            ],
            "appointments": [
                {{"id": "{appt}", "clinic_id": "{id}", "vet_id": "{vet}", "room_id": "{room}",
                  "starts_at": {start}, "ends_at": {end}, "status": "confirmed"}},
                {{"id": "{cancelled}", "clinic_id": "{id}", "vet_id": "{vet}",
                  "starts_at": {c_start}, "ends_at": {c_end}, "status": "cancelled"}}
            ]
        }}"#,
        appt = Ulid::new(),
        cancelled = Ulid::new(),
        start = at(10, 0),
        end = at(10, 30),
        c_start = at(14, 0),
        c_end = at(15, 0),
    );
    let path = dir.join("calendar.json");
    std::fs::write(&path, raw).unwrap();

    let (calendar, clinic_id) = InMemoryCalendar::load_json(&path).unwrap();
    assert_eq!(clinic_id, id);
    Clinic {
        id,
        vet,
        room,
        calendar: Arc::new(calendar),
    }
}

fn availability(clinic: &Clinic) -> AvailabilityEngine {
    AvailabilityEngine::new(
        clinic.id,
        clinic.calendar.clone(),
        clinic.calendar.clone(),
        clinic.calendar.clone(),
        ScheduleSettings::default(),
    )
}

fn open_queue(dir: &std::path::Path) -> Arc<QueueEngine> {
    Arc::new(QueueEngine::new(dir.join("queue.wal"), Arc::new(NotifyHub::new())).unwrap())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn vet_day_from_calendar_file() {
    let dir = test_dir();
    let clinic = clinic(&dir);
    let engine = availability(&clinic);

    let day = engine.compute_availability(monday(), Some(clinic.vet), None).await.unwrap();
    assert_eq!(day.workday, Some(Span::new(at(8, 0), at(18, 0))));
    assert_eq!(day.busy, vec![Span::new(at(10, 0), at(10, 30))]);
    assert_eq!(
        day.free,
        vec![Span::new(at(8, 0), at(10, 0)), Span::new(at(10, 30), at(18, 0))]
    );
    assert_eq!(day.slots.len(), 19);
    assert!(engine
        .is_time_available(monday(), Some(clinic.vet), Span::new(at(14, 0), at(15, 0)))
        .await
        .unwrap());

    let rooms = engine.compute_room_availability(monday()).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, clinic.room);
    assert_eq!(rooms[0].busy, day.busy);

    let tuesday = monday().succ_opt().unwrap();
    let closed = engine.compute_availability(tuesday, None, None).await.unwrap();
    assert_eq!(closed.closed_reason, Some(ClosedReason::NoSchedule));
    assert!(closed.free.is_empty());
}

#[tokio::test]
async fn walk_in_called_during_consult_is_flagged() {
    let dir = test_dir();
    let clinic = clinic(&dir);
    let queue = open_queue(&dir);
    let orchestrator = VisitOrchestrator::new(queue.clone(), clinic.calendar.clone());
    let mut events = queue.subscribe(clinic.id);

    let routine = queue.add(clinic.id, Ulid::new(), "annual shots".into(), false).await.unwrap();
    let emergency = queue.add(clinic.id, Ulid::new(), "hit by car".into(), true).await.unwrap();
    assert_eq!(queue.next(clinic.id).await.unwrap().id, emergency.id);

    let outcome = orchestrator.call_at(emergency.id, clinic.vet, at(10, 10)).await.unwrap();
    assert!(outcome.overlaps_scheduled_appointment);
    assert!(orchestrator.has_active_visit(clinic.vet).await);

    let blocked = orchestrator.call_at(routine.id, clinic.vet, at(10, 40)).await;
    assert!(matches!(blocked, Err(EngineError::Conflict { .. })));

    queue.dismiss(emergency.id).await.unwrap();
    let outcome = orchestrator.call_at(routine.id, clinic.vet, at(10, 40)).await.unwrap();
    assert!(!outcome.overlaps_scheduled_appointment);

    let mut kinds = Vec::new();
    while kinds.len() < 5 {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("queue event not delivered")
            .unwrap();
        kinds.push(match event {
            QueueEvent::Added { .. } => "added",
            QueueEvent::Called { .. } => "called",
            QueueEvent::Dismissed { .. } => "dismissed",
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["added", "added", "called", "dismissed", "called"]);
}

#[tokio::test]
async fn queue_survives_restart_and_compaction() {
    let dir = test_dir();
    let clinic_id = Ulid::new();
    let vet = Ulid::new();

    let (list, history) = {
        let queue = open_queue(&dir);
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(queue.add(clinic_id, Ulid::new(), String::new(), i == 4).await.unwrap().id);
        }
        queue.remove(ids[0]).await.unwrap();
        queue.move_up(ids[3]).await.unwrap();
        queue.call(ids[1], vet).await.unwrap();
        assert!(compactor::compact_if_needed(&queue, 5).await);
        queue.move_down(ids[5]).await.unwrap();
        queue.add(clinic_id, Ulid::new(), "after compaction".into(), false).await.unwrap();
        (queue.list(clinic_id).await, queue.history(clinic_id).await)
    };

    let queue = open_queue(&dir);
    assert_eq!(queue.list(clinic_id).await, list);
    assert_eq!(queue.history(clinic_id).await, history);
    assert!(queue.has_active_visit(vet).await);

    let positions: Vec<u32> = list
        .iter()
        .filter(|e| e.status == QueueStatus::Waiting)
        .map(|e| e.position)
        .collect();
    assert_eq!(positions, (0..positions.len() as u32).collect::<Vec<_>>());
    assert!(list[0].is_urgent);
}
