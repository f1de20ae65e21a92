use std::path::Path;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use dashmap::DashMap;
use serde::Deserialize;
use ulid::Ulid;

use crate::error::EngineError;
use crate::model::*;

/// Per-subject weekly hours and date exceptions. Subjects are clinics, vets and rooms.
#[async_trait]
pub trait WorkingHoursProvider: Send + Sync {
    /// `None` means nothing is defined for that weekday, so callers fall back.
    async fn get(
        &self,
        subject_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<DaySchedule>, EngineError>;

    async fn exception(
        &self,
        _subject_id: Ulid,
        _date: NaiveDate,
    ) -> Result<Option<DayException>, EngineError> {
        Ok(None)
    }
}

/// Occupied time for a subject. Cancelled appointments are never returned.
#[async_trait]
pub trait AppointmentSource: Send + Sync {
    async fn list_booked(
        &self,
        subject_id: Ulid,
        range: Span,
    ) -> Result<Vec<BookedInterval>, EngineError>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn rooms(&self, clinic_id: Ulid) -> Result<Vec<Ulid>, EngineError>;
}

// ── In-memory calendar ───────────────────────────────────────────

/// Reference-data store backing all three provider traits. Used by the CLI
/// (loaded from JSON) and by tests.
#[derive(Default)]
pub struct InMemoryCalendar {
    hours: DashMap<(Ulid, Weekday), DaySchedule>,
    exceptions: DashMap<(Ulid, NaiveDate), DayException>,
    appointments: DashMap<Ulid, Appointment>,
    blocks: DashMap<Ulid, BookedInterval>,
    rooms: DashMap<Ulid, Vec<Ulid>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hours(&self, subject_id: Ulid, weekday: Weekday, schedule: DaySchedule) {
        self.hours.insert((subject_id, weekday), schedule);
    }

    pub fn set_exception(&self, subject_id: Ulid, date: NaiveDate, exception: DayException) {
        self.exceptions.insert((subject_id, date), exception);
    }

    pub fn add_room(&self, clinic_id: Ulid, room_id: Ulid) {
        let mut rooms = self.rooms.entry(clinic_id).or_default();
        if !rooms.contains(&room_id) {
            rooms.push(room_id);
        }
    }

    pub fn upsert_appointment(&self, appointment: Appointment) -> Result<(), EngineError> {
        if appointment.ends_at <= appointment.starts_at {
            return Err(EngineError::Validation(format!(
                "appointment {} must end after it starts",
                appointment.id
            )));
        }
        self.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    /// Record occupied time that is not an appointment (e.g. a visit in progress).
    pub fn block(&self, subject_id: Ulid, span: Span, kind: BookingKind) -> Ulid {
        let id = Ulid::new();
        self.blocks.insert(id, BookedInterval { subject_id, span, kind });
        id
    }

    pub fn load_json(path: &Path) -> Result<(Self, Ulid), EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Source(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Parse a calendar document. Returns the calendar and its clinic id.
    pub fn from_json(raw: &str) -> Result<(Self, Ulid), EngineError> {
        let file: CalendarFile =
            serde_json::from_str(raw).map_err(|e| EngineError::Validation(e.to_string()))?;
        let calendar = Self::new();
        for h in file.hours {
            calendar.set_hours(h.subject_id, h.weekday, h.schedule);
        }
        for e in file.exceptions {
            calendar.set_exception(e.subject_id, e.date, e.exception);
        }
        for room_id in file.rooms {
            calendar.add_room(file.clinic_id, room_id);
        }
        for appointment in file.appointments {
            calendar.upsert_appointment(appointment)?;
        }
        Ok((calendar, file.clinic_id))
    }
}

#[derive(Deserialize)]
struct CalendarFile {
    clinic_id: Ulid,
    #[serde(default)]
    rooms: Vec<Ulid>,
    #[serde(default)]
    hours: Vec<HoursRecord>,
    #[serde(default)]
    exceptions: Vec<ExceptionRecord>,
    #[serde(default)]
    appointments: Vec<Appointment>,
}

#[derive(Deserialize)]
struct HoursRecord {
    subject_id: Ulid,
    weekday: Weekday,
    schedule: DaySchedule,
}

#[derive(Deserialize)]
struct ExceptionRecord {
    subject_id: Ulid,
    date: NaiveDate,
    exception: DayException,
}

#[async_trait]
impl WorkingHoursProvider for InMemoryCalendar {
    async fn get(
        &self,
        subject_id: Ulid,
        weekday: Weekday,
    ) -> Result<Option<DaySchedule>, EngineError> {
        Ok(self.hours.get(&(subject_id, weekday)).map(|e| *e.value()))
    }

    async fn exception(
        &self,
        subject_id: Ulid,
        date: NaiveDate,
    ) -> Result<Option<DayException>, EngineError> {
        Ok(self.exceptions.get(&(subject_id, date)).map(|e| *e.value()))
    }
}

#[async_trait]
impl AppointmentSource for InMemoryCalendar {
    /// A clinic id matches every appointment in that clinic; a vet or room id
    /// matches the appointments assigned to it.
    async fn list_booked(
        &self,
        subject_id: Ulid,
        range: Span,
    ) -> Result<Vec<BookedInterval>, EngineError> {
        let mut booked: Vec<BookedInterval> = self
            .appointments
            .iter()
            .filter(|a| a.status.occupies_time())
            .filter(|a| {
                a.clinic_id == subject_id || a.vet_id == subject_id || a.room_id == Some(subject_id)
            })
            .map(|a| BookedInterval {
                subject_id,
                span: Span::new(a.starts_at, a.ends_at),
                kind: BookingKind::Appointment,
            })
            .filter(|b| b.span.overlaps(&range))
            .collect();
        booked.extend(
            self.blocks
                .iter()
                .filter(|b| b.subject_id == subject_id && b.span.overlaps(&range))
                .map(|b| b.value().clone()),
        );
        booked.sort_by_key(|b| b.span.start);
        Ok(booked)
    }
}

#[async_trait]
impl RoomDirectory for InMemoryCalendar {
    async fn rooms(&self, clinic_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        Ok(self
            .rooms
            .get(&clinic_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn appointment(clinic_id: Ulid, vet_id: Ulid, room_id: Option<Ulid>, start: Ms, end: Ms) -> Appointment {
        Appointment {
            id: Ulid::new(),
            clinic_id,
            vet_id,
            room_id,
            starts_at: start,
            ends_at: end,
            status: AppointmentStatus::Scheduled,
        }
    }

    #[tokio::test]
    async fn list_booked_filters_by_subject() {
        let cal = InMemoryCalendar::new();
        let clinic = Ulid::new();
        let vet_a = Ulid::new();
        let vet_b = Ulid::new();
        let room = Ulid::new();
        cal.upsert_appointment(appointment(clinic, vet_a, Some(room), 9 * H, 10 * H)).unwrap();
        cal.upsert_appointment(appointment(clinic, vet_b, None, 11 * H, 12 * H)).unwrap();

        let day = Span::new(0, 24 * H);
        assert_eq!(cal.list_booked(vet_a, day).await.unwrap().len(), 1);
        assert_eq!(cal.list_booked(room, day).await.unwrap().len(), 1);
        assert_eq!(cal.list_booked(clinic, day).await.unwrap().len(), 2);
        assert!(cal.list_booked(Ulid::new(), day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_appointments_are_not_busy() {
        let cal = InMemoryCalendar::new();
        let clinic = Ulid::new();
        let vet = Ulid::new();
        let mut a = appointment(clinic, vet, None, 9 * H, 10 * H);
        a.status = AppointmentStatus::Cancelled;
        cal.upsert_appointment(a).unwrap();
        let mut b = appointment(clinic, vet, None, 10 * H, 11 * H);
        b.status = AppointmentStatus::NoShow;
        cal.upsert_appointment(b).unwrap();

        let booked = cal.list_booked(vet, Span::new(0, 24 * H)).await.unwrap();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].span, Span::new(10 * H, 11 * H));
    }

    #[tokio::test]
    async fn list_booked_respects_range_half_open() {
        let cal = InMemoryCalendar::new();
        let clinic = Ulid::new();
        let vet = Ulid::new();
        cal.upsert_appointment(appointment(clinic, vet, None, 9 * H, 10 * H)).unwrap();
        let booked = cal.list_booked(vet, Span::new(10 * H, 11 * H)).await.unwrap();
        assert!(booked.is_empty());
    }

    #[tokio::test]
    async fn blocks_are_reported_with_their_kind() {
        let cal = InMemoryCalendar::new();
        let vet = Ulid::new();
        cal.block(vet, Span::new(H, 2 * H), BookingKind::Visit);
        let booked = cal.list_booked(vet, Span::new(0, 24 * H)).await.unwrap();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].kind, BookingKind::Visit);
    }

    #[test]
    fn inverted_appointment_rejected() {
        let cal = InMemoryCalendar::new();
        let mut a = appointment(Ulid::new(), Ulid::new(), None, 10 * H, 11 * H);
        a.ends_at = a.starts_at;
        assert!(matches!(cal.upsert_appointment(a), Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn load_calendar_from_json() {
        let clinic = Ulid::new();
        let vet = Ulid::new();
        let room = Ulid::new();
        let raw = format!(
            r#"{{
                "clinic_id": "{clinic}",
                "rooms": ["{room}"],
                "hours": [
                    {{"subject_id": "{clinic}", "weekday": "Mon", "schedule": {{"open": {{"start": "08:00:00", "end": "18:00:00"}}}}}},
                    {{"subject_id": "{clinic}", "weekday": "Sun", "schedule": "closed"}}
                ],
                "exceptions": [
                    {{"subject_id": "{vet}", "date": "2026-10-19", "exception": "day_off"}}
                ],
                "appointments": [
                    {{"id": "{id}", "clinic_id": "{clinic}", "vet_id": "{vet}", "starts_at": 1000, "ends_at": 2000, "status": "confirmed"}}
                ]
            }}"#,
            id = Ulid::new()
        );
        let (cal, clinic_id) = InMemoryCalendar::from_json(&raw).unwrap();
        assert_eq!(clinic_id, clinic);
        assert_eq!(cal.rooms(clinic).await.unwrap(), vec![room]);
        assert_eq!(
            cal.get(clinic, Weekday::Mon).await.unwrap(),
            Some(DaySchedule::Open(WorkingHours::hm((8, 0), (18, 0)).unwrap()))
        );
        assert_eq!(cal.get(clinic, Weekday::Sun).await.unwrap(), Some(DaySchedule::Closed));
        assert_eq!(cal.get(clinic, Weekday::Tue).await.unwrap(), None);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(cal.exception(vet, date).await.unwrap(), Some(DayException::DayOff));
        assert_eq!(cal.list_booked(vet, Span::new(0, 10_000)).await.unwrap().len(), 1);
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let result = InMemoryCalendar::from_json("{\"rooms\": []}");
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
