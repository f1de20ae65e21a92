use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::EngineError;

/// Unix milliseconds. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `bounds`, or `None` when they do not overlap.
    pub fn clamp_to(&self, bounds: &Span) -> Option<Span> {
        let start = self.start.max(bounds.start);
        let end = self.end.min(bounds.end);
        (start < end).then(|| Span::new(start, end))
    }
}

// ── Calendar reference data ──────────────────────────────────────

/// Wall-clock opening hours for one weekday. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHours")]
pub struct WorkingHours {
    start: NaiveTime,
    end: NaiveTime,
}

#[derive(Deserialize)]
struct RawHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl TryFrom<RawHours> for WorkingHours {
    type Error = EngineError;

    fn try_from(raw: RawHours) -> Result<Self, Self::Error> {
        WorkingHours::new(raw.start, raw.end)
    }
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "working hours must end after they start ({start} >= {end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Convenience constructor for whole `HH:MM` values.
    pub fn hm(start: (u32, u32), end: (u32, u32)) -> Result<Self, EngineError> {
        let to_time = |(h, m): (u32, u32)| {
            NaiveTime::from_hms_opt(h, m, 0)
                .ok_or_else(|| EngineError::Validation(format!("invalid time {h:02}:{m:02}")))
        };
        Self::new(to_time(start)?, to_time(end)?)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

/// What a provider knows about one subject on one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySchedule {
    Open(WorkingHours),
    Closed,
}

/// One-off override for a subject on a specific date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayException {
    DayOff,
    Hours(WorkingHours),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Appointment,
    Visit,
}

/// An occupied interval on a vet, room or clinic calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedInterval {
    pub subject_id: Ulid,
    pub span: Span,
    pub kind: BookingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Cancelled appointments free their time; every other status keeps it.
    pub fn occupies_time(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub vet_id: Ulid,
    #[serde(default)]
    pub room_id: Option<Ulid>,
    pub starts_at: Ms,
    pub ends_at: Ms,
    pub status: AppointmentStatus,
}

// ── Availability results ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClosedReason {
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "day off")]
    DayOff,
    #[serde(rename = "no schedule")]
    NoSchedule,
}

impl ClosedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosedReason::Closed => "closed",
            ClosedReason::DayOff => "day off",
            ClosedReason::NoSchedule => "no schedule",
        }
    }
}

impl std::fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub date: NaiveDate,
    pub subject_id: Option<Ulid>,
    pub workday: Option<Span>,
    /// Maximal free runs inside the workday.
    pub free: Vec<Span>,
    /// Merged busy runs, clamped to the workday.
    pub busy: Vec<Span>,
    /// `slot_minutes` candidates carved out of `free`.
    pub slots: Vec<Span>,
    pub slot_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<ClosedReason>,
}

impl AvailabilityResult {
    pub fn closed(
        date: NaiveDate,
        subject_id: Option<Ulid>,
        slot_minutes: u32,
        reason: ClosedReason,
    ) -> Self {
        Self {
            date,
            subject_id,
            workday: None,
            free: Vec::new(),
            busy: Vec::new(),
            slots: Vec::new(),
            slot_minutes,
            closed_reason: Some(reason),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.workday.is_none()
    }

    /// Open day with no free time left. Distinct from a closed day.
    pub fn is_fully_booked(&self) -> bool {
        self.workday.is_some() && self.free.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomAvailability {
    pub room_id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<ClosedReason>,
    pub free: Vec<Span>,
    pub busy: Vec<Span>,
}

// ── Waiting-room queue ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    InProgress,
    Done,
    Removed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Done | QueueStatus::Removed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Done => "done",
            QueueStatus::Removed => "removed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Ulid,
    pub patient_id: Ulid,
    pub clinic_id: Ulid,
    pub chief_complaint: String,
    pub is_urgent: bool,
    pub status: QueueStatus,
    /// Dense rank among the clinic's waiting entries. Meaningless once called.
    pub position: u32,
    pub arrived_at: Ms,
    pub called_by: Option<Ulid>,
    pub called_at: Option<Ms>,
    /// Set when the entry reaches `done` or `removed`.
    pub finished_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// Queue transitions, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEvent {
    Added {
        id: Ulid,
        clinic_id: Ulid,
        patient_id: Ulid,
        chief_complaint: String,
        is_urgent: bool,
        arrived_at: Ms,
    },
    Moved {
        id: Ulid,
        clinic_id: Ulid,
        direction: Direction,
    },
    Called {
        id: Ulid,
        clinic_id: Ulid,
        vet_id: Ulid,
        at: Ms,
    },
    Dismissed {
        id: Ulid,
        clinic_id: Ulid,
        at: Ms,
    },
    Removed {
        id: Ulid,
        clinic_id: Ulid,
        at: Ms,
    },
    /// Snapshot record written by compaction.
    Restored {
        entry: QueueEntry,
    },
}

impl QueueEvent {
    pub fn clinic_id(&self) -> Ulid {
        match self {
            QueueEvent::Added { clinic_id, .. }
            | QueueEvent::Moved { clinic_id, .. }
            | QueueEvent::Called { clinic_id, .. }
            | QueueEvent::Dismissed { clinic_id, .. }
            | QueueEvent::Removed { clinic_id, .. } => *clinic_id,
            QueueEvent::Restored { entry } => entry.clinic_id,
        }
    }

    pub fn entry_id(&self) -> Ulid {
        match self {
            QueueEvent::Added { id, .. }
            | QueueEvent::Moved { id, .. }
            | QueueEvent::Called { id, .. }
            | QueueEvent::Dismissed { id, .. }
            | QueueEvent::Removed { id, .. } => *id,
            QueueEvent::Restored { entry } => entry.id,
        }
    }
}
