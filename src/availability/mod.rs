mod hours;
mod intervals;

pub use hours::{local_to_ms, parse_hhmm, resolve_workday, workday_span, Workday};
pub use intervals::{
    is_available, merge_overlapping, partition, split_into_slots, subtract_intervals,
};

use std::sync::Arc;
use std::time::Instant;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use futures::future::try_join_all;
use ulid::Ulid;

use crate::error::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::provider::{AppointmentSource, RoomDirectory, WorkingHoursProvider};

/// Clinic-level knobs for availability computation.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub utc_offset: FixedOffset,
    /// Last-resort hours when neither subject nor clinic defines the weekday.
    pub default_hours: Option<WorkingHours>,
    pub slot_minutes: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            default_hours: None,
            slot_minutes: DEFAULT_SLOT_MINUTES,
        }
    }
}

pub(crate) fn validate_slot_minutes(slot_minutes: u32) -> Result<(), EngineError> {
    if slot_minutes == 0 {
        return Err(EngineError::Validation("slot_minutes must be positive".into()));
    }
    if slot_minutes > MAX_SLOT_MINUTES {
        return Err(EngineError::LimitExceeded("slot_minutes longer than a day"));
    }
    Ok(())
}

/// Pure availability computation for an already-resolved workday.
///
/// Deterministic: same inputs, same output. `anchor` is the instant the slot
/// grid is aligned to (local midnight of `date`).
pub fn availability(
    date: NaiveDate,
    subject_id: Option<Ulid>,
    workday: &Span,
    booked: &[BookedInterval],
    slot_minutes: u32,
    anchor: Ms,
) -> AvailabilityResult {
    let spans: Vec<Span> = booked.iter().map(|b| b.span).collect();
    let (free, busy) = partition(workday, &spans);
    let slots = split_into_slots(&free, slot_minutes as Ms * MINUTE_MS, anchor);
    AvailabilityResult {
        date,
        subject_id,
        workday: Some(*workday),
        free,
        busy,
        slots,
        slot_minutes,
        closed_reason: None,
    }
}

/// Free/busy computation for one clinic's vets, rooms and clinic-wide calendar.
///
/// Read-only over the providers: safe for any number of concurrent callers.
pub struct AvailabilityEngine {
    clinic_id: Ulid,
    hours: Arc<dyn WorkingHoursProvider>,
    appointments: Arc<dyn AppointmentSource>,
    rooms: Arc<dyn RoomDirectory>,
    settings: ScheduleSettings,
}

impl AvailabilityEngine {
    pub fn new(
        clinic_id: Ulid,
        hours: Arc<dyn WorkingHoursProvider>,
        appointments: Arc<dyn AppointmentSource>,
        rooms: Arc<dyn RoomDirectory>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            clinic_id,
            hours,
            appointments,
            rooms,
            settings,
        }
    }

    /// Free/busy runs for `subject_id` (clinic-wide when `None`) on `date`.
    pub async fn compute_availability(
        &self,
        date: NaiveDate,
        subject_id: Option<Ulid>,
        slot_minutes: Option<u32>,
    ) -> Result<AvailabilityResult, EngineError> {
        let slot_minutes = slot_minutes.unwrap_or(self.settings.slot_minutes);
        validate_slot_minutes(slot_minutes)?;

        let started = Instant::now();
        let result = self.compute_for_subject(date, subject_id, slot_minutes).await;
        metrics::histogram!(crate::observability::AVAILABILITY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Ok(r) = &result {
            let outcome = if r.is_closed() {
                "closed"
            } else if r.is_fully_booked() {
                "fully_booked"
            } else {
                "open"
            };
            metrics::counter!(crate::observability::AVAILABILITY_TOTAL, "outcome" => outcome)
                .increment(1);
        }
        result
    }

    async fn compute_for_subject(
        &self,
        date: NaiveDate,
        subject_id: Option<Ulid>,
        slot_minutes: u32,
    ) -> Result<AvailabilityResult, EngineError> {
        let subject = subject_id.unwrap_or(self.clinic_id);
        let workday = resolve_workday(
            self.hours.as_ref(),
            self.clinic_id,
            subject,
            date,
            self.settings.default_hours,
        )
        .await?;

        let hours = match workday {
            Workday::Open(hours) => hours,
            Workday::Closed(reason) => {
                tracing::debug!(%date, %subject, %reason, "no workday");
                return Ok(AvailabilityResult::closed(date, subject_id, slot_minutes, reason));
            }
        };

        let offset = &self.settings.utc_offset;
        let span = workday_span(date, &hours, offset)?;
        let booked = self.appointments.list_booked(subject, span).await?;
        if booked.len() > MAX_BOOKED_PER_DAY {
            return Err(EngineError::LimitExceeded("too many booked intervals for one day"));
        }
        let anchor = local_to_ms(date, NaiveTime::MIN, offset)?;

        Ok(availability(date, subject_id, &span, &booked, slot_minutes, anchor))
    }

    /// Availability of every room in the clinic on `date`. Rooms without their
    /// own hours inherit the clinic's.
    pub async fn compute_room_availability(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<RoomAvailability>, EngineError> {
        let room_ids = self.rooms.rooms(self.clinic_id).await?;
        if room_ids.len() > MAX_ROOMS_PER_CLINIC {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let results = try_join_all(
            room_ids
                .iter()
                .map(|room_id| self.compute_availability(date, Some(*room_id), None)),
        )
        .await?;

        Ok(room_ids
            .into_iter()
            .zip(results)
            .map(|(room_id, r)| RoomAvailability {
                room_id,
                closed_reason: r.closed_reason,
                free: r.free,
                busy: r.busy,
            })
            .collect())
    }

    /// Whether `candidate` fits in a single free run of the subject's day.
    pub async fn is_time_available(
        &self,
        date: NaiveDate,
        subject_id: Option<Ulid>,
        candidate: Span,
    ) -> Result<bool, EngineError> {
        let result = self.compute_availability(date, subject_id, None).await?;
        Ok(is_available(&result.free, &candidate))
    }
}
