use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use ulid::Ulid;

use crate::error::EngineError;
use crate::model::*;
use crate::provider::WorkingHoursProvider;

/// Outcome of working-hours resolution for one subject and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workday {
    Open(WorkingHours),
    Closed(ClosedReason),
}

/// Resolve the hours that apply to `subject_id` on `date`.
///
/// Priority: date exception on the subject, the subject's weekday hours, the
/// clinic's weekday hours, then `default_hours`. An explicit `Closed` at any
/// level stops the search.
pub async fn resolve_workday(
    provider: &dyn WorkingHoursProvider,
    clinic_id: Ulid,
    subject_id: Ulid,
    date: NaiveDate,
    default_hours: Option<WorkingHours>,
) -> Result<Workday, EngineError> {
    match provider.exception(subject_id, date).await? {
        Some(DayException::DayOff) => return Ok(Workday::Closed(ClosedReason::DayOff)),
        Some(DayException::Hours(hours)) => return Ok(Workday::Open(hours)),
        None => {}
    }

    let weekday = date.weekday();
    let mut lookup = vec![subject_id];
    if subject_id != clinic_id {
        lookup.push(clinic_id);
    }
    for id in lookup {
        match provider.get(id, weekday).await? {
            Some(DaySchedule::Open(hours)) => return Ok(Workday::Open(hours)),
            Some(DaySchedule::Closed) => return Ok(Workday::Closed(ClosedReason::Closed)),
            None => {}
        }
    }

    Ok(match default_hours {
        Some(hours) => Workday::Open(hours),
        None => Workday::Closed(ClosedReason::NoSchedule),
    })
}

/// Wall-clock time on `date` in the clinic's offset → unix milliseconds.
pub fn local_to_ms(
    date: NaiveDate,
    time: NaiveTime,
    offset: &FixedOffset,
) -> Result<Ms, EngineError> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| EngineError::Validation(format!("unrepresentable local time {date} {time}")))
}

pub fn workday_span(
    date: NaiveDate,
    hours: &WorkingHours,
    offset: &FixedOffset,
) -> Result<Span, EngineError> {
    let start = local_to_ms(date, hours.start(), offset)?;
    let end = local_to_ms(date, hours.end(), offset)?;
    Ok(Span::new(start, end))
}

/// Parse `HH:MM` as used in configuration.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| EngineError::Validation(format!("expected HH:MM, got {value:?}")))
}
