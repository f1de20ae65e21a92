use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::availability::{parse_hhmm, ScheduleSettings};
use crate::error::EngineError;
use crate::limits::DEFAULT_SLOT_MINUTES;
use crate::model::WorkingHours;

const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|s| s.trim().parse().ok())
}

/// Runtime settings, read once from `VETDESK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub slot_minutes: u32,
    pub utc_offset_minutes: i32,
    pub default_hours: Option<WorkingHours>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub calendar: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to their defaults. Default hours must be
    /// given as a valid `HH:MM` pair or not at all.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let default_hours = match (var("VETDESK_DEFAULT_OPEN"), var("VETDESK_DEFAULT_CLOSE")) {
            (None, None) => None,
            (Some(open), Some(close)) => {
                Some(WorkingHours::new(parse_hhmm(&open)?, parse_hhmm(&close)?)?)
            }
            _ => {
                return Err(EngineError::Validation(
                    "VETDESK_DEFAULT_OPEN and VETDESK_DEFAULT_CLOSE must be set together".into(),
                ));
            }
        };

        Ok(Self {
            data_dir: var("VETDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            slot_minutes: parsed(&var, "VETDESK_SLOT_MINUTES").unwrap_or(DEFAULT_SLOT_MINUTES),
            utc_offset_minutes: parsed(&var, "VETDESK_UTC_OFFSET_MINUTES").unwrap_or(0),
            default_hours,
            compact_threshold: parsed(&var, "VETDESK_COMPACT_THRESHOLD")
                .unwrap_or(DEFAULT_COMPACT_THRESHOLD),
            metrics_port: parsed(&var, "VETDESK_METRICS_PORT"),
            calendar: var("VETDESK_CALENDAR").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("queue.wal")
    }

    pub fn schedule_settings(&self) -> Result<ScheduleSettings, EngineError> {
        let utc_offset = self
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "utc offset out of range: {} minutes",
                    self.utc_offset_minutes
                ))
            })?;
        Ok(ScheduleSettings {
            utc_offset,
            default_hours: self.default_hours,
            slot_minutes: self.slot_minutes,
        })
    }
}
