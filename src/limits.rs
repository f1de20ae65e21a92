use crate::model::Ms;

pub const MAX_COMPLAINT_LEN: usize = 500;
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;
/// Non-terminal (waiting + in progress) entries per clinic.
pub const MAX_ACTIVE_ENTRIES_PER_CLINIC: usize = 500;
pub const MAX_ROOMS_PER_CLINIC: usize = 256;
/// Booked intervals accepted from one appointment source call.
pub const MAX_BOOKED_PER_DAY: usize = 10_000;
pub const DEFAULT_SLOT_MINUTES: u32 = 30;
/// Span used when asking "what is booked right now".
pub const OVERLAP_WINDOW_MS: Ms = 1;
/// Upper bound on one encoded queue event. Apart from the complaint, a record
/// is a handful of ids, flags and timestamps.
pub const MAX_WAL_RECORD_BYTES: usize = MAX_COMPLAINT_LEN + 1024;
