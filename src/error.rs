use ulid::Ulid;

use crate::model::QueueStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    InvalidState {
        id: Ulid,
        required: QueueStatus,
        actual: QueueStatus,
    },
    /// The move would put a non-urgent entry ahead of an urgent one.
    OrderingViolation(Ulid),
    /// The vet is already seeing `active_entry`.
    Conflict {
        vet_id: Ulid,
        active_entry: Ulid,
    },
    Validation(String),
    LimitExceeded(&'static str),
    /// A working-hours or appointment provider failed.
    Source(String),
    WalError(String),
    /// Queue state broke an invariant after a transition.
    Corrupted(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidState {
                id,
                required,
                actual,
            } => write!(f, "entry {id} must be {required}, but is {actual}"),
            EngineError::OrderingViolation(id) => {
                write!(f, "moving {id} would place a non-urgent entry before an urgent one")
            }
            EngineError::Conflict {
                vet_id,
                active_entry,
            } => write!(f, "vet {vet_id} already has an active visit: {active_entry}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Source(msg) => write!(f, "calendar source error: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Corrupted(msg) => write!(f, "queue invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Short stable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::OrderingViolation(_) => "ordering_violation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Validation(_) => "validation",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Source(_) => "source",
            EngineError::WalError(_) => "wal",
            EngineError::Corrupted(_) => "corrupted",
        }
    }
}
