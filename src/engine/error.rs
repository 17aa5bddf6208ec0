use ulid::Ulid;

use crate::model::{AllocationStatus, Day, Gender};

#[derive(Debug)]
pub enum EngineError {
    InvalidInput {
        field: &'static str,
        reason: String,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Every date that already carries an active or blocked allocation.
    Conflict {
        room_id: Ulid,
        dates: Vec<Day>,
    },
    GenderConflict {
        date: Day,
        existing: Gender,
    },
    InvalidTransition {
        from: AllocationStatus,
        to: AllocationStatus,
    },
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    /// The unit of work could not be made durable; nothing was applied.
    TransactionFailure(String),
}

impl EngineError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput { field, reason } => {
                write!(f, "invalid input for {field}: {reason}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { room_id, dates } => {
                let list: Vec<String> = dates.iter().map(|d| d.to_string()).collect();
                write!(
                    f,
                    "room {room_id} already allocated on: {}",
                    list.join(", ")
                )
            }
            EngineError::GenderConflict { date, existing } => {
                write!(f, "gender conflict on {date}: room is occupied by {existing} occupant")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::Forbidden(cap) => write!(f, "permission denied: requires {cap}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::TransactionFailure(e) => write!(f, "transaction failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
