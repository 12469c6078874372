use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    /// Carries the allocation that blocks the request.
    Conflict(Ulid),
    DuplicateAllocation {
        event_id: Ulid,
        resource_id: Ulid,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::Conflict(id) => write!(f, "conflict with allocation: {id}"),
            EngineError::DuplicateAllocation {
                event_id,
                resource_id,
            } => {
                write!(
                    f,
                    "resource {resource_id} is already allocated to event {event_id}"
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
