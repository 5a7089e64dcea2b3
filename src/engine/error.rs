use ulid::Ulid;

use crate::model::{BookingStatus, Span};

use super::lifecycle::BookingEvent;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed input, rejected before any shared state is touched.
    Validation(&'static str),
    /// The requested range overlaps an active hold. Carries only the
    /// conflicting span — never the other party's booking record.
    Conflict { span: Span },
    InvalidTransition {
        from: BookingStatus,
        event: BookingEvent,
    },
    HasActiveHolds(Ulid),
    /// Transient: the per-property lock could not be acquired in time.
    Busy(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict { span } => {
                write!(f, "range conflicts with an existing hold [{}, {})", span.start, span.end)
            }
            EngineError::InvalidTransition { from, event } => {
                write!(f, "cannot {event} a {from} booking")
            }
            EngineError::HasActiveHolds(id) => {
                write!(f, "cannot remove property {id}: active holds exist")
            }
            EngineError::Busy(what) => write!(f, "busy: {what} contended, retry"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
