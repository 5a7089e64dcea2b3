//! The booking state machine. Every status write in the engine flows
//! through `next_status` — there is no other mutation path.

use crate::model::BookingStatus;

use super::EngineError;

/// A requested lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Approve,
    Reject,
    Cancel,
    Complete,
    Expire,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::Approve => "approve",
            BookingEvent::Reject => "reject",
            BookingEvent::Cancel => "cancel",
            BookingEvent::Complete => "complete",
            BookingEvent::Expire => "expire",
        }
    }

    /// Map a caller-requested target status onto the event that reaches it.
    /// `pending` and `expired` are not reachable on request: the former is
    /// the initial status, the latter is sweeper-driven.
    pub fn for_target_status(status: BookingStatus) -> Option<Self> {
        match status {
            BookingStatus::Confirmed => Some(BookingEvent::Approve),
            BookingStatus::Rejected => Some(BookingEvent::Reject),
            BookingStatus::Cancelled => Some(BookingEvent::Cancel),
            BookingStatus::Completed => Some(BookingEvent::Complete),
            BookingStatus::Pending | BookingStatus::Expired => None,
        }
    }
}

impl std::fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. Anything not listed is an `InvalidTransition`
/// and leaves the booking untouched.
pub fn next_status(from: BookingStatus, event: BookingEvent) -> Result<BookingStatus, EngineError> {
    use BookingEvent::*;
    use BookingStatus::*;
    match (from, event) {
        (Pending, Approve) => Ok(Confirmed),
        (Pending, Reject) => Ok(Rejected),
        (Pending, Cancel) => Ok(Cancelled),
        (Pending, Expire) => Ok(Expired),
        (Confirmed, Cancel) => Ok(Cancelled),
        (Confirmed, Complete) => Ok(Completed),
        (from, event) => Err(EngineError::InvalidTransition { from, event }),
    }
}
