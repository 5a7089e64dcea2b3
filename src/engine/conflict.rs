use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::Validation("range start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(())
}

/// Pure conflict check against a property's active holds. Deterministic,
/// no I/O; the hold slice is assumed sorted by span.start.
pub fn find_conflict<'a>(
    holds: &'a [Hold],
    candidate: &Span,
    kind: BookingKind,
    inspection_gap: Ms,
) -> Option<&'a Hold> {
    // Widen the search window by the inspection gap so slots whose spans
    // don't touch the candidate but whose starts sit within the gap are
    // still examined.
    let right_bound = holds.partition_point(|h| h.span.start < candidate.end + inspection_gap);
    holds[..right_bound]
        .iter()
        .filter(|h| h.span.end > candidate.start - inspection_gap)
        .find(|h| h.conflicts_with(candidate, kind, inspection_gap))
}

pub(crate) fn check_no_conflict(
    ps: &PropertyState,
    candidate: &Span,
    kind: BookingKind,
    inspection_gap: Ms,
) -> Result<(), EngineError> {
    match find_conflict(&ps.holds, candidate, kind, inspection_gap) {
        Some(hold) => Err(EngineError::Conflict { span: hold.span }),
        None => Ok(()),
    }
}
