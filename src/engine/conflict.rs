use ulid::Ulid;

use crate::model::*;

use super::store::AllocationSource;
use super::EngineError;

/// Build a candidate span, rejecting empty and inverted bounds.
pub(crate) fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidInterval { start, end });
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First booking that overlaps `candidate`, skipping every booking of
/// `ignore_event`. Touching bookings are not conflicts.
pub fn first_conflict<'a, I>(
    bookings: I,
    candidate: &Span,
    ignore_event: Option<Ulid>,
) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    bookings
        .into_iter()
        .filter(|b| ignore_event != Some(b.event_id))
        .find(|b| candidate.overlaps(&b.span))
}

/// Does any allocation of `resource_id` overlap `candidate`?
///
/// An unknown resource has no allocations and never conflicts.
pub fn has_conflict(
    source: &impl AllocationSource,
    resource_id: &Ulid,
    candidate: &Span,
    ignore_event: Option<Ulid>,
) -> bool {
    metrics::counter!(crate::observability::CONFLICT_CHECKS_TOTAL).increment(1);
    first_conflict(source.bookings_for_resource(resource_id), candidate, ignore_event).is_some()
}

/// Every allocation that overlaps an allocation of a *different* event on the
/// same resource. Both sides of an overlapping pair are reported.
pub fn list_conflicts(source: &impl AllocationSource) -> Vec<Booking> {
    source
        .bookings()
        .filter(|b| has_conflict(source, &b.resource_id, &b.span, Some(b.event_id)))
        .cloned()
        .collect()
}
