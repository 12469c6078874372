use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The part of `self` that falls inside `window`, if any. Empty or
    /// inverted intersections (touching spans, inverted windows) are `None`.
    pub fn clip_to(&self, window: &Span) -> Option<Span> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then(|| Span::new(start, end))
    }
}

/// Something happening over a span of time that resources get booked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: Ulid,
    pub title: String,
    pub description: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    /// Free-form category ("room", "projector", ...). Never interpreted.
    pub kind: String,
}

/// Raw allocation row: this resource is committed to this event for the event's full span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationInfo {
    pub id: Ulid,
    pub event_id: Ulid,
    pub resource_id: Ulid,
}

/// An allocation resolved against its event. This is what conflict checks and
/// utilization reports operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub allocation_id: Ulid,
    pub event_id: Ulid,
    pub resource_id: Ulid,
    pub title: String,
    pub span: Span,
}

impl Booking {
    pub fn allocation(&self) -> AllocationInfo {
        AllocationInfo {
            id: self.allocation_id,
            event_id: self.event_id,
            resource_id: self.resource_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub kind: String,
    /// Allocations of this resource in the order they were created.
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String, kind: String) -> Self {
        Self {
            id,
            name,
            kind,
            bookings: Vec::new(),
        }
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
        }
    }

    pub fn push_booking(&mut self, booking: Booking) {
        self.bookings.push(booking);
    }

    pub fn holds_event(&self, event_id: Ulid) -> bool {
        self.bookings.iter().any(|b| b.event_id == event_id)
    }

    /// Move every booking of `event_id` to `span`. Returns how many were touched.
    pub fn reschedule(&mut self, event_id: Ulid, span: Span) -> usize {
        let mut touched = 0;
        for booking in self.bookings.iter_mut().filter(|b| b.event_id == event_id) {
            booking.span = span;
            touched += 1;
        }
        touched
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    EventCreated {
        id: Ulid,
        title: String,
        description: String,
        span: Span,
    },
    EventRescheduled {
        id: Ulid,
        span: Span,
    },
    ResourceCreated {
        id: Ulid,
        name: String,
        kind: String,
    },
    AllocationCreated {
        id: Ulid,
        event_id: Ulid,
        resource_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Booked time of one resource inside a reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationRow {
    pub resource: ResourceInfo,
    /// Sum of per-event hours, each rounded to two decimals.
    pub booked_hours: f64,
    /// Titles of the contributing events, in encounter order.
    pub bookings: Vec<String>,
}
