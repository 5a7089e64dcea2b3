use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
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

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[allow(dead_code)]
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// What a booking reserves: nights, a tenancy, or a viewing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Shortlet,
    Rental,
    SaleInspection,
}

impl BookingKind {
    /// Stay kinds occupy the property for their whole range; inspections
    /// occupy a single slot.
    pub fn is_stay(&self) -> bool {
        matches!(self, BookingKind::Shortlet | BookingKind::Rental)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Shortlet => "shortlet",
            BookingKind::Rental => "rental",
            BookingKind::SaleInspection => "sale_inspection",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shortlet" => Some(BookingKind::Shortlet),
            "rental" => Some(BookingKind::Rental),
            "sale_inspection" => Some(BookingKind::SaleInspection),
            _ => None,
        }
    }
}

/// Booking lifecycle status. `Pending` is the sole initial status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    Rejected,
    Expired,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Cancelled
                | BookingStatus::Completed
                | BookingStatus::Rejected
                | BookingStatus::Expired
        )
    }

    /// A booking's hold counts for conflict detection iff this is true.
    pub fn holds_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            "rejected" => Some(BookingStatus::Rejected),
            "expired" => Some(BookingStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned by the external payment collaborator; this core only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "partial" => Some(PaymentStatus::Partial),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// The central entity. Never physically deleted — terminal bookings stay
/// in the property's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub property_id: Ulid,
    pub requester_id: Ulid,
    pub owner_id: Ulid,
    pub kind: BookingKind,
    pub span: Span,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub created_at: Ms,
    pub hold_expires_at: Ms,
    pub cancelled_by: Option<Ulid>,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
}

/// One entry in a property's active-hold set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hold {
    pub booking_id: Ulid,
    pub span: Span,
    pub kind: BookingKind,
}

impl Hold {
    /// Cross-kind policy: stays conflict on half-open overlap, inspection
    /// slots conflict when their starts sit within `inspection_gap` of each
    /// other, and a stay never conflicts with an inspection.
    pub fn conflicts_with(&self, candidate: &Span, kind: BookingKind, inspection_gap: Ms) -> bool {
        match (self.kind.is_stay(), kind.is_stay()) {
            (true, true) => self.span.overlaps(candidate),
            (false, false) => (self.span.start - candidate.start).abs() < inspection_gap,
            _ => false,
        }
    }
}

/// Per-property shard: booking history plus the active-hold index.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: Ulid,
    pub owner_id: Ulid,
    /// All bookings ever made against this property, sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Active holds (`pending`/`confirmed` bookings only), sorted by `span.start`.
    pub holds: Vec<Hold>,
}

impl PropertyState {
    pub fn new(id: Ulid, owner_id: Ulid) -> Self {
        Self {
            id,
            owner_id,
            bookings: Vec::new(),
            holds: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Register a hold. Fails with the conflicting span if it would violate
    /// the non-overlap invariant — the coordinator checks first under the
    /// property lock, so a failure here means a caller bypassed it.
    pub fn add_hold(&mut self, hold: Hold, inspection_gap: Ms) -> Result<(), Span> {
        if let Some(existing) = self
            .holds
            .iter()
            .find(|h| h.conflicts_with(&hold.span, hold.kind, inspection_gap))
        {
            return Err(existing.span);
        }
        let pos = self
            .holds
            .binary_search_by_key(&hold.span.start, |h| h.span.start)
            .unwrap_or_else(|e| e);
        self.holds.insert(pos, hold);
        Ok(())
    }

    /// Idempotent: removing a hold that is not present is a no-op.
    pub fn remove_hold(&mut self, booking_id: &Ulid) -> bool {
        if let Some(pos) = self.holds.iter().position(|h| h.booking_id == *booking_id) {
            self.holds.remove(pos);
            true
        } else {
            false
        }
    }

    /// Return only holds whose span overlaps the query window.
    /// Uses binary search to skip holds starting at or after `query.end`.
    pub fn holds_overlapping(&self, query: &Span) -> impl Iterator<Item = &Hold> {
        let right_bound = self.holds.partition_point(|h| h.span.start < query.end);
        self.holds[..right_bound]
            .iter()
            .filter(move |h| h.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyRegistered {
        id: Ulid,
        owner_id: Ulid,
    },
    PropertyRemoved {
        id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        property_id: Ulid,
        requester_id: Ulid,
        owner_id: Ulid,
        kind: BookingKind,
        span: Span,
        created_at: Ms,
        hold_expires_at: Ms,
    },
    BookingApproved {
        id: Ulid,
        property_id: Ulid,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        property_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        property_id: Ulid,
        /// Status before cancellation — feeds the outbound event payload;
        /// replay does not depend on it.
        from: BookingStatus,
        cancelled_by: Option<Ulid>,
        reason: Option<String>,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        property_id: Ulid,
        at: Ms,
    },
    BookingExpired {
        id: Ulid,
        property_id: Ulid,
        at: Ms,
    },
    PaymentUpdated {
        id: Ulid,
        property_id: Ulid,
        status: PaymentStatus,
        at: Ms,
    },
}

/// Outbound booking-state-changed payload, serialized as JSON into
/// NOTIFY messages. `from` is None for the creation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub booking_id: Ulid,
    pub property_id: Ulid,
    pub from: Option<BookingStatus>,
    pub to: BookingStatus,
    pub at: Ms,
}

impl Event {
    /// Extract the property this event belongs to.
    pub fn property_id(&self) -> Ulid {
        match self {
            Event::PropertyRegistered { id, .. } | Event::PropertyRemoved { id } => *id,
            Event::BookingRequested { property_id, .. }
            | Event::BookingApproved { property_id, .. }
            | Event::BookingRejected { property_id, .. }
            | Event::BookingCancelled { property_id, .. }
            | Event::BookingCompleted { property_id, .. }
            | Event::BookingExpired { property_id, .. }
            | Event::PaymentUpdated { property_id, .. } => *property_id,
        }
    }

    /// Booking-state-changed view of this event, if it is one.
    pub fn state_change(&self) -> Option<StateChange> {
        match self {
            Event::BookingRequested {
                id,
                property_id,
                created_at,
                ..
            } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: None,
                to: BookingStatus::Pending,
                at: *created_at,
            }),
            Event::BookingApproved { id, property_id, at } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: Some(BookingStatus::Pending),
                to: BookingStatus::Confirmed,
                at: *at,
            }),
            Event::BookingRejected { id, property_id, at } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: Some(BookingStatus::Pending),
                to: BookingStatus::Rejected,
                at: *at,
            }),
            Event::BookingCancelled {
                id,
                property_id,
                from,
                at,
                ..
            } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: Some(*from),
                to: BookingStatus::Cancelled,
                at: *at,
            }),
            Event::BookingCompleted { id, property_id, at } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: Some(BookingStatus::Confirmed),
                to: BookingStatus::Completed,
                at: *at,
            }),
            Event::BookingExpired { id, property_id, at } => Some(StateChange {
                booking_id: *id,
                property_id: *property_id,
                from: Some(BookingStatus::Pending),
                to: BookingStatus::Expired,
                at: *at,
            }),
            Event::PropertyRegistered { .. }
            | Event::PropertyRemoved { .. }
            | Event::PaymentUpdated { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub active_holds: usize,
    pub total_bookings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    pub booking_id: Ulid,
    pub property_id: Ulid,
    pub kind: BookingKind,
    pub start: Ms,
    pub end: Ms,
}
