use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::lifecycle::{next_status, BookingEvent};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_property(&self, id: Ulid, owner_id: Ulid) -> Result<(), EngineError> {
        if self.state.len() >= MAX_PROPERTIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PropertyRegistered { id, owner_id };
        self.wal_append(&event).await?;
        let ps = PropertyState::new(id, owner_id);
        self.state.insert(id, Arc::new(RwLock::new(ps)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Remove a property from the index. Refused while any hold is active;
    /// the booking history goes with it.
    pub async fn remove_property(&self, id: Ulid) -> Result<(), EngineError> {
        let ps = self
            .get_property(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.lock_property(ps).await?;
        if !guard.holds.is_empty() {
            return Err(EngineError::HasActiveHolds(id));
        }

        let event = Event::PropertyRemoved { id };
        self.wal_append(&event).await?;
        for b in &guard.bookings {
            self.booking_to_property.remove(&b.id);
        }
        drop(guard);
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    /// The only entry point for creating a booking. Conflict check and
    /// hold registration happen atomically under the property's write lock.
    pub async fn reserve(
        &self,
        id: Ulid,
        property_id: Ulid,
        requester_id: Ulid,
        kind: BookingKind,
        start: Ms,
        end: Option<Ms>,
    ) -> Result<Booking, EngineError> {
        // Fail fast on malformed input before touching shared state.
        let span = match kind {
            BookingKind::Shortlet | BookingKind::Rental => {
                let end = end.ok_or(EngineError::Validation("stay bookings need a checkout"))?;
                let span = Span { start, end };
                validate_span(&span)?;
                span
            }
            BookingKind::SaleInspection => {
                if end.is_some() {
                    return Err(EngineError::Validation(
                        "inspection slots take a start instant only",
                    ));
                }
                let span = Span {
                    start,
                    end: start + self.config().inspection_duration_ms,
                };
                validate_span(&span)?;
                span
            }
        };
        if self.booking_to_property.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let mut guard = self.lock_property(ps).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many bookings on property"));
        }

        check_no_conflict(&guard, &span, kind, self.config().inspection_gap_ms)?;

        let now = now_ms();
        let event = Event::BookingRequested {
            id,
            property_id,
            requester_id,
            owner_id: guard.owner_id,
            kind,
            span,
            created_at: now,
            hold_expires_at: now + self.config().hold_window_ms,
        };
        self.persist_and_apply(property_id, &mut guard, &event).await?;

        Ok(guard
            .booking(&id)
            .expect("reserve: booking just inserted")
            .clone())
    }

    /// The single authoritative transition path. Approve/reject/cancel/
    /// complete/expire all come through here; hold release accompanies every
    /// transition into a terminal status.
    pub async fn apply_transition(
        &self,
        booking_id: Ulid,
        event: BookingEvent,
        actor: Option<Ulid>,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("cancellation reason too long"));
            }
        let (property_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let from = booking.status;
        next_status(from, event)?;

        let at = now_ms();
        let wal_event = match event {
            BookingEvent::Approve => Event::BookingApproved { id: booking_id, property_id, at },
            BookingEvent::Reject => Event::BookingRejected { id: booking_id, property_id, at },
            BookingEvent::Cancel => Event::BookingCancelled {
                id: booking_id,
                property_id,
                from,
                cancelled_by: actor,
                reason,
                at,
            },
            BookingEvent::Complete => Event::BookingCompleted { id: booking_id, property_id, at },
            BookingEvent::Expire => Event::BookingExpired { id: booking_id, property_id, at },
        };
        self.persist_and_apply(property_id, &mut guard, &wal_event).await?;

        Ok(guard
            .booking(&booking_id)
            .expect("transition: booking still present")
            .clone())
    }

    /// Inbound payment-status-changed event. Records the new status, then —
    /// still under the same property lock — applies the configured
    /// auto-transition for a pending booking.
    pub async fn update_payment(
        &self,
        booking_id: Ulid,
        status: PaymentStatus,
    ) -> Result<Booking, EngineError> {
        let (property_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let booking_status = booking.status;

        let at = now_ms();
        let event = Event::PaymentUpdated { id: booking_id, property_id, status, at };
        self.persist_and_apply(property_id, &mut guard, &event).await?;

        if booking_status == BookingStatus::Pending {
            let follow_up = match status {
                PaymentStatus::Completed if self.config().auto_confirm_on_payment => {
                    Some(Event::BookingApproved { id: booking_id, property_id, at })
                }
                PaymentStatus::Failed if self.config().auto_cancel_on_failed_payment => {
                    Some(Event::BookingCancelled {
                        id: booking_id,
                        property_id,
                        from: BookingStatus::Pending,
                        cancelled_by: None,
                        reason: Some("payment failed".into()),
                        at,
                    })
                }
                _ => None,
            };
            if let Some(follow_up) = follow_up {
                self.persist_and_apply(property_id, &mut guard, &follow_up).await?;
            }
        }

        Ok(guard
            .booking(&booking_id)
            .expect("payment: booking still present")
            .clone())
    }

    /// Scan for pending bookings whose hold deadline has passed. Bookings
    /// whose payment already completed are skipped — they wait for the
    /// owner, not the sweeper.
    pub fn collect_expired(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let ps = entry.value().clone();
            if let Ok(guard) = ps.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Pending
                        && b.hold_expires_at <= now
                        && b.payment_status != PaymentStatus::Completed
                    {
                        expired.push((b.id, guard.id));
                    }
                }
            }
        }
        expired
    }

    /// Conditional expiry: re-checks that the booking is still due under
    /// the property lock, so a sweep can never race a concurrent approval
    /// or payment. Returns false when the booking is no longer due.
    pub async fn expire_due(&self, booking_id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let (property_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status != BookingStatus::Pending
            || booking.hold_expires_at > now
            || booking.payment_status == PaymentStatus::Completed
        {
            return Ok(false);
        }

        let event = Event::BookingExpired { id: booking_id, property_id, at: now };
        self.persist_and_apply(property_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one registration per property, one
    /// request per booking, then the transition matching its status.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let property_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in property_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let ps = entry.value().clone();
            let guard = ps.try_read().expect("compact: uncontended read");

            events.push(Event::PropertyRegistered {
                id: guard.id,
                owner_id: guard.owner_id,
            });

            for b in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: b.id,
                    property_id: b.property_id,
                    requester_id: b.requester_id,
                    owner_id: b.owner_id,
                    kind: b.kind,
                    span: b.span,
                    created_at: b.created_at,
                    hold_expires_at: b.hold_expires_at,
                });
                if b.payment_status != PaymentStatus::Pending {
                    events.push(Event::PaymentUpdated {
                        id: b.id,
                        property_id: b.property_id,
                        status: b.payment_status,
                        at: b.created_at,
                    });
                }
                match b.status {
                    BookingStatus::Pending => {}
                    BookingStatus::Confirmed => events.push(Event::BookingApproved {
                        id: b.id,
                        property_id: b.property_id,
                        at: b.created_at,
                    }),
                    BookingStatus::Rejected => events.push(Event::BookingRejected {
                        id: b.id,
                        property_id: b.property_id,
                        at: b.created_at,
                    }),
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: b.id,
                        property_id: b.property_id,
                        from: BookingStatus::Pending,
                        cancelled_by: b.cancelled_by,
                        reason: b.cancellation_reason.clone(),
                        at: b.cancelled_at.unwrap_or(b.created_at),
                    }),
                    BookingStatus::Completed => events.push(Event::BookingCompleted {
                        id: b.id,
                        property_id: b.property_id,
                        at: b.created_at,
                    }),
                    BookingStatus::Expired => events.push(Event::BookingExpired {
                        id: b.id,
                        property_id: b.property_id,
                        at: b.hold_expires_at,
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
