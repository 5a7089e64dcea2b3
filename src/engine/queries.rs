use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::{Engine, EngineError};

impl Engine {
    pub fn list_properties(&self) -> Vec<PropertyInfo> {
        self.state
            .iter()
            .map(|entry| {
                let ps = entry.value().clone();
                let guard = ps.try_read().expect("list_properties: uncontended read");
                PropertyInfo {
                    id: guard.id,
                    owner_id: guard.owner_id,
                    active_holds: guard.holds.len(),
                    total_bookings: guard.bookings.len(),
                }
            })
            .collect()
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let property_id = self
            .property_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        guard
            .booking(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Full booking history for a property, terminal bookings included.
    pub async fn get_bookings(&self, property_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(guard.bookings.clone())
    }

    /// The active-hold set — what the conflict detector sees.
    pub async fn get_active_holds(&self, property_id: Ulid) -> Result<Vec<HoldInfo>, EngineError> {
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;
        Ok(guard
            .holds
            .iter()
            .map(|h| HoldInfo {
                booking_id: h.booking_id,
                property_id,
                kind: h.kind,
                start: h.span.start,
                end: h.span.end,
            })
            .collect())
    }

    /// Free spans within a window: the window minus active stay holds.
    pub async fn compute_availability(
        &self,
        property_id: Ulid,
        query_start: Ms,
        query_end: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if query_start >= query_end {
            return Err(EngineError::Validation("query start must be before end"));
        }
        if query_end - query_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = ps.read().await;

        let query = Span::new(query_start, query_end);
        let mut free = free_spans(&guard, &query);

        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }

        Ok(free)
    }
}
