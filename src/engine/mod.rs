mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::find_conflict;
pub use error::EngineError;
pub use lifecycle::{next_status, BookingEvent};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → property id. Entries stay mapped for
    /// terminal bookings so transition attempts on them report
    /// `InvalidTransition` rather than `NotFound`.
    pub(super) booking_to_property: DashMap<Ulid, Ulid>,
    cfg: EngineConfig,
}

/// Apply an event directly to a PropertyState (no locking — caller holds
/// the lock). Replay and live mutation share this single path.
fn apply_to_property(
    ps: &mut PropertyState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
    inspection_gap: Ms,
) {
    match event {
        Event::BookingRequested {
            id,
            property_id,
            requester_id,
            owner_id,
            kind,
            span,
            created_at,
            hold_expires_at,
        } => {
            ps.insert_booking(Booking {
                id: *id,
                property_id: *property_id,
                requester_id: *requester_id,
                owner_id: *owner_id,
                kind: *kind,
                span: *span,
                status: BookingStatus::Pending,
                payment_status: PaymentStatus::Pending,
                created_at: *created_at,
                hold_expires_at: *hold_expires_at,
                cancelled_by: None,
                cancelled_at: None,
                cancellation_reason: None,
            });
            let _ = ps.add_hold(
                Hold {
                    booking_id: *id,
                    span: *span,
                    kind: *kind,
                },
                inspection_gap,
            );
            booking_index.insert(*id, *property_id);
        }
        Event::BookingApproved { id, .. } => {
            if let Some(b) = ps.booking_mut(id) {
                b.status = BookingStatus::Confirmed;
            }
            // hold remains active
        }
        Event::BookingRejected { id, .. } => {
            if let Some(b) = ps.booking_mut(id) {
                b.status = BookingStatus::Rejected;
            }
            ps.remove_hold(id);
        }
        Event::BookingCancelled {
            id,
            cancelled_by,
            reason,
            at,
            ..
        } => {
            if let Some(b) = ps.booking_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_by = *cancelled_by;
                b.cancelled_at = Some(*at);
                b.cancellation_reason = reason.clone();
            }
            ps.remove_hold(id);
        }
        Event::BookingCompleted { id, .. } => {
            if let Some(b) = ps.booking_mut(id) {
                b.status = BookingStatus::Completed;
            }
            ps.remove_hold(id);
        }
        Event::BookingExpired { id, .. } => {
            if let Some(b) = ps.booking_mut(id) {
                b.status = BookingStatus::Expired;
            }
            ps.remove_hold(id);
        }
        Event::PaymentUpdated { id, status, .. } => {
            if let Some(b) = ps.booking_mut(id) {
                b.payment_status = *status;
            }
        }
        // PropertyRegistered/Removed are handled at the DashMap level, not here
        Event::PropertyRegistered { .. } | Event::PropertyRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, cfg: EngineConfig) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_property: DashMap::new(),
            cfg,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::PropertyRegistered { id, owner_id } => {
                    let ps = PropertyState::new(*id, *owner_id);
                    engine.state.insert(*id, Arc::new(RwLock::new(ps)));
                }
                Event::PropertyRemoved { id } => {
                    if let Some((_, arc)) = engine.state.remove(id) {
                        let guard = arc.try_read().expect("replay: uncontended read");
                        for b in &guard.bookings {
                            engine.booking_to_property.remove(&b.id);
                        }
                    }
                }
                other => {
                    let property_id = other.property_id();
                    if let Some(entry) = engine.state.get(&property_id) {
                        let ps_arc = entry.value().clone();
                        let mut guard = ps_arc.try_write().expect("replay: uncontended write");
                        apply_to_property(
                            &mut guard,
                            other,
                            &engine.booking_to_property,
                            engine.cfg.inspection_gap_ms,
                        );
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn property_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_property.get(booking_id).map(|e| *e.value())
    }

    /// Acquire a property's write lock with a bounded wait. This is the
    /// per-property critical section; a timeout surfaces as `Busy`, never
    /// as corruption.
    pub(super) async fn lock_property(
        &self,
        ps: SharedPropertyState,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        tokio::time::timeout(self.cfg.lock_timeout(), ps.write_owned())
            .await
            .map_err(|_| EngineError::Busy("property lock"))
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated
    /// 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        property_id: Ulid,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.booking_to_property, self.cfg.inspection_gap_ms);
        self.notify.send(property_id, event);
        Ok(())
    }

    /// Lookup booking → property, get property, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<PropertyState>), EngineError> {
        let property_id = self
            .property_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ps = self
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;
        let guard = self.lock_property(ps).await?;
        Ok((property_id, guard))
    }
}
