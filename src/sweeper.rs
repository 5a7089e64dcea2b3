use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

fn wall_clock_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Background task that reaps stale pending bookings past their hold
/// deadline. Each expiry re-checks under the property lock, so a booking
/// approved (or paid) between scan and sweep is skipped, not clobbered.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().sweep_interval());
    loop {
        interval.tick().await;
        let now = wall_clock_ms();
        let expired = engine.collect_expired(now);
        for (booking_id, property_id) in expired {
            match engine.expire_due(booking_id, now).await {
                Ok(true) => {
                    info!("expired stale booking {booking_id} on property {property_id}");
                    metrics::counter!(crate::observability::BOOKINGS_EXPIRED_TOTAL).increment(1);
                }
                Ok(false) => {} // no longer due — approved or paid meanwhile
                Err(e) => {
                    tracing::debug!("sweeper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
