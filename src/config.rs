use std::time::Duration;

use crate::model::Ms;

/// Scheduling policy knobs. One instance per process, shared by all
/// tenant engines; everything is overridable via `BOOKD_*` env vars.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a `pending` booking keeps its hold before the sweeper may
    /// reap it.
    pub hold_window_ms: Ms,
    /// Length of a sale-inspection slot (the caller supplies only the start).
    pub inspection_duration_ms: Ms,
    /// Two inspection slots closer together than this conflict.
    pub inspection_gap_ms: Ms,
    /// Sweeper tick interval.
    pub sweep_interval_ms: u64,
    /// Bounded wait for a property's write lock; past this the caller gets
    /// `Busy` and should retry.
    pub lock_timeout_ms: u64,
    /// `pending` + payment completed → approve automatically.
    pub auto_confirm_on_payment: bool,
    /// `pending` + payment failed → cancel automatically.
    pub auto_cancel_on_failed_payment: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_window_ms: 30 * 60_000,
            inspection_duration_ms: 45 * 60_000,
            inspection_gap_ms: 30 * 60_000,
            sweep_interval_ms: 60_000,
            lock_timeout_ms: 5_000,
            auto_confirm_on_payment: true,
            auto_cancel_on_failed_payment: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            hold_window_ms: env_i64("BOOKD_HOLD_WINDOW_MS", d.hold_window_ms),
            inspection_duration_ms: env_i64("BOOKD_INSPECTION_DURATION_MS", d.inspection_duration_ms),
            inspection_gap_ms: env_i64("BOOKD_INSPECTION_GAP_MS", d.inspection_gap_ms),
            sweep_interval_ms: env_u64("BOOKD_SWEEP_INTERVAL_MS", d.sweep_interval_ms),
            lock_timeout_ms: env_u64("BOOKD_LOCK_TIMEOUT_MS", d.lock_timeout_ms),
            auto_confirm_on_payment: env_bool("BOOKD_AUTO_CONFIRM", d.auto_confirm_on_payment),
            auto_cancel_on_failed_payment: env_bool(
                "BOOKD_AUTO_CANCEL_ON_FAILED_PAYMENT",
                d.auto_cancel_on_failed_payment,
            ),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(s) => matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
