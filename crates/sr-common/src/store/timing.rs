use std::{sync::OnceLock, time::Instant};

use tracing::warn;

fn slow_call_threshold_ms() -> Option<u64> {
    static CACHE: OnceLock<Option<u64>> = OnceLock::new();

    *CACHE.get_or_init(|| {
        std::env::var("SR_STORE_LOG_MIN_DURATION_MS")
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(|v| v.max(0) as u64)
            .filter(|v| *v > 0)
    })
}

/// Logs `label` at warn when the call started at `started_at` ran past
/// `SR_STORE_LOG_MIN_DURATION_MS`.
pub fn maybe_log_slow_call(label: &str, started_at: Instant) {
    if let Some(threshold_ms) = slow_call_threshold_ms() {
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        if elapsed_ms >= threshold_ms {
            warn!(call = label, elapsed_ms, "slow_store_call_detected");
        }
    }
}
