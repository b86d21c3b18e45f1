//! Deterministic exponential backoff.
//!
//! The delay is a pure function of the retry count and the queue
//! configuration: `min(base * multiplier^(retry_count - 1), max)`. No
//! jitter is added; the queue is single-process, so there is no thundering
//! herd to spread out. Callers that fan many clients against one remote
//! system can layer jitter inside their strategy.

use std::time::Duration;

use crate::types::QueueConfig;

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Delay before the attempt identified by `retry_count` (1-based: the
/// first retry is `retry_count == 1`).
///
/// Saturating arithmetic keeps large retry counts from overflowing; the
/// result is always capped at `max_retry_delay`.
pub fn retry_delay(config: &QueueConfig, retry_count: u32) -> Duration {
    let base = duration_millis(config.base_retry_delay).max(1);
    let max = duration_millis(config.max_retry_delay);

    // Cap the exponent so saturating_pow stays cheap for runaway counts.
    let exponent = retry_count.saturating_sub(1).min(63);
    let factor = u64::from(config.retry_multiplier).saturating_pow(exponent);
    let delay = base.saturating_mul(factor);

    Duration::from_millis(delay.min(max))
}

/// Absolute retry deadline in epoch milliseconds for a record that just
/// failed its `retry_count`-th attempt at `now`.
pub fn next_retry_at(config: &QueueConfig, retry_count: u32, now: u64) -> u64 {
    now.saturating_add(duration_millis(retry_delay(config, retry_count)))
}
