//! Retry timing for the broadcast worker.
//!
//! Two separate curves: per-message retries (slow, capped at 5 minutes,
//! usually overridden by the provider's own `retry_after`) and the worker
//! lock re-acquire delay (fast, capped at 30 s, jittered so competing
//! replicas don't hammer the lock key in sync).

use std::time::Duration;

use rand::Rng;

/// Upper bound on the per-message retry delay.
const MESSAGE_BACKOFF_CAP_SECS: u64 = 300;
/// Upper bound on the lock re-acquire delay before jitter.
const LOCK_BACKOFF_CAP_SECS: f64 = 30.0;

/// Exponential delay before re-sending a message: 1, 2, 4, 8, … seconds,
/// capped at 300. `attempt` is the attempt count after the claim (1-based).
pub fn message_retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(63);
    let secs = 2u64.saturating_pow(exp).min(MESSAGE_BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Delay before the next attempt to grab the worker lock.
///
/// Base is `min(30, 2^min(6, attempt-1))` seconds; uniform jitter in
/// `[0, min(1.0, 20% of base)]` is added on top.
pub fn lock_retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let base = (2f64.powi(exp as i32)).min(LOCK_BACKOFF_CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0.0..=(base * 0.2).min(1.0));
    Duration::from_secs_f64(base + jitter)
}
