//! `herald-worker` — the broadcast scheduler loop.
//!
//! # Overview
//!
//! One long-lived task per process, of which exactly one across all
//! replicas is active at a time (guarded by the worker lease). Each tick:
//!
//! 1. lift due queued campaigns (validate, materialize outbox, flip to
//!    running),
//! 2. dispatch claimed batches through the Bot API under the global rate
//!    ceiling,
//! 3. complete campaigns with no deliverable rows left,
//! 4. sleep.
//!
//! Losing the lease stops all mutations immediately; the loop re-enters
//! the acquire path with jittered backoff and assumes nothing about
//! claims it held before.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod rate;

pub use engine::BroadcastWorker;
pub use error::{Result, WorkerError};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use rate::RateGate;
