//! `herald-lock` — the distributed single-writer lease for the broadcast
//! worker.
//!
//! Exactly one worker loop across all replicas may drive dispatch at a
//! time. The lease is a Redis key holding an owner token with a TTL:
//! acquire is SET NX EX, refresh and release are compare-and-set Lua
//! scripts so a stale owner can never extend or delete a lease it lost.
//!
//! The [`LeaseBackend`] trait is the seam the worker is built against;
//! tests substitute an in-process implementation.

pub mod backend;
pub mod error;
pub mod redis_lock;

pub use backend::LeaseBackend;
pub use error::{LockError, Result};
pub use redis_lock::RedisWorkerLock;
