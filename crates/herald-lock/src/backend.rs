use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Single-writer lease over a shared key-value store.
///
/// Contract: `acquire` succeeds only when the key is unset;
/// `refresh`/`release` succeed only while the stored value still equals
/// this owner's token. A worker whose `refresh` returns `false` must stop
/// mutating broadcast state and re-enter the acquire loop.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Try to take the lease for `ttl`. Returns false when another owner
    /// holds it.
    async fn acquire(&self, ttl: Duration) -> Result<bool>;

    /// Extend the lease. Returns false when ownership was lost (expired
    /// and re-acquired elsewhere).
    async fn refresh(&self, ttl: Duration) -> Result<bool>;

    /// Drop the lease if still owned. Never fails on a lost lease.
    async fn release(&self) -> Result<()>;

    /// Connectivity probe for readiness reporting.
    async fn ping(&self) -> Result<()>;
}
