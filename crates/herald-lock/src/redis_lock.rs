use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use tracing::debug;
use uuid::Uuid;

use crate::backend::LeaseBackend;
use crate::error::Result;

/// Redis key guarding the broadcast worker across replicas.
pub const WORKER_LOCK_KEY: &str = "herald:lock:broadcast_worker";

const REFRESH_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('expire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Worker lease over a Redis key.
///
/// The owner token is generated once per process start (wall-clock seconds
/// plus random bits) so a replica can recognise its own lease and nothing
/// else's. Refresh and release go through server-side scripts; the
/// compare-and-set must be atomic or an expired-and-reacquired lease could
/// be extended by its previous owner.
pub struct RedisWorkerLock {
    client: redis::Client,
    key: String,
    token: String,
    refresh: Script,
    release: Script,
}

impl RedisWorkerLock {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_key(url, WORKER_LOCK_KEY)
    }

    pub fn with_key(url: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let token = format!("{}:{}", Utc::now().timestamp(), Uuid::new_v4());
        Ok(Self {
            client,
            key: key.to_string(),
            token,
            refresh: Script::new(REFRESH_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl LeaseBackend for RedisWorkerLock {
    async fn acquire(&self, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        // SET NX EX — succeeds only when the key is absent.
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!(key = %self.key, acquired, "worker lease acquire");
        Ok(acquired)
    }

    async fn refresh(&self, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let extended: i64 = self
            .refresh
            .key(&self.key)
            .arg(&self.token)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn release(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %self.key, deleted, "worker lease release");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
