use thiserror::Error;

/// Errors from the worker-lease backend.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lease backend unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
