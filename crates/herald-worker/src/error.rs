use thiserror::Error;

/// Errors that abort a worker tick.
///
/// Provider failures never show up here — they are classified and
/// recorded per row. Anything that does land here means the data store
/// refused an operation, and the tick stops without committing partial
/// bookkeeping.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] herald_store::StoreError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
