use thiserror::Error;

/// Errors from the campaign/outbox store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No campaign with the given ID.
    #[error("Campaign not found: {id}")]
    CampaignNotFound { id: i64 },

    /// The requested lifecycle edge or edit is not allowed from the
    /// campaign's current status.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payload fails a semantic constraint (bad reply markup, empty
    /// text, over-long name).
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
