use thiserror::Error;

/// Errors produced by the Bot API client.
///
/// Provider-level failures (4xx/5xx with a JSON envelope) are *not*
/// errors here — they come back as a parsed [`crate::ApiResponse`] so the
/// classifier can decide. Only transport problems (connect, timeout,
/// broken body stream) surface as `Err`, and those are always retryable.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("no bot token configured")]
    NoToken,
}
