//! `herald-telegram` — typed wrapper over the Bot API send endpoints.
//!
//! The broadcast engine needs the raw provider envelope: `ok`,
//! `error_code`, `description`, and `parameters.retry_after` (which
//! Telegram emits as an integer or a numeric string depending on the
//! path). The client therefore never raises on non-2xx responses with a
//! parseable body — classification of failures is a separate, pure step
//! in [`classify`].

pub mod api;
pub mod classify;
pub mod error;
pub mod transport;

pub use api::{ApiResponse, BotApi, ResponseParameters};
pub use classify::{classify, SendVerdict};
pub use error::TelegramError;
pub use transport::{BroadcastContent, BroadcastTransport};
