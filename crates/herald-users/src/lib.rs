//! `herald-users` — registry of every Telegram user the bot has heard from.
//!
//! The broadcast engine's `all_users` audience is exactly the contents of
//! the `bot_users` table: one row per chat, upserted on contact.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, UserError};
pub use store::UserStore;
pub use types::BotUser;
