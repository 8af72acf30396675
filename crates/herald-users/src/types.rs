use serde::{Deserialize, Serialize};

/// One known bot user. `chat_id` doubles as the delivery address for
/// private chats, which is why it is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotUser {
    pub chat_id: i64,
    pub username: Option<String>,
    /// ISO-8601 timestamp of the first contact.
    pub first_seen_at: String,
    /// ISO-8601 timestamp of the most recent contact.
    pub last_seen_at: String,
}
