use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiResponse, BotApi};
use crate::error::TelegramError;

/// Everything needed to render one campaign message for one chat.
///
/// `photo` selects the endpoint: when set, the campaign goes out as
/// `sendPhoto` with `text` as the caption; otherwise as `sendMessage`.
#[derive(Debug, Clone)]
pub struct BroadcastContent {
    pub text: String,
    pub parse_mode: String,
    pub disable_web_page_preview: bool,
    pub reply_markup: Option<Value>,
    pub photo: Option<String>,
}

/// Seam between the dispatcher and the provider. The worker only ever
/// sees the parsed envelope or a transport error; tests script this.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    async fn send(
        &self,
        chat_id: i64,
        content: &BroadcastContent,
    ) -> Result<ApiResponse, TelegramError>;
}

#[async_trait]
impl BroadcastTransport for BotApi {
    async fn send(
        &self,
        chat_id: i64,
        content: &BroadcastContent,
    ) -> Result<ApiResponse, TelegramError> {
        match content.photo {
            Some(ref photo) => {
                self.send_photo(
                    chat_id,
                    photo,
                    &content.text,
                    &content.parse_mode,
                    content.reply_markup.as_ref(),
                )
                .await
            }
            None => {
                self.send_text(
                    chat_id,
                    &content.text,
                    &content.parse_mode,
                    content.disable_web_page_preview,
                    content.reply_markup.as_ref(),
                )
                .await
            }
        }
    }
}
