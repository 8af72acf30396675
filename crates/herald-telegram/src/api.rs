use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::TelegramError;

/// How much of a non-JSON body is kept for the synthesized description.
const BODY_SNIPPET_LEN: usize = 300;

/// The Bot API response envelope.
///
/// Present on success and failure alike; `error_code`/`description` are
/// only meaningful when `ok` is false.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait after a 429. Telegram sends this as an integer,
    /// but numeric strings show up in the wild; both parse, anything
    /// else collapses to None.
    #[serde(default, deserialize_with = "retry_after_lenient")]
    pub retry_after: Option<u64>,
}

fn retry_after_lenient<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }))
}

impl ApiResponse {
    pub fn retry_after(&self) -> Option<u64> {
        self.parameters.as_ref().and_then(|p| p.retry_after)
    }

    /// Envelope for a body the provider failed to send as JSON. The HTTP
    /// status stands in for `error_code` so the classifier still sees
    /// 5xx vs 4xx.
    pub fn non_json(http_status: u16, body: &str) -> Self {
        let trimmed = body.trim();
        let description = if trimmed.is_empty() {
            "non-JSON body".to_string()
        } else {
            trimmed.chars().take(BODY_SNIPPET_LEN).collect()
        };
        Self {
            ok: false,
            error_code: Some(http_status as i64),
            description: Some(description),
            parameters: None,
        }
    }
}

/// Thin reqwest client for `sendMessage`/`sendPhoto`.
pub struct BotApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BotApi {
    pub fn new(token: &str, base_url: &str, timeout: Duration) -> Result<Self, TelegramError> {
        if token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        })
    }

    pub async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: &str,
        disable_web_page_preview: bool,
        reply_markup: Option<&Value>,
    ) -> Result<ApiResponse, TelegramError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": parse_mode,
            "disable_web_page_preview": disable_web_page_preview,
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup.clone();
        }
        self.call("sendMessage", &payload).await
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo: &str,
        caption: &str,
        parse_mode: &str,
        reply_markup: Option<&Value>,
    ) -> Result<ApiResponse, TelegramError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "photo": photo,
            "caption": caption,
            "parse_mode": parse_mode,
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup.clone();
        }
        self.call("sendPhoto", &payload).await
    }

    /// POST one Bot API method. The provider returns the JSON envelope
    /// even for errors, so the status code is only consulted when the
    /// body doesn't parse.
    async fn call(&self, method: &str, payload: &Value) -> Result<ApiResponse, TelegramError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let resp = self.http.post(&url).json(payload).send().await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;

        match serde_json::from_slice::<ApiResponse>(&bytes) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                debug!(method, status, "non-JSON Bot API body: {e}");
                Ok(ApiResponse::non_json(
                    status,
                    &String::from_utf8_lossy(&bytes),
                ))
            }
        }
    }
}
