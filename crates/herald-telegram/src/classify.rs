use crate::api::ApiResponse;

/// Classifier output for one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendVerdict {
    /// `ok: true` — the provider accepted the message.
    Delivered,
    /// Worth another attempt. `after` carries the provider's own
    /// `retry_after` when it gave one; otherwise the caller applies its
    /// backoff curve.
    Retry { after: Option<u64>, reason: String },
    /// Retrying the same payload to the same chat can never succeed.
    Permanent { reason: String },
}

/// Map a provider envelope to a verdict.
///
/// 401/404 mean the token or endpoint is broken, 403 is a chat-level
/// refusal ("bot was blocked by the user" and friends), and every 400 is
/// permanent — "chat not found" and "user is deactivated" name dead
/// chats, and the rest is a malformed payload that will not self-heal.
/// 429 honors `retry_after`; 5xx and unknown codes retry on the backoff
/// curve. Attempt-count escalation is the dispatcher's job, not ours.
pub fn classify(resp: &ApiResponse) -> SendVerdict {
    if resp.ok {
        return SendVerdict::Delivered;
    }

    let code = resp.error_code.unwrap_or(0);
    let desc = resp.description.clone().unwrap_or_default();
    let fallback = |d: &str, or: String| if d.is_empty() { or } else { d.to_string() };

    match code {
        429 if resp.retry_after().is_some() => SendVerdict::Retry {
            after: resp.retry_after(),
            reason: fallback(&desc, "Too Many Requests".to_string()),
        },
        401 | 404 => SendVerdict::Permanent {
            reason: fallback(&desc, format!("Telegram API error {code}")),
        },
        403 => SendVerdict::Permanent {
            reason: fallback(&desc, "Forbidden".to_string()),
        },
        400 => SendVerdict::Permanent {
            reason: fallback(&desc, "Bad Request".to_string()),
        },
        c if c >= 500 => SendVerdict::Retry {
            after: None,
            reason: fallback(&desc, format!("Telegram server error {code}")),
        },
        _ => SendVerdict::Retry {
            after: None,
            reason: fallback(&desc, "unknown Telegram error".to_string()),
        },
    }
}
