use serde::{Deserialize, Serialize};

/// Lifecycle state of a broadcast campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Being authored; invisible to the worker.
    Draft,
    /// Ready for the worker to lift once `scheduled_at` (if any) arrives.
    Queued,
    /// Outbox built, dispatch in progress.
    Running,
    /// Dispatch suspended by an operator; eligible rows are left alone.
    Paused,
    /// Every row reached `sent` or `failed`.
    Completed,
    /// Stopped by an operator; remaining rows are never dispatched.
    Cancelled,
    /// Misconfiguration detected at lift time.
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "queued" => Ok(CampaignStatus::Queued),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

/// Closed set of supported audiences. Campaign rows keep the raw tag so a
/// value this build doesn't know is surfaced at lift time as a
/// campaign-level failure instead of a decode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceType {
    /// Every chat id in the `bot_users` registry.
    AllUsers,
}

impl std::fmt::Display for AudienceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudienceType::AllUsers => write!(f, "all_users"),
        }
    }
}

impl std::str::FromStr for AudienceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all_users" => Ok(AudienceType::AllUsers),
            other => Err(format!("unsupported audience_type: {other}")),
        }
    }
}

/// State of one outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Materialized, never claimed.
    Pending,
    /// Claimed under a row lease; a send may be in flight.
    Sending,
    /// Delivered (terminal).
    Sent,
    /// Waiting for `next_retry_at`.
    Retry,
    /// Permanent failure (terminal).
    Failed,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Retry => "retry",
            MessageStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "retry" => Ok(MessageStatus::Retry),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// Named operator transitions. Every lifecycle edge goes through one of
/// these; there is no way to PATCH a status directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Queue,
    Pause,
    Resume,
    Cancel,
}

impl std::fmt::Display for AdminAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdminAction::Queue => "queue",
            AdminAction::Pause => "pause",
            AdminAction::Resume => "resume",
            AdminAction::Cancel => "cancel",
        };
        write!(f, "{s}")
    }
}

/// A persisted campaign record. Timestamps are ISO-8601 UTC strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub status: CampaignStatus,
    /// Raw audience tag; resolve with `AudienceType::from_str` so unknown
    /// tags can be rejected with a readable campaign-level error.
    pub audience_type: String,
    pub audience_params_json: Option<String>,
    pub text: String,
    pub parse_mode: String,
    pub disable_web_page_preview: bool,
    pub reply_markup_json: Option<String>,
    pub photo_file_id: Option<String>,
    pub photo_url: Option<String>,
    pub scheduled_at: Option<String>,
    pub created_at: String,
    pub outbox_created_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub total_recipients: Option<i64>,
    pub sent_count: i64,
    pub failed_count: i64,
    pub last_error: Option<String>,
}

/// One persisted delivery intent for a `(campaign, chat_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub campaign_id: i64,
    pub chat_id: i64,
    pub status: MessageStatus,
    pub attempts: i64,
    pub next_retry_at: Option<String>,
    pub locked_until: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

/// Fields for creating a campaign. `status` may only be `draft` or
/// `queued`; everything else is rejected.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub text: String,
    pub status: CampaignStatus,
    pub audience_type: AudienceType,
    pub audience_params_json: Option<String>,
    pub parse_mode: String,
    pub disable_web_page_preview: bool,
    pub reply_markup_json: Option<String>,
    pub photo_file_id: Option<String>,
    pub photo_url: Option<String>,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl NewCampaign {
    /// A draft text campaign with the wire defaults filled in.
    pub fn text_only(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            status: CampaignStatus::Draft,
            audience_type: AudienceType::AllUsers,
            audience_params_json: None,
            parse_mode: "HTML".to_string(),
            disable_web_page_preview: true,
            reply_markup_json: None,
            photo_file_id: None,
            photo_url: None,
            scheduled_at: None,
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub text: Option<String>,
    pub parse_mode: Option<String>,
    pub disable_web_page_preview: Option<bool>,
    pub reply_markup_json: Option<String>,
    pub photo_file_id: Option<String>,
    pub photo_url: Option<String>,
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl CampaignPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.text.is_none()
            && self.parse_mode.is_none()
            && self.disable_web_page_preview.is_none()
            && self.reply_markup_json.is_none()
            && self.photo_file_id.is_none()
            && self.photo_url.is_none()
            && self.scheduled_at.is_none()
    }

    /// True when the patch touches anything beyond message content
    /// (content = text, formatting, markup, photo). Paused campaigns only
    /// accept content edits.
    pub fn touches_non_content(&self) -> bool {
        self.name.is_some() || self.scheduled_at.is_some()
    }
}

/// A claimed outbox row handed to the dispatcher: row id, destination,
/// and the attempt counter after the claim bumped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimedMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub attempts: i64,
}
