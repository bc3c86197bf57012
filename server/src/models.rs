//! Data models for Parley Server

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Conversation Models
// ============================================================================

/// Stored conversation row. Per-participant columns are only read through
/// [`crate::conversations::ConversationStore`], which resolves the caller's side.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Conversation {
    pub id: String,
    pub participant1_id: String,
    pub participant2_id: String,
    pub(crate) p1_muted: bool,
    pub(crate) p1_pinned: bool,
    pub(crate) p1_theme_color: Option<String>,
    pub(crate) p1_nickname: Option<String>,
    pub(crate) p1_auto_translate: bool,
    pub(crate) p2_muted: bool,
    pub(crate) p2_pinned: bool,
    pub(crate) p2_theme_color: Option<String>,
    pub(crate) p2_nickname: Option<String>,
    pub(crate) p2_auto_translate: bool,
    pub last_message: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A conversation's settings as seen by one participant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    pub conversation_id: String,
    pub other_user_id: String,
    pub muted: bool,
    pub pinned: bool,
    pub theme_color: Option<String>,
    pub nickname: Option<String>,
    pub auto_translate: bool,
}

/// Partial settings update; absent fields are left untouched.
/// The theme is shared and only changes through the theme command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub muted: Option<bool>,
    pub pinned: Option<bool>,
    /// An empty string clears the nickname
    pub nickname: Option<String>,
    pub auto_translate: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.muted.is_none()
            && self.pinned.is_none()
            && self.nickname.is_none()
            && self.auto_translate.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub settings: ConversationSettings,
    /// Content of the newest message this viewer has not hidden
    pub last_message: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

// ============================================================================
// Message Models
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub seq: i64,
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub image_urls: String, // JSON array
    pub reply_to_id: Option<String>,
    pub reply_to_content: Option<String>,
    pub reply_to_sender_id: Option<String>,
    pub is_system: bool,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub pinned_by: Option<String>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub original_content: Option<String>,
    pub is_deleted_for_everyone: bool,
    pub deleted_for_everyone_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone_by: Option<String>,
    pub deleted_for_user_ids: String, // JSON array
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the replied-to message taken when the reply was created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub message_id: String,
    pub content: String,
    pub sender_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub reply_to: Option<ReplySnapshot>,
    pub is_system: bool,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub pinned_by: Option<String>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub original_content: Option<String>,
    pub is_deleted_for_everyone: bool,
    pub deleted_for_everyone_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone_by: Option<String>,
    pub deleted_for_user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = serde_json::Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let reply_to = match row.reply_to_id {
            Some(message_id) => Some(ReplySnapshot {
                message_id,
                content: row.reply_to_content.unwrap_or_default(),
                sender_id: row.reply_to_sender_id.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Self {
            id: row.message_id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            content: row.content,
            image_urls: serde_json::from_str(&row.image_urls)?,
            reply_to,
            is_system: row.is_system,
            is_read: row.is_read,
            read_at: row.read_at,
            pinned_by: row.pinned_by,
            pinned_at: row.pinned_at,
            is_edited: row.is_edited,
            edited_at: row.edited_at,
            original_content: row.original_content,
            is_deleted_for_everyone: row.is_deleted_for_everyone,
            deleted_for_everyone_at: row.deleted_for_everyone_at,
            deleted_for_everyone_by: row.deleted_for_everyone_by,
            deleted_for_user_ids: serde_json::from_str(&row.deleted_for_user_ids)?,
            created_at: row.created_at,
        })
    }
}

impl Message {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    pub fn other_party(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    pub fn media_tag(&self) -> Option<MediaTag> {
        MediaTag::detect(&self.content)
    }

    /// Images, video shares, stickers and voice notes
    pub fn is_media(&self) -> bool {
        !self.image_urls.is_empty() || self.media_tag().is_some()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Leading content tag marking a non-text message, e.g. `[STICKER]` or `[VIDEO_SHARE:abc]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTag {
    Image,
    Video,
    VideoShare,
    Sticker,
    Voice,
    Gif,
}

impl MediaTag {
    const ALL: [MediaTag; 6] = [
        MediaTag::Image,
        MediaTag::Video,
        MediaTag::VideoShare,
        MediaTag::Sticker,
        MediaTag::Voice,
        MediaTag::Gif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaTag::Image => "IMAGE",
            MediaTag::Video => "VIDEO",
            MediaTag::VideoShare => "VIDEO_SHARE",
            MediaTag::Sticker => "STICKER",
            MediaTag::Voice => "VOICE",
            MediaTag::Gif => "GIF",
        }
    }

    pub fn detect(content: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix('[')?;
        let end = rest.find(|c: char| c == ']' || c == ':')?;
        let name = &rest[..end];
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    /// Text used in push notifications instead of the raw tag
    pub fn preview(&self) -> &'static str {
        match self {
            MediaTag::Image => "Sent a photo",
            MediaTag::Video => "Sent a video",
            MediaTag::VideoShare => "Shared a video",
            MediaTag::Sticker => "Sent a sticker",
            MediaTag::Voice => "Sent a voice message",
            MediaTag::Gif => "Sent a GIF",
        }
    }
}

// ============================================================================
// Presence Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

// ============================================================================
// API Request/Response Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub reply_to_id: Option<String>,
}

/// Body of `POST /conversations/:other_id/messages`; the recipient comes from the path
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageBody {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeRequest {
    pub theme_color: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub show_online_status: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub conversations: i64,
    pub messages: i64,
    pub unsent_messages: i64,
    pub online_users: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_and_referenced_tags() {
        assert_eq!(MediaTag::detect("[STICKER]"), Some(MediaTag::Sticker));
        assert_eq!(MediaTag::detect("[VIDEO_SHARE:v42]"), Some(MediaTag::VideoShare));
        assert_eq!(MediaTag::detect("[IMAGE] holiday"), Some(MediaTag::Image));
    }

    #[test]
    fn plain_text_is_not_media() {
        assert_eq!(MediaTag::detect("hello"), None);
        assert_eq!(MediaTag::detect("[not a tag] hello"), None);
        assert_eq!(MediaTag::detect("see [IMAGE]"), None);
        assert_eq!(MediaTag::detect("["), None);
    }

    #[test]
    fn settings_patch_emptiness() {
        assert!(SettingsPatch::default().is_empty());
        let patch = SettingsPatch {
            nickname: Some(String::new()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn settings_patch_ignores_a_theme() {
        let patch: SettingsPatch = serde_json::from_str(r##"{"themeColor":"#00aaff"}"##).unwrap();
        assert!(patch.is_empty());
    }
}
