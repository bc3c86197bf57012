//! Conversation identity and per-participant settings
//!
//! A conversation is keyed by its unordered participant pair and created lazily
//! on the first message or settings write. Each participant has their own copy
//! of the personal settings; which stored side belongs to a user is resolved
//! here and nowhere else.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Conversation, ConversationSettings, Message, SettingsPatch};
use crate::storage::Storage;

/// Canonical id of the conversation between two users: `"{min}_{max}"`
pub fn conversation_id(a: &str, b: &str) -> String {
    let (first, second) = ordered_pair(a, b);
    format!("{}_{}", first, second)
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Which stored half of a conversation row belongs to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    First,
    Second,
}

impl Side {
    fn of(conversation: &Conversation, user_id: &str) -> Option<Side> {
        if conversation.participant1_id == user_id {
            Some(Side::First)
        } else if conversation.participant2_id == user_id {
            Some(Side::Second)
        } else {
            None
        }
    }

    pub(crate) fn column_prefix(&self) -> &'static str {
        match self {
            Side::First => "p1",
            Side::Second => "p2",
        }
    }

    fn project(&self, conversation: &Conversation) -> ConversationSettings {
        let (muted, pinned, theme_color, nickname, auto_translate, other) = match self {
            Side::First => (
                conversation.p1_muted,
                conversation.p1_pinned,
                &conversation.p1_theme_color,
                &conversation.p1_nickname,
                conversation.p1_auto_translate,
                &conversation.participant2_id,
            ),
            Side::Second => (
                conversation.p2_muted,
                conversation.p2_pinned,
                &conversation.p2_theme_color,
                &conversation.p2_nickname,
                conversation.p2_auto_translate,
                &conversation.participant1_id,
            ),
        };

        ConversationSettings {
            conversation_id: conversation.id.clone(),
            other_user_id: other.clone(),
            muted,
            pinned,
            theme_color: theme_color.clone(),
            nickname: nickname.clone(),
            auto_translate,
        }
    }
}

pub struct ConversationStore {
    storage: Arc<Storage>,
}

impl ConversationStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, a: &str, b: &str) -> Result<Option<Conversation>> {
        Ok(self.storage.get_conversation(&conversation_id(a, b)).await?)
    }

    /// Returns the conversation between `a` and `b`, creating it if needed
    pub async fn ensure(&self, a: &str, b: &str, now: DateTime<Utc>) -> Result<Conversation> {
        if a == b {
            return Err(AppError::BadRequest(
                "A conversation needs two different users".to_string(),
            ));
        }

        let id = conversation_id(a, b);
        let (first, second) = ordered_pair(a, b);
        self.storage.ensure_conversation(&id, first, second, now).await?;

        self.storage
            .get_conversation(&id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {}", id)))
    }

    /// The viewer's settings; defaults when the pair has never talked
    pub async fn settings_for(&self, viewer_id: &str, other_id: &str) -> Result<ConversationSettings> {
        match self.get(viewer_id, other_id).await? {
            Some(conversation) => project_for(&conversation, viewer_id),
            None => Ok(ConversationSettings {
                conversation_id: conversation_id(viewer_id, other_id),
                other_user_id: other_id.to_string(),
                muted: false,
                pinned: false,
                theme_color: None,
                nickname: None,
                auto_translate: false,
            }),
        }
    }

    /// Writes only the provided fields, on the viewer's side
    pub async fn upsert_settings(
        &self,
        viewer_id: &str,
        other_id: &str,
        patch: &SettingsPatch,
        now: DateTime<Utc>,
    ) -> Result<ConversationSettings> {
        let conversation = self.ensure(viewer_id, other_id, now).await?;
        let side = side_of(&conversation, viewer_id)?;

        if !patch.is_empty() {
            self.storage
                .update_side_settings(&conversation.id, side, patch, now)
                .await?;
        }

        self.settings_for(viewer_id, other_id).await
    }

    /// Theme is shared: both sides get the same color in one write
    pub async fn shared_theme_update(
        &self,
        a: &str,
        b: &str,
        theme_color: &str,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let conversation = self.ensure(a, b, now).await?;
        self.storage
            .set_theme_for_both(&conversation.id, theme_color, now)
            .await?;

        self.storage
            .get_conversation(&conversation.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {}", conversation.id)))
    }

    pub async fn touch_last_message(&self, message: &Message, now: DateTime<Utc>) -> Result<()> {
        self.storage
            .set_last_message(&message.conversation_id, Some(message), now)
            .await?;
        Ok(())
    }

    /// Rebuilds the last-message cache from the newest live message, or clears it
    pub async fn recompute_last_message(&self, conversation_id: &str, now: DateTime<Utc>) -> Result<()> {
        let latest = self.storage.latest_live_message(conversation_id).await?;
        self.storage
            .set_last_message(conversation_id, latest.as_ref(), now)
            .await?;
        Ok(())
    }

    pub async fn list_for(&self, user_id: &str) -> Result<Vec<(Conversation, ConversationSettings)>> {
        let conversations = self.storage.list_conversations_for(user_id).await?;

        conversations
            .into_iter()
            .map(|conversation| -> Result<_> {
                let settings = project_for(&conversation, user_id)?;
                Ok((conversation, settings))
            })
            .collect()
    }
}

fn side_of(conversation: &Conversation, user_id: &str) -> Result<Side> {
    Side::of(conversation, user_id).ok_or_else(|| {
        AppError::Forbidden("You are not a participant in this conversation".to_string())
    })
}

fn project_for(conversation: &Conversation, viewer_id: &str) -> Result<ConversationSettings> {
    Ok(side_of(conversation, viewer_id)?.project(conversation))
}
