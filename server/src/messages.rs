//! Message lifecycle
//!
//! Active -> Edited -> DeletedForEveryone, plus per-viewer hiding. Permission
//! problems (not the sender, not the pinner) are errors; expired windows and
//! non-editable messages are [`Rejection`] values the caller hands back to the
//! client as a normal result.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::MessagingConfig;
use crate::conversations::{conversation_id, ConversationStore};
use crate::error::{AppError, Result};
use crate::events::Ack;
use crate::gate::{NotificationGate, PrivacyGate};
use crate::models::*;
use crate::storage::{NewMessage, Storage};

pub const EDIT_WINDOW_MINUTES: i64 = 15;
pub const UNSEND_WINDOW_MINUTES: i64 = 10;

pub fn edit_window() -> Duration {
    Duration::minutes(EDIT_WINDOW_MINUTES)
}

pub fn unsend_window() -> Duration {
    Duration::minutes(UNSEND_WINDOW_MINUTES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EditWindowExpired,
    UnsendWindowExpired,
    /// Media, system and unsent messages cannot be edited
    NotEditable,
    AlreadyUnsent,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::EditWindowExpired => "Messages can only be edited within 15 minutes of sending",
            Rejection::UnsendWindowExpired => "Messages can only be unsent within 10 minutes of sending",
            Rejection::NotEditable => "Only text messages can be edited",
            Rejection::AlreadyUnsent => "This message was unsent",
        }
    }

    pub fn to_ack(&self, action: &str) -> Ack {
        let mut ack = Ack::failed(action, self.message());
        match self {
            Rejection::EditWindowExpired | Rejection::NotEditable => ack.can_edit = Some(false),
            Rejection::UnsendWindowExpired => ack.can_unsend = Some(false),
            Rejection::AlreadyUnsent => {}
        }
        ack
    }
}

#[derive(Debug)]
pub enum Outcome<T> {
    Applied(T),
    Rejected(Rejection),
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Applied(_) => None,
            Outcome::Rejected(r) => Some(*r),
        }
    }
}

/// A successful change to one message, with everything fan-out needs
#[derive(Debug, Clone)]
pub struct Mutation {
    pub message: Message,
    pub actor_id: String,
    pub other_party_id: String,
}

impl Mutation {
    fn new(message: Message, actor_id: &str) -> Self {
        let other_party_id = message.other_party(actor_id).to_string();
        Self {
            message,
            actor_id: actor_id.to_string(),
            other_party_id,
        }
    }
}

/// A stored message and the push task it started, if any
#[derive(Debug)]
pub struct SentMessage {
    pub message: Message,
    pub push_task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub read_by: String,
    pub other_party_id: String,
    pub read_at: DateTime<Utc>,
    pub count: u64,
}

pub struct MessageService {
    storage: Arc<Storage>,
    conversations: Arc<ConversationStore>,
    privacy: PrivacyGate,
    notifications: NotificationGate,
    clock: Arc<dyn Clock>,
    limits: MessagingConfig,
}

impl MessageService {
    pub fn new(
        storage: Arc<Storage>,
        conversations: Arc<ConversationStore>,
        privacy: PrivacyGate,
        notifications: NotificationGate,
        clock: Arc<dyn Clock>,
        limits: MessagingConfig,
    ) -> Self {
        Self {
            storage,
            conversations,
            privacy,
            notifications,
            clock,
            limits,
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn send(&self, sender_id: &str, req: SendMessageRequest) -> Result<SentMessage> {
        self.validate_new(sender_id, &req)?;
        let conversation_id = conversation_id(sender_id, &req.recipient_id);

        let reply_to = match &req.reply_to_id {
            Some(reply_id) => {
                let target = self.load(reply_id).await?;
                if target.conversation_id != conversation_id {
                    return Err(AppError::BadRequest(
                        "Replies must target a message in the same conversation".to_string(),
                    ));
                }
                Some(ReplySnapshot {
                    message_id: target.id,
                    content: target.content,
                    sender_id: target.sender_id,
                })
            }
            None => None,
        };

        self.privacy.authorize(sender_id, &req.recipient_id).await?;

        let message = self
            .persist(sender_id, &req.recipient_id, req.content, req.image_urls, reply_to, false)
            .await?;

        let push_task = match self
            .conversations
            .settings_for(&message.recipient_id, &message.sender_id)
            .await
        {
            Ok(settings) if settings.muted => None,
            Ok(_) => Some(self.notifications.notify(&message)),
            Err(e) => {
                tracing::warn!("Skipping push for {}: {}", message.id, e);
                None
            }
        };

        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Message sent"
        );

        Ok(SentMessage { message, push_task })
    }

    /// In-band notice such as a theme change: no permission check, no push, no last-message update
    pub async fn send_system(&self, actor_id: &str, other_id: &str, content: &str) -> Result<Message> {
        self.persist(actor_id, other_id, content.to_string(), Vec::new(), None, true)
            .await
    }

    async fn persist(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: String,
        image_urls: Vec<String>,
        reply_to: Option<ReplySnapshot>,
        is_system: bool,
    ) -> Result<Message> {
        let now = self.clock.now();
        let conversation = self.conversations.ensure(sender_id, recipient_id, now).await?;

        let message = self
            .storage
            .insert_message(&NewMessage {
                message_id: Uuid::new_v4().to_string(),
                conversation_id: conversation.id,
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                content,
                image_urls,
                reply_to,
                is_system,
                created_at: now,
            })
            .await?;

        if !is_system {
            if let Err(e) = self.conversations.touch_last_message(&message, now).await {
                tracing::warn!("Failed to update last message of {}: {}", message.conversation_id, e);
            }
        }

        Ok(message)
    }

    pub async fn edit(&self, editor_id: &str, message_id: &str, content: &str) -> Result<Outcome<Mutation>> {
        let message = self.load(message_id).await?;
        if message.sender_id != editor_id {
            return Err(AppError::Forbidden(
                "Only the sender can edit this message".to_string(),
            ));
        }
        self.validate_content(content)?;
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("Message content cannot be empty".to_string()));
        }

        if message.is_deleted_for_everyone || message.is_system || message.is_media() {
            return Ok(Outcome::Rejected(Rejection::NotEditable));
        }

        let now = self.clock.now();
        if message.age(now) > edit_window() {
            return Ok(Outcome::Rejected(Rejection::EditWindowExpired));
        }

        if !self
            .storage
            .update_message_content(message_id, content, now)
            .await?
        {
            // Unsent between the load and the write
            return Ok(Outcome::Rejected(Rejection::NotEditable));
        }
        self.refresh_last_message(&message.conversation_id, now).await;

        let edited = self.load(message_id).await?;
        tracing::info!(message_id = %message_id, "Message edited");
        Ok(Outcome::Applied(Mutation::new(edited, editor_id)))
    }

    pub async fn unsend(&self, user_id: &str, message_id: &str) -> Result<Outcome<Mutation>> {
        let message = self.load(message_id).await?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Only the sender can unsend this message".to_string(),
            ));
        }
        if message.is_deleted_for_everyone {
            return Ok(Outcome::Rejected(Rejection::AlreadyUnsent));
        }

        let now = self.clock.now();
        if message.age(now) > unsend_window() {
            return Ok(Outcome::Rejected(Rejection::UnsendWindowExpired));
        }

        if !self
            .storage
            .mark_deleted_for_everyone(message_id, user_id, now)
            .await?
        {
            return Ok(Outcome::Rejected(Rejection::AlreadyUnsent));
        }
        self.refresh_last_message(&message.conversation_id, now).await;

        let unsent = self.load(message_id).await?;
        tracing::info!(message_id = %message_id, "Message unsent");
        Ok(Outcome::Applied(Mutation::new(unsent, user_id)))
    }

    /// Hides the message for this viewer only; repeating it is a no-op
    pub async fn delete_for_me(&self, user_id: &str, message_id: &str) -> Result<Mutation> {
        let message = self.load(message_id).await?;
        require_participant(&message, user_id)?;

        if !self.storage.hide_for_user(message_id, user_id).await? {
            tracing::debug!(message_id = %message_id, user_id = %user_id, "Message already hidden");
        }

        let hidden = self.load(message_id).await?;
        Ok(Mutation::new(hidden, user_id))
    }

    pub async fn pin(&self, user_id: &str, message_id: &str) -> Result<Outcome<Mutation>> {
        let message = self.load(message_id).await?;
        require_participant(&message, user_id)?;
        if message.is_deleted_for_everyone {
            return Ok(Outcome::Rejected(Rejection::AlreadyUnsent));
        }

        if !self
            .storage
            .set_pin(message_id, user_id, self.clock.now())
            .await?
        {
            return Ok(Outcome::Rejected(Rejection::AlreadyUnsent));
        }

        let pinned = self.load(message_id).await?;
        Ok(Outcome::Applied(Mutation::new(pinned, user_id)))
    }

    pub async fn unpin(&self, user_id: &str, message_id: &str) -> Result<Mutation> {
        let message = self.load(message_id).await?;
        require_participant(&message, user_id)?;

        // Matches only while the caller still holds the pin
        if !self.storage.clear_pin(message_id, user_id).await? {
            return Err(AppError::Forbidden(
                "Only the user who pinned this message can unpin it".to_string(),
            ));
        }

        let unpinned = self.load(message_id).await?;
        Ok(Mutation::new(unpinned, user_id))
    }

    pub async fn mark_read(&self, reader_id: &str, other_id: &str) -> Result<ReadReceipt> {
        if reader_id == other_id {
            return Err(AppError::BadRequest("Cannot read a conversation with yourself".to_string()));
        }

        let conversation_id = conversation_id(reader_id, other_id);
        let read_at = self.clock.now();
        let count = self
            .storage
            .mark_conversation_read(&conversation_id, reader_id, read_at)
            .await?;

        Ok(ReadReceipt {
            conversation_id,
            read_by: reader_id.to_string(),
            other_party_id: other_id.to_string(),
            read_at,
            count,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn list_messages(&self, viewer_id: &str, other_id: &str, page: &PageQuery) -> Result<Vec<Message>> {
        let limit = self.page_limit(page.limit);
        let offset = page.offset.unwrap_or(0);
        Ok(self
            .storage
            .list_messages(&conversation_id(viewer_id, other_id), viewer_id, limit, offset)
            .await?)
    }

    /// Text messages containing `query`; media never matches
    pub async fn search(&self, viewer_id: &str, other_id: &str, query: &str, limit: Option<u32>) -> Result<Vec<Message>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::BadRequest("Search query cannot be empty".to_string()));
        }

        let found = self
            .storage
            .search_messages(&conversation_id(viewer_id, other_id), viewer_id, query)
            .await?;

        Ok(found
            .into_iter()
            .filter(|m| !m.is_media())
            .take(self.page_limit(limit) as usize)
            .collect())
    }

    pub async fn media(&self, viewer_id: &str, other_id: &str, limit: Option<u32>) -> Result<Vec<Message>> {
        let candidates = self
            .storage
            .media_candidates(&conversation_id(viewer_id, other_id), viewer_id)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(Message::is_media)
            .take(self.page_limit(limit) as usize)
            .collect())
    }

    pub async fn pinned(&self, viewer_id: &str, other_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .storage
            .pinned_messages(&conversation_id(viewer_id, other_id), viewer_id)
            .await?)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        Ok(self.storage.unread_count(user_id, None).await?)
    }

    /// The user's conversations, pinned first, then by latest activity
    pub async fn list_conversations(&self, viewer_id: &str) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();

        for (conversation, settings) in self.conversations.list_for(viewer_id).await? {
            let last = self
                .storage
                .latest_visible_message(&conversation.id, viewer_id)
                .await?;
            let unread_count = self
                .storage
                .unread_count(viewer_id, Some(&conversation.id))
                .await?;

            summaries.push(ConversationSummary {
                last_message: last.as_ref().map(|m| m.content.clone()),
                last_message_sender_id: last.as_ref().map(|m| m.sender_id.clone()),
                last_message_at: last.as_ref().map(|m| m.created_at),
                unread_count,
                settings,
            });
        }

        summaries.sort_by(|a, b| {
            b.settings
                .pinned
                .cmp(&a.settings.pinned)
                .then_with(|| b.last_message_at.cmp(&a.last_message_at))
        });

        Ok(summaries)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(&self, message_id: &str) -> Result<Message> {
        self.storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {}", message_id)))
    }

    /// The cache is denormalized; failing to rebuild it must not fail the mutation
    async fn refresh_last_message(&self, conversation_id: &str, now: DateTime<Utc>) {
        if let Err(e) = self
            .conversations
            .recompute_last_message(conversation_id, now)
            .await
        {
            tracing::warn!("Failed to recompute last message of {}: {}", conversation_id, e);
        }
    }

    fn validate_new(&self, sender_id: &str, req: &SendMessageRequest) -> Result<()> {
        if req.recipient_id.trim().is_empty() {
            return Err(AppError::BadRequest("Recipient is required".to_string()));
        }
        if req.recipient_id == sender_id {
            return Err(AppError::BadRequest("You cannot message yourself".to_string()));
        }
        if req.content.trim().is_empty() && req.image_urls.is_empty() {
            return Err(AppError::BadRequest(
                "A message needs content or at least one image".to_string(),
            ));
        }
        if req.image_urls.len() > self.limits.max_images_per_message {
            return Err(AppError::BadRequest(format!(
                "At most {} images per message",
                self.limits.max_images_per_message
            )));
        }
        if req.image_urls.iter().any(|url| url.trim().is_empty()) {
            return Err(AppError::BadRequest("Image URLs cannot be empty".to_string()));
        }
        self.validate_content(&req.content)
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.chars().count() > self.limits.max_content_length {
            return Err(AppError::BadRequest(format!(
                "Message content exceeds {} characters",
                self.limits.max_content_length
            )));
        }
        Ok(())
    }

    fn page_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.limits.default_page_size)
            .clamp(1, self.limits.max_page_size)
    }
}

fn require_participant(message: &Message, user_id: &str) -> Result<()> {
    if message.is_participant(user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You are not a participant in this conversation".to_string(),
        ))
    }
}
