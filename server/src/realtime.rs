//! Real-time hub
//!
//! Runs a mutation through the services, then fans the resulting events out.
//! Both transports (websocket commands and REST) go through here so every
//! change reaches connected devices the same way.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::clock::Clock;
use crate::config::Config;
use crate::conversations::{conversation_id, ConversationStore};
use crate::error::{AppError, Result};
use crate::events::ServerEvent;
use crate::external::Collaborators;
use crate::fanout::{Broadcaster, Group};
use crate::gate::{NotificationGate, PrivacyGate};
use crate::messages::{MessageService, Mutation, Outcome, ReadReceipt, SentMessage};
use crate::models::*;
use crate::presence::{InMemoryPresenceRepository, PresenceTracker};
use crate::storage::Storage;

const MAX_THEME_COLOR_LENGTH: usize = 32;

pub struct Hub {
    storage: Arc<Storage>,
    conversations: Arc<ConversationStore>,
    messages: MessageService,
    presence: PresenceTracker,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    /// conversation_id -> lock held across create + broadcast
    send_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Hub {
    pub fn new(
        storage: Arc<Storage>,
        collaborators: Collaborators,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new());
        let conversations = Arc::new(ConversationStore::new(Arc::clone(&storage)));

        let messages = MessageService::new(
            Arc::clone(&storage),
            Arc::clone(&conversations),
            PrivacyGate::new(collaborators.permissions, &config.gate),
            NotificationGate::new(collaborators.push, &config.gate),
            Arc::clone(&clock),
            config.messaging.clone(),
        );

        let presence = PresenceTracker::new(
            Arc::new(InMemoryPresenceRepository::new()),
            collaborators.directory,
            config.gate.directory_timeout(),
            Arc::clone(&broadcaster),
            Arc::clone(&clock),
        );

        Self {
            storage,
            conversations,
            messages,
            presence,
            broadcaster,
            clock,
            send_locks: DashMap::new(),
        }
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ========================================================================
    // Connections
    // ========================================================================

    pub async fn connect(&self, conn_id: &str, user_id: &str, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.broadcaster.register(conn_id, user_id, sender);
        self.presence.register_connection(user_id, conn_id).await;
    }

    pub async fn disconnect(&self, conn_id: &str) {
        self.broadcaster.unregister(conn_id);
        self.presence.unregister_connection(conn_id).await;
    }

    // ========================================================================
    // Messages
    // ========================================================================

    pub async fn send_message(&self, sender_id: &str, req: SendMessageRequest) -> Result<SentMessage> {
        let _guard = self
            .lock_conversation(conversation_id(sender_id, &req.recipient_id))
            .await;

        let sent = self.messages.send(sender_id, req).await?;
        self.broadcaster.emit(
            &Group::User(sent.message.sender_id.clone()),
            ServerEvent::MessageSent(sent.message.clone()),
        );
        self.broadcaster.emit(
            &Group::User(sent.message.recipient_id.clone()),
            ServerEvent::NewMessage(sent.message.clone()),
        );
        Ok(sent)
    }

    pub async fn edit_message(&self, editor_id: &str, message_id: &str, content: &str) -> Result<Outcome<Mutation>> {
        let outcome = self.messages.edit(editor_id, message_id, content).await?;
        if let Outcome::Applied(mutation) = &outcome {
            self.emit_to_both(mutation, ServerEvent::message_edited(&mutation.message));
        }
        Ok(outcome)
    }

    pub async fn unsend_message(&self, user_id: &str, message_id: &str) -> Result<Outcome<Mutation>> {
        let outcome = self.messages.unsend(user_id, message_id).await?;
        if let Outcome::Applied(mutation) = &outcome {
            self.emit_to_both(
                mutation,
                ServerEvent::MessageUnsent {
                    message_id: mutation.message.id.clone(),
                    conversation_id: mutation.message.conversation_id.clone(),
                    unsend_by: mutation.actor_id.clone(),
                },
            );
        }
        Ok(outcome)
    }

    pub async fn pin_message(&self, user_id: &str, message_id: &str) -> Result<Outcome<Mutation>> {
        let outcome = self.messages.pin(user_id, message_id).await?;
        if let Outcome::Applied(mutation) = &outcome {
            // No pin time means the message was unsent right after the pin landed
            let Some(pinned_at) = mutation.message.pinned_at else {
                return Ok(outcome);
            };
            self.emit_to_both(
                mutation,
                ServerEvent::MessagePinned {
                    message_id: mutation.message.id.clone(),
                    conversation_id: mutation.message.conversation_id.clone(),
                    pinned_by: mutation.actor_id.clone(),
                    pinned_at,
                },
            );
        }
        Ok(outcome)
    }

    pub async fn unpin_message(&self, user_id: &str, message_id: &str) -> Result<Mutation> {
        let mutation = self.messages.unpin(user_id, message_id).await?;
        self.emit_to_both(
            &mutation,
            ServerEvent::MessageUnpinned {
                message_id: mutation.message.id.clone(),
                conversation_id: mutation.message.conversation_id.clone(),
                unpinned_by: mutation.actor_id.clone(),
            },
        );
        Ok(mutation)
    }

    pub async fn delete_for_me(&self, user_id: &str, message_id: &str) -> Result<Mutation> {
        let mutation = self.messages.delete_for_me(user_id, message_id).await?;
        self.broadcaster.emit(
            &Group::User(user_id.to_string()),
            ServerEvent::MessageHidden {
                message_id: mutation.message.id.clone(),
                conversation_id: mutation.message.conversation_id.clone(),
            },
        );
        Ok(mutation)
    }

    pub async fn mark_read(&self, reader_id: &str, other_id: &str) -> Result<ReadReceipt> {
        let receipt = self.messages.mark_read(reader_id, other_id).await?;
        self.broadcaster.emit_to_users(
            &[receipt.read_by.as_str(), receipt.other_party_id.as_str()],
            ServerEvent::MessagesRead {
                conversation_id: receipt.conversation_id.clone(),
                read_by: receipt.read_by.clone(),
                read_at: receipt.read_at,
            },
        );
        Ok(receipt)
    }

    /// Ephemeral; the recipient's devices only
    pub fn typing(&self, user_id: &str, recipient_id: &str, is_typing: bool) -> Result<()> {
        if user_id == recipient_id {
            return Err(AppError::BadRequest("Cannot type to yourself".to_string()));
        }

        self.broadcaster.emit(
            &Group::User(recipient_id.to_string()),
            ServerEvent::UserTyping {
                user_id: user_id.to_string(),
                conversation_id: conversation_id(user_id, recipient_id),
                is_typing,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Sets the shared theme and posts a system notice into the conversation
    pub async fn change_theme(&self, user_id: &str, other_id: &str, theme_color: &str) -> Result<ConversationSettings> {
        let theme_color = theme_color.trim();
        if theme_color.is_empty() || theme_color.len() > MAX_THEME_COLOR_LENGTH {
            return Err(AppError::BadRequest("Invalid theme color".to_string()));
        }

        let _guard = self.lock_conversation(conversation_id(user_id, other_id)).await;

        let conversation = self
            .conversations
            .shared_theme_update(user_id, other_id, theme_color, self.clock.now())
            .await?;

        let notice = self
            .messages
            .send_system(user_id, other_id, &format!("changed the theme color to {}", theme_color))
            .await?;

        self.broadcaster.emit(
            &Group::User(user_id.to_string()),
            ServerEvent::MessageSent(notice.clone()),
        );
        self.broadcaster.emit(
            &Group::User(other_id.to_string()),
            ServerEvent::NewMessage(notice),
        );
        self.broadcaster.emit_to_users(
            &[user_id, other_id],
            ServerEvent::ThemeColorChanged {
                conversation_id: conversation.id.clone(),
                theme_color: theme_color.to_string(),
                changed_by: user_id.to_string(),
            },
        );

        tracing::info!(conversation_id = %conversation.id, "Theme changed");
        self.conversations.settings_for(user_id, other_id).await
    }

    /// Per-viewer settings; synced to the viewer's own devices
    pub async fn update_settings(
        &self,
        user_id: &str,
        other_id: &str,
        patch: &SettingsPatch,
    ) -> Result<ConversationSettings> {
        let settings = self
            .conversations
            .upsert_settings(user_id, other_id, patch, self.clock.now())
            .await?;

        self.broadcaster.emit(
            &Group::User(user_id.to_string()),
            ServerEvent::ConversationSettingsChanged(settings.clone()),
        );
        Ok(settings)
    }

    // ========================================================================
    // Presence
    // ========================================================================

    pub async fn subscribe_status(&self, conn_id: &str, target_user_id: &str) -> PresenceStatus {
        self.presence.subscribe(conn_id, target_user_id).await
    }

    pub fn unsubscribe_status(&self, conn_id: &str, target_user_id: &str) {
        self.presence.unsubscribe(conn_id, target_user_id);
    }

    pub async fn statuses(&self, user_ids: &[String]) -> Vec<PresenceStatus> {
        self.presence.status_of_many(user_ids).await
    }

    pub async fn set_visibility(&self, user_id: &str, show: bool) -> PresenceStatus {
        let status = self.presence.set_visibility(user_id, show).await;
        self.broadcaster.emit(
            &Group::User(user_id.to_string()),
            ServerEvent::PrivacySettingsChanged {
                user_id: user_id.to_string(),
                show_online_status: show,
            },
        );
        status
    }

    pub async fn stats(&self) -> Result<ServerStats> {
        let mut stats = self.storage.get_stats().await?;
        stats.online_users = self.presence.online_user_count().await as i64;
        Ok(stats)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn emit_to_both(&self, mutation: &Mutation, event: ServerEvent) {
        self.broadcaster.emit_to_users(
            &[mutation.actor_id.as_str(), mutation.other_party_id.as_str()],
            event,
        );
    }

    async fn lock_conversation(&self, conversation_id: String) -> ConversationLock<'_> {
        let lock = self
            .send_locks
            .entry(conversation_id.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        ConversationLock {
            locks: &self.send_locks,
            conversation_id,
            guard: Some(guard),
        }
    }

    /// Conversations that currently have a writer holding or waiting on their lock
    pub fn locked_conversation_count(&self) -> usize {
        self.send_locks.len()
    }
}

/// Holds a conversation's send lock; the map entry goes away with the last holder
struct ConversationLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    conversation_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so the entry stays until they finish
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
