//! Real-time wire protocol
//!
//! Every frame is `{"type": <name>, "payload": {...}}`. Events are typed here
//! and only turned into JSON by the websocket writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationSettings, Message, SendMessageRequest, SettingsPatch};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Delivered to the recipient's devices
    NewMessage(Message),

    /// Delivered to the sender's devices
    MessageSent(Message),

    MessagesRead {
        conversation_id: String,
        read_by: String,
        read_at: DateTime<Utc>,
    },

    UserTyping {
        user_id: String,
        conversation_id: String,
        is_typing: bool,
    },

    MessageUnsent {
        message_id: String,
        conversation_id: String,
        unsend_by: String,
    },

    MessageEdited {
        id: String,
        content: String,
        is_edited: bool,
        edited_at: Option<DateTime<Utc>>,
        sender_id: String,
        recipient_id: String,
        conversation_id: String,
    },

    MessagePinned {
        message_id: String,
        conversation_id: String,
        pinned_by: String,
        pinned_at: DateTime<Utc>,
    },

    MessageUnpinned {
        message_id: String,
        conversation_id: String,
        unpinned_by: String,
    },

    /// Delete-for-me, synced to the viewer's own devices only
    MessageHidden {
        message_id: String,
        conversation_id: String,
    },

    ThemeColorChanged {
        conversation_id: String,
        theme_color: String,
        changed_by: String,
    },

    ConversationSettingsChanged(ConversationSettings),

    UserOnlineStatus {
        user_id: String,
        is_online: bool,
        timestamp: DateTime<Utc>,
        last_seen: Option<DateTime<Utc>>,
    },

    PrivacySettingsChanged {
        user_id: String,
        show_online_status: bool,
    },

    Ack(Ack),

    Error {
        code: String,
        message: String,
    },

    Pong,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::MessageSent(_) => "messageSent",
            ServerEvent::MessagesRead { .. } => "messagesRead",
            ServerEvent::UserTyping { .. } => "userTyping",
            ServerEvent::MessageUnsent { .. } => "messageUnsent",
            ServerEvent::MessageEdited { .. } => "messageEdited",
            ServerEvent::MessagePinned { .. } => "messagePinned",
            ServerEvent::MessageUnpinned { .. } => "messageUnpinned",
            ServerEvent::MessageHidden { .. } => "messageHidden",
            ServerEvent::ThemeColorChanged { .. } => "themeColorChanged",
            ServerEvent::ConversationSettingsChanged(_) => "conversationSettingsChanged",
            ServerEvent::UserOnlineStatus { .. } => "userOnlineStatus",
            ServerEvent::PrivacySettingsChanged { .. } => "privacySettingsChanged",
            ServerEvent::Ack(_) => "ack",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }

    pub fn message_edited(message: &Message) -> Self {
        ServerEvent::MessageEdited {
            id: message.id.clone(),
            content: message.content.clone(),
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            conversation_id: message.conversation_id.clone(),
        }
    }
}

/// Reply to a single client command
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_unsend: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Ack {
    pub fn ok(action: &str, data: Option<serde_json::Value>) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            data,
            ..Default::default()
        }
    }

    pub fn failed(action: &str, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    SendMessage(SendMessageRequest),
    EditMessage { message_id: String, content: String },
    UnsendMessage { message_id: String },
    DeleteForMe { message_id: String },
    PinMessage { message_id: String },
    UnpinMessage { message_id: String },
    MarkRead { other_user_id: String },
    Typing { recipient_id: String, is_typing: bool },
    ChangeTheme { other_user_id: String, theme_color: String },
    UpdateSettings { other_user_id: String, settings: SettingsPatch },
    SubscribeStatus { user_id: String },
    UnsubscribeStatus { user_id: String },
    GetStatuses { user_ids: Vec<String> },
    SetVisibility { show_online_status: bool },
    Ping,
}

impl ClientCommand {
    pub fn action(&self) -> &'static str {
        match self {
            ClientCommand::SendMessage(_) => "sendMessage",
            ClientCommand::EditMessage { .. } => "editMessage",
            ClientCommand::UnsendMessage { .. } => "unsendMessage",
            ClientCommand::DeleteForMe { .. } => "deleteForMe",
            ClientCommand::PinMessage { .. } => "pinMessage",
            ClientCommand::UnpinMessage { .. } => "unpinMessage",
            ClientCommand::MarkRead { .. } => "markRead",
            ClientCommand::Typing { .. } => "typing",
            ClientCommand::ChangeTheme { .. } => "changeTheme",
            ClientCommand::UpdateSettings { .. } => "updateSettings",
            ClientCommand::SubscribeStatus { .. } => "subscribeStatus",
            ClientCommand::UnsubscribeStatus { .. } => "unsubscribeStatus",
            ClientCommand::GetStatuses { .. } => "getStatuses",
            ClientCommand::SetVisibility { .. } => "setVisibility",
            ClientCommand::Ping => "ping",
        }
    }
}

/// Inbound frame: a command plus an optional id echoed back in its ack
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub command: ClientCommand,
}
