//! Privacy and notification gate
//!
//! The permission check runs before any message is persisted and is bounded by
//! a timeout. Push notifications run after persistence as best-effort tasks:
//! their failures are logged and never reach the sender.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::config::{FailMode, GateConfig};
use crate::error::{AppError, Result};
use crate::external::{PermissionChecker, PushDispatcher};
use crate::models::{MediaTag, Message};

const DEFAULT_BLOCK_REASON: &str = "You can't send messages to this user";
const PUSH_PREVIEW_CHARS: usize = 100;

/// Runs `fut` detached. Errors and panics are logged here and never propagate.
pub fn spawn_best_effort<F>(task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => tracing::debug!(task, "Best-effort task finished"),
            Ok(Err(e)) => tracing::warn!(task, "Best-effort task failed: {:#}", e),
            Err(_) => tracing::error!(task, "Best-effort task panicked"),
        }
    })
}

pub struct PrivacyGate {
    checker: Arc<dyn PermissionChecker>,
    timeout: Duration,
    on_failure: FailMode,
}

impl PrivacyGate {
    pub fn new(checker: Arc<dyn PermissionChecker>, config: &GateConfig) -> Self {
        Self {
            checker,
            timeout: config.permission_timeout(),
            on_failure: config.on_permission_failure,
        }
    }

    /// Ok when `sender` may message `recipient`
    pub async fn authorize(&self, sender_id: &str, recipient_id: &str) -> Result<()> {
        let outcome = tokio::time::timeout(
            self.timeout,
            self.checker.can_message(sender_id, recipient_id),
        )
        .await;

        match outcome {
            Ok(Ok(decision)) if decision.allowed => Ok(()),
            Ok(Ok(decision)) => {
                tracing::info!(
                    sender = %sender_id,
                    recipient = %recipient_id,
                    "Message refused by permission check"
                );
                Err(AppError::MessagingBlocked(
                    decision
                        .reason
                        .unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_string()),
                ))
            }
            Ok(Err(e)) => self.unavailable(sender_id, recipient_id, &format!("{:#}", e)),
            Err(_) => self.unavailable(
                sender_id,
                recipient_id,
                &format!("timed out after {:?}", self.timeout),
            ),
        }
    }

    fn unavailable(&self, sender_id: &str, recipient_id: &str, cause: &str) -> Result<()> {
        match self.on_failure {
            FailMode::Deny => {
                tracing::warn!(
                    sender = %sender_id,
                    recipient = %recipient_id,
                    "Permission check failed, denying: {}",
                    cause
                );
                Err(AppError::ExternalService(
                    "Could not verify that you can message this user, please try again".to_string(),
                ))
            }
            FailMode::Allow => {
                tracing::warn!(
                    sender = %sender_id,
                    recipient = %recipient_id,
                    "Permission check failed, allowing: {}",
                    cause
                );
                Ok(())
            }
        }
    }
}

pub struct NotificationGate {
    push: Arc<dyn PushDispatcher>,
    timeout: Duration,
}

impl NotificationGate {
    pub fn new(push: Arc<dyn PushDispatcher>, config: &GateConfig) -> Self {
        Self {
            push,
            timeout: config.push_timeout(),
        }
    }

    /// Fire-and-forget push for a freshly stored message
    pub fn notify(&self, message: &Message) -> JoinHandle<()> {
        let push = Arc::clone(&self.push);
        let timeout = self.timeout;
        let user_id = message.recipient_id.clone();
        let text = notification_text(message);

        spawn_best_effort("push notification", async move {
            tokio::time::timeout(timeout, push.dispatch(&user_id, &text))
                .await
                .map_err(|_| anyhow::anyhow!("push to {} timed out after {:?}", user_id, timeout))?
        })
    }
}

pub fn notification_text(message: &Message) -> String {
    if let Some(tag) = message.media_tag() {
        return tag.preview().to_string();
    }
    if message.content.trim().is_empty() && !message.image_urls.is_empty() {
        return MediaTag::Image.preview().to_string();
    }

    let mut chars = message.content.chars();
    let mut preview: String = chars.by_ref().take(PUSH_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        preview.push('…');
    }
    preview
}
