//! Clients for the services this server depends on but does not own:
//! the messaging permission check, the push dispatcher and the user directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    /// User-facing explanation when `allowed` is false
    #[serde(default)]
    pub reason: Option<String>,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Answers "may `sender` message `recipient`" (blocks, privacy settings, deactivation)
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn can_message(&self, sender_id: &str, recipient_id: &str) -> anyhow::Result<PermissionDecision>;
}

#[async_trait]
pub trait PushDispatcher: Send + Sync {
    async fn dispatch(&self, user_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Looks up the "show my online status" preference
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn show_online_status(&self, user_id: &str) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionChecker>,
    pub push: Arc<dyn PushDispatcher>,
    pub directory: Arc<dyn UserDirectory>,
}

impl Collaborators {
    /// HTTP clients for every configured URL, local fallbacks for the rest
    pub fn from_config(gate: &GateConfig) -> anyhow::Result<Self> {
        let permissions: Arc<dyn PermissionChecker> = match &gate.permission_url {
            Some(url) => Arc::new(HttpPermissionChecker::new(url, gate.permission_timeout())?),
            None => {
                tracing::warn!("No permission service configured; every pair may message");
                Arc::new(AllowAll)
            }
        };

        let push: Arc<dyn PushDispatcher> = match &gate.push_url {
            Some(url) => Arc::new(HttpPushDispatcher::new(url, gate.push_timeout())?),
            None => {
                tracing::warn!("No push service configured; notifications are only logged");
                Arc::new(LogOnlyPush)
            }
        };

        let directory: Arc<dyn UserDirectory> = match &gate.directory_url {
            Some(url) => Arc::new(HttpUserDirectory::new(url, gate.directory_timeout())?),
            None => Arc::new(EveryoneVisible),
        };

        Ok(Self {
            permissions,
            push,
            directory,
        })
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

// ============================================================================
// HTTP implementations
// ============================================================================

pub struct HttpPermissionChecker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPermissionChecker {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[async_trait]
impl PermissionChecker for HttpPermissionChecker {
    async fn can_message(&self, sender_id: &str, recipient_id: &str) -> anyhow::Result<PermissionDecision> {
        let decision = self
            .client
            .get(format!("{}/permissions/messaging", self.base_url))
            .query(&[("sender", sender_id), ("recipient", recipient_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<PermissionDecision>()
            .await?;

        Ok(decision)
    }
}

pub struct HttpPushDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPushDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PushRequest<'a> {
    user_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl PushDispatcher for HttpPushDispatcher {
    async fn dispatch(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/push", self.base_url))
            .json(&PushRequest { user_id, text })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("directory URL {} cannot be a base", base_url);
        }

        Ok(Self {
            client: http_client(timeout)?,
            base_url,
        })
    }
}

/// `{base}/users/{user_id}/privacy` with the user id encoded as one path segment
fn privacy_url(base_url: &Url, user_id: &str) -> anyhow::Result<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("directory URL {} cannot be a base", base_url))?
        .pop_if_empty()
        .extend(["users", user_id, "privacy"]);
    Ok(url)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyPreferences {
    show_online_status: bool,
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn show_online_status(&self, user_id: &str) -> anyhow::Result<bool> {
        let prefs = self
            .client
            .get(privacy_url(&self.base_url, user_id)?)
            .send()
            .await?
            .error_for_status()?
            .json::<PrivacyPreferences>()
            .await?;

        Ok(prefs.show_online_status)
    }
}

// ============================================================================
// Local fallbacks
// ============================================================================

pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn can_message(&self, _sender_id: &str, _recipient_id: &str) -> anyhow::Result<PermissionDecision> {
        Ok(PermissionDecision::allow())
    }
}

pub struct LogOnlyPush;

#[async_trait]
impl PushDispatcher for LogOnlyPush {
    async fn dispatch(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(user_id = %user_id, "Push notification (not delivered): {}", text);
        Ok(())
    }
}

pub struct EveryoneVisible;

#[async_trait]
impl UserDirectory for EveryoneVisible {
    async fn show_online_status(&self, _user_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_reason_is_optional_on_the_wire() {
        let decision: PermissionDecision = serde_json::from_str(r#"{"allowed":true}"#).unwrap();
        assert_eq!(decision, PermissionDecision::allow());

        let denied: PermissionDecision =
            serde_json::from_str(r#"{"allowed":false,"reason":"You have been blocked"}"#).unwrap();
        assert_eq!(denied, PermissionDecision::deny("You have been blocked"));
    }

    #[test]
    fn user_id_is_one_encoded_path_segment() {
        let base = Url::parse("http://directory.local/api/").unwrap();
        let url = privacy_url(&base, "a/b c?x").unwrap();
        assert_eq!(url.as_str(), "http://directory.local/api/users/a%2Fb%20c%3Fx/privacy");

        let bare = Url::parse("http://directory.local").unwrap();
        let url = privacy_url(&bare, "42").unwrap();
        assert_eq!(url.as_str(), "http://directory.local/users/42/privacy");
    }

    #[test]
    fn directory_rejects_a_url_that_cannot_be_a_base() {
        assert!(HttpUserDirectory::new("mailto:someone@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpUserDirectory::new("http://directory.local/", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn unconfigured_gate_uses_fallbacks() {
        let gate = crate::config::Config::default().gate;
        assert!(Collaborators::from_config(&gate).is_ok());
    }

    #[tokio::test]
    async fn fallbacks_allow_and_show() {
        assert!(AllowAll.can_message("a", "b").await.unwrap().allowed);
        assert!(EveryoneVisible.show_online_status("a").await.unwrap());
        assert!(LogOnlyPush.dispatch("a", "hi").await.is_ok());
    }
}
