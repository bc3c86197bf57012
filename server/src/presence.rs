//! Multi-device presence tracking
//!
//! A user is online while at least one connection is registered for them and
//! they have not hidden their status. Broadcasts happen only when a user goes
//! from no connections to one, or from one to none.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::OnceCell;

use crate::clock::Clock;
use crate::events::ServerEvent;
use crate::external::UserDirectory;
use crate::fanout::{Broadcaster, Group};
use crate::models::PresenceStatus;

/// Result of removing a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub user_id: String,
    /// The user has no connections left
    pub was_last: bool,
}

/// Storage for presence state. The in-memory implementation is process-local;
/// a shared cache can implement the same operations.
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    /// Returns true when the user had no connections before this one
    async fn add_connection(&self, user_id: &str, conn_id: &str, at: DateTime<Utc>) -> bool;

    /// Removes the connection from whichever user owns it
    async fn remove_connection(&self, conn_id: &str, at: DateTime<Utc>) -> Option<Removal>;

    async fn connection_count(&self, user_id: &str) -> usize;

    async fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>>;

    async fn set_hidden(&self, user_id: &str, hidden: bool);

    async fn is_hidden(&self, user_id: &str) -> bool;

    /// Users with at least one connection, hidden or not
    async fn connected_user_count(&self) -> usize;
}

#[derive(Debug)]
struct UserPresence {
    connections: HashSet<String>,
    last_activity: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryPresenceRepository {
    users: DashMap<String, UserPresence>,
    owners: DashMap<String, String>,
    hidden: DashSet<String>,
}

impl InMemoryPresenceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRepository for InMemoryPresenceRepository {
    async fn add_connection(&self, user_id: &str, conn_id: &str, at: DateTime<Utc>) -> bool {
        self.owners.insert(conn_id.to_string(), user_id.to_string());

        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserPresence {
                connections: HashSet::new(),
                last_activity: at,
            });
        let first = entry.connections.is_empty();
        entry.connections.insert(conn_id.to_string());
        entry.last_activity = at;
        first
    }

    async fn remove_connection(&self, conn_id: &str, at: DateTime<Utc>) -> Option<Removal> {
        let (_, user_id) = self.owners.remove(conn_id)?;

        let mut entry = self.users.get_mut(&user_id)?;
        if !entry.connections.remove(conn_id) {
            return None;
        }
        entry.last_activity = at;
        let was_last = entry.connections.is_empty();
        drop(entry);

        Some(Removal { user_id, was_last })
    }

    async fn connection_count(&self, user_id: &str) -> usize {
        self.users
            .get(user_id)
            .map(|u| u.connections.len())
            .unwrap_or(0)
    }

    async fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.users.get(user_id).map(|u| u.last_activity)
    }

    async fn set_hidden(&self, user_id: &str, hidden: bool) {
        if hidden {
            self.hidden.insert(user_id.to_string());
        } else {
            self.hidden.remove(user_id);
        }
    }

    async fn is_hidden(&self, user_id: &str) -> bool {
        self.hidden.contains(user_id)
    }

    async fn connected_user_count(&self) -> usize {
        self.users
            .iter()
            .filter(|entry| !entry.connections.is_empty())
            .count()
    }
}

pub struct PresenceTracker {
    repo: Arc<dyn PresenceRepository>,
    directory: Arc<dyn UserDirectory>,
    directory_timeout: Duration,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    /// "Show online status" per user, looked up once per process. The cell
    /// makes concurrent first connections share a single lookup.
    preferences: DashMap<String, Arc<OnceCell<bool>>>,
}

impl PresenceTracker {
    pub fn new(
        repo: Arc<dyn PresenceRepository>,
        directory: Arc<dyn UserDirectory>,
        directory_timeout: Duration,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            directory,
            directory_timeout,
            broadcaster,
            clock,
            preferences: DashMap::new(),
        }
    }

    pub async fn register_connection(&self, user_id: &str, conn_id: &str) {
        // Until the preference is known the user counts as hidden
        let unresolved = !self.preference_resolved(user_id);
        if unresolved {
            self.repo.set_hidden(user_id, true).await;
        }

        let first = self
            .repo
            .add_connection(user_id, conn_id, self.clock.now())
            .await;
        if !first {
            // Another device's lookup may have finished before our hide landed
            if unresolved {
                let show = self.show_online_status(user_id).await;
                self.repo.set_hidden(user_id, !show).await;
            }
            return;
        }

        let show = self.show_online_status(user_id).await;
        self.repo.set_hidden(user_id, !show).await;

        // The connection may already be gone if the lookup was slow
        if show && self.repo.connection_count(user_id).await > 0 {
            tracing::info!(user_id = %user_id, "User online");
            self.broadcast_status(user_id).await;
        }
    }

    pub async fn unregister_connection(&self, conn_id: &str) {
        let Some(removal) = self.repo.remove_connection(conn_id, self.clock.now()).await else {
            return;
        };

        if removal.was_last && !self.repo.is_hidden(&removal.user_id).await {
            tracing::info!(user_id = %removal.user_id, "User offline");
            self.broadcast_status(&removal.user_id).await;
        }
    }

    pub async fn status_of(&self, user_id: &str) -> PresenceStatus {
        if self.repo.is_hidden(user_id).await {
            return PresenceStatus {
                user_id: user_id.to_string(),
                is_online: false,
                last_seen: None,
            };
        }

        PresenceStatus {
            user_id: user_id.to_string(),
            is_online: self.repo.connection_count(user_id).await > 0,
            last_seen: self.repo.last_activity(user_id).await,
        }
    }

    pub async fn status_of_many(&self, user_ids: &[String]) -> Vec<PresenceStatus> {
        let mut seen = HashSet::new();
        let mut statuses = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if seen.insert(user_id.as_str()) {
                statuses.push(self.status_of(user_id).await);
            }
        }
        statuses
    }

    /// Joins the target's presence group and sends the current status straight away
    pub async fn subscribe(&self, observer_conn_id: &str, target_user_id: &str) -> PresenceStatus {
        let status = self.status_of(target_user_id).await;

        if self
            .broadcaster
            .join(Group::Presence(target_user_id.to_string()), observer_conn_id)
        {
            self.broadcaster
                .send_to_connection(observer_conn_id, self.status_event(&status));
        }
        status
    }

    pub fn unsubscribe(&self, observer_conn_id: &str, target_user_id: &str) {
        self.broadcaster
            .leave(&Group::Presence(target_user_id.to_string()), observer_conn_id);
    }

    /// Overrides the directory preference and re-broadcasts the resulting status
    pub async fn set_visibility(&self, user_id: &str, show: bool) -> PresenceStatus {
        self.preferences
            .insert(user_id.to_string(), Arc::new(OnceCell::new_with(Some(show))));
        self.repo.set_hidden(user_id, !show).await;

        tracing::info!(user_id = %user_id, show, "Online status visibility changed");
        self.broadcast_status(user_id).await
    }

    pub async fn online_user_count(&self) -> usize {
        self.repo.connected_user_count().await
    }

    fn preference_resolved(&self, user_id: &str) -> bool {
        self.preferences
            .get(user_id)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    async fn show_online_status(&self, user_id: &str) -> bool {
        let cell = self
            .preferences
            .entry(user_id.to_string())
            .or_default()
            .clone();

        let lookup = cell
            .get_or_try_init(|| async {
                match tokio::time::timeout(
                    self.directory_timeout,
                    self.directory.show_online_status(user_id),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "timed out after {:?}",
                        self.directory_timeout
                    )),
                }
            })
            .await;

        match lookup {
            Ok(show) => *show,
            Err(e) => {
                // Not cached, so the next session retries
                tracing::warn!(user_id = %user_id, "Online status lookup failed, hiding: {:#}", e);
                false
            }
        }
    }

    async fn broadcast_status(&self, user_id: &str) -> PresenceStatus {
        let status = self.status_of(user_id).await;
        let event = self.status_event(&status);

        self.broadcaster.emit(&Group::Global, event.clone());
        self.broadcaster
            .emit(&Group::Presence(user_id.to_string()), event);
        status
    }

    fn status_event(&self, status: &PresenceStatus) -> ServerEvent {
        ServerEvent::UserOnlineStatus {
            user_id: status.user_id.clone(),
            is_online: status.is_online,
            timestamp: self.clock.now(),
            last_seen: status.last_seen,
        }
    }
}
