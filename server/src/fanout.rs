//! Fan-out of real-time events to live websocket connections
//!
//! Connections are addressed through broadcast groups: one group per user
//! (all of that user's devices), one presence group per watched user, and a
//! global presence group every connection belongs to.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::events::ServerEvent;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every device of one user
    User(String),
    /// Connections watching one user's online status
    Presence(String),
    /// Every connection, for inbox-style presence views
    Global,
}

/// Represents an active WebSocket connection
#[derive(Clone)]
pub struct Connection {
    pub user_id: String,
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
pub struct Broadcaster {
    /// conn_id -> connection
    connections: DashMap<String, Connection>,
    /// group -> conn_ids
    groups: DashMap<Group, HashSet<String>>,
    /// conn_id -> groups it joined, for cleanup
    memberships: DashMap<String, HashSet<Group>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and put it in its user's group and the global group
    pub fn register(&self, conn_id: &str, user_id: &str, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(
            conn_id.to_string(),
            Connection {
                user_id: user_id.to_string(),
                sender,
            },
        );
        self.join(Group::User(user_id.to_string()), conn_id);
        self.join(Group::Global, conn_id);

        tracing::debug!("Connection registered: user={}, conn={}", user_id, conn_id);
    }

    /// Drop a connection from every group; returns the user it belonged to
    pub fn unregister(&self, conn_id: &str) -> Option<String> {
        let (_, connection) = self.connections.remove(conn_id)?;

        if let Some((_, groups)) = self.memberships.remove(conn_id) {
            for group in groups {
                self.remove_member(&group, conn_id);
            }
        }

        tracing::debug!("Connection unregistered: user={}, conn={}", connection.user_id, conn_id);
        Some(connection.user_id)
    }

    /// Returns false for unknown connections
    pub fn join(&self, group: Group, conn_id: &str) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }

        self.memberships
            .entry(conn_id.to_string())
            .or_default()
            .insert(group.clone());
        self.groups.entry(group).or_default().insert(conn_id.to_string());
        true
    }

    pub fn leave(&self, group: &Group, conn_id: &str) {
        if let Some(mut groups) = self.memberships.get_mut(conn_id) {
            groups.remove(group);
        }
        self.remove_member(group, conn_id);
    }

    fn remove_member(&self, group: &Group, conn_id: &str) {
        let now_empty = match self.groups.get_mut(group) {
            Some(mut members) => {
                members.remove(conn_id);
                members.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.groups.remove_if(group, |_, members| members.is_empty());
        }
    }

    pub fn members(&self, group: &Group) -> Vec<String> {
        self.groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send to every connection in the group; returns how many were reached
    pub fn emit(&self, group: &Group, event: ServerEvent) -> usize {
        let members = self.members(group);
        self.deliver(members.iter().map(String::as_str), &event)
    }

    /// Send once to every device of each listed user, even if a user is listed twice
    pub fn emit_to_users(&self, user_ids: &[&str], event: ServerEvent) -> usize {
        let mut targets: HashSet<String> = HashSet::new();
        for user_id in user_ids {
            targets.extend(self.members(&Group::User(user_id.to_string())));
        }
        self.deliver(targets.iter().map(String::as_str), &event)
    }

    pub fn send_to_connection(&self, conn_id: &str, event: ServerEvent) -> bool {
        self.deliver(std::iter::once(conn_id), &event) == 1
    }

    fn deliver<'a>(&self, conn_ids: impl Iterator<Item = &'a str>, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for conn_id in conn_ids {
            let Some(connection) = self.connections.get(conn_id) else {
                continue;
            };
            match connection.sender.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!("Failed to send {} to conn {}: {}", event.name(), conn_id, e),
            }
        }
        delivered
    }
}
