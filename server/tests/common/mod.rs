//! Shared fixtures: in-memory storage, a manual clock and fakes of the external services

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_server::{
    clock::ManualClock,
    config::Config,
    events::ServerEvent,
    external::{Collaborators, PermissionChecker, PermissionDecision, PushDispatcher, UserDirectory},
    realtime::Hub,
    storage::Storage,
    AppState,
};

/// Denies listed (sender, recipient) pairs, allows everything else
#[derive(Default)]
pub struct FakePermissions {
    blocked: Mutex<HashSet<(String, String)>>,
}

impl FakePermissions {
    pub fn block(&self, sender: &str, recipient: &str) {
        self.blocked
            .lock()
            .insert((sender.to_string(), recipient.to_string()));
    }
}

#[async_trait]
impl PermissionChecker for FakePermissions {
    async fn can_message(&self, sender_id: &str, recipient_id: &str) -> anyhow::Result<PermissionDecision> {
        let key = (sender_id.to_string(), recipient_id.to_string());
        if self.blocked.lock().contains(&key) {
            Ok(PermissionDecision::deny("This user has blocked you"))
        } else {
            Ok(PermissionDecision::allow())
        }
    }
}

#[derive(Default)]
pub struct RecordingPush {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingPush {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushDispatcher for RecordingPush {
    async fn dispatch(&self, user_id: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Everyone shows their status except users marked hidden
#[derive(Default)]
pub struct FakeDirectory {
    hidden: Mutex<HashSet<String>>,
    lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn hide(&self, user_id: &str) {
        self.hidden.lock().insert(user_id.to_string());
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn show_online_status(&self, user_id: &str) -> anyhow::Result<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(!self.hidden.lock().contains(user_id))
    }
}

pub struct TestApp {
    pub hub: Arc<Hub>,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub permissions: Arc<FakePermissions>,
    pub push: Arc<RecordingPush>,
    pub directory: Arc<FakeDirectory>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = Config::default();
        config.storage.database_path = ":memory:".to_string();
        let config = Arc::new(config);

        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        let permissions = Arc::new(FakePermissions::default());
        let push = Arc::new(RecordingPush::default());
        let directory = Arc::new(FakeDirectory::default());

        let collaborators = Collaborators {
            permissions: permissions.clone(),
            push: push.clone(),
            directory: directory.clone(),
        };

        let hub = Arc::new(Hub::new(storage, collaborators, &config, clock.clone()));
        let state = AppState {
            config,
            hub: hub.clone(),
        };

        Self {
            hub,
            state,
            clock,
            permissions,
            push,
            directory,
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// Opens a fake device connection and returns its event stream, minus its own online broadcast
    pub async fn connect(&self, conn_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.hub.connect(conn_id, user_id, tx).await;
        drain(&mut rx);
        rx
    }
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}
