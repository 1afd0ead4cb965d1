//! Fixtures shared by the router, session and API tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carelay_shared::{ChatMessage, ConnectionHandle, ServerEvent, UserId};
use carelay_store::{
    ConversationPage, Database, MessageStore, PageRequest, SqliteMessageStore, StoreError,
};
use tokio::sync::mpsc;

use crate::presence::{
    MemoryOfflineBuffer, MemoryPresence, OfflineBuffer, PresenceDirectory, PresenceError,
};
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;

pub const NODE_ID: &str = "test-node";

pub fn uid(s: &str) -> UserId {
    UserId::parse(s).unwrap()
}

fn offline() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "database offline",
    ))
}

/// A message store whose backend is gone.
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn append(&self, _: &UserId, _: &UserId, _: &str) -> carelay_store::Result<ChatMessage> {
        Err(offline())
    }

    async fn list_conversation(
        &self,
        _: &UserId,
        _: &UserId,
        _: PageRequest,
    ) -> carelay_store::Result<ConversationPage> {
        Err(offline())
    }

    async fn mark_read(&self, _: &UserId, _: &UserId, _: &UserId) -> carelay_store::Result<usize> {
        Err(offline())
    }
}

/// A presence directory that cannot be reached.
pub struct UnavailablePresence;

#[async_trait]
impl PresenceDirectory for UnavailablePresence {
    async fn bind(&self, _: &UserId, _: &ConnectionHandle) -> crate::presence::Result<()> {
        Err(PresenceError::Unavailable("connection refused".into()))
    }

    async fn lookup(&self, _: &UserId) -> crate::presence::Result<Option<ConnectionHandle>> {
        Err(PresenceError::Unavailable("connection refused".into()))
    }

    async fn unbind(&self, _: &ConnectionHandle) -> crate::presence::Result<Option<UserId>> {
        Err(PresenceError::Unavailable("connection refused".into()))
    }

    async fn refresh(&self, _: &UserId, _: &ConnectionHandle) -> crate::presence::Result<bool> {
        Err(PresenceError::Unavailable("connection refused".into()))
    }
}

pub struct Harness {
    pub router: MessageRouter,
    pub store: Arc<dyn MessageStore>,
    pub presence: Arc<dyn PresenceDirectory>,
    pub offline: Arc<dyn OfflineBuffer>,
}

impl Harness {
    pub fn new() -> Self {
        let store = SqliteMessageStore::new(Database::open_in_memory().unwrap());
        Self::build(
            Arc::new(store),
            Arc::new(MemoryPresence::new(Duration::from_secs(60))),
        )
    }

    pub fn with_failing_store() -> Self {
        Self::build(
            Arc::new(FailingStore),
            Arc::new(MemoryPresence::new(Duration::from_secs(60))),
        )
    }

    pub fn with_unavailable_presence() -> Self {
        let store = SqliteMessageStore::new(Database::open_in_memory().unwrap());
        Self::build(Arc::new(store), Arc::new(UnavailablePresence))
    }

    fn build(store: Arc<dyn MessageStore>, presence: Arc<dyn PresenceDirectory>) -> Self {
        let offline: Arc<dyn OfflineBuffer> =
            Arc::new(MemoryOfflineBuffer::new(Duration::from_secs(60), 100));
        let router = MessageRouter::new(
            store.clone(),
            presence.clone(),
            offline.clone(),
            SessionRegistry::new(),
        );
        Self {
            router,
            store,
            presence,
            offline,
        }
    }

    /// Register a fake connection and hand back its outbound queue.
    pub async fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let handle = ConnectionHandle::new(NODE_ID);
        let (tx, rx) = mpsc::channel(16);
        self.router.sessions().register(handle.clone(), tx).await;
        (handle, rx)
    }
}
