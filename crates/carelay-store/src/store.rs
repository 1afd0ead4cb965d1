//! Async access to the message log.
//!
//! The relay talks to the store through [`MessageStore`] so routing logic can
//! be exercised against any backend. [`SqliteMessageStore`] runs each call on
//! tokio's blocking pool, keeping SQLite I/O off the connection tasks.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carelay_shared::{ChatMessage, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{ConversationPage, PageRequest};

/// Durable, append-only log of chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Validate and persist a new message. The returned record carries the
    /// server-assigned id, sequence and timestamp.
    async fn append(&self, sender: &UserId, receiver: &UserId, body: &str) -> Result<ChatMessage>;

    /// Messages between `a` and `b`, ascending, newest-bounded by `page`.
    async fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: PageRequest,
    ) -> Result<ConversationPage>;

    /// Mark everything in the conversation addressed to `reader` as read.
    async fn mark_read(&self, a: &UserId, b: &UserId, reader: &UserId) -> Result<usize>;
}

/// [`MessageStore`] backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreError::Worker("database handle poisoned".into()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, sender: &UserId, receiver: &UserId, body: &str) -> Result<ChatMessage> {
        let (sender, receiver, body) = (sender.clone(), receiver.clone(), body.to_string());
        self.with_db(move |db| db.append_message(&sender, &receiver, &body))
            .await
    }

    async fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: PageRequest,
    ) -> Result<ConversationPage> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.list_conversation(&a, &b, page))
            .await
    }

    async fn mark_read(&self, a: &UserId, b: &UserId, reader: &UserId) -> Result<usize> {
        let (a, b, reader) = (a.clone(), b.clone(), reader.clone());
        self.with_db(move |db| db.mark_conversation_read(&a, &b, &reader))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMessageStore::open(&dir.path().join("relay.db")).unwrap();

        let mut tasks = Vec::new();
        for i in 0..3 {
            let store = store.clone();
            let (from, to) = if i % 2 == 0 { ("u1", "u2") } else { ("u2", "u1") };
            tasks.push(tokio::spawn(async move {
                store
                    .append(&uid(from), &uid(to), &format!("msg {i}"))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let page = store
            .list_conversation(&uid("u1"), &uid("u2"), PageRequest::latest(100))
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 3);
        assert!(page.messages.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(page.messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn mark_read_through_trait_is_idempotent() {
        let store = SqliteMessageStore::new(Database::open_in_memory().unwrap());
        store.append(&uid("u1"), &uid("u2"), "hello").await.unwrap();

        assert_eq!(store.mark_read(&uid("u2"), &uid("u1"), &uid("u2")).await.unwrap(), 1);
        assert_eq!(store.mark_read(&uid("u2"), &uid("u1"), &uid("u2")).await.unwrap(), 0);

        let page = store
            .list_conversation(&uid("u1"), &uid("u2"), PageRequest::default())
            .await
            .unwrap();
        assert!(page.messages[0].read);
    }
}
