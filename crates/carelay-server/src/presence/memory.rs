use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use carelay_shared::{ChatMessage, ConnectionHandle, UserId};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{OfflineBuffer, PresenceDirectory, Result};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self, now: Instant) -> Option<&T> {
        (now < self.expires_at).then_some(&self.value)
    }
}

#[derive(Default)]
struct Directory {
    by_user: HashMap<UserId, Expiring<ConnectionHandle>>,
    by_handle: HashMap<ConnectionHandle, Expiring<UserId>>,
}

/// Process-local presence directory.
///
/// Every mutation happens under one write lock, which gives the same
/// atomic overwrite / compare-and-delete behaviour as the Redis scripts.
pub struct MemoryPresence {
    ttl: Duration,
    inner: RwLock<Directory>,
}

impl MemoryPresence {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Directory::default()),
        }
    }

    /// Drop entries whose lifetime ran out without an unbind.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut dir = self.inner.write().await;
        let before = dir.by_user.len() + dir.by_handle.len();
        dir.by_user.retain(|_, e| e.live(now).is_some());
        dir.by_handle.retain(|_, e| e.live(now).is_some());
        let removed = before - (dir.by_user.len() + dir.by_handle.len());
        if removed > 0 {
            debug!(removed, "Purged expired presence entries");
        }
    }
}

#[async_trait]
impl PresenceDirectory for MemoryPresence {
    async fn bind(&self, user: &UserId, handle: &ConnectionHandle) -> Result<()> {
        let expires_at = Instant::now() + self.ttl;
        let mut dir = self.inner.write().await;
        dir.by_user.insert(
            user.clone(),
            Expiring {
                value: handle.clone(),
                expires_at,
            },
        );
        dir.by_handle.insert(
            handle.clone(),
            Expiring {
                value: user.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn lookup(&self, user: &UserId) -> Result<Option<ConnectionHandle>> {
        let now = Instant::now();
        let dir = self.inner.read().await;
        Ok(dir
            .by_user
            .get(user)
            .and_then(|e| e.live(now))
            .cloned())
    }

    async fn unbind(&self, handle: &ConnectionHandle) -> Result<Option<UserId>> {
        let mut dir = self.inner.write().await;
        let Some(entry) = dir.by_handle.remove(handle) else {
            return Ok(None);
        };
        let user = entry.value;
        if dir
            .by_user
            .get(&user)
            .is_some_and(|fwd| fwd.value == *handle)
        {
            dir.by_user.remove(&user);
        }
        Ok(Some(user))
    }

    async fn refresh(&self, user: &UserId, handle: &ConnectionHandle) -> Result<bool> {
        let now = Instant::now();
        let expires_at = now + self.ttl;
        let mut dir = self.inner.write().await;

        let current = dir
            .by_user
            .get(user)
            .and_then(|e| e.live(now))
            .is_some_and(|h| h == handle);
        if !current {
            return Ok(false);
        }

        if let Some(fwd) = dir.by_user.get_mut(user) {
            fwd.expires_at = expires_at;
        }
        if let Some(inv) = dir.by_handle.get_mut(handle) {
            inv.expires_at = expires_at;
        }
        Ok(true)
    }
}

/// Process-local offline buffer.
pub struct MemoryOfflineBuffer {
    ttl: Duration,
    cap: usize,
    queues: RwLock<HashMap<UserId, Expiring<VecDeque<ChatMessage>>>>,
}

impl MemoryOfflineBuffer {
    pub fn new(ttl: Duration, cap: usize) -> Self {
        Self {
            ttl,
            cap: cap.max(1),
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut queues = self.queues.write().await;
        let before = queues.len();
        queues.retain(|_, q| q.live(now).is_some());
        let removed = before - queues.len();
        if removed > 0 {
            debug!(removed, "Purged expired offline buffers");
        }
    }
}

#[async_trait]
impl OfflineBuffer for MemoryOfflineBuffer {
    async fn push(&self, receiver: &UserId, message: &ChatMessage) -> Result<()> {
        let now = Instant::now();
        let mut queues = self.queues.write().await;
        let queue = queues.entry(receiver.clone()).or_insert_with(|| Expiring {
            value: VecDeque::new(),
            expires_at: now,
        });
        if queue.live(now).is_none() {
            queue.value.clear();
        }
        queue.value.push_back(message.clone());
        while queue.value.len() > self.cap {
            queue.value.pop_front();
        }
        queue.expires_at = now + self.ttl;
        Ok(())
    }

    async fn drain(&self, receiver: &UserId) -> Result<Vec<ChatMessage>> {
        let now = Instant::now();
        let mut queues = self.queues.write().await;
        Ok(queues
            .remove(receiver)
            .filter(|q| q.live(now).is_some())
            .map(|q| q.value.into_iter().collect())
            .unwrap_or_default())
    }
}
