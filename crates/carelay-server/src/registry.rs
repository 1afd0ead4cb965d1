use std::collections::HashMap;
use std::sync::Arc;

use carelay_shared::{ConnectionHandle, ServerEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Outbound queues of the sessions owned by this relay process, keyed by
/// connection handle.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionHandle, mpsc::Sender<ServerEvent>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: ConnectionHandle, tx: mpsc::Sender<ServerEvent>) {
        self.sessions.write().await.insert(handle, tx);
    }

    pub async fn remove(&self, handle: &ConnectionHandle) {
        self.sessions.write().await.remove(handle);
    }

    /// Queue `event` for the session behind `handle` without waiting. Used for
    /// pushes into other users' sessions.
    ///
    /// Returns `false` when the handle is not live here or its queue is full;
    /// the event is dropped in both cases.
    pub async fn deliver(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let sessions = self.sessions.read().await;
        let Some(tx) = sessions.get(handle) else {
            debug!(handle = %handle, owner = handle.node_id(), "Handle not live on this node");
            return false;
        };

        let name = event.name();
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(handle = %handle, event = name, "Dropping push for slow session");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(handle = %handle, event = name, "Session queue already closed");
                false
            }
        }
    }

    /// Queue `event` for the session behind `handle`, waiting for queue space.
    ///
    /// Only the task that owns `handle` should call this, so the wait never
    /// stalls another connection. Returns `false` when the session is gone.
    pub async fn send(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let tx = match self.sessions.read().await.get(handle) {
            Some(tx) => tx.clone(),
            None => return false,
        };
        tx.send(event).await.is_ok()
    }

    #[cfg(test)]
    pub async fn contains(&self, handle: &ConnectionHandle) -> bool {
        self.sessions.read().await.contains_key(handle)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
