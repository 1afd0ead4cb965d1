//! Message routing.
//!
//! [`MessageRouter`] is the one place where the message store and the presence
//! directory meet: it persists a send, pushes it to the receiver's live
//! session or parks it in the offline buffer, and echoes the stored message
//! back to the sender. Sessions also bind and unbind presence through it.

use std::sync::Arc;

use carelay_shared::protocol::validate_body;
use carelay_shared::{ChatMessage, ConnectionHandle, ServerEvent, UserId};
use carelay_store::MessageStore;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::presence::{OfflineBuffer, PresenceDirectory};
use crate::registry::SessionRegistry;

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: ChatMessage,
    /// Whether the message was pushed to a live receiver session.
    pub pushed: bool,
}

#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn MessageStore>,
    presence: Arc<dyn PresenceDirectory>,
    offline: Arc<dyn OfflineBuffer>,
    sessions: SessionRegistry,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        presence: Arc<dyn PresenceDirectory>,
        offline: Arc<dyn OfflineBuffer>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            store,
            presence,
            offline,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Persist and route one message from `sender` to `receiver`.
    ///
    /// The send succeeds exactly when the store accepted the message. Presence
    /// and offline-buffer failures only cost the live push.
    pub async fn handle_send(
        &self,
        origin: &ConnectionHandle,
        sender: &UserId,
        receiver: &UserId,
        body: &str,
    ) -> Result<SendReceipt, RelayError> {
        validate_body(body)?;

        let message = self.store.append(sender, receiver, body).await.map_err(|e| {
            warn!(sender = %sender, receiver = %receiver, error = %e, "Message append failed");
            RelayError::from(e)
        })?;

        let pushed = match self.presence.lookup(receiver).await {
            Ok(Some(handle)) => {
                let event = ServerEvent::ReceiveMessage {
                    message: message.clone(),
                    sender_id: sender.clone(),
                };
                self.sessions.deliver(&handle, event).await
            }
            Ok(None) => false,
            Err(e) => {
                warn!(
                    receiver = %receiver,
                    error = %e,
                    "Presence lookup failed, treating receiver as offline"
                );
                false
            }
        };

        // The origin is the calling session, so its ack may wait for queue space.
        self.sessions
            .send(
                origin,
                ServerEvent::MessageSent {
                    message: message.clone(),
                },
            )
            .await;

        if !pushed {
            if let Err(e) = self.offline.push(receiver, &message).await {
                warn!(receiver = %receiver, error = %e, "Offline buffer push failed");
            }
        }

        debug!(
            conversation = %message.conversation_id,
            seq = message.seq,
            pushed,
            "Message routed"
        );

        Ok(SendReceipt { message, pushed })
    }

    /// Forward a typing indicator to `receiver` if they are online. Never
    /// persisted, never buffered, never an error.
    pub async fn handle_typing(&self, sender: &UserId, receiver: &UserId, is_typing: bool) {
        match self.presence.lookup(receiver).await {
            Ok(Some(handle)) => {
                let event = ServerEvent::UserTyping {
                    sender_id: sender.clone(),
                    is_typing,
                };
                self.sessions.deliver(&handle, event).await;
            }
            Ok(None) => {}
            Err(e) => debug!(receiver = %receiver, error = %e, "Dropping typing signal"),
        }
    }

    pub async fn bind_session(
        &self,
        user: &UserId,
        handle: &ConnectionHandle,
    ) -> Result<(), RelayError> {
        self.presence.bind(user, handle).await?;
        info!(user = %user, handle = %handle, "User bound");
        Ok(())
    }

    /// Remove presence for `handle`. Failures are logged; the entry will
    /// expire on its own.
    pub async fn unbind_session(&self, handle: &ConnectionHandle) {
        match self.presence.unbind(handle).await {
            Ok(Some(user)) => info!(user = %user, handle = %handle, "User unbound"),
            Ok(None) => {}
            Err(e) => warn!(handle = %handle, error = %e, "Presence unbind failed"),
        }
    }

    pub async fn refresh_session(&self, user: &UserId, handle: &ConnectionHandle) {
        match self.presence.refresh(user, handle).await {
            Ok(true) => {}
            Ok(false) => debug!(
                user = %user,
                handle = %handle,
                "Binding superseded by another connection"
            ),
            Err(e) => warn!(user = %user, error = %e, "Presence refresh failed"),
        }
    }

    /// Push whatever piled up in the offline buffer while `user` was away.
    /// Returns the number of messages replayed.
    ///
    /// Runs on the task that owns `handle`, so each push waits for queue space
    /// instead of dropping drained messages.
    pub async fn replay_offline(&self, user: &UserId, handle: &ConnectionHandle) -> usize {
        let messages = match self.offline.drain(user).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(user = %user, error = %e, "Offline buffer drain failed");
                return 0;
            }
        };

        let mut replayed = 0;
        for message in messages {
            let event = ServerEvent::ReceiveMessage {
                sender_id: message.sender_id.clone(),
                message,
            };
            if !self.sessions.send(handle, event).await {
                warn!(user = %user, handle = %handle, "Session closed during offline replay");
                break;
            }
            replayed += 1;
        }
        if replayed > 0 {
            debug!(user = %user, replayed, "Replayed offline messages");
        }
        replayed
    }

    /// Whether `user` currently has a live binding. Presence errors read as
    /// offline.
    pub async fn is_online(&self, user: &UserId) -> bool {
        matches!(self.presence.lookup(user).await, Ok(Some(_)))
    }
}
