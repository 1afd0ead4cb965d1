//! One live client connection.
//!
//! A [`RelaySession`] starts `Unbound`, becomes `Bound` once the client
//! announces who it is, and ends `Closed` on disconnect or idle timeout.
//! Inbound events are handed to the [`MessageRouter`]; outbound events reach
//! the transport through the session's queue, which the router can also
//! write to at any time via the session registry.

use carelay_shared::{
    ChatMessage, ClientEvent, ConnectionHandle, ServerEvent, UserId, ValidationError,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RelayError;
use crate::router::MessageRouter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound(UserId),
    Closed,
}

/// What the transport should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Close,
}

pub struct RelaySession {
    handle: ConnectionHandle,
    state: SessionState,
    router: MessageRouter,
    outbound: mpsc::Sender<ServerEvent>,
}

fn parse_user(raw: &str, field: &'static str) -> Result<UserId, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    UserId::parse(raw)
}

impl RelaySession {
    /// Open a session on this node and register its outbound queue.
    pub async fn open(
        router: MessageRouter,
        node_id: &str,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let handle = ConnectionHandle::new(node_id);
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        router.sessions().register(handle.clone(), tx.clone()).await;
        debug!(handle = %handle, "Session opened");

        (
            Self {
                handle,
                state: SessionState::Unbound,
                router,
                outbound: tx,
            },
            rx,
        )
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Dispatch one inbound event. Failures are reported to the client as an
    /// `error` event and never change the session state.
    pub async fn handle_event(&mut self, event: ClientEvent) -> SessionFlow {
        if self.state == SessionState::Closed {
            return SessionFlow::Close;
        }

        let result = match event {
            ClientEvent::Announce { user_id } => self.announce(&user_id).await,
            ClientEvent::SendMessage {
                sender_id,
                receiver_id,
                body,
            } => self
                .send_message(&sender_id, &receiver_id, &body)
                .await
                .map(|_| ()),
            ClientEvent::Typing {
                sender_id,
                receiver_id,
                is_typing,
            } => self.typing(&sender_id, &receiver_id, is_typing).await,
            ClientEvent::Disconnect => {
                self.close().await;
                return SessionFlow::Close;
            }
        };

        if let Err(err) = result {
            self.report(&err).await;
        }
        SessionFlow::Continue
    }

    /// Tell the client a frame could not be decoded.
    pub async fn reject_frame(&self, reason: &str) {
        debug!(handle = %self.handle, reason, "Rejected malformed frame");
        self.emit(ServerEvent::error(format!("Malformed event: {reason}")))
            .await;
    }

    /// Bind this connection to `raw_user`, replacing any previous identity,
    /// then replay messages buffered while the user was offline.
    pub async fn announce(&mut self, raw_user: &str) -> Result<(), RelayError> {
        let user = parse_user(raw_user, "userId")?;

        match &self.state {
            SessionState::Closed => return Err(RelayError::NotBound),
            SessionState::Bound(current) if *current != user => {
                self.router.unbind_session(&self.handle).await;
                self.state = SessionState::Unbound;
            }
            _ => {}
        }

        // Bind before draining: sends routed from here on are pushed live and
        // may arrive ahead of older buffered messages. A send whose lookup ran
        // just before the bind is buffered after this drain and waits for the
        // next announce; the store still holds it either way.
        self.router.bind_session(&user, &self.handle).await?;
        self.state = SessionState::Bound(user.clone());
        self.router.replay_offline(&user, &self.handle).await;
        Ok(())
    }

    pub async fn send_message(
        &mut self,
        raw_sender: &str,
        raw_receiver: &str,
        body: &str,
    ) -> Result<ChatMessage, RelayError> {
        let sender = self.authorize_sender(raw_sender)?;
        let receiver = parse_user(raw_receiver, "receiverId")?;

        let receipt = self
            .router
            .handle_send(&self.handle, &sender, &receiver, body)
            .await?;
        Ok(receipt.message)
    }

    pub async fn typing(
        &mut self,
        raw_sender: &str,
        raw_receiver: &str,
        is_typing: bool,
    ) -> Result<(), RelayError> {
        let sender = self.authorize_sender(raw_sender)?;
        let receiver = parse_user(raw_receiver, "receiverId")?;
        self.router.handle_typing(&sender, &receiver, is_typing).await;
        Ok(())
    }

    /// Keep the presence entry alive while the connection is.
    pub async fn refresh_presence(&self) {
        if let SessionState::Bound(user) = &self.state {
            self.router.refresh_session(user, &self.handle).await;
        }
    }

    /// Move to `Closed`, dropping presence and the outbound registration.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if matches!(self.state, SessionState::Bound(_)) {
            self.router.unbind_session(&self.handle).await;
        }
        self.router.sessions().remove(&self.handle).await;
        self.state = SessionState::Closed;
        debug!(handle = %self.handle, "Session closed");
    }

    fn authorize_sender(&self, raw_sender: &str) -> Result<UserId, RelayError> {
        let SessionState::Bound(bound) = &self.state else {
            return Err(RelayError::NotBound);
        };
        let sender = parse_user(raw_sender, "senderId")?;
        if sender != *bound {
            return Err(ValidationError::SenderMismatch {
                claimed: sender.to_string(),
                bound: bound.to_string(),
            }
            .into());
        }
        Ok(sender)
    }

    async fn report(&self, err: &RelayError) {
        debug!(handle = %self.handle, error = %err, "Event rejected");
        self.emit(ServerEvent::error(err.client_message())).await;
    }

    /// Queue an event for this session's own client. Waits for queue space;
    /// only this session's reader task gets blocked.
    async fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(handle = %self.handle, "Outbound queue closed, dropping event");
        }
    }
}
