//! WebSocket transport for relay sessions.
//!
//! Each upgraded socket gets one reader loop, which owns the [`RelaySession`],
//! and one writer task draining the session's outbound queue into JSON text
//! frames.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use carelay_shared::{ClientEvent, ServerEvent};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::session::{RelaySession, SessionFlow};

/// Shortest interval between presence refreshes.
const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Timers driving one connection's reader loop.
#[derive(Debug, Clone, Copy)]
struct SessionTimers {
    idle_timeout: Duration,
    refresh_period: Duration,
}

impl SessionTimers {
    fn from_config(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            refresh_period: (config.presence_ttl / 2).max(MIN_REFRESH_PERIOD),
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: AppState) {
    let (session, outbound) = RelaySession::open(
        state.router.clone(),
        &state.config.node_id,
        state.config.session_queue_depth,
    )
    .await;
    let handle = session.handle().clone();
    info!(handle = %handle, "WebSocket connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_events(sink, outbound));

    drive_session(session, stream, SessionTimers::from_config(&state.config)).await;

    // The writer ends once the session, the last queue sender, is gone.
    if let Err(e) = writer.await {
        debug!(handle = %handle, error = %e, "Writer task ended abnormally");
    }
    info!(handle = %handle, "WebSocket disconnected");
}

async fn write_events<S>(mut sink: S, mut outbound: mpsc::Receiver<ServerEvent>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(event) = outbound.recv().await {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to encode event");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Read frames into `session` until the client leaves or goes idle, then close
/// the session.
async fn drive_session<S>(mut session: RelaySession, mut stream: S, timers: SessionTimers)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deadline = Instant::now() + timers.idle_timeout;
    let mut refresh =
        tokio::time::interval_at(Instant::now() + timers.refresh_period, timers.refresh_period);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(handle = %session.handle(), error = %e, "WebSocket read failed");
                        break;
                    }
                    None => break,
                };
                deadline = Instant::now() + timers.idle_timeout;
                if handle_frame(&mut session, frame).await == SessionFlow::Close {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!(handle = %session.handle(), "Closing idle connection");
                break;
            }
            _ = refresh.tick() => session.refresh_presence().await,
        }
    }

    session.close().await;
}

async fn handle_frame(session: &mut RelaySession, frame: Message) -> SessionFlow {
    match frame {
        Message::Text(text) => match ClientEvent::from_json(&text) {
            Ok(event) => session.handle_event(event).await,
            Err(e) => {
                session.reject_frame(&e.to_string()).await;
                SessionFlow::Continue
            }
        },
        Message::Binary(_) => {
            session.reject_frame("binary frames are not supported").await;
            SessionFlow::Continue
        }
        Message::Close(_) => SessionFlow::Close,
        // Pings are answered by axum.
        Message::Ping(_) | Message::Pong(_) => SessionFlow::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::test_support::{uid, Harness, NODE_ID};

    type Frame = Result<Message, axum::Error>;

    fn text(json: &str) -> Frame {
        Ok(Message::Text(json.to_string()))
    }

    fn announce(user: &str) -> ClientEvent {
        ClientEvent::Announce {
            user_id: user.to_string(),
        }
    }

    fn timers(idle_secs: u64, refresh_secs: u64) -> SessionTimers {
        SessionTimers {
            idle_timeout: Duration::from_secs(idle_secs),
            refresh_period: Duration::from_secs(refresh_secs),
        }
    }

    fn drain_errors(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<String> {
        let mut errors = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::Error { message } = event {
                errors.push(message);
            }
        }
        errors
    }

    #[tokio::test]
    async fn bad_frames_report_errors_without_closing() {
        let h = Harness::new();
        let (mut session, mut rx) = RelaySession::open(h.router.clone(), NODE_ID, 16).await;

        let flow = handle_frame(&mut session, Message::Text("{not json".into())).await;
        assert_eq!(flow, SessionFlow::Continue);
        let flow = handle_frame(&mut session, Message::Binary(vec![1, 2, 3])).await;
        assert_eq!(flow, SessionFlow::Continue);

        let errors = drain_errors(&mut rx);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Malformed event:"));
        assert_eq!(errors[1], "Malformed event: binary frames are not supported");
        assert_eq!(*session.state(), SessionState::Unbound);

        let flow = handle_frame(
            &mut session,
            Message::Text(r#"{"type":"announce","data":{"userId":"u1"}}"#.into()),
        )
        .await;
        assert_eq!(flow, SessionFlow::Continue);
        assert_eq!(*session.state(), SessionState::Bound(uid("u1")));
    }

    #[tokio::test]
    async fn close_frame_ends_the_session() {
        let h = Harness::new();
        let (session, mut rx) = RelaySession::open(h.router.clone(), NODE_ID, 16).await;
        let handle = session.handle().clone();

        let frames = futures::stream::iter(vec![
            text(r#"{"type":"announce","data":{"userId":"u1"}}"#),
            text("garbage"),
            Ok(Message::Close(None)),
            text(r#"{"type":"announce","data":{"userId":"u2"}}"#),
        ]);
        drive_session(session, frames, timers(300, 150)).await;

        assert_eq!(drain_errors(&mut rx).len(), 1);
        assert_eq!(h.presence.lookup(&uid("u1")).await.unwrap(), None);
        assert_eq!(h.presence.lookup(&uid("u2")).await.unwrap(), None);
        assert!(!h.router.sessions().contains(&handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed_and_unbound() {
        let h = Harness::new();
        let (mut session, _rx) = RelaySession::open(h.router.clone(), NODE_ID, 16).await;
        session.handle_event(announce("u1")).await;
        let handle = session.handle().clone();

        let started = Instant::now();
        drive_session(session, futures::stream::pending::<Frame>(), timers(30, 20)).await;

        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(h.presence.lookup(&uid("u1")).await.unwrap(), None);
        assert!(!h.router.sessions().contains(&handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn live_connection_keeps_presence_past_its_ttl() {
        // Harness presence entries live for 60 seconds.
        let h = Harness::new();
        let (mut session, _rx) = RelaySession::open(h.router.clone(), NODE_ID, 16).await;
        session.handle_event(announce("u1")).await;

        let reader = tokio::spawn(drive_session(
            session,
            futures::stream::pending::<Frame>(),
            timers(200, 20),
        ));

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(h.presence.lookup(&uid("u1")).await.unwrap().is_some());

        reader.await.unwrap();
        assert_eq!(h.presence.lookup(&uid("u1")).await.unwrap(), None);
    }

    #[test]
    fn refresh_runs_at_half_the_presence_ttl() {
        let config = ServerConfig {
            presence_ttl: Duration::from_secs(300),
            ..ServerConfig::default()
        };
        assert_eq!(
            SessionTimers::from_config(&config).refresh_period,
            Duration::from_secs(150)
        );

        let config = ServerConfig {
            presence_ttl: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        assert_eq!(SessionTimers::from_config(&config).refresh_period, MIN_REFRESH_PERIOD);
    }
}
