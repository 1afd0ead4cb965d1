//! # carelay-server
//!
//! Real-time chat relay for one-to-one conversations.
//!
//! This binary provides:
//! - **WebSocket relay** (`/ws`): clients announce an identity, then send
//!   messages and typing signals that are pushed to the receiver's live session
//! - **Message store** (SQLite) as the system of record for every message
//! - **Presence directory** in Redis, or in process memory when no Redis is
//!   configured, plus an offline buffer for messages to absent users
//! - **REST API** (axum) for health, conversation history, read receipts and
//!   presence checks

mod api;
mod config;
mod error;
mod presence;
mod registry;
mod router;
mod session;
mod ws;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use carelay_store::{MessageStore, SqliteMessageStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::presence::{
    MemoryOfflineBuffer, MemoryPresence, OfflineBuffer, PresenceDirectory, RedisPresence,
};
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;

/// How often the in-memory backends sweep expired entries.
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Environment and tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,carelay_server=debug,carelay_store=info")),
        )
        .init();

    info!("Starting carelay relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Message store
    // -----------------------------------------------------------------------
    let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::open(&config.database_path)?);
    info!(path = %config.database_path.display(), "Message store ready");

    // -----------------------------------------------------------------------
    // 4. Presence directory and offline buffer
    // -----------------------------------------------------------------------
    let (presence, offline): (Arc<dyn PresenceDirectory>, Arc<dyn OfflineBuffer>) =
        match &config.redis_url {
            Some(url) => {
                let redis = Arc::new(
                    RedisPresence::connect(
                        url,
                        config.presence_ttl,
                        config.offline_ttl,
                        config.offline_buffer_cap,
                    )
                    .await?,
                );
                let presence: Arc<dyn PresenceDirectory> = redis.clone();
                let offline: Arc<dyn OfflineBuffer> = redis;
                (presence, offline)
            }
            None => {
                info!("REDIS_URL not set, presence is local to this process");
                let presence = Arc::new(MemoryPresence::new(config.presence_ttl));
                let offline = Arc::new(MemoryOfflineBuffer::new(
                    config.offline_ttl,
                    config.offline_buffer_cap,
                ));
                spawn_memory_purge(presence.clone(), offline.clone());
                let presence: Arc<dyn PresenceDirectory> = presence;
                let offline: Arc<dyn OfflineBuffer> = offline;
                (presence, offline)
            }
        };

    // -----------------------------------------------------------------------
    // 5. Router and HTTP state
    // -----------------------------------------------------------------------
    let router = MessageRouter::new(store.clone(), presence, offline, SessionRegistry::new());
    let http_addr = config.http_addr;
    info!(node = %config.node_id, "Relay node ready");

    let app_state = AppState {
        router,
        store,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 6. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn spawn_memory_purge(presence: Arc<MemoryPresence>, offline: Arc<MemoryOfflineBuffer>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            presence.purge_expired().await;
            offline.purge_expired().await;
        }
    });
}
