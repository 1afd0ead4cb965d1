//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development (SQLite file in the working directory,
//! in-memory presence).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use carelay_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_OFFLINE_BUFFER_CAP, DEFAULT_OFFLINE_TTL_SECS,
    DEFAULT_PRESENCE_TTL_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`, or `PORT` to only override the port.
    /// Default: `0.0.0.0:4000`
    pub http_addr: SocketAddr,

    /// SQLite file holding the message log.
    /// Env: `DATABASE_PATH`
    /// Default: `./carelay.db`
    pub database_path: PathBuf,

    /// Redis URL for the shared presence directory and offline buffer.
    /// Env: `REDIS_URL`, or `REDIS_HOST` / `REDIS_PORT`.
    /// Default: unset, presence lives in process memory.
    pub redis_url: Option<String>,

    /// Name of this relay process, embedded in every connection handle.
    /// Env: `NODE_ID`
    /// Default: random `node-xxxxxxxx`.
    pub node_id: String,

    /// Lifetime of a presence entry; live sessions refresh at half this.
    /// Env: `PRESENCE_TTL_SECS`
    pub presence_ttl: Duration,

    /// Lifetime of a receiver's offline buffer.
    /// Env: `OFFLINE_TTL_SECS`
    pub offline_ttl: Duration,

    /// Messages kept per offline receiver; older ones are dropped first.
    /// Env: `OFFLINE_BUFFER_CAP`
    pub offline_buffer_cap: usize,

    /// Close a connection that has sent nothing for this long.
    /// Env: `IDLE_TIMEOUT_SECS`
    pub idle_timeout: Duration,

    /// Outbound events queued per session before pushes are dropped.
    /// Env: `SESSION_QUEUE_DEPTH`
    pub session_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./carelay.db"),
            redis_url: None,
            node_id: format!("node-{:08x}", rand::random::<u32>()),
            presence_ttl: Duration::from_secs(DEFAULT_PRESENCE_TTL_SECS),
            offline_ttl: Duration::from_secs(DEFAULT_OFFLINE_TTL_SECS),
            offline_buffer_cap: DEFAULT_OFFLINE_BUFFER_CAP,
            idle_timeout: Duration::from_secs(300),
            session_queue_depth: 64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(port) = var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(url) = var("REDIS_URL").filter(|u| !u.is_empty()) {
            config.redis_url = Some(url);
        } else if let Some(host) = var("REDIS_HOST").filter(|h| !h.is_empty()) {
            let port = var("REDIS_PORT").unwrap_or_else(|| "6379".to_string());
            config.redis_url = Some(format!("redis://{host}:{port}"));
        }

        if let Some(node_id) = var("NODE_ID") {
            if !node_id.is_empty() && !node_id.contains(':') {
                config.node_id = node_id;
            } else {
                tracing::warn!(value = %node_id, "Invalid NODE_ID, using generated id");
            }
        }

        if let Some(secs) = parse_positive(&var, "PRESENCE_TTL_SECS") {
            config.presence_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&var, "OFFLINE_TTL_SECS") {
            config.offline_ttl = Duration::from_secs(secs);
        }
        if let Some(cap) = parse_positive(&var, "OFFLINE_BUFFER_CAP") {
            config.offline_buffer_cap = cap as usize;
        }
        if let Some(secs) = parse_positive(&var, "IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(depth) = parse_positive(&var, "SESSION_QUEUE_DEPTH") {
            config.session_queue_depth = depth as usize;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = var(key)?;
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Expected a positive integer, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 4000).into());
        assert!(config.redis_url.is_none());
        assert_eq!(config.offline_ttl, Duration::from_secs(86_400));
        assert!(config.node_id.starts_with("node-"));
    }

    #[test]
    fn test_redis_from_host_and_port() {
        let config = load(&[("REDIS_HOST", "cache"), ("REDIS_PORT", "6380")]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6380"));

        let config = load(&[("REDIS_URL", "redis://primary/0"), ("REDIS_HOST", "cache")]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://primary/0"));
    }

    #[test]
    fn test_port_and_invalid_values() {
        let config = load(&[
            ("PORT", "5000"),
            ("PRESENCE_TTL_SECS", "0"),
            ("OFFLINE_BUFFER_CAP", "abc"),
            ("NODE_ID", "bad:id"),
        ]);
        assert_eq!(config.http_addr.port(), 5000);
        assert_eq!(config.presence_ttl, Duration::from_secs(300));
        assert_eq!(config.offline_buffer_cap, 100);
        assert!(config.node_id.starts_with("node-"));
    }
}
