use std::time::Duration;

use async_trait::async_trait;
use carelay_shared::{ChatMessage, ConnectionHandle, UserId};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{info, warn};

use super::{OfflineBuffer, PresenceDirectory, PresenceError, Result};

const FORWARD_PREFIX: &str = "socket:";
const INVERSE_PREFIX: &str = "user:";
const OFFLINE_PREFIX: &str = "messages:";

// KEYS[1] = inverse key, ARGV[1] = handle, ARGV[2] = forward key prefix.
// Deletes the inverse entry, and the forward entry only if it still names
// this handle.
const UNBIND_LUA: &str = r#"
local user = redis.call('GET', KEYS[1])
if not user then
    return false
end
redis.call('DEL', KEYS[1])
local forward = ARGV[2] .. user
if redis.call('GET', forward) == ARGV[1] then
    redis.call('DEL', forward)
end
return user
"#;

// KEYS[1] = forward key, KEYS[2] = inverse key, ARGV[1] = handle, ARGV[2] = ttl.
const REFRESH_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    redis.call('EXPIRE', KEYS[2], ARGV[2])
    return 1
end
return 0
"#;

fn forward_key(user: &UserId) -> String {
    format!("{FORWARD_PREFIX}{user}")
}

fn inverse_key(handle: &ConnectionHandle) -> String {
    format!("{INVERSE_PREFIX}{handle}")
}

fn offline_key(user: &UserId) -> String {
    format!("{OFFLINE_PREFIX}{user}")
}

/// Presence directory and offline buffer kept in Redis, shared by every relay
/// process pointed at the same instance.
///
/// Layout:
/// - `socket:<user>`   -> connection handle (forward)
/// - `user:<handle>`   -> user id (inverse, for cleanup on disconnect)
/// - `messages:<user>` -> list of JSON messages, newest at the head
#[derive(Clone)]
pub struct RedisPresence {
    conn: ConnectionManager,
    presence_ttl_secs: u64,
    offline_ttl_secs: u64,
    offline_cap: usize,
    unbind_script: Script,
    refresh_script: Script,
}

impl RedisPresence {
    pub async fn connect(
        url: &str,
        presence_ttl: Duration,
        offline_ttl: Duration,
        offline_cap: usize,
    ) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Connected to Redis presence store");

        Ok(Self {
            conn,
            presence_ttl_secs: presence_ttl.as_secs().max(1),
            offline_ttl_secs: offline_ttl.as_secs().max(1),
            offline_cap: offline_cap.max(1),
            unbind_script: Script::new(UNBIND_LUA),
            refresh_script: Script::new(REFRESH_LUA),
        })
    }
}

#[async_trait]
impl PresenceDirectory for RedisPresence {
    async fn bind(&self, user: &UserId, handle: &ConnectionHandle) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(forward_key(user))
            .arg(handle.as_str())
            .arg("EX")
            .arg(self.presence_ttl_secs)
            .ignore()
            .cmd("SET")
            .arg(inverse_key(handle))
            .arg(user.as_str())
            .arg("EX")
            .arg(self.presence_ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn lookup(&self, user: &UserId) -> Result<Option<ConnectionHandle>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(forward_key(user))
            .query_async(&mut conn)
            .await?;
        Ok(value.map(ConnectionHandle::from_raw))
    }

    async fn unbind(&self, handle: &ConnectionHandle) -> Result<Option<UserId>> {
        let mut conn = self.conn.clone();
        let user: Option<String> = self
            .unbind_script
            .key(inverse_key(handle))
            .arg(handle.as_str())
            .arg(FORWARD_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        user.map(|raw| UserId::parse(raw).map_err(|e| PresenceError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn refresh(&self, user: &UserId, handle: &ConnectionHandle) -> Result<bool> {
        let mut conn = self.conn.clone();
        let refreshed: i64 = self
            .refresh_script
            .key(forward_key(user))
            .key(inverse_key(handle))
            .arg(handle.as_str())
            .arg(self.presence_ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }
}

#[async_trait]
impl OfflineBuffer for RedisPresence {
    async fn push(&self, receiver: &UserId, message: &ChatMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let key = offline_key(receiver);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(self.offline_cap as i64 - 1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.offline_ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn drain(&self, receiver: &UserId) -> Result<Vec<ChatMessage>> {
        let key = offline_key(receiver);
        let mut conn = self.conn.clone();
        let (raw, _deleted): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        // LPUSH keeps the newest entry at the head.
        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw.iter().rev() {
            match serde_json::from_str::<ChatMessage>(entry) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(user = %receiver, error = %e, "Skipping corrupt offline entry"),
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelay_shared::ConversationId;
    use chrono::Utc;
    use uuid::Uuid;

    async fn connect() -> Option<RedisPresence> {
        let url = match std::env::var("CARELAY_TEST_REDIS_URL") {
            Ok(value) => value,
            Err(_) => {
                eprintln!("skipping redis presence test: CARELAY_TEST_REDIS_URL not set");
                return None;
            }
        };
        Some(
            RedisPresence::connect(&url, Duration::from_secs(30), Duration::from_secs(30), 2)
                .await
                .expect("redis reachable"),
        )
    }

    fn unique_user(tag: &str) -> UserId {
        let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        UserId::parse(format!("{tag}-{suffix}")).unwrap()
    }

    #[tokio::test]
    async fn redis_bind_overwrite_and_unbind() {
        let Some(presence) = connect().await else {
            return;
        };
        let user = unique_user("presence");
        let old = ConnectionHandle::new("test");
        let new = ConnectionHandle::new("test");

        presence.bind(&user, &old).await.unwrap();
        presence.bind(&user, &new).await.unwrap();
        assert_eq!(presence.lookup(&user).await.unwrap(), Some(new.clone()));

        assert_eq!(presence.unbind(&old).await.unwrap(), Some(user.clone()));
        assert_eq!(presence.lookup(&user).await.unwrap(), Some(new.clone()));
        assert!(presence.refresh(&user, &new).await.unwrap());

        presence.unbind(&new).await.unwrap();
        assert_eq!(presence.lookup(&user).await.unwrap(), None);
        assert_eq!(presence.unbind(&new).await.unwrap(), None);
    }

    #[tokio::test]
    async fn redis_offline_buffer_round_trip() {
        let Some(buffer) = connect().await else {
            return;
        };
        let sender = unique_user("sender");
        let receiver = unique_user("receiver");

        for body in ["a", "b", "c"] {
            let message = ChatMessage {
                id: Uuid::new_v4(),
                seq: 0,
                conversation_id: ConversationId::between(&sender, &receiver),
                sender_id: sender.clone(),
                receiver_id: receiver.clone(),
                body: body.to_string(),
                created_at: Utc::now(),
                read: false,
            };
            buffer.push(&receiver, &message).await.unwrap();
        }

        let drained = buffer.drain(&receiver).await.unwrap();
        let bodies: Vec<_> = drained.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["b", "c"]);
        assert!(buffer.drain(&receiver).await.unwrap().is_empty());
    }
}
