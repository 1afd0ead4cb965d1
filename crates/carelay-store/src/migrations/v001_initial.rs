//! v001 -- Initial schema creation: the append-only `messages` log.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,  -- append order
    id              TEXT NOT NULL UNIQUE,               -- UUID v4
    conversation_id TEXT NOT NULL,                      -- sorted ids joined by '_'
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    body            TEXT NOT NULL,
    created_at      TEXT NOT NULL,                      -- RFC-3339, UTC
    read            INTEGER NOT NULL DEFAULT 0          -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation_id, seq DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
