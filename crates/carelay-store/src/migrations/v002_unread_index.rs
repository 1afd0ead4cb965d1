use rusqlite::Connection;

// Mark-read only ever touches unread rows addressed to one participant.
const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(conversation_id, receiver_id)
    WHERE read = 0;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
