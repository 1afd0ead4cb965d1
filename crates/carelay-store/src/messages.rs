use carelay_shared::protocol::validate_body;
use carelay_shared::{ChatMessage, ConversationId, UserId, ValidationError};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;
use crate::models::{ConversationPage, PageRequest};

const SELECT_COLUMNS: &str =
    "seq, id, conversation_id, sender_id, receiver_id, body, created_at, read";

impl Database {
    /// Append a message to the log with a server timestamp and `read = false`.
    pub fn append_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        body: &str,
    ) -> Result<ChatMessage> {
        validate_body(body)?;

        let id = Uuid::new_v4();
        let conversation_id = ConversationId::between(sender, receiver);
        let created_at = Utc::now();

        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                id.to_string(),
                conversation_id.as_str(),
                sender.as_str(),
                receiver.as_str(),
                body,
                created_at.to_rfc3339(),
            ],
        )?;
        let seq = self.conn().last_insert_rowid();

        tracing::trace!(%conversation_id, seq, "message appended");

        Ok(ChatMessage {
            id,
            seq,
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            body: body.to_string(),
            conversation_id,
            created_at,
            read: false,
        })
    }

    /// Newest-bounded window of a conversation, returned oldest first.
    pub fn list_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        page: PageRequest,
    ) -> Result<ConversationPage> {
        let conversation_id = ConversationId::between(a, b);
        // One extra row tells us whether an older page exists.
        let fetch = i64::from(page.limit()) + 1;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1 AND (?2 IS NULL OR seq < ?2)
             ORDER BY seq DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.as_str(), page.before(), fetch],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let has_more = messages.len() > page.limit() as usize;
        messages.truncate(page.limit() as usize);
        messages.reverse();

        let next_cursor = if has_more {
            messages.first().map(|m| m.seq)
        } else {
            None
        };

        Ok(ConversationPage {
            messages,
            next_cursor,
        })
    }

    /// Flip `read` on every unread message of the conversation addressed to
    /// `reader`. Returns how many rows changed.
    pub fn mark_conversation_read(
        &self,
        a: &UserId,
        b: &UserId,
        reader: &UserId,
    ) -> Result<usize> {
        if reader != a && reader != b {
            return Err(ValidationError::NotParticipant {
                reader: reader.to_string(),
            }
            .into());
        }

        let conversation_id = ConversationId::between(a, b);
        let affected = self.conn().execute(
            "UPDATE messages SET read = 1
             WHERE conversation_id = ?1 AND receiver_id = ?2 AND read = 0",
            params![conversation_id.as_str(), reader.as_str()],
        )?;

        if affected > 0 {
            tracing::debug!(%conversation_id, reader = %reader, affected, "messages marked read");
        }
        Ok(affected)
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let seq: i64 = row.get(0)?;
    let id_str: String = row.get(1)?;
    let conversation_id: String = row.get(2)?;
    let sender_str: String = row.get(3)?;
    let receiver_str: String = row.get(4)?;
    let body: String = row.get(5)?;
    let ts_str: String = row.get(6)?;
    let read: bool = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(1, e))?;
    let sender_id = UserId::parse(sender_str).map_err(|e| conversion_error(3, e))?;
    let receiver_id = UserId::parse(receiver_str).map_err(|e| conversion_error(4, e))?;
    let created_at = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(6, e))?;

    Ok(ChatMessage {
        id,
        seq,
        sender_id,
        receiver_id,
        body,
        conversation_id: ConversationId::from_stored(conversation_id),
        created_at,
        read,
    })
}
