use chrono::{DateTime, SecondsFormat, Utc};
use ptxchat_shared::{ChatMessage, MsgType};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageKind, StoredMessage};

const SELECT_COLUMNS: &str =
    "SELECT id, kind, sender, recipient, source_addr, body, timestamp FROM messages";

impl Database {
    /// Persist a delivered `PUBLIC_DATA` message.
    pub fn record_public(&self, message: &ChatMessage) -> Result<StoredMessage> {
        if message.msg_type != MsgType::PublicData {
            return Err(StoreError::NotRecordable(message.msg_type));
        }
        self.insert(MessageKind::Public, message, None)
    }

    /// Persist a delivered `PRIVATE_DATA` message.
    pub fn record_private(&self, message: &ChatMessage) -> Result<StoredMessage> {
        if message.msg_type != MsgType::PrivateData {
            return Err(StoreError::NotRecordable(message.msg_type));
        }
        self.insert(MessageKind::Private, message, Some(message.to.clone()))
    }

    /// The most recent `limit` public messages, oldest first.
    pub fn load_public_history(&self, limit: u32) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE kind = 'public'
             ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_message)?;

        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// The most recent `limit` private messages sent to or by `nickname`,
    /// oldest first.
    pub fn load_private_history(&self, nickname: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE kind = 'private' AND (recipient = ?1 OR sender = ?1)
             ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![nickname, limit], row_to_message)?;

        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Total number of stored messages.
    pub fn message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn insert(
        &self,
        kind: MessageKind,
        message: &ChatMessage,
        recipient: Option<String>,
    ) -> Result<StoredMessage> {
        let stored = StoredMessage {
            id: Uuid::new_v4(),
            kind,
            sender: message.from.clone(),
            recipient,
            source_addr: message.source.to_string(),
            body: message.payload.to_vec(),
            timestamp: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, kind, sender, recipient, source_addr, body, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stored.id.to_string(),
                stored.kind.as_str(),
                stored.sender,
                stored.recipient,
                stored.source_addr,
                stored.body,
                // Fixed-width so lexical order matches time order.
                stored.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;

        tracing::trace!(id = %stored.id, kind = kind.as_str(), sender = %stored.sender, "message recorded");
        Ok(stored)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let ts_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown message kind {kind_str:?}").into(),
        )
    })?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(StoredMessage {
        id,
        kind,
        sender: row.get(2)?,
        recipient: row.get(3)?,
        source_addr: row.get(4)?,
        body: row.get(5)?,
        timestamp,
    })
}
