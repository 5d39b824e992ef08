//! v001 -- Initial schema creation.
//!
//! Creates the `messages` table holding every delivered chat message.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind        TEXT NOT NULL,               -- 'public' | 'private'
    sender      TEXT NOT NULL,               -- nickname
    recipient   TEXT,                        -- nickname, private only
    source_addr TEXT NOT NULL,               -- sender ip:port as seen by the server
    body        BLOB NOT NULL,
    timestamp   TEXT NOT NULL                -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_messages_kind_ts
    ON messages(kind, timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_messages_recipient_ts
    ON messages(recipient, timestamp DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
