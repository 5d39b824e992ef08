//! Persistence of delivered messages.
//!
//! The router calls a [`HistorySink`] after a message has been delivered.
//! Recording is fire-and-forget: a failing store is logged and never
//! affects delivery.

use std::path::Path;
use std::sync::Mutex;

use ptxchat_shared::ChatMessage;
use ptxchat_store::Database;
use tracing::warn;

use crate::error::Result;

pub trait HistorySink: Send + Sync {
    fn record_public(&self, message: &ChatMessage);
    fn record_private(&self, message: &ChatMessage);
}

/// History kept in the SQLite store.
pub struct SqliteHistory {
    db: Mutex<Database>,
}

impl SqliteHistory {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Database::new()?))
    }

    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let db = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&db)
    }
}

impl HistorySink for SqliteHistory {
    fn record_public(&self, message: &ChatMessage) {
        if let Err(e) = self.with_db(|db| db.record_public(message)) {
            warn!(from = %message.from, error = %e, "Failed to record public message");
        }
    }

    fn record_private(&self, message: &ChatMessage) {
        if let Err(e) = self.with_db(|db| db.record_private(message)) {
            warn!(from = %message.from, to = %message.to, error = %e, "Failed to record private message");
        }
    }
}

/// Sink used when history is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl HistorySink for NoHistory {
    fn record_public(&self, _message: &ChatMessage) {}
    fn record_private(&self, _message: &ChatMessage) {}
}
