//! Rows of the history database.
//!
//! Models derive `Serialize` so the client can dump them as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Delivery scope of a stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Public,
    Private,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StoredMessage
// ---------------------------------------------------------------------------

/// A delivered chat message as persisted by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    /// Nickname of the sender.
    pub sender: String,
    /// Nickname of the recipient; `None` for public messages.
    pub recipient: Option<String>,
    /// Sender address as observed by the server (`ip:port`).
    pub source_addr: String,
    /// Raw payload bytes.
    pub body: Vec<u8>,
    /// When the server recorded the message.
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
