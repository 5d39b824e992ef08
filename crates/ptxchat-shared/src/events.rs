//! Notifications surfaced to a UI front-end.
//!
//! The server pushes a [`Notification`] onto a bounded queue for every
//! lifecycle change and every delivered message. A front-end pops them at
//! its own pace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ChatMessage;
use crate::queue::BoundedQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    SrvStart,
    SrvStop,
    ClientReg,
    ClientUnreg,
    PublicMsg,
    PrivateMsg,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    /// The message that caused the event, if any.
    pub message: Option<ChatMessage>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: Option<ChatMessage>) -> Self {
        Self {
            kind,
            message,
            at: Utc::now(),
        }
    }

    /// Flattened, serializable view for JSON feeds and logs.
    pub fn to_record(&self) -> NotificationRecord {
        let msg = self.message.as_ref();
        NotificationRecord {
            kind: self.kind,
            from: msg.map(|m| m.from.clone()).filter(|s| !s.is_empty()),
            to: msg.map(|m| m.to.clone()).filter(|s| !s.is_empty()),
            source: msg.map(|m| m.source.to_string()),
            text: msg.filter(|m| !m.payload.is_empty()).map(ChatMessage::text),
            at: self.at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub at: DateTime<Utc>,
}

/// Queue of UI notifications shared between the server and its front-end.
pub type NotificationQueue = BoundedQueue<Notification>;

impl BoundedQueue<Notification> {
    /// Push a notification; a full queue drops it with a warning so the
    /// router never stalls on a slow UI.
    pub fn notify(&self, kind: NotificationKind, message: Option<ChatMessage>) -> bool {
        let accepted = self.push_front(Notification::new(kind, message));
        if !accepted && !self.is_stopped() {
            tracing::warn!(kind = ?kind, "Notification queue full, dropping event");
        }
        accepted
    }
}
