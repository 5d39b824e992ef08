//! # ptxchat-shared
//!
//! Types shared by the ptxchat server and client: the binary wire protocol,
//! the bounded blocking queue used for hand-off between threads, and the
//! UI notification events.

pub mod constants;
pub mod error;
pub mod events;
pub mod protocol;
pub mod queue;

pub use error::ProtocolError;
pub use events::{Notification, NotificationKind, NotificationQueue, NotificationRecord};
pub use protocol::{is_valid_nickname, ChatMessage, FrameHeader, MsgType};
pub use queue::BoundedQueue;
