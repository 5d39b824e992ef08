use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use ptxchat_shared::MsgType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("History store error: {0}")]
    Store(#[from] ptxchat_store::StoreError),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Why a frame could not be written to a peer. The connection has already
/// been moved out of `Up` when one of these is returned (except `NotUp`,
/// where it was never there).
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Connection is no longer up")]
    NotUp,

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Send timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Socket error: {0}")]
    Io(#[source] io::Error),
}

/// Application-level rejections raised while routing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Nickname {0:?} is already registered")]
    DuplicateNickname(String),

    #[error("Nickname {0:?} is too short")]
    InvalidNickname(String),

    #[error("Connection is already registered as {0:?}")]
    AlreadyRegistered(String),

    #[error("Sender {0:?} is not registered")]
    NotRegistered(String),

    #[error("Recipient {0:?} is not registered")]
    UnknownRecipient(String),

    #[error("Source {source_addr} does not match the connection bound to {nickname:?}")]
    AddressMismatch {
        nickname: String,
        source_addr: SocketAddr,
    },

    #[error("No live connection for {0}")]
    ConnectionGone(SocketAddr),
}

impl RegistryError {
    /// Protocol reply sent back to the requester, if the protocol defines one.
    pub fn reply_type(&self) -> Option<MsgType> {
        match self {
            Self::DuplicateNickname(_) | Self::AlreadyRegistered(_) => Some(MsgType::ErrRegistered),
            Self::NotRegistered(_) | Self::AddressMismatch { .. } => Some(MsgType::ErrUnregistered),
            Self::InvalidNickname(_) | Self::UnknownRecipient(_) => Some(MsgType::ErrUnknown),
            Self::ConnectionGone(_) => None,
        }
    }
}
