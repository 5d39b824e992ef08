use ptxchat_shared::{MsgType, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server rejected the request: {0}")]
    Rejected(MsgType),

    #[error("Unexpected reply from server: {0}")]
    UnexpectedReply(MsgType),

    #[error("Message too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Nickname must be {min} to {max} bytes")]
    InvalidNickname { min: usize, max: usize },

    #[error("History error: {0}")]
    Store(#[from] ptxchat_store::StoreError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
