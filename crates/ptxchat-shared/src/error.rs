use thiserror::Error;

/// Errors produced while decoding or building protocol frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Bad frame magic: {0:#06x}")]
    BadMagic(u16),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown message type code: {0}")]
    UnknownMessageType(u8),

    #[error("Nickname field too long: {0} bytes")]
    NicknameTooLong(usize),

    #[error("Nickname is not valid UTF-8")]
    NicknameEncoding,

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

impl ProtocolError {
    /// True for violations that must close the offending connection
    /// rather than simply waiting for more bytes.
    pub fn is_violation(&self) -> bool {
        !matches!(self, ProtocolError::Truncated { .. })
    }
}
