//! Wire protocol: message types, the fixed-size frame header and the
//! frame codec.
//!
//! Every frame is a 156-byte header followed by `buf_len` payload bytes.
//! All integers are big-endian and the header starts with a magic number
//! and a version byte, so both ends agree on the layout regardless of
//! platform.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::{
    HEADER_SIZE, MAX_NICKNAME_LEN, MAX_PAYLOAD_SIZE, MIN_NICKNAME_LEN, PROTOCOL_MAGIC,
    PROTOCOL_VERSION, SERVER_NICKNAME,
};
use crate::error::ProtocolError;

/// All message types exchanged between clients and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgType {
    Register = 0,
    Registered = 1,
    Unregister = 2,
    Unregistered = 3,
    PrivateData = 4,
    PublicData = 5,
    ErrRegistered = 6,
    ErrUnregistered = 7,
    ErrUnknown = 8,
}

impl MsgType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Register),
            1 => Some(Self::Registered),
            2 => Some(Self::Unregister),
            3 => Some(Self::Unregistered),
            4 => Some(Self::PrivateData),
            5 => Some(Self::PublicData),
            6 => Some(Self::ErrRegistered),
            7 => Some(Self::ErrUnregistered),
            8 => Some(Self::ErrUnknown),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Error replies carry no client intent; the server never acts on them.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrRegistered | Self::ErrUnregistered | Self::ErrUnknown
        )
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Register => "REGISTER",
            Self::Registered => "REGISTERED",
            Self::Unregister => "UNREGISTER",
            Self::Unregistered => "UNREGISTERED",
            Self::PrivateData => "PRIVATE_DATA",
            Self::PublicData => "PUBLIC_DATA",
            Self::ErrRegistered => "ERR_REGISTERED",
            Self::ErrUnregistered => "ERR_UNREGISTERED",
            Self::ErrUnknown => "ERR_UNKNOWN",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MsgType,
    /// Source address as written by the sender. The server never trusts it.
    pub source: SocketAddr,
    pub from: String,
    pub to: String,
    /// Declared payload length, already checked against [`MAX_PAYLOAD_SIZE`].
    pub payload_len: usize,
}

impl FrameHeader {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
    pub fn decode(mut src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                available: src.len(),
            });
        }

        let magic = src.get_u16();
        if magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        let version = src.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let code = src.get_u8();
        let msg_type = MsgType::from_byte(code).ok_or(ProtocolError::UnknownMessageType(code))?;

        let mut octets = [0u8; 16];
        src.copy_to_slice(&mut octets);
        let port = src.get_u16();
        let source = SocketAddr::new(unmap_ip(Ipv6Addr::from(octets)), port);

        let from = take_nickname(&mut src)?;
        let to = take_nickname(&mut src)?;

        let payload_len = src.get_u32() as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            msg_type,
            source,
            from,
            to,
            payload_len,
        })
    }

    /// Total size of the frame this header announces.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len
    }
}

fn take_nickname(src: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = src.get_u8() as usize;
    if len > MAX_NICKNAME_LEN {
        return Err(ProtocolError::NicknameTooLong(len));
    }
    let nickname = std::str::from_utf8(&src[..len])
        .map_err(|_| ProtocolError::NicknameEncoding)?
        .to_owned();
    src.advance(MAX_NICKNAME_LEN);
    Ok(nickname)
}

fn put_nickname(dst: &mut BytesMut, nickname: &str) -> Result<(), ProtocolError> {
    let raw = nickname.as_bytes();
    if raw.len() > MAX_NICKNAME_LEN {
        return Err(ProtocolError::NicknameTooLong(raw.len()));
    }
    dst.put_u8(raw.len() as u8);
    dst.put_slice(raw);
    dst.put_bytes(0, MAX_NICKNAME_LEN - raw.len());
    Ok(())
}

fn unmap_ip(ip: Ipv6Addr) -> IpAddr {
    match ip.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(ip),
    }
}

fn unspecified_source() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

/// Whether `nickname` may be registered. Length is counted in UTF-8 bytes,
/// the unit of the header's nickname field.
pub fn is_valid_nickname(nickname: &str) -> bool {
    (MIN_NICKNAME_LEN..=MAX_NICKNAME_LEN).contains(&nickname.len())
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One complete protocol message (header fields plus payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub msg_type: MsgType,
    pub source: SocketAddr,
    pub from: String,
    pub to: String,
    pub payload: Bytes,
}

impl ChatMessage {
    pub fn new(
        msg_type: MsgType,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            msg_type,
            source: unspecified_source(),
            from: from.into(),
            to: to.into(),
            payload: payload.into(),
        }
    }

    pub fn register(nickname: &str) -> Self {
        Self::new(MsgType::Register, nickname, "", Bytes::new())
    }

    pub fn unregister(nickname: &str) -> Self {
        Self::new(MsgType::Unregister, nickname, "", Bytes::new())
    }

    pub fn public(from: &str, text: &str) -> Self {
        Self::new(MsgType::PublicData, from, "", Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn private(from: &str, to: &str, text: &str) -> Self {
        Self::new(MsgType::PrivateData, from, to, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// A server reply addressed to `to`.
    pub fn reply(msg_type: MsgType, to: &str) -> Self {
        Self::new(msg_type, SERVER_NICKNAME, to, Bytes::new())
    }

    pub fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = source;
        self
    }

    /// Build a message from a decoded header and its payload bytes.
    pub fn from_parts(header: FrameHeader, payload: Bytes) -> Self {
        Self {
            msg_type: header.msg_type,
            source: header.source,
            from: header.from,
            to: header.to,
            payload,
        }
    }

    /// Payload interpreted as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode into one contiguous frame (header followed by payload).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut dst = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        dst.put_u16(PROTOCOL_MAGIC);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.msg_type.as_byte());

        let ip = match self.source.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        dst.put_slice(&ip.octets());
        dst.put_u16(self.source.port());

        put_nickname(&mut dst, &self.from)?;
        put_nickname(&mut dst, &self.to)?;

        dst.put_u32(self.payload.len() as u32);
        dst.put_slice(&self.payload);

        debug_assert_eq!(dst.len(), HEADER_SIZE + self.payload.len());
        Ok(dst.freeze())
    }

    /// Decode one complete frame. Trailing bytes beyond the frame are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::decode(frame)?;
        let total = header.frame_len();
        if frame.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                available: frame.len(),
            });
        }
        let payload = Bytes::copy_from_slice(&frame[HEADER_SIZE..total]);
        Ok(Self::from_parts(header, payload))
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from={:?} to={:?} len={}",
            self.msg_type,
            self.from,
            self.to,
            self.payload.len()
        )
    }
}
