/// Application name
pub const APP_NAME: &str = "ptxchat";

/// First two bytes of every frame header ("PX")
pub const PROTOCOL_MAGIC: u16 = 0x5058;

/// Wire format version carried in every header
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed nickname fields in the header
pub const MAX_NICKNAME_LEN: usize = 64;

/// Shortest nickname the server accepts
pub const MIN_NICKNAME_LEN: usize = 2;

/// Maximum payload length a peer may declare
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Encoded header size in bytes:
/// magic(2) + version(1) + type(1) + src_ip(16) + src_port(2)
/// + from_len(1) + from(64) + to_len(1) + to(64) + buf_len(4)
pub const HEADER_SIZE: usize = 2 + 1 + 1 + 16 + 2 + 1 + MAX_NICKNAME_LEN + 1 + MAX_NICKNAME_LEN + 4;

/// Largest complete frame
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Nickname the server puts in the `from` field of its replies
pub const SERVER_NICKNAME: &str = "ChatServer";

/// Default TCP port of the chat server
pub const DEFAULT_PORT: u16 = 1488;

/// Default capacity of the inbound message queue and the notification queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
