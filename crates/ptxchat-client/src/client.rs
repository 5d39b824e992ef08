//! Blocking protocol client.
//!
//! [`ChatClient::login`] performs the registration handshake synchronously,
//! then hands the read half of the socket to a receiver thread that pushes
//! every incoming frame onto a bounded event queue.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use ptxchat_shared::constants::{
    DEFAULT_QUEUE_CAPACITY, HEADER_SIZE, MAX_NICKNAME_LEN, MAX_PAYLOAD_SIZE, MIN_NICKNAME_LEN,
};
use ptxchat_shared::{is_valid_nickname, BoundedQueue, ChatMessage, FrameHeader, MsgType};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What the receiver thread reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Incoming(ChatMessage),
    /// The server closed the connection; no more events follow.
    Disconnected,
}

pub type EventQueue = BoundedQueue<ClientEvent>;

pub struct ChatClient {
    nickname: String,
    stream: TcpStream,
    events: Arc<EventQueue>,
    receiver: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connect to `addr` and register as `nickname`.
    pub fn login(addr: SocketAddr, nickname: &str) -> Result<Self> {
        if !is_valid_nickname(nickname) {
            return Err(ClientError::InvalidNickname {
                min: MIN_NICKNAME_LEN,
                max: MAX_NICKNAME_LEN,
            });
        }

        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        write_message(&mut stream, &ChatMessage::register(nickname))?;

        stream.set_read_timeout(Some(LOGIN_TIMEOUT))?;
        let reply = read_message(&mut stream)?;
        stream.set_read_timeout(None)?;

        match reply.msg_type {
            MsgType::Registered => {}
            rejected if rejected.is_error() => return Err(ClientError::Rejected(rejected)),
            other => return Err(ClientError::UnexpectedReply(other)),
        }
        info!(nickname, %addr, "Logged in");

        let events = Arc::new(EventQueue::new(DEFAULT_QUEUE_CAPACITY));
        let receiver = {
            let reader = stream.try_clone()?;
            let events = events.clone();
            thread::Builder::new()
                .name("ptxchat-recv".into())
                .spawn(move || receive_loop(reader, &events))?
        };

        Ok(Self {
            nickname: nickname.to_owned(),
            stream,
            events,
            receiver: Some(receiver),
        })
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Queue of incoming events, filled by the receiver thread.
    pub fn events(&self) -> Arc<EventQueue> {
        self.events.clone()
    }

    pub fn send_public(&mut self, text: &str) -> Result<()> {
        check_payload(text)?;
        let msg = ChatMessage::public(&self.nickname, text);
        write_message(&mut self.stream, &msg)
    }

    pub fn send_private(&mut self, to: &str, text: &str) -> Result<()> {
        check_payload(text)?;
        let msg = ChatMessage::private(&self.nickname, to, text);
        write_message(&mut self.stream, &msg)
    }

    /// Unregister, close the connection and wait for the receiver to finish.
    pub fn logout(mut self) -> Result<()> {
        write_message(&mut self.stream, &ChatMessage::unregister(&self.nickname))?;
        // The server sees the UNREGISTER, then EOF, and closes its side.
        self.stream.shutdown(Shutdown::Write)?;
        self.join_receiver();
        info!(nickname = %self.nickname, "Logged out");
        Ok(())
    }

    fn join_receiver(&mut self) {
        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                warn!("Receiver thread panicked");
            }
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            let _ = self.stream.shutdown(Shutdown::Both);
            self.join_receiver();
        }
    }
}

fn check_payload(text: &str) -> Result<()> {
    if text.len() > MAX_PAYLOAD_SIZE {
        return Err(ClientError::PayloadTooLarge {
            size: text.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

fn receive_loop(mut reader: TcpStream, events: &EventQueue) {
    loop {
        match read_message(&mut reader) {
            Ok(msg) => {
                if !events.push_front(ClientEvent::Incoming(msg)) {
                    warn!("Event queue full, dropping incoming message");
                }
            }
            Err(e) => {
                debug!(error = %e, "Receiver stopping");
                break;
            }
        }
    }
    events.push_front(ClientEvent::Disconnected);
}

/// Encode and write one message.
pub fn write_message<W: Write>(writer: &mut W, msg: &ChatMessage) -> Result<()> {
    let frame = msg.encode()?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Block until one complete frame has been read.
pub fn read_message<R: Read>(reader: &mut R) -> Result<ChatMessage> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf)?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len];
    reader.read_exact(&mut payload)?;
    Ok(ChatMessage::from_parts(header, Bytes::from(payload)))
}
