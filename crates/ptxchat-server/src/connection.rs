//! One accepted TCP peer: its socket, status and partial-frame state.
//!
//! The I/O thread is the only reader; the router is the only writer. The
//! status only ever moves forward (`Up` to `Closed` or `Error`), so either
//! thread can observe a terminal state without coordination and stop
//! touching the socket.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::net::TcpStream;
use mio::Token;
use ptxchat_shared::constants::{HEADER_SIZE, MAX_FRAME_SIZE};
use ptxchat_shared::{ChatMessage, FrameHeader, ProtocolError};
use tracing::{debug, error, trace, warn};

use crate::error::SendError;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// What to do with a socket error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDisposition {
    /// Not an error: try again on the next readiness event or loop turn.
    Retry,
    /// The peer went away in an orderly fashion.
    PeerClosed,
    /// The peer connection is broken; tear it down.
    PeerError,
    /// An OS condition outside the modelled set.
    Fatal,
}

pub fn classify_io_error(err: &io::Error) -> IoDisposition {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => IoDisposition::Retry,
        ErrorKind::WriteZero => IoDisposition::PeerClosed,
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::TimedOut
        | ErrorKind::UnexpectedEof => IoDisposition::PeerError,
        _ => IoDisposition::Fatal,
    }
}

/// Abort the process on a socket error outside the modelled set.
pub fn fail_fast(op: &str, peer: Option<SocketAddr>, err: &io::Error) -> ! {
    error!(
        op,
        peer = ?peer,
        errno = ?err.raw_os_error(),
        kind = ?err.kind(),
        error = %err,
        "Unrecoverable socket error, aborting"
    );
    std::process::abort()
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnStatus {
    Up = 0,
    Closed = 1,
    Error = 2,
}

impl ConnStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Up,
            1 => Self::Closed,
            _ => Self::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Result of one reassembly step.
#[derive(Debug)]
pub enum RecvOutcome {
    /// A complete frame; its source is the connection's peer address.
    Frame(ChatMessage),
    /// Nothing more to read right now.
    Pending,
    /// Zero-length read: the peer shut down.
    Closed,
    /// The frame header broke the protocol.
    Violation(ProtocolError),
    /// Recoverable-for-the-server socket error.
    Failed(io::Error),
    /// Socket error outside the modelled set.
    Fatal(io::Error),
}

enum ReadStep {
    Progress,
    Done(RecvOutcome),
}

/// Stitches partial reads into complete frames.
///
/// Reads never go past the end of the frame being assembled, so the buffer
/// is always shorter than `HEADER_SIZE + MAX_PAYLOAD_SIZE` once a frame has
/// been handed out.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: BytesMut,
    header: Option<FrameHeader>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_FRAME_SIZE),
            header: None,
        }
    }

    /// Bytes accumulated towards the current frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read from `reader` until a frame completes or the reader has nothing
    /// more to give.
    pub fn poll_frame<R: Read>(&mut self, reader: &mut R, peer: SocketAddr) -> RecvOutcome {
        loop {
            if self.header.is_none() && self.buf.len() >= HEADER_SIZE {
                match FrameHeader::decode(&self.buf[..HEADER_SIZE]) {
                    Ok(header) => self.header = Some(header),
                    Err(e) => {
                        self.reset();
                        return RecvOutcome::Violation(e);
                    }
                }
            }

            if let Some(header) = self.header.take() {
                let total = header.frame_len();
                if self.buf.len() >= total {
                    let frame = self.buf.split_to(total).freeze();
                    let payload = frame.slice(HEADER_SIZE..total);
                    return RecvOutcome::Frame(
                        ChatMessage::from_parts(header, payload).with_source(peer),
                    );
                }
                self.header = Some(header);
            }

            let target = self
                .header
                .as_ref()
                .map_or(HEADER_SIZE, FrameHeader::frame_len);

            match self.read_more(reader, target - self.buf.len()) {
                ReadStep::Progress => continue,
                ReadStep::Done(outcome) => return outcome,
            }
        }
    }

    fn read_more<R: Read>(&mut self, reader: &mut R, want: usize) -> ReadStep {
        let mut chunk = [0u8; MAX_FRAME_SIZE];
        match reader.read(&mut chunk[..want]) {
            Ok(0) => ReadStep::Done(RecvOutcome::Closed),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                ReadStep::Progress
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => ReadStep::Progress,
            Err(e) => match classify_io_error(&e) {
                IoDisposition::Retry => ReadStep::Done(RecvOutcome::Pending),
                IoDisposition::PeerClosed => ReadStep::Done(RecvOutcome::Closed),
                IoDisposition::PeerError => ReadStep::Done(RecvOutcome::Failed(e)),
                IoDisposition::Fatal => ReadStep::Done(RecvOutcome::Fatal(e)),
            },
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.header = None;
    }
}

/// Write all of `buf`, retrying `WouldBlock` until `timeout` has elapsed.
pub fn write_all_with_retry<W: Write>(
    writer: &mut W,
    buf: &[u8],
    timeout: Duration,
) -> Result<(), WriteFailure> {
    let started = Instant::now();
    let mut sent = 0;

    while sent < buf.len() {
        match writer.write(&buf[sent..]) {
            Ok(0) => return Err(WriteFailure::Closed),
            Ok(n) => sent += n,
            Err(e) => match classify_io_error(&e) {
                IoDisposition::Retry => {
                    if started.elapsed() >= timeout {
                        return Err(WriteFailure::TimedOut);
                    }
                    if e.kind() == ErrorKind::WouldBlock {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                IoDisposition::PeerClosed => return Err(WriteFailure::Closed),
                IoDisposition::PeerError => return Err(WriteFailure::Broken(e)),
                IoDisposition::Fatal => return Err(WriteFailure::Fatal(e)),
            },
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum WriteFailure {
    Closed,
    TimedOut,
    Broken(io::Error),
    Fatal(io::Error),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Registration state of a connection, tracked for idle reaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Unbound { since: Instant },
    Bound(String),
}

#[derive(Debug)]
pub struct Connection {
    token: Token,
    stream: TcpStream,
    peer: SocketAddr,
    status: AtomicU8,
    reassembler: Mutex<Reassembler>,
    binding: Mutex<Binding>,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            token,
            stream,
            peer,
            status: AtomicU8::new(ConnStatus::Up as u8),
            reassembler: Mutex::new(Reassembler::new()),
            binding: Mutex::new(Binding::Unbound {
                since: Instant::now(),
            }),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn status(&self) -> ConnStatus {
        ConnStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.status() == ConnStatus::Up
    }

    /// Move out of `Up`. Returns `false` if the connection had already left it.
    pub fn mark(&self, status: ConnStatus) -> bool {
        debug_assert_ne!(status, ConnStatus::Up);
        let moved = self
            .status
            .compare_exchange(
                ConnStatus::Up as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            debug!(peer = %self.peer, ?status, "Connection left Up");
            // Wakes the peer and the I/O thread; errors mean it is already gone.
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        moved
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn bound_nickname(&self) -> Option<String> {
        match &*self.lock_binding() {
            Binding::Bound(nick) => Some(nick.clone()),
            Binding::Unbound { .. } => None,
        }
    }

    pub(crate) fn bind(&self, nickname: &str) {
        *self.lock_binding() = Binding::Bound(nickname.to_owned());
    }

    pub(crate) fn unbind(&self) {
        *self.lock_binding() = Binding::Unbound {
            since: Instant::now(),
        };
    }

    /// Whether the connection has sat unregistered for longer than `limit`.
    pub fn idle_for(&self, limit: Duration) -> bool {
        match &*self.lock_binding() {
            Binding::Unbound { since } => since.elapsed() >= limit,
            Binding::Bound(_) => false,
        }
    }

    /// Run one reassembly step on the socket. Only the I/O thread calls this.
    ///
    /// Terminal outcomes move the status forward before returning; an
    /// unmodelled socket error aborts the process.
    pub fn receive(&self) -> RecvOutcome {
        if !self.is_up() {
            return RecvOutcome::Closed;
        }

        let mut reassembler = self
            .reassembler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let outcome = reassembler.poll_frame(&mut (&self.stream), self.peer);
        drop(reassembler);

        match &outcome {
            RecvOutcome::Frame(msg) => {
                trace!(peer = %self.peer, %msg, "Frame received");
            }
            RecvOutcome::Pending => {}
            RecvOutcome::Closed => {
                self.mark(ConnStatus::Closed);
            }
            RecvOutcome::Violation(e) => {
                warn!(peer = %self.peer, error = %e, "Protocol violation");
                self.mark(ConnStatus::Error);
            }
            RecvOutcome::Failed(e) => {
                debug!(peer = %self.peer, error = %e, "Receive failed");
                self.mark(ConnStatus::Error);
            }
            RecvOutcome::Fatal(e) => fail_fast("recv", Some(self.peer), e),
        }
        outcome
    }

    /// Write one encoded frame. Only the router calls this.
    pub fn send(&self, frame: &[u8], timeout: Duration) -> Result<(), SendError> {
        if !self.is_up() {
            return Err(SendError::NotUp);
        }

        match write_all_with_retry(&mut (&self.stream), frame, timeout) {
            Ok(()) => Ok(()),
            Err(WriteFailure::Closed) => {
                self.mark(ConnStatus::Closed);
                Err(SendError::PeerClosed)
            }
            Err(WriteFailure::TimedOut) => {
                warn!(peer = %self.peer, ?timeout, "Peer stopped draining, dropping it");
                self.mark(ConnStatus::Error);
                Err(SendError::TimedOut(timeout))
            }
            Err(WriteFailure::Broken(e)) => {
                self.mark(ConnStatus::Error);
                Err(SendError::Io(e))
            }
            Err(WriteFailure::Fatal(e)) => fail_fast("send", Some(self.peer), &e),
        }
    }

    fn lock_binding(&self) -> MutexGuard<'_, Binding> {
        self.binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
