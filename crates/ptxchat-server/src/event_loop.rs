//! The I/O thread: accepts peers, reads their sockets and feeds complete
//! frames into the inbound queue.
//!
//! mio registrations are edge-triggered, so a readable socket has to be read
//! until it reports `WouldBlock` or no further event arrives for it. One
//! readiness event reads at most [`FRAMES_PER_TURN`] frames; a socket that
//! still has data goes on the backlog and is served again on the next turn,
//! after every other ready socket.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use ptxchat_shared::{BoundedQueue, ChatMessage, NotificationKind, NotificationQueue};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::connection::{classify_io_error, fail_fast, ConnStatus, Connection, IoDisposition, RecvOutcome};
use crate::registry::Registry;

pub const LISTENER: Token = Token(0);

const FIRST_CONNECTION_TOKEN: usize = 1;
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_millis(250);
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(1);

/// Frames read from one socket before the loop moves on to other peers.
pub const FRAMES_PER_TURN: usize = 64;

pub struct EventLoop {
    poll: Poll,
    listener: TcpListener,
    registry: Arc<Registry>,
    inbound: Arc<BoundedQueue<ChatMessage>>,
    notifications: Arc<NotificationQueue>,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
    max_events: usize,
    idle_timeout: Option<Duration>,
    next_token: usize,
    /// Sockets that hit the per-turn frame budget and may still be readable.
    backlog: Vec<Token>,
}

impl EventLoop {
    /// Register `listener` with a fresh poll instance.
    pub fn new(
        mut listener: TcpListener,
        config: &ServerConfig,
        registry: Arc<Registry>,
        inbound: Arc<BoundedQueue<ChatMessage>>,
        notifications: Arc<NotificationQueue>,
        stop: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            registry,
            inbound,
            notifications,
            stop,
            poll_timeout: config.poll_timeout,
            max_events: config.max_events.max(1),
            idle_timeout: config.idle_timeout,
            next_token: FIRST_CONNECTION_TOKEN,
            backlog: Vec::new(),
        })
    }

    /// Run until the stop flag is raised, then close every connection.
    pub fn run(mut self) {
        let mut events = Events::with_capacity(self.max_events);
        let mut last_sweep = Instant::now();
        debug!("I/O loop started");

        while !self.stop.load(Ordering::Acquire) {
            // Backlogged sockets will not signal again; do not sleep on them.
            let timeout = if self.backlog.is_empty() {
                self.poll_timeout
            } else {
                Duration::ZERO
            };
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                fail_fast("poll", None, &e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    token => self.handle_event(token, event),
                }
            }

            for token in std::mem::take(&mut self.backlog) {
                self.read_frames(token);
            }

            self.reap_failed();
            if last_sweep.elapsed() >= IDLE_SWEEP_INTERVAL {
                self.reap_idle();
                last_sweep = Instant::now();
            }
        }

        self.close_all();
        debug!("I/O loop stopped");
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Could not set TCP_NODELAY");
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(%peer, error = %e, "Failed to register connection, dropping it");
                        continue;
                    }

                    self.registry
                        .insert_connection(Arc::new(Connection::new(token, stream, peer)));
                    info!(%peer, token = token.0, "Accepted connection");
                }
                Err(e) => match classify_io_error(&e) {
                    IoDisposition::Retry if e.kind() == ErrorKind::Interrupted => continue,
                    IoDisposition::Retry => break,
                    IoDisposition::PeerClosed | IoDisposition::PeerError => {
                        warn!(error = %e, "Transient accept error");
                        continue;
                    }
                    IoDisposition::Fatal => fail_fast("accept", None, &e),
                },
            }
        }
    }

    fn handle_event(&mut self, token: Token, event: &Event) {
        // Events may still arrive for a token torn down earlier in this batch.
        let Some(conn) = self.registry.connection(token) else {
            trace!(token = token.0, "Event for unknown token");
            return;
        };

        if event.is_error() {
            debug!(peer = %conn.peer(), "Socket error event");
            conn.mark(ConnStatus::Error);
        }
        if !conn.is_up() {
            drop(conn);
            self.teardown(token);
            return;
        }

        if (event.is_readable() || event.is_read_closed()) && !self.backlog.contains(&token) {
            drop(conn);
            self.read_frames(token);
        }
    }

    /// Read up to [`FRAMES_PER_TURN`] frames; backlog the socket if it may
    /// hold more.
    fn read_frames(&mut self, token: Token) {
        let Some(conn) = self.registry.connection(token) else {
            return;
        };
        for _ in 0..FRAMES_PER_TURN {
            match conn.receive() {
                RecvOutcome::Frame(msg) => self.enqueue(msg),
                RecvOutcome::Pending => return,
                _ => {
                    drop(conn);
                    self.teardown(token);
                    return;
                }
            }
        }
        trace!(peer = %conn.peer(), "Frame budget used up, deferring");
        self.backlog.push(token);
    }

    /// Hand a frame to the router, waiting for room rather than dropping it.
    fn enqueue(&self, msg: ChatMessage) {
        let mut warned = false;
        while !self.inbound.push_front(msg.clone()) {
            if self.inbound.is_stopped() || self.stop.load(Ordering::Acquire) {
                debug!(%msg, "Server stopping, frame dropped");
                return;
            }
            if !warned {
                warn!(capacity = self.inbound.capacity(), "Inbound queue full, applying backpressure");
                warned = true;
            }
            std::thread::sleep(ENQUEUE_BACKOFF);
        }
    }

    /// Tear down connections the router marked as failed.
    fn reap_failed(&mut self) {
        let failed: Vec<Token> = self
            .registry
            .connections()
            .iter()
            .filter(|c| !c.is_up())
            .map(|c| c.token())
            .collect();
        for token in failed {
            self.teardown(token);
        }
    }

    fn reap_idle(&mut self) {
        let Some(limit) = self.idle_timeout else {
            return;
        };
        let idle: Vec<Token> = self
            .registry
            .connections()
            .iter()
            .filter(|c| c.idle_for(limit))
            .map(|c| c.token())
            .collect();
        for token in idle {
            if let Some(conn) = self.registry.connection(token) {
                info!(peer = %conn.peer(), ?limit, "Closing connection that never registered");
                conn.mark(ConnStatus::Closed);
            }
            self.teardown(token);
        }
    }

    /// Remove a connection from both tables and close its socket.
    fn teardown(&mut self, token: Token) {
        let Some(mut conn) = self.registry.remove_connection(token) else {
            return;
        };
        // Teardown of a live connection (stop, reaping) still goes through
        // a terminal status so a concurrent register sees it.
        conn.mark(ConnStatus::Closed);

        for client in self.registry.remove_clients_of(&conn) {
            let farewell = ChatMessage::unregister(&client.nickname).with_source(conn.peer());
            self.notifications
                .notify(NotificationKind::ClientUnreg, Some(farewell));
        }

        let peer = conn.peer();
        let status = conn.status();
        // The router may still hold a reference for an in-flight send; the
        // socket then closes when that reference drops.
        if let Some(conn) = Arc::get_mut(&mut conn) {
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                trace!(%peer, error = %e, "Deregister failed");
            }
        }
        info!(%peer, ?status, "Connection closed");
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.registry.connections().iter().map(|c| c.token()).collect();
        for token in tokens {
            self.teardown(token);
        }
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            trace!(error = %e, "Deregister listener failed");
        }
    }
}
