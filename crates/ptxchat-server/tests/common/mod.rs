#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ptxchat_server::{ChatServer, HistorySink, ServerConfig};
use ptxchat_shared::constants::HEADER_SIZE;
use ptxchat_shared::{ChatMessage, FrameHeader, MsgType, Notification, NotificationQueue};

/// History sink that keeps everything in memory.
#[derive(Default)]
pub struct RecordingHistory {
    pub public: Mutex<Vec<ChatMessage>>,
    pub private: Mutex<Vec<ChatMessage>>,
}

impl RecordingHistory {
    pub fn public_count(&self) -> usize {
        self.public.lock().unwrap().len()
    }

    pub fn private_count(&self) -> usize {
        self.private.lock().unwrap().len()
    }
}

impl HistorySink for RecordingHistory {
    fn record_public(&self, message: &ChatMessage) {
        self.public.lock().unwrap().push(message.clone());
    }

    fn record_private(&self, message: &ChatMessage) {
        self.private.lock().unwrap().push(message.clone());
    }
}

pub struct TestServer {
    pub server: ChatServer,
    pub addr: SocketAddr,
    pub notifications: Arc<NotificationQueue>,
    pub history: Arc<RecordingHistory>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            poll_timeout: Duration::from_millis(20),
            send_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let notifications = Arc::new(NotificationQueue::new(256));
        let history = Arc::new(RecordingHistory::default());
        let mut server = ChatServer::new(config, notifications.clone(), history.clone());
        let addr = server.start().expect("server should start");

        Self {
            server,
            addr,
            notifications,
            history,
        }
    }

    pub fn connect(&self) -> TestPeer {
        TestPeer::connect(self.addr)
    }

    /// Connect and complete registration as `nickname`.
    pub fn login(&self, nickname: &str) -> TestPeer {
        let mut peer = self.connect();
        peer.send(&ChatMessage::register(nickname));
        let reply = peer.recv().expect("registration reply");
        assert_eq!(reply.msg_type, MsgType::Registered, "login as {nickname}");
        peer
    }

    /// Every notification queued so far.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        std::iter::from_fn(|| self.notifications.try_pop_back()).collect()
    }
}

pub struct TestPeer {
    pub stream: TcpStream,
}

impl TestPeer {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        Self { stream }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().unwrap()
    }

    pub fn send(&mut self, msg: &ChatMessage) {
        self.send_raw(&msg.encode().expect("encodable"));
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write");
        self.stream.flush().unwrap();
    }

    /// Next frame, or `None` on timeout or EOF.
    pub fn recv(&mut self) -> Option<ChatMessage> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).ok()?;
        let decoded = FrameHeader::decode(&header).expect("valid header from server");

        let mut frame = header.to_vec();
        frame.resize(decoded.frame_len(), 0);
        self.stream.read_exact(&mut frame[HEADER_SIZE..]).ok()?;
        Some(ChatMessage::decode(&frame).expect("valid frame from server"))
    }

    /// Assert that nothing arrives within `wait`.
    pub fn expect_silence(&mut self, wait: Duration) {
        self.stream.set_read_timeout(Some(wait)).unwrap();
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            other => panic!("expected silence, got {other:?}"),
        }
        self.stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
    }

    /// Whether the server has closed this socket (EOF or reset).
    pub fn is_closed_by_server(&mut self) -> bool {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        }
    }
}

/// Poll `cond` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
