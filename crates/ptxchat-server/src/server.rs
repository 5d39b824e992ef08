//! Server lifecycle: binds the listener and owns the two worker threads.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mio::net::TcpListener;
use ptxchat_shared::{BoundedQueue, ChatMessage, NotificationKind, NotificationQueue};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::event_loop::EventLoop;
use crate::history::HistorySink;
use crate::registry::Registry;
use crate::router::Router;

struct Running {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    inbound: Arc<BoundedQueue<ChatMessage>>,
    io_thread: JoinHandle<()>,
    router_thread: JoinHandle<()>,
}

pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    notifications: Arc<NotificationQueue>,
    history: Arc<dyn HistorySink>,
    running: Option<Running>,
}

impl ChatServer {
    pub fn new(
        config: ServerConfig,
        notifications: Arc<NotificationQueue>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            notifications,
            history,
            running: None,
        }
    }

    /// Bind the listener and spawn the I/O and router threads.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.listen_addr;
        if !self.config.port_in_registered_range() {
            warn!(port = addr.port(), "Listening port is outside 1024..=49151");
        }

        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let capacity = self.config.inbound_queue_capacity;
        if capacity == 0 {
            warn!("Inbound queue capacity 0 would stall routing, using 1");
        }
        let inbound = Arc::new(BoundedQueue::new(capacity.max(1)));

        let event_loop = EventLoop::new(
            listener,
            &self.config,
            self.registry.clone(),
            inbound.clone(),
            self.notifications.clone(),
            stop.clone(),
        )?;
        let router = Router::new(
            self.registry.clone(),
            inbound.clone(),
            self.notifications.clone(),
            self.history.clone(),
            self.config.send_timeout,
        );

        let router_thread = thread::Builder::new()
            .name("ptxchat-router".into())
            .spawn(move || router.run())
            .map_err(|source| ServerError::ThreadSpawn {
                name: "router",
                source,
            })?;

        let io_thread = match thread::Builder::new()
            .name("ptxchat-io".into())
            .spawn(move || event_loop.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                inbound.stop();
                let _ = router_thread.join();
                return Err(ServerError::ThreadSpawn { name: "io", source });
            }
        };

        self.running = Some(Running {
            local_addr,
            stop,
            inbound,
            io_thread,
            router_thread,
        });

        info!(addr = %local_addr, "Chat server started");
        self.notifications.notify(NotificationKind::SrvStart, None);
        Ok(local_addr)
    }

    /// Stop both threads and close every connection. Idempotent.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        running.inbound.stop();

        if running.router_thread.join().is_err() {
            error!("Router thread panicked");
        }
        if running.io_thread.join().is_err() {
            error!("I/O thread panicked");
        }

        info!(addr = %running.local_addr, "Chat server stopped");
        self.notifications.notify(NotificationKind::SrvStop, None);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.stop();
    }
}
