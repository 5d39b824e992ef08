//! The router thread: drains reassembled messages and applies the protocol.
//!
//! Registry lookups happen under the registry locks; every socket write
//! happens after those locks are released.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ptxchat_shared::{BoundedQueue, ChatMessage, MsgType, NotificationKind, NotificationQueue};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::RegistryError;
use crate::history::HistorySink;
use crate::registry::Registry;

pub struct Router {
    registry: Arc<Registry>,
    inbound: Arc<BoundedQueue<ChatMessage>>,
    notifications: Arc<NotificationQueue>,
    history: Arc<dyn HistorySink>,
    send_timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        inbound: Arc<BoundedQueue<ChatMessage>>,
        notifications: Arc<NotificationQueue>,
        history: Arc<dyn HistorySink>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            inbound,
            notifications,
            history,
            send_timeout,
        }
    }

    /// Process messages until the inbound queue is stopped.
    pub fn run(&self) {
        debug!("Router started");
        while let Some(msg) = self.inbound.pop_back_blocking() {
            self.dispatch(msg);
        }
        debug!("Router stopped");
    }

    pub fn dispatch(&self, msg: ChatMessage) {
        debug!(%msg, source = %msg.source, "Routing message");
        match msg.msg_type {
            MsgType::Register => self.on_register(msg),
            MsgType::Unregister => self.on_unregister(msg),
            MsgType::PrivateData => self.on_private(msg),
            MsgType::PublicData => self.on_public(msg),
            other => {
                warn!(msg_type = %other, source = %msg.source, "Ignoring message clients may not send");
            }
        }
    }

    fn on_register(&self, msg: ChatMessage) {
        match self.registry.register(&msg.from, msg.source) {
            Ok(conn) => {
                self.send_to(&conn, &ChatMessage::reply(MsgType::Registered, &msg.from));
                self.notifications
                    .notify(NotificationKind::ClientReg, Some(msg));
            }
            Err(e) => self.reject(&msg, e),
        }
    }

    fn on_unregister(&self, msg: ChatMessage) {
        match self.registry.unregister(&msg.from, msg.source) {
            Ok(client) => {
                self.send_to(
                    &client.connection,
                    &ChatMessage::reply(MsgType::Unregistered, &msg.from),
                );
                self.notifications
                    .notify(NotificationKind::ClientUnreg, Some(msg));
            }
            Err(e) => self.reject(&msg, e),
        }
    }

    fn on_private(&self, msg: ChatMessage) {
        if let Err(e) = self.registry.resolve_sender(&msg.from, msg.source) {
            return self.reject(&msg, e);
        }
        let recipient = match self.registry.resolve_recipient(&msg.to) {
            Ok(conn) => conn,
            Err(e) => return self.reject(&msg, e),
        };

        let Some(frame) = self.encode(&msg) else {
            return;
        };
        if self.deliver(&recipient, &frame) {
            self.history.record_private(&msg);
            self.notifications
                .notify(NotificationKind::PrivateMsg, Some(msg));
        } else {
            info!(from = %msg.from, to = %msg.to, "Private message not delivered");
        }
    }

    fn on_public(&self, msg: ChatMessage) {
        if let Err(e) = self.registry.resolve_sender(&msg.from, msg.source) {
            return self.reject(&msg, e);
        }

        let Some(frame) = self.encode(&msg) else {
            return;
        };
        let recipients = self.registry.registered_connections();
        let mut delivered = 0;
        for (nickname, conn) in &recipients {
            if self.deliver(conn, &frame) {
                delivered += 1;
            } else {
                debug!(%nickname, "Skipping failed recipient");
            }
        }
        debug!(from = %msg.from, delivered, total = recipients.len(), "Broadcast finished");

        self.history.record_public(&msg);
        self.notifications
            .notify(NotificationKind::PublicMsg, Some(msg));
    }

    /// Log a rejection and answer with its protocol reply, if any.
    fn reject(&self, msg: &ChatMessage, err: RegistryError) {
        info!(%msg, source = %msg.source, reason = %err, "Rejected request");

        let Some(reply_type) = err.reply_type() else {
            return;
        };
        match self.registry.connection_by_addr(msg.source) {
            Some(conn) => self.send_to(&conn, &ChatMessage::reply(reply_type, &msg.from)),
            None => debug!(source = %msg.source, "Requester gone, reply dropped"),
        }
    }

    fn send_to(&self, conn: &Connection, msg: &ChatMessage) {
        if let Some(frame) = self.encode(msg) {
            self.deliver(conn, &frame);
        }
    }

    fn encode(&self, msg: &ChatMessage) -> Option<Bytes> {
        match msg.encode() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(%msg, error = %e, "Cannot encode message");
                None
            }
        }
    }

    /// Write a frame; a failed send has already moved the connection out of
    /// `Up`, so the I/O thread reaps it on its next pass.
    fn deliver(&self, conn: &Connection, frame: &[u8]) -> bool {
        match conn.send(frame, self.send_timeout) {
            Ok(()) => true,
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "Send failed");
                false
            }
        }
    }
}
