//! Connection table and nickname registry.
//!
//! Two tables, each behind its own mutex. No code path holds both locks at
//! once: lookups clone the `Arc<Connection>` out of one table and release
//! the lock before touching the other. Registration re-checks the
//! connection's status under the clients lock, and teardown flips the status
//! before taking that lock, so a client can never end up bound to a
//! connection that has already been torn down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use mio::Token;
use ptxchat_shared::is_valid_nickname;
use tracing::info;

use crate::connection::Connection;
use crate::error::RegistryError;

/// A registered chat identity.
#[derive(Debug, Clone)]
pub struct Client {
    pub nickname: String,
    pub connection: Arc<Connection>,
    pub registered_at: Instant,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<Token, Arc<Connection>>>,
    clients: Mutex<HashMap<String, Client>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- connections ---------------------------------------------------------

    pub fn insert_connection(&self, conn: Arc<Connection>) {
        self.lock_connections().insert(conn.token(), conn);
    }

    pub fn remove_connection(&self, token: Token) -> Option<Arc<Connection>> {
        self.lock_connections().remove(&token)
    }

    pub fn connection(&self, token: Token) -> Option<Arc<Connection>> {
        self.lock_connections().get(&token).cloned()
    }

    /// The live connection whose peer address is `addr`.
    pub fn connection_by_addr(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        self.lock_connections()
            .values()
            .find(|c| c.peer() == addr)
            .cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.lock_connections().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.lock_connections().len()
    }

    // -- clients -------------------------------------------------------------

    /// Bind `nickname` to the connection at `source`.
    pub fn register(
        &self,
        nickname: &str,
        source: SocketAddr,
    ) -> Result<Arc<Connection>, RegistryError> {
        if !is_valid_nickname(nickname) {
            return Err(RegistryError::InvalidNickname(nickname.to_owned()));
        }

        let conn = self
            .connection_by_addr(source)
            .ok_or(RegistryError::ConnectionGone(source))?;

        let mut clients = self.lock_clients();
        if clients.contains_key(nickname) {
            return Err(RegistryError::DuplicateNickname(nickname.to_owned()));
        }
        if let Some(existing) = conn.bound_nickname() {
            return Err(RegistryError::AlreadyRegistered(existing));
        }
        if !conn.is_up() {
            return Err(RegistryError::ConnectionGone(source));
        }

        conn.bind(nickname);
        clients.insert(
            nickname.to_owned(),
            Client {
                nickname: nickname.to_owned(),
                connection: conn.clone(),
                registered_at: Instant::now(),
            },
        );
        drop(clients);

        info!(nickname, peer = %source, "Client registered");
        Ok(conn)
    }

    /// Remove `nickname`, provided the request came from its own connection.
    pub fn unregister(&self, nickname: &str, source: SocketAddr) -> Result<Client, RegistryError> {
        let mut clients = self.lock_clients();
        let client = clients
            .get(nickname)
            .ok_or_else(|| RegistryError::NotRegistered(nickname.to_owned()))?;

        if client.connection.peer() != source {
            return Err(RegistryError::AddressMismatch {
                nickname: nickname.to_owned(),
                source_addr: source,
            });
        }

        let client = clients
            .remove(nickname)
            .ok_or_else(|| RegistryError::NotRegistered(nickname.to_owned()))?;
        drop(clients);

        client.connection.unbind();
        info!(
            nickname,
            peer = %source,
            registered_for = ?client.registered_at.elapsed(),
            "Client unregistered"
        );
        Ok(client)
    }

    /// Connection of the registered sender, checked against the frame source.
    pub fn resolve_sender(
        &self,
        nickname: &str,
        source: SocketAddr,
    ) -> Result<Arc<Connection>, RegistryError> {
        let clients = self.lock_clients();
        let client = clients
            .get(nickname)
            .ok_or_else(|| RegistryError::NotRegistered(nickname.to_owned()))?;

        if client.connection.peer() != source {
            return Err(RegistryError::AddressMismatch {
                nickname: nickname.to_owned(),
                source_addr: source,
            });
        }
        Ok(client.connection.clone())
    }

    /// Connection of a registered recipient.
    pub fn resolve_recipient(&self, nickname: &str) -> Result<Arc<Connection>, RegistryError> {
        self.lock_clients()
            .get(nickname)
            .map(|c| c.connection.clone())
            .ok_or_else(|| RegistryError::UnknownRecipient(nickname.to_owned()))
    }

    /// Snapshot of every registered client's connection.
    pub fn registered_connections(&self) -> Vec<(String, Arc<Connection>)> {
        self.lock_clients()
            .values()
            .map(|c| (c.nickname.clone(), c.connection.clone()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    pub fn is_registered(&self, nickname: &str) -> bool {
        self.lock_clients().contains_key(nickname)
    }

    /// Remove every client bound to `conn`. Called on teardown, after the
    /// connection has left `Up`.
    pub fn remove_clients_of(&self, conn: &Connection) -> Vec<Client> {
        let mut clients = self.lock_clients();
        let nicknames: Vec<String> = clients
            .iter()
            .filter(|(_, c)| c.connection.token() == conn.token())
            .map(|(nick, _)| nick.clone())
            .collect();

        let removed: Vec<Client> = nicknames
            .iter()
            .filter_map(|nick| clients.remove(nick))
            .collect();
        drop(clients);

        for client in &removed {
            info!(
                nickname = %client.nickname,
                peer = %conn.peer(),
                registered_for = ?client.registered_at.elapsed(),
                "Dropped client of closed connection"
            );
        }
        removed
    }

    fn lock_connections(&self) -> MutexGuard<'_, HashMap<Token, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnStatus;

    /// A connected pair; returns the server side wrapped as a `Connection`
    /// plus the client socket that keeps it alive.
    fn connection(token: usize) -> (Arc<Connection>, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = Connection::new(Token(token), mio::net::TcpStream::from_std(server), peer);
        (Arc::new(conn), client)
    }

    fn registry_with(n: usize) -> (Registry, Vec<Arc<Connection>>, Vec<std::net::TcpStream>) {
        let registry = Registry::new();
        let mut conns = Vec::new();
        let mut peers = Vec::new();
        for i in 0..n {
            let (conn, peer) = connection(i + 1);
            registry.insert_connection(conn.clone());
            conns.push(conn);
            peers.push(peer);
        }
        (registry, conns, peers)
    }

    #[test]
    fn test_register_binds_connection() {
        let (registry, conns, _peers) = registry_with(1);
        let conn = registry.register("alice", conns[0].peer()).unwrap();

        assert_eq!(conn.token(), conns[0].token());
        assert_eq!(conn.bound_nickname().as_deref(), Some("alice"));
        assert!(registry.is_registered("alice"));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_duplicate_nickname_rejected_without_mutation() {
        let (registry, conns, _peers) = registry_with(2);
        registry.register("alice", conns[0].peer()).unwrap();

        let err = registry.register("alice", conns[1].peer()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateNickname("alice".into()));
        assert_eq!(registry.client_count(), 1);
        assert_eq!(conns[1].bound_nickname(), None);
    }

    #[test]
    fn test_second_register_on_same_connection_rejected() {
        let (registry, conns, _peers) = registry_with(1);
        registry.register("alice", conns[0].peer()).unwrap();

        let err = registry.register("alicia", conns[0].peer()).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("alice".into()));
        assert!(!registry.is_registered("alicia"));
    }

    #[test]
    fn test_short_nickname_rejected() {
        let (registry, conns, _peers) = registry_with(1);
        for nick in ["", "a"] {
            assert_eq!(
                registry.register(nick, conns[0].peer()).unwrap_err(),
                RegistryError::InvalidNickname(nick.into())
            );
        }
        assert_eq!(registry.client_count(), 0);

        // Length is measured in bytes: one char, two bytes.
        registry.register("é", conns[0].peer()).unwrap();
        assert!(registry.is_registered("é"));
    }

    #[test]
    fn test_register_unknown_source() {
        let (registry, _conns, _peers) = registry_with(1);
        let stranger: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(
            registry.register("alice", stranger).unwrap_err(),
            RegistryError::ConnectionGone(stranger)
        );
    }

    #[test]
    fn test_register_after_teardown_started() {
        let (registry, conns, _peers) = registry_with(1);
        conns[0].mark(ConnStatus::Closed);
        assert!(matches!(
            registry.register("alice", conns[0].peer()),
            Err(RegistryError::ConnectionGone(_))
        ));
    }

    #[test]
    fn test_unregister_checks_source() {
        let (registry, conns, _peers) = registry_with(2);
        registry.register("alice", conns[0].peer()).unwrap();

        let err = registry.unregister("alice", conns[1].peer()).unwrap_err();
        assert!(matches!(err, RegistryError::AddressMismatch { .. }));
        assert!(registry.is_registered("alice"));

        let client = registry.unregister("alice", conns[0].peer()).unwrap();
        assert_eq!(client.nickname, "alice");
        assert!(!registry.is_registered("alice"));
        assert_eq!(conns[0].bound_nickname(), None);

        assert_eq!(
            registry.unregister("alice", conns[0].peer()).unwrap_err(),
            RegistryError::NotRegistered("alice".into())
        );
    }

    #[test]
    fn test_reregister_after_unregister() {
        let (registry, conns, _peers) = registry_with(1);
        registry.register("alice", conns[0].peer()).unwrap();
        registry.unregister("alice", conns[0].peer()).unwrap();
        registry.register("alice", conns[0].peer()).unwrap();
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_resolve_sender_and_recipient() {
        let (registry, conns, _peers) = registry_with(2);
        registry.register("alice", conns[0].peer()).unwrap();

        assert!(registry.resolve_sender("alice", conns[0].peer()).is_ok());
        assert!(matches!(
            registry.resolve_sender("alice", conns[1].peer()),
            Err(RegistryError::AddressMismatch { .. })
        ));
        assert_eq!(
            registry.resolve_sender("bob", conns[1].peer()).unwrap_err(),
            RegistryError::NotRegistered("bob".into())
        );
        assert_eq!(
            registry.resolve_recipient("bob").unwrap_err(),
            RegistryError::UnknownRecipient("bob".into())
        );
    }

    #[test]
    fn test_remove_clients_of_connection() {
        let (registry, conns, _peers) = registry_with(2);
        registry.register("alice", conns[0].peer()).unwrap();
        registry.register("bob", conns[1].peer()).unwrap();

        conns[0].mark(ConnStatus::Error);
        registry.remove_connection(conns[0].token());
        let removed = registry.remove_clients_of(&conns[0]);

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].nickname, "alice");
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.connection_by_addr(conns[0].peer()).is_none());
    }
}
