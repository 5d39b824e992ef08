//! # ptxchat-server
//!
//! TCP chat server. One thread multiplexes every socket with mio and
//! reassembles frames; a second thread routes them (registration, public
//! broadcast, private delivery) and reports to a notification queue and a
//! history sink.

pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod history;
pub mod registry;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{RegistryError, Result, SendError, ServerError};
pub use history::{HistorySink, NoHistory, SqliteHistory};
pub use server::ChatServer;
