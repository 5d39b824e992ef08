//! # ptxchat-store
//!
//! Chat history persisted in SQLite. The server records every delivered
//! public and private message; clients read the history back.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, runs schema migrations on open and provides the
//! narrow record / load helpers the rest of the workspace needs.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
