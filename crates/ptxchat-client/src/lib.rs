//! # ptxchat-client
//!
//! Client side of the ptxchat protocol: a blocking [`ChatClient`] and the
//! command parser used by the `ptxchat` terminal front-end.

pub mod client;
pub mod command;
pub mod error;

pub use client::{ChatClient, ClientEvent, EventQueue};
pub use command::{parse_line, Command};
pub use error::{ClientError, Result};
