//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ptxchat_shared::constants::{DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the chat listener binds to.
    /// Env: `PTX_LISTEN_ADDR`
    /// Default: `0.0.0.0:1488`
    pub listen_addr: SocketAddr,

    /// Capacity of the queue between the I/O thread and the router.
    /// Env: `PTX_INBOUND_QUEUE_CAPACITY`
    pub inbound_queue_capacity: usize,

    /// Capacity of the UI notification queue.
    /// Env: `PTX_NOTIFY_QUEUE_CAPACITY`
    pub notification_queue_capacity: usize,

    /// Upper bound on one poll wait; also how quickly a stop is noticed.
    /// Env: `PTX_POLL_TIMEOUT_MS`
    pub poll_timeout: Duration,

    /// Readiness events fetched per poll.
    /// Env: `PTX_MAX_EVENTS`
    pub max_events: usize,

    /// How long an accepted connection may stay unregistered.
    /// Env: `PTX_IDLE_TIMEOUT_SECS` (`0` disables reaping)
    /// Default: 60 s
    pub idle_timeout: Option<Duration>,

    /// How long a send may keep hitting `WouldBlock` before the peer is
    /// dropped.
    /// Env: `PTX_SEND_TIMEOUT_MS`
    pub send_timeout: Duration,

    /// SQLite history file. `None` means the platform data directory.
    /// Env: `PTX_HISTORY_DB`
    pub history_path: Option<PathBuf>,

    /// Env: `PTX_HISTORY_DISABLED` (true/false)
    pub history_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            inbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            notification_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_timeout: Duration::from_millis(100),
            max_events: 1024,
            idle_timeout: Some(Duration::from_secs(60)),
            send_timeout: Duration::from_millis(5000),
            history_path: None,
            history_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr>(&lookup, "PTX_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(n) = nonzero(&lookup, "PTX_INBOUND_QUEUE_CAPACITY") {
            config.inbound_queue_capacity = n;
        }

        if let Some(n) = nonzero(&lookup, "PTX_NOTIFY_QUEUE_CAPACITY") {
            config.notification_queue_capacity = n;
        }

        if let Some(ms) = parsed::<u64>(&lookup, "PTX_POLL_TIMEOUT_MS") {
            config.poll_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parsed::<usize>(&lookup, "PTX_MAX_EVENTS") {
            config.max_events = n;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "PTX_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(ms) = parsed::<u64>(&lookup, "PTX_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(ms);
        }

        if let Some(path) = lookup("PTX_HISTORY_DB").filter(|p| !p.is_empty()) {
            config.history_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("PTX_HISTORY_DISABLED") {
            config.history_enabled = val == "false" || val == "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Ports outside the registered range work, but usually by accident.
    pub fn port_in_registered_range(&self) -> bool {
        (1024..=49151).contains(&self.listen_addr.port())
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// A queue that can hold nothing never accepts a push.
fn nonzero(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    match parsed::<usize>(lookup, key)? {
        0 => {
            tracing::warn!(key, "Capacity must be at least 1, using default");
            None
        }
        n => Some(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 1488).into());
        assert_eq!(config.inbound_queue_capacity, 1000);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert!(config.history_enabled);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PTX_LISTEN_ADDR", "127.0.0.1:5555"),
            ("PTX_INBOUND_QUEUE_CAPACITY", "8"),
            ("PTX_POLL_TIMEOUT_MS", "20"),
            ("PTX_IDLE_TIMEOUT_SECS", "0"),
            ("PTX_HISTORY_DB", "/tmp/chat.db"),
            ("PTX_HISTORY_DISABLED", "true"),
        ]);
        assert_eq!(config.listen_addr, "127.0.0.1:5555".parse().unwrap());
        assert_eq!(config.inbound_queue_capacity, 8);
        assert_eq!(config.poll_timeout, Duration::from_millis(20));
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.history_path, Some(PathBuf::from("/tmp/chat.db")));
        assert!(!config.history_enabled);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("PTX_LISTEN_ADDR", "not an address"),
            ("PTX_MAX_EVENTS", "-3"),
        ]);
        assert_eq!(config.listen_addr, ServerConfig::default().listen_addr);
        assert_eq!(config.max_events, 1024);
    }

    #[test]
    fn test_zero_queue_capacity_keeps_default() {
        let config = config_from(&[
            ("PTX_INBOUND_QUEUE_CAPACITY", "0"),
            ("PTX_NOTIFY_QUEUE_CAPACITY", "0"),
        ]);
        assert_eq!(config.inbound_queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.notification_queue_capacity, DEFAULT_QUEUE_CAPACITY);

        let config = config_from(&[("PTX_INBOUND_QUEUE_CAPACITY", "1")]);
        assert_eq!(config.inbound_queue_capacity, 1);
    }

    #[test]
    fn test_port_range() {
        let mut config = ServerConfig::default();
        assert!(config.port_in_registered_range());
        config.listen_addr.set_port(80);
        assert!(!config.port_in_registered_range());
        config.listen_addr.set_port(50000);
        assert!(!config.port_in_registered_range());
    }
}
