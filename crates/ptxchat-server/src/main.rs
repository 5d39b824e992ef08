//! # ptxchat-server
//!
//! Runs the chat server until Ctrl+C. Server notifications (start/stop,
//! registrations, delivered messages) are written to stdout as JSON lines.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ptxchat_server::{ChatServer, HistorySink, NoHistory, ServerConfig, SqliteHistory};
use ptxchat_shared::NotificationQueue;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ptxchat_server=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting ptxchat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize collaborators
    // -----------------------------------------------------------------------
    let history: Arc<dyn HistorySink> = if !config.history_enabled {
        info!("Message history disabled");
        Arc::new(NoHistory)
    } else if let Some(path) = &config.history_path {
        Arc::new(SqliteHistory::open(path)?)
    } else {
        Arc::new(SqliteHistory::open_default()?)
    };

    let notifications = Arc::new(NotificationQueue::new(config.notification_queue_capacity));
    let feed_done = Arc::new(AtomicBool::new(false));
    let feed = tokio::task::spawn_blocking({
        let notifications = notifications.clone();
        let feed_done = feed_done.clone();
        move || notification_feed(&notifications, &feed_done)
    });

    // -----------------------------------------------------------------------
    // 4. Run until Ctrl+C
    // -----------------------------------------------------------------------
    let mut server = ChatServer::new(config, notifications.clone(), history);
    let addr = server.start()?;
    info!(%addr, "Accepting clients");

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    server.stop();
    feed_done.store(true, Ordering::Release);
    feed.await?;
    notifications.stop();

    Ok(())
}

/// Print every notification as one JSON line until asked to finish and the
/// queue has drained.
fn notification_feed(notifications: &NotificationQueue, done: &AtomicBool) {
    let stdout = std::io::stdout();
    loop {
        match notifications.pop_back_timeout(Duration::from_millis(200)) {
            Some(notification) => match serde_json::to_string(&notification.to_record()) {
                Ok(line) => {
                    let mut out = stdout.lock();
                    if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize notification"),
            },
            None if done.load(Ordering::Acquire) && notifications.is_empty() => return,
            None => {}
        }
    }
}
