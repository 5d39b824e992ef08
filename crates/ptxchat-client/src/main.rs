//! # ptxchat
//!
//! Terminal chat client.
//!
//! Usage: `ptxchat <nickname>`. The server address comes from
//! `PTX_SERVER_ADDR` (default `127.0.0.1:1488`); setting `PTX_HISTORY_DB`
//! enables `/history`.

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context};
use ptxchat_client::{parse_line, ChatClient, ClientEvent, Command, EventQueue};
use ptxchat_shared::constants::DEFAULT_PORT;
use ptxchat_shared::MsgType;
use ptxchat_store::{Database, StoredMessage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HISTORY_LIMIT: u32 = 50;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,ptxchat_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(nickname) = std::env::args().nth(1) else {
        bail!("usage: ptxchat <nickname>");
    };

    let addr: SocketAddr = match std::env::var("PTX_SERVER_ADDR") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid PTX_SERVER_ADDR {raw:?}"))?,
        Err(_) => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
    };

    let history = match std::env::var("PTX_HISTORY_DB") {
        Ok(path) if !path.is_empty() => Some(Database::open_at(&PathBuf::from(path))?),
        _ => None,
    };

    let mut client = ChatClient::login(addr, &nickname)
        .with_context(|| format!("could not log in to {addr} as {nickname}"))?;
    println!("Connected to {addr} as {nickname}. /to <nick> <text>, /history [nick], /quit");

    let printer = {
        let events = client.events();
        thread::spawn(move || print_events(&events))
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };

        let sent = match command {
            Command::Nothing => Ok(()),
            Command::Public(text) => client.send_public(&text),
            Command::Private { to, text } => client.send_private(&to, &text),
            Command::History(who) => {
                show_history(history.as_ref(), who.as_deref());
                Ok(())
            }
            Command::Quit => break,
        };
        if let Err(e) = sent {
            warn!(error = %e, "Send failed");
            eprintln!("error: {e}");
        }
    }

    client.logout()?;
    if printer.join().is_err() {
        warn!("Printer thread panicked");
    }
    info!("Bye");
    Ok(())
}

fn print_events(events: &EventQueue) {
    while let Some(event) = events.pop_back_blocking() {
        match event {
            ClientEvent::Incoming(msg) => match msg.msg_type {
                MsgType::PublicData => println!("<{}> {}", msg.from, msg.text()),
                MsgType::PrivateData => println!("[{} -> you] {}", msg.from, msg.text()),
                MsgType::ErrUnknown => println!("* no such user"),
                MsgType::ErrUnregistered => println!("* you are not registered"),
                MsgType::ErrRegistered => println!("* nickname already taken"),
                MsgType::Unregistered => println!("* logged out"),
                other => println!("* {other}"),
            },
            ClientEvent::Disconnected => {
                println!("* disconnected");
                return;
            }
        }
    }
}

fn show_history(db: Option<&Database>, nickname: Option<&str>) {
    let Some(db) = db else {
        eprintln!("history is not configured (set PTX_HISTORY_DB)");
        return;
    };

    let loaded = match nickname {
        Some(nick) => db.load_private_history(nick, HISTORY_LIMIT),
        None => db.load_public_history(HISTORY_LIMIT),
    };
    match loaded {
        Ok(messages) => messages.iter().for_each(print_stored),
        Err(e) => eprintln!("could not load history: {e}"),
    }
}

fn print_stored(msg: &StoredMessage) {
    let when = msg.timestamp.format("%Y-%m-%d %H:%M:%S");
    match &msg.recipient {
        Some(to) => println!("{when} [{} -> {to}] {}", msg.sender, msg.text()),
        None => println!("{when} <{}> {}", msg.sender, msg.text()),
    }
}
