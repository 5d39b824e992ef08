mod common;

use std::time::Duration;

use common::{wait_until, TestServer};
use ptxchat_server::event_loop::FRAMES_PER_TURN;
use ptxchat_shared::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE};
use ptxchat_shared::{ChatMessage, MsgType, Notification, NotificationKind};

fn kinds(notifications: &[Notification]) -> Vec<NotificationKind> {
    notifications.iter().map(|n| n.kind).collect()
}

#[test]
fn test_public_private_and_unregistered_sender() {
    let server = TestServer::start();
    let mut alice = server.login("alice");
    let mut bob = server.login("bob");
    let mut carol = server.connect();

    // Public: everyone registered, sender included, gets it once.
    alice.send(&ChatMessage::public("alice", "hi"));
    for peer in [&mut alice, &mut bob] {
        let msg = peer.recv().expect("public message");
        assert_eq!(msg.msg_type, MsgType::PublicData);
        assert_eq!(msg.from, "alice");
        assert_eq!(msg.text(), "hi");
    }

    // Private: only the recipient.
    alice.send(&ChatMessage::private("alice", "bob", "secret"));
    let msg = bob.recv().expect("private message");
    assert_eq!(msg.msg_type, MsgType::PrivateData);
    assert_eq!((msg.from.as_str(), msg.to.as_str()), ("alice", "bob"));
    assert_eq!(msg.text(), "secret");
    alice.expect_silence(Duration::from_millis(200));

    // Never registered: rejected, nothing delivered.
    carol.send(&ChatMessage::private("carol", "bob", "let me in"));
    let reply = carol.recv().expect("rejection");
    assert_eq!(reply.msg_type, MsgType::ErrUnregistered);
    bob.expect_silence(Duration::from_millis(200));

    assert_eq!(server.history.public_count(), 1);
    assert_eq!(server.history.private_count(), 1);

    let notifications = server.drain_notifications();
    assert_eq!(
        kinds(&notifications),
        vec![
            NotificationKind::SrvStart,
            NotificationKind::ClientReg,
            NotificationKind::ClientReg,
            NotificationKind::PublicMsg,
            NotificationKind::PrivateMsg,
        ]
    );
    let public = notifications[3].message.as_ref().unwrap();
    assert_eq!(public.from, "alice");
    assert_eq!(public.text(), "hi");
    assert_eq!(public.source, alice.local_addr());
}

#[test]
fn test_public_recorded_once_regardless_of_recipients() {
    let server = TestServer::start();
    let mut peers: Vec<_> = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|nick| server.login(nick))
        .collect();

    peers[2].send(&ChatMessage::public("carol", "hello all"));
    for peer in &mut peers {
        assert_eq!(peer.recv().unwrap().text(), "hello all");
    }

    assert!(wait_until(Duration::from_secs(2), || server.history.public_count() == 1));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(server.history.public_count(), 1);
    assert_eq!(server.history.public.lock().unwrap()[0].from, "carol");
}

#[test]
fn test_duplicate_nickname_rejected() {
    let server = TestServer::start();
    let _alice = server.login("alice");

    let mut impostor = server.connect();
    impostor.send(&ChatMessage::register("alice"));
    assert_eq!(impostor.recv().unwrap().msg_type, MsgType::ErrRegistered);
    assert_eq!(server.server.registry().client_count(), 1);

    // The impostor connection is still usable under another name.
    impostor.send(&ChatMessage::register("alicia"));
    assert_eq!(impostor.recv().unwrap().msg_type, MsgType::Registered);
    assert_eq!(server.server.registry().client_count(), 2);
}

#[test]
fn test_register_twice_on_one_connection() {
    let server = TestServer::start();
    let mut alice = server.login("alice");

    alice.send(&ChatMessage::register("alice2"));
    assert_eq!(alice.recv().unwrap().msg_type, MsgType::ErrRegistered);
    assert!(!server.server.registry().is_registered("alice2"));
}

#[test]
fn test_short_nickname_rejected() {
    let server = TestServer::start();
    let mut peer = server.connect();

    peer.send(&ChatMessage::register("a"));
    assert_eq!(peer.recv().unwrap().msg_type, MsgType::ErrUnknown);
    assert_eq!(server.server.registry().client_count(), 0);
}

#[test]
fn test_private_to_unknown_recipient() {
    let server = TestServer::start();
    let mut alice = server.login("alice");

    alice.send(&ChatMessage::private("alice", "nobody", "hello?"));
    assert_eq!(alice.recv().unwrap().msg_type, MsgType::ErrUnknown);
    assert_eq!(server.history.private_count(), 0);
}

#[test]
fn test_unregister_then_register_again() {
    let server = TestServer::start();
    let mut alice = server.login("alice");
    let mut bob = server.login("bob");

    alice.send(&ChatMessage::unregister("alice"));
    assert_eq!(alice.recv().unwrap().msg_type, MsgType::Unregistered);
    assert!(!server.server.registry().is_registered("alice"));

    alice.send(&ChatMessage::public("alice", "still here?"));
    assert_eq!(alice.recv().unwrap().msg_type, MsgType::ErrUnregistered);
    bob.send(&ChatMessage::private("bob", "alice", "are you there"));
    assert_eq!(bob.recv().unwrap().msg_type, MsgType::ErrUnknown);

    alice.send(&ChatMessage::register("alice"));
    assert_eq!(alice.recv().unwrap().msg_type, MsgType::Registered);

    bob.send(&ChatMessage::private("bob", "alice", "welcome back"));
    assert_eq!(alice.recv().unwrap().text(), "welcome back");
}

#[test]
fn test_spoofed_sender_and_unregister_rejected() {
    let server = TestServer::start();
    let mut alice = server.login("alice");
    let mut bob = server.login("bob");

    bob.send(&ChatMessage::unregister("alice"));
    assert_eq!(bob.recv().unwrap().msg_type, MsgType::ErrUnregistered);
    assert!(server.server.registry().is_registered("alice"));

    bob.send(&ChatMessage::public("alice", "I am alice"));
    assert_eq!(bob.recv().unwrap().msg_type, MsgType::ErrUnregistered);
    alice.expect_silence(Duration::from_millis(200));
    assert_eq!(server.history.public_count(), 0);
}

#[test]
fn test_frame_split_across_writes() {
    let server = TestServer::start();
    let mut peer = server.connect();

    let frame = ChatMessage::register("slowpoke").encode().unwrap();
    for chunk in frame.chunks(37) {
        peer.send_raw(chunk);
        std::thread::sleep(Duration::from_millis(15));
    }
    assert_eq!(peer.recv().unwrap().msg_type, MsgType::Registered);

    let frame = ChatMessage::public("slowpoke", "piece by piece").encode().unwrap();
    peer.send_raw(&frame[..HEADER_SIZE - 1]);
    std::thread::sleep(Duration::from_millis(50));
    peer.send_raw(&frame[HEADER_SIZE - 1..HEADER_SIZE + 3]);
    std::thread::sleep(Duration::from_millis(50));
    peer.send_raw(&frame[HEADER_SIZE + 3..]);
    assert_eq!(peer.recv().unwrap().text(), "piece by piece");
}

#[test]
fn test_back_to_back_frames_in_one_write() {
    let server = TestServer::start();
    let mut peer = server.connect();

    let mut burst = ChatMessage::register("burst").encode().unwrap().to_vec();
    for i in 0..5 {
        burst.extend_from_slice(&ChatMessage::public("burst", &format!("m{i}")).encode().unwrap());
    }
    peer.send_raw(&burst);

    assert_eq!(peer.recv().unwrap().msg_type, MsgType::Registered);
    for i in 0..5 {
        assert_eq!(peer.recv().unwrap().text(), format!("m{i}"));
    }
}

#[test]
fn test_oversized_payload_closes_only_that_connection() {
    let server = TestServer::start();
    let mut bob = server.login("bob");
    let mut mallory = server.login("mallory");

    let mut frame = ChatMessage::public("mallory", "x").encode().unwrap().to_vec();
    frame[HEADER_SIZE - 4..HEADER_SIZE].copy_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes());
    mallory.send_raw(&frame);

    assert!(mallory.is_closed_by_server());
    assert!(wait_until(Duration::from_secs(2), || {
        !server.server.registry().is_registered("mallory")
    }));

    bob.send(&ChatMessage::public("bob", "still alive"));
    assert_eq!(bob.recv().unwrap().text(), "still alive");
    assert_eq!(server.server.registry().client_count(), 1);

    let notifications = server.drain_notifications();
    let unreg = notifications
        .iter()
        .find(|n| n.kind == NotificationKind::ClientUnreg)
        .expect("unregistration notification");
    assert_eq!(unreg.message.as_ref().unwrap().from, "mallory");
}

#[test]
fn test_bad_magic_closes_connection() {
    let server = TestServer::start();
    let mut peer = server.connect();

    let mut frame = ChatMessage::register("alice").encode().unwrap().to_vec();
    frame[0] ^= 0xFF;
    peer.send_raw(&frame);

    assert!(peer.is_closed_by_server());
    assert!(wait_until(Duration::from_secs(2), || {
        server.server.registry().connection_count() == 0
    }));
}

#[test]
fn test_disconnect_removes_client() {
    let server = TestServer::start();
    let alice = server.login("alice");
    let mut bob = server.login("bob");

    drop(alice);
    assert!(wait_until(Duration::from_secs(2), || {
        !server.server.registry().is_registered("alice")
    }));

    bob.send(&ChatMessage::private("bob", "alice", "gone?"));
    assert_eq!(bob.recv().unwrap().msg_type, MsgType::ErrUnknown);
}

fn public_burst(from: &str, count: usize) -> Vec<u8> {
    let mut burst = Vec::new();
    for i in 0..count {
        burst.extend_from_slice(&ChatMessage::public(from, &format!("m{i}")).encode().unwrap());
    }
    burst
}

#[test]
fn test_full_inbound_queue_applies_backpressure() {
    let server = TestServer::start_with(|c| c.inbound_queue_capacity = 1);
    let mut peer = server.connect();

    let mut burst = ChatMessage::register("burst").encode().unwrap().to_vec();
    burst.extend_from_slice(&public_burst("burst", 50));
    peer.send_raw(&burst);

    assert_eq!(peer.recv().unwrap().msg_type, MsgType::Registered);
    for i in 0..50 {
        assert_eq!(peer.recv().expect("no frame dropped").text(), format!("m{i}"));
    }
    assert_eq!(server.history.public_count(), 50);
}

#[test]
fn test_zero_inbound_capacity_still_routes() {
    let server = TestServer::start_with(|c| c.inbound_queue_capacity = 0);
    let mut peer = server.connect();

    peer.send(&ChatMessage::register("alice"));
    assert_eq!(peer.recv().expect("registration reply").msg_type, MsgType::Registered);
}

#[test]
fn test_burst_beyond_frame_budget_is_delivered_while_others_are_served() {
    let server = TestServer::start();
    let mut flood = server.login("flood");
    let mut bob = server.login("bob");

    let count = FRAMES_PER_TURN * 3 + 5;
    flood.send_raw(&public_burst("flood", count));
    bob.send(&ChatMessage::public("bob", "me too"));

    let mut flood_seen = Vec::new();
    let mut bob_seen = false;
    while flood_seen.len() < count || !bob_seen {
        let msg = bob.recv().expect("every frame of the burst arrives");
        if msg.from == "bob" {
            bob_seen = true;
        } else {
            flood_seen.push(msg.text());
        }
    }
    let expected: Vec<String> = (0..count).map(|i| format!("m{i}")).collect();
    assert_eq!(flood_seen, expected);

    for _ in 0..=count {
        flood.recv().expect("sender receives its own broadcast");
    }
}
