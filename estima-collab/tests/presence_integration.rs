//! Integration tests for presence: heartbeats, leave signals and
//! stale-peer eviction.
//!
//! Rooms run on their driver tasks with a paused tokio clock, so the
//! 5s / 15s / 20s presence timers elapse instantly and deterministically.

use estima_collab::room::Room;
use estima_collab::session::RoomConfig;
use estima_collab::snapshot::Participant;
use estima_collab::transport::{MemoryRelay, Transport};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;

fn join(relay: &MemoryRelay, id: &str, name: &str) -> (Room, u64) {
    let transport = relay.transport();
    let transport_id = transport.id();
    let room = Room::join(
        RoomConfig::default(),
        "standup",
        Participant::new(id, name),
        transport,
    );
    (room, transport_id)
}

/// Let every room process whatever the others published.
async fn settle(rooms: &[&Room]) {
    for _ in 0..4 {
        for room in rooms {
            room.flush().await;
        }
    }
}

fn ids(room: &Room) -> Vec<String> {
    room.snapshot()
        .participants
        .into_iter()
        .map(|p| p.id)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_evicted_after_grace_period() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    let (bob, bob_transport) = join(&relay, "b", "Bob");
    settle(&[&alice, &bob]).await;
    bob.vote("8");
    settle(&[&alice, &bob]).await;
    assert_eq!(ids(&alice), vec!["a", "b"]);

    // Bob vanishes without a leave
    relay.set_offline(bob_transport, true);

    tokio::time::sleep(Duration::from_secs(18)).await;
    alice.flush().await;
    assert_eq!(ids(&alice), vec!["a", "b"], "evicted during grace period");

    tokio::time::sleep(Duration::from_secs(7)).await;
    alice.flush().await;
    assert_eq!(ids(&alice), vec!["a"]);
    assert!(alice.snapshot().votes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_live_peers_are_kept() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    let (bob, _) = join(&relay, "b", "Bob");
    settle(&[&alice, &bob]).await;

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle(&[&alice, &bob]).await;
    }

    assert_eq!(ids(&alice), vec!["a", "b"]);
    assert_eq!(ids(&bob), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_leave_evicts_immediately() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    let (bob, _) = join(&relay, "b", "Bob");
    settle(&[&alice, &bob]).await;
    bob.vote("3");
    settle(&[&alice, &bob]).await;

    bob.destroy().await;
    alice.flush().await;

    assert_eq!(ids(&alice), vec!["a"]);
    assert!(!alice.snapshot().votes.contains_key("b"));
}

#[tokio::test(start_paused = true)]
async fn test_leave_naming_self_is_ignored() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    settle(&[&alice]).await;

    // A raw transport replays a leave carrying Alice's own id
    let mut raw = relay.transport();
    let (tx, _rx) = mpsc::unbounded_channel();
    raw.connect(tx);
    raw.publish("estima/standup/leave", b"a".to_vec());
    alice.flush().await;

    assert_eq!(ids(&alice), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_does_not_evict_during_grace() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    let (bob, _) = join(&relay, "b", "Bob");
    settle(&[&alice, &bob]).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle(&[&alice, &bob]).await;

    // Carol joins long after the others; she has not heard every heartbeat yet
    let (carol, _) = join(&relay, "c", "Carol");
    settle(&[&alice, &bob, &carol]).await;
    assert_eq!(ids(&carol), vec!["a", "b", "c"]);

    tokio::time::sleep(Duration::from_secs(40)).await;
    settle(&[&alice, &bob, &carol]).await;
    assert_eq!(ids(&carol), vec!["a", "b", "c"]);
    assert_eq!(ids(&alice), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_listener_sees_no_remote_changes() {
    let relay = MemoryRelay::new();
    let (alice, _) = join(&relay, "a", "Alice");
    let (bob, _) = join(&relay, "b", "Bob");
    settle(&[&alice, &bob]).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let sub = alice.subscribe(move |snap| {
        log.lock().unwrap().push(snap.votes.get("b").cloned());
    });

    bob.vote("5");
    settle(&[&alice, &bob]).await;
    sub.unsubscribe();
    bob.vote("13");
    settle(&[&alice, &bob]).await;

    assert_eq!(*seen.lock().unwrap(), vec![Some("5".to_string())]);
    assert_eq!(alice.snapshot().votes.get("b").map(String::as_str), Some("13"));
}
