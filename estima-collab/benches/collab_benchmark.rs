use criterion::{criterion_group, criterion_main, Criterion};
use estima_collab::broadcast::TopicGroup;
use estima_collab::document::{Origin, ReplicatedDocument, Store};
use estima_collab::presence::{PresenceConfig, PresenceTracker};
use estima_collab::protocol::RelayFrame;
use estima_collab::results::summarize;
use estima_collab::snapshot::RoomSnapshot;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A room document with `peers` participants who all voted.
fn populated_document(peers: usize) -> ReplicatedDocument {
    let mut doc = ReplicatedDocument::new();
    doc.transact(|txn| {
        for i in 0..peers {
            let id = format!("peer-{i:04}");
            txn.set(Store::Roster, &id, format!("Peer {i}"));
            txn.set(Store::Votes, &id, ["1", "2", "3", "5", "8"][i % 5]);
        }
        txn.set(Store::Meta, "issue", "Benchmark issue");
    });
    doc.take_local_changes();
    doc
}

fn bench_frame_encode(c: &mut Criterion) {
    let frame = RelayFrame::publish("estima/ab12cd34/update", vec![0u8; 64]);

    c.bench_function("relay_frame_encode_64B", |b| {
        b.iter(|| black_box(black_box(&frame).encode().unwrap()))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = RelayFrame::publish("estima/ab12cd34/update", vec![0u8; 64])
        .encode()
        .unwrap();

    c.bench_function("relay_frame_decode_64B", |b| {
        b.iter(|| black_box(RelayFrame::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_local_vote(c: &mut Criterion) {
    let mut doc = populated_document(20);
    let values = ["1", "2", "3", "5", "8", "13"];
    let mut i = 0usize;

    c.bench_function("local_vote_delta", |b| {
        b.iter(|| {
            i += 1;
            doc.set(Store::Votes, "peer-0000", values[i % values.len()]);
            black_box(doc.take_local_changes());
        })
    });
}

fn bench_apply_remote_delta(c: &mut Criterion) {
    let mut source = ReplicatedDocument::with_client_id(1);
    source.set(Store::Roster, "peer-a", "A");
    let base = source.encode_full_state();
    source.set(Store::Votes, "peer-a", "8");
    let delta = source.take_local_changes().pop().unwrap();

    c.bench_function("apply_remote_vote_delta", |b| {
        b.iter(|| {
            let mut replica = ReplicatedDocument::with_client_id(2);
            replica.apply_delta(&base, Origin::Remote).unwrap();
            replica.apply_delta(black_box(&delta), Origin::Remote).unwrap();
            black_box(replica);
        })
    });
}

fn bench_full_state_catch_up_50_peers(c: &mut Criterion) {
    let state = populated_document(50).encode_full_state();

    c.bench_function("full_state_catch_up_50_peers", |b| {
        b.iter(|| {
            let mut replica = ReplicatedDocument::new();
            replica.apply_delta(black_box(&state), Origin::Remote).unwrap();
            black_box(replica);
        })
    });
}

fn bench_snapshot_50_peers(c: &mut Criterion) {
    let doc = populated_document(50);

    c.bench_function("snapshot_50_peers", |b| {
        b.iter(|| black_box(RoomSnapshot::from_document(black_box(&doc), "peer-0000")))
    });
}

fn bench_summarize_50_votes(c: &mut Criterion) {
    let snapshot = RoomSnapshot::from_document(&populated_document(50), "peer-0000");

    c.bench_function("summarize_50_votes", |b| {
        b.iter(|| black_box(summarize(black_box(&snapshot.votes))))
    });
}

fn bench_stale_peer_sweep_100(c: &mut Criterion) {
    let t0 = Instant::now();
    let mut tracker = PresenceTracker::new("me", t0, PresenceConfig::default());
    let roster: Vec<String> = (0..100).map(|i| format!("peer-{i}")).collect();
    for (i, id) in roster.iter().enumerate() {
        tracker.record_heartbeat(id, t0 + Duration::from_secs(i as u64 % 30));
    }
    let now = t0 + Duration::from_secs(40);

    c.bench_function("stale_peer_sweep_100", |b| {
        b.iter(|| black_box(tracker.stale_peers(roster.iter().map(String::as_str), black_box(now))))
    });
}

fn bench_topic_fan_out_100_subscribers(c: &mut Criterion) {
    let group = TopicGroup::new(1024);
    let mut receivers = Vec::new();
    for _ in 0..100 {
        receivers.push(group.add_subscriber());
    }

    c.bench_function("topic_fan_out_100_subscribers", |b| {
        b.iter(|| {
            let data = Arc::new(vec![0u8; 64]);
            let count = group.publish(black_box(data));
            for rx in receivers.iter_mut() {
                let _ = rx.try_recv();
            }
            black_box(count);
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_local_vote,
    bench_apply_remote_delta,
    bench_full_state_catch_up_50_peers,
    bench_snapshot_50_peers,
    bench_summarize_50_votes,
    bench_stale_peer_sweep_100,
    bench_topic_fan_out_100_subscribers,
);
criterion_main!(benches);
