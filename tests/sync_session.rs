//! Sync sessions over the in-memory transport
//!
//! Run with:
//!   cargo test --test sync_session

use std::sync::Arc;
use std::time::Duration;

use stickyboard::convergent::builder::Slot;
use stickyboard::{
    new_id, ChangeBuilder, MemoryTransport, Replica, ReplicaConfig, SessionState, SyncConfig,
    SyncError,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn doc() -> Uuid {
    Uuid::from_u128(0x5713_c4b0_a4d0)
}

fn replica(actor: &str) -> Replica {
    replica_with(actor, SyncConfig::default())
}

fn replica_with(actor: &str, sync: SyncConfig) -> Replica {
    Replica::new(
        doc(),
        ReplicaConfig {
            actor_id: Some(actor.into()),
            sync,
            ..Default::default()
        },
    )
}

fn link(a: &str, b: &str) -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
    let (ta, tb) = MemoryTransport::pair(a, b);
    (Arc::new(ta), Arc::new(tb))
}

/// Wait until every replica holds the same history.
async fn settle(replicas: &[&Replica]) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let first = replicas[0].summary();
            if replicas
                .iter()
                .all(|r| r.summary() == first && r.pending_changes() == 0)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "replicas did not converge");
}

fn seed(replica: &Replica) {
    replica
        .apply_change(
            ChangeBuilder::new()
                .create_board("Unconf", 0, 32)
                .add_room("R", "Main hall", 50, 0)
                .add_room("Q", "Annex", 12, 1)
                .join_user("u1", "Ada", "#aa0000", true)
                .propose_session("S1", "Rust", "u1")
                .propose_session("S2", "CRDTs", "u1"),
        )
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pair_converges_on_connect() {
    let a = replica("A");
    let b = replica("B");
    seed(&a);
    b.apply_change(ChangeBuilder::new().join_user("u2", "Grace", "#00aa00", false))
        .unwrap();

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta);
    let sb = b.connect(tb);
    assert_eq!(sa.peer(), "B");

    settle(&[&a, &b]).await;
    assert_eq!(*a.current_state(), *b.current_state());
    assert_eq!(b.current_state().rooms.len(), 2);
    assert!(a.current_state().users.contains_key("u2"));

    sa.stop();
    let stats = sa.join().await.unwrap();
    assert!(stats.changes_sent >= 1);
    assert!(stats.changes_received >= 1);
    // Stopping one end closes the link for the other
    let stats = sb.join().await.unwrap();
    assert_eq!(stats.gaps, 0);
}

#[tokio::test]
async fn test_live_edits_flow_both_ways() {
    let a = replica("A");
    let b = replica("B");
    seed(&a);

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta);
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;

    b.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 0, 2), "u1", 10))
        .unwrap();
    settle(&[&a, &b]).await;
    assert_eq!(a.current_state().sessions["S1"].state, SessionState::Scheduled);

    a.apply_change(ChangeBuilder::new().mark_interest("S1", "u1"))
        .unwrap();
    settle(&[&a, &b]).await;
    assert_eq!(b.current_state().sessions["S1"].interest, 1);

    sa.stop();
    sb.stop();
    sa.join().await.unwrap();
    sb.join().await.unwrap();
}

#[tokio::test]
async fn test_offline_edits_sync_after_reconnect() {
    let a = replica("A");
    let b = replica("B");
    seed(&a);

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta.clone());
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;

    // Network drops
    ta.disconnect();
    sa.join().await.unwrap();
    sb.join().await.unwrap();

    a.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 4, 2), "u1", 100))
        .unwrap();
    b.apply_change(ChangeBuilder::new().place_session("p2", "S2", Slot::new("R", 5, 1), "u1", 200))
        .unwrap();
    assert_ne!(a.summary(), b.summary());

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta);
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;

    for r in [&a, &b] {
        let state = r.current_state();
        assert!(state.placement_for_session("S1").is_none());
        assert_eq!(state.sessions["S1"].state, SessionState::Proposed);
        assert_eq!(state.placement_for_session("S2").unwrap().start_slot, 5);
    }
    assert_eq!(*a.current_state(), *b.current_state());

    sa.stop();
    sb.stop();
    sa.join().await.unwrap();
    sb.join().await.unwrap();
}

#[tokio::test]
async fn test_changes_relay_through_middle_replica() {
    let a = replica("A");
    let m = replica("M");
    let c = replica("C");
    seed(&a);

    let (t_am, t_ma) = link("A", "M");
    let (t_mc, t_cm) = link("M", "C");
    let sessions = vec![
        a.connect(t_am),
        m.connect(t_ma),
        m.connect(t_mc),
        c.connect(t_cm),
    ];
    settle(&[&a, &m, &c]).await;
    assert_eq!(c.current_state().rooms.len(), 2);

    let comment = new_id();
    c.apply_change(ChangeBuilder::new().add_comment(&comment, "S2", "u1", "yes please"))
        .unwrap();
    settle(&[&a, &m, &c]).await;
    assert_eq!(a.current_state().comments[&comment].text, "yes please");

    for s in &sessions {
        s.stop();
    }
    for s in sessions {
        s.join().await.unwrap();
    }
}

#[tokio::test]
async fn test_large_histories_are_batched() {
    let small = SyncConfig {
        max_batch_changes: 3,
        ..Default::default()
    };
    let a = replica_with("A", small.clone());
    let b = replica_with("B", small);
    seed(&a);
    for i in 0..10 {
        a.apply_change(ChangeBuilder::new().rename_room("R", &format!("Hall {}", i)))
            .unwrap();
    }

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta);
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;
    assert_eq!(b.current_state().rooms["R"].name, "Hall 9");

    sa.stop();
    let a_stats = sa.join().await.unwrap();
    let b_stats = sb.join().await.unwrap();
    assert_eq!(a_stats.changes_sent, 11);
    // Summary + four batches of at most three
    assert!(a_stats.frames_sent >= 5);
    assert_eq!(b_stats.changes_received, 11);
}

#[tokio::test]
async fn test_backlogs_on_both_sides_do_not_stall() {
    // One change per frame, so each side queues far more frames than the
    // link buffers before the other starts reading.
    let single = SyncConfig {
        max_batch_changes: 1,
        ..Default::default()
    };
    let a = replica_with("A", single.clone());
    let b = replica_with("B", single);
    seed(&a);
    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta.clone());
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;
    ta.disconnect();
    sa.join().await.unwrap();
    sb.join().await.unwrap();

    for i in 0..150 {
        a.apply_change(ChangeBuilder::new().rename_room("R", &format!("Hall {}", i)))
            .unwrap();
        b.apply_change(ChangeBuilder::new().rename_room("Q", &format!("Annex {}", i)))
            .unwrap();
    }

    let (ta, tb) = link("A", "B");
    let sa = a.connect(ta);
    let sb = b.connect(tb);
    settle(&[&a, &b]).await;
    assert_eq!(a.current_state().rooms["Q"].name, "Annex 149");
    assert_eq!(b.current_state().rooms["R"].name, "Hall 149");

    sa.stop();
    let a_stats = sa.join().await.unwrap();
    let b_stats = sb.join().await.unwrap();
    assert_eq!(a_stats.changes_sent, 150);
    assert_eq!(b_stats.changes_sent, 150);
}

#[tokio::test]
async fn test_wrong_document_ends_session() {
    let a = replica("A");
    let stranger = Replica::new(Uuid::new_v4(), ReplicaConfig::default());

    let (ta, tb) = link("A", "stranger");
    let sa = a.connect(ta);
    let sb = stranger.connect(tb);

    let err = sa.join().await.unwrap_err();
    assert!(matches!(err, SyncError::WrongDocument(id) if id == stranger.doc_id()));
    // The other end sees either our summary or the closed link
    let _ = sb.join().await;
}
