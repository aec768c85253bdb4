//! Merge properties across replicas
//!
//! Replicas here exchange histories directly through `changes_since` /
//! `merge_remote`, with no transport in between.

use stickyboard::convergent::builder::Slot;
use stickyboard::convergent::schema::field;
use stickyboard::convergent::Collection;
use stickyboard::{ChangeBuilder, Replica, ReplicaConfig, SessionState, ValidationError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn replica(actor: &str) -> Replica {
    Replica::new(
        Uuid::nil(),
        ReplicaConfig {
            actor_id: Some(actor.into()),
            ..Default::default()
        },
    )
}

/// Copy whatever `to` is missing from `from`.
fn pull(to: &Replica, from: &Replica) {
    to.merge_remote(from.changes_since(&to.summary())).unwrap();
}

/// Exchange until neither side has anything new. Repairs made while merging
/// are changes too, so this can take more than one round.
fn sync(a: &Replica, b: &Replica) {
    for _ in 0..4 {
        pull(a, b);
        pull(b, a);
        if a.summary() == b.summary() {
            return;
        }
    }
    panic!("replicas did not settle");
}

/// A board with one room and two proposed sessions, shared by `a` and `b`.
fn shared_board(a: &str, b: &str) -> (Replica, Replica) {
    let r1 = replica(a);
    let r2 = replica(b);
    r1.apply_change(
        ChangeBuilder::new()
            .create_board("Unconf", 0, 32)
            .add_room("R", "Main hall", 50, 0)
            .join_user("u1", "Ada", "#aa0000", true)
            .join_user("u2", "Grace", "#00aa00", false)
            .propose_session("S1", "Rust", "u1")
            .propose_session("S2", "CRDTs", "u2"),
    )
    .unwrap();
    pull(&r2, &r1);
    (r1, r2)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn test_concurrent_changes_commute() {
    let (a, b) = shared_board("A", "B");
    let base = a.summary();

    a.apply_change(ChangeBuilder::new().edit_session_title("S1", "Rust in production"))
        .unwrap();
    b.apply_change(ChangeBuilder::new().add_room("Q", "Annex", 10, 1))
        .unwrap();
    let c1 = a.changes_since(&base);
    let c2 = b.changes_since(&base);

    let x = rebase(&a, &base);
    let y = rebase(&a, &base);

    x.merge_remote(c1.clone()).unwrap();
    x.merge_remote(c2.clone()).unwrap();
    y.merge_remote(c2).unwrap();
    y.merge_remote(c1).unwrap();

    assert_eq!(*x.current_state(), *y.current_state());
    assert_eq!(x.current_state().sessions["S1"].title, "Rust in production");
    assert!(x.current_state().rooms.contains_key("Q"));
}

/// A fresh replica holding exactly `source`'s history up to `upto`.
fn rebase(source: &Replica, upto: &stickyboard::Horizon) -> Replica {
    let fresh = replica(&Uuid::new_v4().to_string());
    let history: Vec<_> = source
        .history()
        .into_iter()
        .filter(|c| upto.contains(&c.id))
        .collect();
    fresh.merge_remote(history).unwrap();
    fresh
}

#[test]
fn test_merging_twice_is_idempotent() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(
        ChangeBuilder::new()
            .place_session("p1", "S1", Slot::new("R", 0, 2), "u1", 10)
            .mark_interest("S2", "u1"),
    )
    .unwrap();

    let changes = a.changes_since(&b.summary());
    let first = b.merge_remote(changes.clone()).unwrap();
    let after_once = b.current_state();
    let version = b.version();

    let second = b.merge_remote(changes.clone()).unwrap();
    assert!(!first.applied.is_empty());
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped, changes.len());
    assert_eq!(*b.current_state(), *after_once);
    assert_eq!(b.version(), version);
}

#[test]
fn test_replicas_converge_after_exchange() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(
        ChangeBuilder::new()
            .place_session("pa", "S1", Slot::new("R", 0, 2), "u1", 100)
            .edit_session_description("S2", "merge all the things"),
    )
    .unwrap();
    b.apply_change(
        ChangeBuilder::new()
            .add_room("Q", "Annex", 12, 1)
            .place_session("pb", "S2", Slot::new("Q", 0, 1), "u2", 90)
            .add_comment("c1", "S1", "u2", "keen"),
    )
    .unwrap();

    sync(&a, &b);
    let state = a.current_state();
    assert_eq!(*state, *b.current_state());
    assert_eq!(state.digest(), b.current_state().digest());
    assert_eq!(state.placements.len(), 2);
    assert_eq!(state.comments_for_session("S1").len(), 1);
}

#[test]
fn test_concurrent_increments_add_up() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(ChangeBuilder::new().increment(Collection::Sessions, "S1", field::INTEREST, 3))
        .unwrap();
    b.apply_change(ChangeBuilder::new().increment(Collection::Sessions, "S1", field::INTEREST, 2))
        .unwrap();

    sync(&a, &b);
    assert_eq!(a.current_state().sessions["S1"].interest, 5);
    assert_eq!(b.current_state().sessions["S1"].interest, 5);
}

#[test]
fn test_interest_marks_across_offline_replicas() {
    let (one, two) = shared_board("device-1", "device-2");

    one.apply_change(ChangeBuilder::new().mark_interest("S1", "u1"))
        .unwrap();
    two.apply_change(ChangeBuilder::new().mark_interest("S1", "u2"))
        .unwrap();
    one.apply_change(ChangeBuilder::new().clear_interest("S1", "u1"))
        .unwrap();

    sync(&one, &two);
    for r in [&one, &two] {
        let state = r.current_state();
        let s1 = &state.sessions["S1"];
        assert_eq!(s1.interest, 1);
        assert_eq!(s1.interested.iter().collect::<Vec<_>>(), vec!["u2"]);
    }
}

#[test]
fn test_concurrent_inserts_keep_both() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(ChangeBuilder::new().edit_session_description("S1", "ab"))
        .unwrap();
    pull(&b, &a);

    a.apply_change(ChangeBuilder::new().insert_text(
        Collection::Sessions,
        "S1",
        field::DESCRIPTION,
        1,
        "X",
    ))
    .unwrap();
    b.apply_change(ChangeBuilder::new().insert_text(
        Collection::Sessions,
        "S1",
        field::DESCRIPTION,
        1,
        "Y",
    ))
    .unwrap();

    sync(&a, &b);
    let text = a.current_state().sessions["S1"].description.clone();
    assert_eq!(text, b.current_state().sessions["S1"].description);
    assert_eq!(text.len(), 4);
    assert!(text.starts_with('a') && text.ends_with('b'));
    assert_eq!(text.matches('X').count(), 1);
    assert_eq!(text.matches('Y').count(), 1);
}

// ---------------------------------------------------------------------------
// Scheduling conflicts
// ---------------------------------------------------------------------------

#[test]
fn test_later_placement_wins_overlap() {
    let (one, two) = shared_board("replica-1", "replica-2");

    one.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 4, 2), "u1", 100))
        .unwrap();
    two.apply_change(ChangeBuilder::new().place_session("p2", "S2", Slot::new("R", 5, 1), "u2", 200))
        .unwrap();

    let report = one.merge_remote(two.changes_since(&one.summary())).unwrap();
    assert_eq!(report.unplaced.len(), 1);
    assert_eq!(report.unplaced[0].placement, "p1");
    assert!(report.repair.is_some());

    sync(&one, &two);
    for r in [&one, &two] {
        let state = r.current_state();
        assert_eq!(state.sessions["S1"].state, SessionState::Proposed);
        assert_eq!(state.sessions["S2"].state, SessionState::Scheduled);
        assert!(state.placement_for_session("S1").is_none());

        let p2 = state.placement_for_session("S2").unwrap();
        assert_eq!((p2.room.as_str(), p2.start_slot, p2.span), ("R", 5, 1));
        assert!(state.overlapping_placements().is_empty());
    }
}

#[test]
fn test_no_overlap_survives_merge() {
    let (a, b) = shared_board("A", "B");
    let c = replica("C");
    pull(&c, &a);
    c.apply_change(ChangeBuilder::new().propose_session("S3", "Async", "u1"))
        .unwrap();
    sync(&a, &c);
    sync(&b, &c);

    a.apply_change(ChangeBuilder::new().place_session("pa", "S1", Slot::new("R", 0, 4), "u1", 300))
        .unwrap();
    b.apply_change(ChangeBuilder::new().place_session("pb", "S2", Slot::new("R", 3, 2), "u2", 200))
        .unwrap();
    c.apply_change(ChangeBuilder::new().place_session("pc", "S3", Slot::new("R", 5, 1), "u1", 100))
        .unwrap();

    sync(&a, &b);
    sync(&b, &c);
    sync(&a, &c);

    let state = a.current_state();
    assert_eq!(*state, *b.current_state());
    assert_eq!(*state, *c.current_state());
    assert!(state.overlapping_placements().is_empty());
    // pa beats pb; pc does not touch pa and survives
    let ids: Vec<&str> = state.schedule_for_room("R").iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["pa", "pc"]);
    assert_eq!(state.sessions["S2"].state, SessionState::Proposed);
}

#[test]
fn test_local_overlap_is_rejected() {
    let (a, _) = shared_board("A", "B");
    a.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 2, 2), "u1", 1))
        .unwrap();

    let err = a
        .apply_change(ChangeBuilder::new().place_session("p2", "S2", Slot::new("R", 3, 1), "u2", 2))
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::Overlap {
            room: "R".into(),
            other: "p1".into()
        }
    );
    assert!(a.current_state().placement_for_session("S2").is_none());
}

#[test]
fn test_removed_room_unplaces_concurrent_placement() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(ChangeBuilder::new().remove_room("R")).unwrap();
    b.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 0, 1), "u1", 5))
        .unwrap();

    sync(&a, &b);
    let state = a.current_state();
    assert_eq!(*state, *b.current_state());
    assert!(!state.rooms.contains_key("R"));
    assert!(state.placements.is_empty());
    assert_eq!(state.sessions["S1"].state, SessionState::Proposed);
}

// ---------------------------------------------------------------------------
// Removal vs concurrent edits
// ---------------------------------------------------------------------------

#[test]
fn test_later_edit_resurrects_removed_record() {
    let (a, b) = shared_board("A", "B");
    // Push b's clock ahead so its edit is the later write
    for i in 0..3 {
        b.apply_change(ChangeBuilder::new().rename_room("R", &format!("Hall {}", i)))
            .unwrap();
    }

    a.apply_change(ChangeBuilder::new().remove_session("S2"))
        .unwrap();
    b.apply_change(ChangeBuilder::new().edit_session_title("S2", "CRDTs, revisited"))
        .unwrap();

    sync(&a, &b);
    let state = a.current_state();
    assert_eq!(*state, *b.current_state());
    assert_eq!(state.sessions["S2"].title, "CRDTs, revisited");
}

#[test]
fn test_moved_placement_keeps_session_scheduled() {
    let (a, b) = shared_board("A", "B");
    a.apply_change(ChangeBuilder::new().place_session("p1", "S1", Slot::new("R", 0, 2), "u1", 10))
        .unwrap();
    pull(&b, &a);
    for i in 0..3 {
        b.apply_change(ChangeBuilder::new().rename_room("R", &format!("Hall {}", i)))
            .unwrap();
    }

    // a takes S1 off the grid while b, further ahead, moves its placement
    a.apply_change(ChangeBuilder::new().unplace_session("S1"))
        .unwrap();
    b.apply_change(ChangeBuilder::new().move_placement("p1", Slot::new("R", 6, 2), "u2", 20))
        .unwrap();

    sync(&a, &b);
    let state = a.current_state();
    assert_eq!(*state, *b.current_state());
    assert_eq!(state.placement_for_session("S1").unwrap().start_slot, 6);
    assert_eq!(state.sessions["S1"].state, SessionState::Scheduled);
}

#[test]
fn test_removal_after_seeing_edit_sticks() {
    let (a, b) = shared_board("A", "B");
    b.apply_change(ChangeBuilder::new().edit_session_title("S2", "CRDTs, revisited"))
        .unwrap();
    pull(&a, &b);
    a.apply_change(ChangeBuilder::new().remove_session("S2"))
        .unwrap();

    sync(&a, &b);
    assert!(!a.current_state().sessions.contains_key("S2"));
    assert!(!b.current_state().sessions.contains_key("S2"));
}

#[test]
fn test_history_gap_is_buffered_until_parents_arrive() {
    let (a, b) = shared_board("A", "B");
    let base = b.summary();
    a.apply_change(ChangeBuilder::new().add_room("Q", "Annex", 10, 1))
        .unwrap();
    a.apply_change(ChangeBuilder::new().rename_room("Q", "Annex B"))
        .unwrap();

    let mut missing = a.changes_since(&base);
    assert_eq!(missing.len(), 2);
    let second = missing.pop().unwrap();

    let err = b.merge_remote(vec![second]).unwrap_err();
    assert!(matches!(err, stickyboard::MergeError::HistoryGap { .. }));
    assert_eq!(b.pending_changes(), 1);
    assert!(!b.current_state().rooms.contains_key("Q"));

    b.merge_remote(missing).unwrap();
    assert_eq!(b.pending_changes(), 0);
    assert_eq!(b.current_state().rooms["Q"].name, "Annex B");
}
