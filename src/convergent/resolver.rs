//! Post-merge repair of scheduling invariants
//!
//! Field-level merges cannot see that two placements, each valid where it
//! was made, now share a room and a time range. After every merge the
//! resolver scans the placements and decides which ones to take off the
//! grid. The decision depends only on the merged document, so every replica
//! that reaches the same state reaches the same repair.
//!
//! Winner of any clash: greatest (placed_at, placed_by, placement id).

use super::builder::{ChangeBuilder, Intent};
use super::document::{DocumentStore, Record};
use super::operation::{RecordRef, Value};
use super::schema::{field, Collection, SessionState};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a placement was removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairReason {
    /// Another placement of the same session won.
    DuplicatePlacement { winner: String },
    /// Its room or its session no longer exists.
    Dangling,
    /// Overlapped `winner` in the same room.
    Overlap { winner: String },
}

impl fmt::Display for RepairReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairReason::DuplicatePlacement { winner } => {
                write!(f, "session already placed by {winner}")
            }
            RepairReason::Dangling => f.write_str("room or session missing"),
            RepairReason::Overlap { winner } => write!(f, "overlaps {winner}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedPlacement {
    pub placement: String,
    pub session: String,
    pub room: String,
    pub reason: RepairReason,
}

/// Placements to remove, sessions to send back to `proposed`, and proposed
/// sessions that still hold a placement and go back to `scheduled`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Repair {
    pub removed: Vec<RemovedPlacement>,
    pub reset_sessions: BTreeSet<String>,
    pub scheduled_sessions: BTreeSet<String>,
}

impl Repair {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.reset_sessions.is_empty() && self.scheduled_sessions.is_empty()
    }

    /// The repair as an ordinary change.
    pub fn to_builder(&self) -> ChangeBuilder {
        let mut builder = ChangeBuilder::new();
        for removed in &self.removed {
            builder = builder.push(Intent::Remove {
                target: RecordRef::new(Collection::Placements, removed.placement.clone()),
            });
        }
        for session in &self.reset_sessions {
            builder = builder.set(
                Collection::Sessions,
                session.clone(),
                field::STATE,
                Value::string(SessionState::Proposed.as_str()),
            );
        }
        for session in &self.scheduled_sessions {
            builder = builder.set(
                Collection::Sessions,
                session.clone(),
                field::STATE,
                Value::string(SessionState::Scheduled.as_str()),
            );
        }
        builder
    }
}

/// Materialized view of one placement.
#[derive(Clone, Debug)]
pub(crate) struct Slotted {
    pub(crate) id: String,
    pub(crate) session: String,
    pub(crate) room: String,
    pub(crate) start: i64,
    pub(crate) span: i64,
    placed_at: i64,
    placed_by: String,
}

impl Slotted {
    pub(crate) fn read(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            session: record.str(field::SESSION).unwrap_or_default().to_string(),
            room: record.str(field::ROOM).unwrap_or_default().to_string(),
            start: record.int(field::START_SLOT).unwrap_or(0),
            span: record.int(field::SPAN).unwrap_or(1),
            placed_at: record.int(field::PLACED_AT).unwrap_or(0),
            placed_by: record.str(field::PLACED_BY).unwrap_or_default().to_string(),
        }
    }

    fn key(&self) -> (i64, &str, &str) {
        (self.placed_at, &self.placed_by, &self.id)
    }

    pub(crate) fn end(&self) -> i64 {
        self.start + self.span
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Decide what to unplace. Does not modify the store.
    pub fn resolve(&self, store: &DocumentStore) -> Repair {
        let mut repair = Repair::default();
        let mut live: BTreeMap<String, Slotted> = store
            .records(Collection::Placements)
            .map(|(id, record)| (id.clone(), Slotted::read(id, record)))
            .collect();

        // One placement per session
        let mut by_session: BTreeMap<&str, Vec<&Slotted>> = BTreeMap::new();
        for slotted in live.values() {
            by_session.entry(&slotted.session).or_default().push(slotted);
        }
        let mut duplicates = Vec::new();
        for placements in by_session.values() {
            if let Some(winner) = placements.iter().max_by(|a, b| a.key().cmp(&b.key())) {
                for loser in placements.iter().filter(|p| p.id != winner.id) {
                    duplicates.push(((*loser).clone(), winner.id.clone()));
                }
            }
        }
        for (loser, winner) in duplicates {
            live.remove(&loser.id);
            repair.removed.push(RemovedPlacement {
                placement: loser.id,
                session: loser.session,
                room: loser.room,
                reason: RepairReason::DuplicatePlacement { winner },
            });
        }

        // Placements whose room or session is gone
        let dangling: Vec<String> = live
            .values()
            .filter(|p| {
                !store.contains(Collection::Rooms, &p.room)
                    || !store.contains(Collection::Sessions, &p.session)
            })
            .map(|p| p.id.clone())
            .collect();
        for id in dangling {
            if let Some(loser) = live.remove(&id) {
                self.unplace(store, &mut repair, loser, RepairReason::Dangling);
            }
        }

        // Overlaps, room by room
        let mut by_room: BTreeMap<String, Vec<Slotted>> = BTreeMap::new();
        for slotted in live.into_values() {
            by_room.entry(slotted.room.clone()).or_default().push(slotted);
        }
        for (_, mut placements) in by_room {
            placements.sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
            while let Some(i) = first_overlap(&placements) {
                let (a, b) = (&placements[i], &placements[i + 1]);
                let loser_index = if a.key() > b.key() { i + 1 } else { i };
                let winner = placements[if loser_index == i { i + 1 } else { i }].id.clone();
                let loser = placements.remove(loser_index);
                self.unplace(store, &mut repair, loser, RepairReason::Overlap { winner });
            }

            // A concurrent unplace can leave a surviving placement's session
            // marked proposed
            for survivor in &placements {
                let proposed = store
                    .record(Collection::Sessions, &survivor.session)
                    .and_then(|s| s.str(field::STATE))
                    == Some(SessionState::Proposed.as_str());
                if proposed {
                    repair.scheduled_sessions.insert(survivor.session.clone());
                }
            }
        }
        for session in &repair.scheduled_sessions {
            log::info!("Session {} still has a placement, marking it scheduled", session);
        }

        for removed in &repair.removed {
            log::info!(
                "Unplacing {} (session {}, room {}): {}",
                removed.placement,
                removed.session,
                removed.room,
                removed.reason
            );
        }
        repair
    }

    fn unplace(&self, store: &DocumentStore, repair: &mut Repair, loser: Slotted, reason: RepairReason) {
        if store.contains(Collection::Sessions, &loser.session) {
            repair.reset_sessions.insert(loser.session.clone());
        }
        repair.removed.push(RemovedPlacement {
            placement: loser.id,
            session: loser.session,
            room: loser.room,
            reason,
        });
    }
}

/// Index of the first adjacent pair that overlaps, in a list sorted by start.
pub(crate) fn first_overlap(sorted: &[Slotted]) -> Option<usize> {
    sorted
        .windows(2)
        .position(|pair| pair[0].end() > pair[1].start)
}
