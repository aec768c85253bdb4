//! Typed, immutable view of the board
//!
//! Built from the generic document store. This is what renderers and
//! exporters read; it carries no CRDT metadata and serializes to plain JSON.

use super::document::{DocumentStore, Record};
use super::schema::{field, Collection, SessionState, BOARD_ID, SLOT_MINUTES};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub board: Option<Board>,
    pub rooms: BTreeMap<String, Room>,
    pub users: BTreeMap<String, User>,
    pub sessions: BTreeMap<String, Session>,
    pub placements: BTreeMap<String, Placement>,
    pub comments: BTreeMap<String, Comment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub title: String,
    pub starts_at: Option<i64>,
    pub ends_at: Option<i64>,
    pub slot_minutes: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub capacity: Option<i64>,
    pub display_order: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub color: Option<String>,
    pub organizer: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub proposer: Option<String>,
    pub state: SessionState,
    /// Explicit counter adjustments plus one per live mark; not clamped.
    pub interest: i64,
    /// Users with a live interest mark.
    pub interested: BTreeSet<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: String,
    pub session: String,
    pub room: String,
    pub start_slot: i64,
    pub span: i64,
    pub placed_by: Option<String>,
    pub placed_at: Option<i64>,
}

impl Placement {
    /// First slot after the placement.
    pub fn end_slot(&self) -> i64 {
        self.start_slot + self.span
    }

    pub fn overlaps(&self, other: &Placement) -> bool {
        self.room == other.room
            && self.start_slot < other.end_slot()
            && other.start_slot < self.end_slot()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub session: String,
    pub user: String,
    pub text: String,
    pub created_at: Option<i64>,
}

impl BoardState {
    pub fn from_store(store: &DocumentStore) -> Self {
        let mut state = BoardState {
            board: store.record(Collection::Board, BOARD_ID).map(board),
            ..Default::default()
        };

        for (id, record) in store.records(Collection::Rooms) {
            state.rooms.insert(
                id.clone(),
                Room {
                    id: id.clone(),
                    name: record.text(field::NAME),
                    capacity: record.int(field::CAPACITY),
                    display_order: record.int(field::DISPLAY_ORDER).unwrap_or(0),
                },
            );
        }

        for (id, record) in store.records(Collection::Users) {
            state.users.insert(
                id.clone(),
                User {
                    id: id.clone(),
                    display_name: record.text(field::DISPLAY_NAME),
                    color: string(record, field::COLOR),
                    organizer: record.bool(field::ORGANIZER).unwrap_or(false),
                },
            );
        }

        for (id, record) in store.records(Collection::Sessions) {
            state.sessions.insert(id.clone(), session(id, record));
        }

        for (_, record) in store.records(Collection::Interests) {
            let (Some(session), Some(user)) = (record.str(field::SESSION), record.str(field::USER))
            else {
                continue;
            };
            if let Some(s) = state.sessions.get_mut(session) {
                s.interested.insert(user.to_string());
            }
        }
        for s in state.sessions.values_mut() {
            s.interest = s.interest.saturating_add(s.interested.len() as i64);
        }

        for (id, record) in store.records(Collection::Placements) {
            state.placements.insert(
                id.clone(),
                Placement {
                    id: id.clone(),
                    session: string(record, field::SESSION).unwrap_or_default(),
                    room: string(record, field::ROOM).unwrap_or_default(),
                    start_slot: record.int(field::START_SLOT).unwrap_or(0),
                    span: record.int(field::SPAN).unwrap_or(1),
                    placed_by: string(record, field::PLACED_BY),
                    placed_at: record.int(field::PLACED_AT),
                },
            );
        }

        for (id, record) in store.records(Collection::Comments) {
            state.comments.insert(
                id.clone(),
                Comment {
                    id: id.clone(),
                    session: string(record, field::SESSION).unwrap_or_default(),
                    user: string(record, field::USER).unwrap_or_default(),
                    text: record.text(field::TEXT),
                    created_at: record.int(field::CREATED_AT),
                },
            );
        }

        state
    }

    /// Rooms in display order (ties by id).
    pub fn rooms_in_order(&self) -> Vec<&Room> {
        let mut rooms: Vec<&Room> = self.rooms.values().collect();
        rooms.sort_by(|a, b| (a.display_order, &a.id).cmp(&(b.display_order, &b.id)));
        rooms
    }

    /// Placements in a room, earliest slot first.
    pub fn schedule_for_room(&self, room: &str) -> Vec<&Placement> {
        let mut placements: Vec<&Placement> =
            self.placements.values().filter(|p| p.room == room).collect();
        placements.sort_by(|a, b| (a.start_slot, &a.id).cmp(&(b.start_slot, &b.id)));
        placements
    }

    pub fn placement_for_session(&self, session: &str) -> Option<&Placement> {
        self.placements.values().find(|p| p.session == session)
    }

    /// Sessions not on the grid, excluding cancelled ones.
    pub fn unscheduled_sessions(&self) -> Vec<&Session> {
        let placed: BTreeSet<&str> = self.placements.values().map(|p| p.session.as_str()).collect();
        self.sessions
            .values()
            .filter(|s| s.state != SessionState::Cancelled && !placed.contains(s.id.as_str()))
            .collect()
    }

    /// Comments on a session, oldest first.
    pub fn comments_for_session(&self, session: &str) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self
            .comments
            .values()
            .filter(|c| c.session == session)
            .collect();
        comments.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        comments
    }

    /// Pairs of placements sharing a room and a time range.
    pub fn overlapping_placements(&self) -> Vec<(&Placement, &Placement)> {
        let placements: Vec<&Placement> = self.placements.values().collect();
        let mut out = Vec::new();
        for (i, a) in placements.iter().enumerate() {
            for b in &placements[i + 1..] {
                if a.overlaps(b) {
                    out.push((*a, *b));
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 of the JSON form; equal on replicas holding the same state.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

fn board(record: &Record) -> Board {
    Board {
        title: record.text(field::TITLE),
        starts_at: record.int(field::STARTS_AT),
        ends_at: record.int(field::ENDS_AT),
        slot_minutes: record.int(field::SLOT_MINUTES).unwrap_or(SLOT_MINUTES),
    }
}

fn session(id: &str, record: &Record) -> Session {
    Session {
        id: id.to_string(),
        title: record.text(field::TITLE),
        description: record.text(field::DESCRIPTION),
        tags: record.value(field::TAGS).as_string_list(),
        color: string(record, field::COLOR),
        proposer: string(record, field::PROPOSER),
        state: record
            .str(field::STATE)
            .and_then(SessionState::parse)
            .unwrap_or_default(),
        interest: record.counter(field::INTEREST).map(|c| c.value()).unwrap_or(0),
        interested: BTreeSet::new(),
        created_at: record.int(field::CREATED_AT),
        updated_at: record.int(field::UPDATED_AT),
    }
}

fn string(record: &Record, name: &str) -> Option<String> {
    record.str(name).map(str::to_string)
}
