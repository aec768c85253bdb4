//! Closed record schema for the scheduling board
//!
//! Every collection declares its fields up front: name, CRDT kind, and the
//! value type a register accepts. Local changes are checked against this
//! table; anything not listed is rejected rather than silently attached.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever a collection gains, loses, or retypes a field.
pub const SCHEMA_VERSION: u32 = 1;

/// Length of one grid slot. Fixed for every board.
pub const SLOT_MINUTES: i64 = 15;

/// Largest number of consecutive slots a placement may cover.
pub const MAX_SPAN: i64 = 4;

/// Id of the single board record in `Collection::Board`.
pub const BOARD_ID: &str = "board";

/// Field names, shared by the builder, the resolver, and the typed state.
pub mod field {
    pub const TITLE: &str = "title";
    pub const STARTS_AT: &str = "starts_at";
    pub const ENDS_AT: &str = "ends_at";
    pub const SLOT_MINUTES: &str = "slot_minutes";

    pub const NAME: &str = "name";
    pub const CAPACITY: &str = "capacity";
    pub const DISPLAY_ORDER: &str = "display_order";

    pub const DISPLAY_NAME: &str = "display_name";
    pub const COLOR: &str = "color";
    pub const ORGANIZER: &str = "organizer";

    pub const DESCRIPTION: &str = "description";
    pub const TAGS: &str = "tags";
    pub const PROPOSER: &str = "proposer";
    pub const STATE: &str = "state";
    pub const INTEREST: &str = "interest";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";

    pub const SESSION: &str = "session";
    pub const ROOM: &str = "room";
    pub const START_SLOT: &str = "start_slot";
    pub const SPAN: &str = "span";
    pub const PLACED_BY: &str = "placed_by";
    pub const PLACED_AT: &str = "placed_at";

    pub const USER: &str = "user";
    pub const TEXT: &str = "text";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    Board,
    Rooms,
    Users,
    Sessions,
    Placements,
    Interests,
    Comments,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Board,
        Collection::Rooms,
        Collection::Users,
        Collection::Sessions,
        Collection::Placements,
        Collection::Interests,
        Collection::Comments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Board => "board",
            Collection::Rooms => "rooms",
            Collection::Users => "users",
            Collection::Sessions => "sessions",
            Collection::Placements => "placements",
            Collection::Interests => "interests",
            Collection::Comments => "comments",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which CRDT backs a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Register,
    Counter,
    Text,
}

/// What a register field accepts. `Null` is always accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    Bool,
    StringList,
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub value_type: Option<ValueType>,
    /// May only be written in the change that creates the record.
    pub immutable: bool,
}

impl FieldSpec {
    pub fn register(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            kind: FieldKind::Register,
            value_type: Some(value_type),
            immutable: false,
        }
    }

    pub fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Counter,
            value_type: None,
            immutable: false,
        }
    }

    pub fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            value_type: None,
            immutable: false,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
}

/// Declared shape of one collection.
#[derive(Clone, Debug)]
pub struct CollectionSpec {
    pub collection: Collection,
    pub fields: Vec<FieldSpec>,
    /// Records can be added but never removed.
    pub append_only: bool,
}

impl CollectionSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// The schema of `collection`.
pub fn collection_spec(collection: Collection) -> CollectionSpec {
    use field::*;
    use FieldSpec as F;
    use ValueType as V;

    let (fields, append_only) = match collection {
        Collection::Board => (
            vec![
                F::text(TITLE),
                F::register(STARTS_AT, V::Int),
                F::register(ENDS_AT, V::Int),
                F::register(field::SLOT_MINUTES, V::Int),
            ],
            false,
        ),
        Collection::Rooms => (
            vec![
                F::text(NAME),
                F::register(CAPACITY, V::Int),
                F::register(DISPLAY_ORDER, V::Int),
            ],
            false,
        ),
        Collection::Users => (
            vec![
                F::text(DISPLAY_NAME),
                F::register(COLOR, V::String),
                F::register(ORGANIZER, V::Bool),
            ],
            false,
        ),
        Collection::Sessions => (
            vec![
                F::text(TITLE),
                F::text(DESCRIPTION),
                F::register(TAGS, V::StringList),
                F::register(COLOR, V::String),
                F::register(PROPOSER, V::String).immutable(),
                F::register(STATE, V::String),
                F::counter(INTEREST),
                F::register(CREATED_AT, V::Int),
                F::register(UPDATED_AT, V::Int),
            ],
            false,
        ),
        Collection::Placements => (
            vec![
                F::register(SESSION, V::String).immutable(),
                F::register(ROOM, V::String),
                F::register(START_SLOT, V::Int),
                F::register(SPAN, V::Int),
                F::register(PLACED_BY, V::String),
                F::register(PLACED_AT, V::Int),
            ],
            false,
        ),
        Collection::Interests => (
            vec![
                F::register(SESSION, V::String).immutable(),
                F::register(USER, V::String).immutable(),
            ],
            false,
        ),
        Collection::Comments => (
            vec![
                F::register(SESSION, V::String).immutable(),
                F::register(USER, V::String).immutable(),
                F::text(TEXT),
                F::register(CREATED_AT, V::Int),
            ],
            true,
        ),
    };

    CollectionSpec {
        collection,
        fields,
        append_only,
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Proposed,
    Scheduled,
    InProgress,
    Finished,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Proposed => "proposed",
            SessionState::Scheduled => "scheduled",
            SessionState::InProgress => "in_progress",
            SessionState::Finished => "finished",
            SessionState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(SessionState::Proposed),
            "scheduled" => Some(SessionState::Scheduled),
            "in_progress" => Some(SessionState::InProgress),
            "finished" => Some(SessionState::Finished),
            "cancelled" => Some(SessionState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interest marks are keyed by the (session, user) pair.
pub fn interest_id(session_id: &str, user_id: &str) -> String {
    format!("{session_id}:{user_id}")
}
