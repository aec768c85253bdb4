//! Accumulating local edits into a change
//!
//! A `ChangeBuilder` is plain data: a list of intents. Nothing is stamped or
//! validated until the engine commits it, at which point every intent is
//! checked against the document as left by the intents before it, and the
//! whole batch lands or none of it does.
//!
//! Domain helpers that touch several records (removing a room unplaces its
//! sessions, for instance) are kept as single intents and expanded against
//! the document at commit time, so they see placements made by peers.

use super::document::DocumentStore;
use super::operation::{now_millis, RecordRef, Value};
use super::schema::{field, interest_id, Collection, SessionState, BOARD_ID, SLOT_MINUTES};

/// Where a placement sits on the grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub room: String,
    pub start_slot: i64,
    pub span: i64,
}

impl Slot {
    pub fn new(room: impl Into<String>, start_slot: i64, span: i64) -> Self {
        Self {
            room: room.into(),
            start_slot,
            span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    Create {
        target: RecordRef,
    },
    Remove {
        target: RecordRef,
    },
    Set {
        target: RecordRef,
        field: String,
        value: Value,
    },
    Count {
        target: RecordRef,
        field: String,
        amount: u64,
        decrement: bool,
    },
    InsertText {
        target: RecordRef,
        field: String,
        index: usize,
        text: String,
    },
    DeleteText {
        target: RecordRef,
        field: String,
        index: usize,
        count: usize,
    },
    /// Replace the whole text, editing only the part that differs.
    SetText {
        target: RecordRef,
        field: String,
        text: String,
    },
    RemoveRoom {
        room: String,
    },
    RemoveSession {
        session: String,
    },
    UnplaceSession {
        session: String,
    },
    MarkInterest {
        session: String,
        user: String,
    },
    ClearInterest {
        session: String,
        user: String,
    },
}

impl Intent {
    /// Rewrite domain intents into record-level ones, against the document
    /// as it currently stands. Record-level intents pass through unchanged.
    pub fn expand(self, store: &DocumentStore) -> Vec<Intent> {
        match self {
            Intent::RemoveRoom { room } => {
                let mut out = Vec::new();
                for (placement_id, placement) in store.records(Collection::Placements) {
                    if placement.str(field::ROOM) != Some(room.as_str()) {
                        continue;
                    }
                    out.push(Intent::Remove {
                        target: RecordRef::new(Collection::Placements, placement_id.clone()),
                    });
                    if let Some(session) = placement.str(field::SESSION) {
                        if store.contains(Collection::Sessions, session) {
                            out.push(state_intent(session, SessionState::Proposed));
                        }
                    }
                }
                out.push(Intent::Remove {
                    target: RecordRef::new(Collection::Rooms, room),
                });
                out
            }
            Intent::RemoveSession { session } => {
                let mut out: Vec<Intent> = placements_of(store, &session)
                    .map(|target| Intent::Remove { target })
                    .collect();
                out.push(Intent::Remove {
                    target: RecordRef::new(Collection::Sessions, session),
                });
                out
            }
            Intent::UnplaceSession { session } => {
                let mut out: Vec<Intent> = placements_of(store, &session)
                    .map(|target| Intent::Remove { target })
                    .collect();
                out.push(state_intent(&session, SessionState::Proposed));
                out
            }
            Intent::MarkInterest { session, user } => {
                let id = interest_id(&session, &user);
                if store.contains(Collection::Interests, &id) {
                    return Vec::new();
                }
                let target = RecordRef::new(Collection::Interests, id);
                vec![
                    Intent::Create {
                        target: target.clone(),
                    },
                    Intent::Set {
                        target: target.clone(),
                        field: field::SESSION.into(),
                        value: Value::string(session),
                    },
                    Intent::Set {
                        target,
                        field: field::USER.into(),
                        value: Value::string(user),
                    },
                ]
            }
            Intent::ClearInterest { session, user } => {
                let id = interest_id(&session, &user);
                if !store.contains(Collection::Interests, &id) {
                    return Vec::new();
                }
                vec![Intent::Remove {
                    target: RecordRef::new(Collection::Interests, id),
                }]
            }
            other => vec![other],
        }
    }
}

fn state_intent(session: &str, state: SessionState) -> Intent {
    Intent::Set {
        target: RecordRef::new(Collection::Sessions, session),
        field: field::STATE.into(),
        value: Value::string(state.as_str()),
    }
}

fn placements_of<'a>(
    store: &'a DocumentStore,
    session: &'a str,
) -> impl Iterator<Item = RecordRef> + 'a {
    store
        .records(Collection::Placements)
        .filter(move |(_, p)| p.str(field::SESSION) == Some(session))
        .map(|(id, _)| RecordRef::new(Collection::Placements, id.clone()))
}

/// An uncommitted batch of edits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeBuilder {
    intents: Vec<Intent>,
}

impl ChangeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn intents(&self) -> &[Intent] {
        &self.intents
    }

    pub fn into_intents(self) -> Vec<Intent> {
        self.intents
    }

    pub fn push(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    // Record-level edits

    pub fn create(self, collection: Collection, id: impl Into<String>) -> Self {
        self.push(Intent::Create {
            target: RecordRef::new(collection, id),
        })
    }

    pub fn remove(self, collection: Collection, id: impl Into<String>) -> Self {
        self.push(Intent::Remove {
            target: RecordRef::new(collection, id),
        })
    }

    pub fn set(
        self,
        collection: Collection,
        id: impl Into<String>,
        field: &str,
        value: Value,
    ) -> Self {
        self.push(Intent::Set {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            value,
        })
    }

    pub fn increment(self, collection: Collection, id: impl Into<String>, field: &str, n: u64) -> Self {
        self.push(Intent::Count {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            amount: n,
            decrement: false,
        })
    }

    pub fn decrement(self, collection: Collection, id: impl Into<String>, field: &str, n: u64) -> Self {
        self.push(Intent::Count {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            amount: n,
            decrement: true,
        })
    }

    pub fn insert_text(
        self,
        collection: Collection,
        id: impl Into<String>,
        field: &str,
        index: usize,
        text: &str,
    ) -> Self {
        self.push(Intent::InsertText {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            index,
            text: text.to_string(),
        })
    }

    pub fn delete_text(
        self,
        collection: Collection,
        id: impl Into<String>,
        field: &str,
        index: usize,
        count: usize,
    ) -> Self {
        self.push(Intent::DeleteText {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            index,
            count,
        })
    }

    pub fn set_text(self, collection: Collection, id: impl Into<String>, field: &str, text: &str) -> Self {
        self.push(Intent::SetText {
            target: RecordRef::new(collection, id),
            field: field.to_string(),
            text: text.to_string(),
        })
    }

    // Board

    pub fn create_board(self, title: &str, starts_at: i64, ends_at: i64) -> Self {
        self.create(Collection::Board, BOARD_ID)
            .set_text(Collection::Board, BOARD_ID, field::TITLE, title)
            .set(Collection::Board, BOARD_ID, field::STARTS_AT, Value::int(starts_at))
            .set(Collection::Board, BOARD_ID, field::ENDS_AT, Value::int(ends_at))
            .set(
                Collection::Board,
                BOARD_ID,
                field::SLOT_MINUTES,
                Value::int(SLOT_MINUTES),
            )
    }

    // Rooms

    pub fn add_room(self, id: &str, name: &str, capacity: i64, display_order: i64) -> Self {
        self.create(Collection::Rooms, id)
            .set_text(Collection::Rooms, id, field::NAME, name)
            .set(Collection::Rooms, id, field::CAPACITY, Value::int(capacity))
            .set(
                Collection::Rooms,
                id,
                field::DISPLAY_ORDER,
                Value::int(display_order),
            )
    }

    pub fn rename_room(self, id: &str, name: &str) -> Self {
        self.set_text(Collection::Rooms, id, field::NAME, name)
    }

    /// Remove a room, unplacing every session scheduled in it.
    pub fn remove_room(self, id: &str) -> Self {
        self.push(Intent::RemoveRoom { room: id.into() })
    }

    // Users

    pub fn join_user(self, id: &str, display_name: &str, color: &str, organizer: bool) -> Self {
        self.create(Collection::Users, id)
            .set_text(Collection::Users, id, field::DISPLAY_NAME, display_name)
            .set(Collection::Users, id, field::COLOR, Value::string(color))
            .set(Collection::Users, id, field::ORGANIZER, Value::bool(organizer))
    }

    // Sessions

    pub fn propose_session(self, id: &str, title: &str, proposer: &str) -> Self {
        let now = now_millis() as i64;
        self.create(Collection::Sessions, id)
            .set_text(Collection::Sessions, id, field::TITLE, title)
            .set(Collection::Sessions, id, field::PROPOSER, Value::string(proposer))
            .set(
                Collection::Sessions,
                id,
                field::STATE,
                Value::string(SessionState::Proposed.as_str()),
            )
            .set(Collection::Sessions, id, field::CREATED_AT, Value::int(now))
            .set(Collection::Sessions, id, field::UPDATED_AT, Value::int(now))
    }

    pub fn edit_session_title(self, id: &str, title: &str) -> Self {
        self.set_text(Collection::Sessions, id, field::TITLE, title)
            .touch_session(id)
    }

    pub fn edit_session_description(self, id: &str, description: &str) -> Self {
        self.set_text(Collection::Sessions, id, field::DESCRIPTION, description)
            .touch_session(id)
    }

    pub fn set_session_tags<I, S>(self, id: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(Collection::Sessions, id, field::TAGS, Value::strings(tags))
            .touch_session(id)
    }

    pub fn set_session_state(self, id: &str, state: SessionState) -> Self {
        self.push(state_intent(id, state)).touch_session(id)
    }

    /// Remove a session and its placement.
    pub fn remove_session(self, id: &str) -> Self {
        self.push(Intent::RemoveSession { session: id.into() })
    }

    fn touch_session(self, id: &str) -> Self {
        self.set(
            Collection::Sessions,
            id,
            field::UPDATED_AT,
            Value::int(now_millis() as i64),
        )
    }

    // Placements

    /// Place a session on the grid and mark it scheduled. `placed_at` is
    /// wall-clock millis; the most recent placement wins concurrent clashes.
    pub fn place_session(
        self,
        placement_id: &str,
        session: &str,
        slot: Slot,
        placed_by: &str,
        placed_at: u64,
    ) -> Self {
        self.create(Collection::Placements, placement_id)
            .set(
                Collection::Placements,
                placement_id,
                field::SESSION,
                Value::string(session),
            )
            .move_placement(placement_id, slot, placed_by, placed_at)
            .push(state_intent(session, SessionState::Scheduled))
    }

    pub fn move_placement(self, placement_id: &str, slot: Slot, placed_by: &str, placed_at: u64) -> Self {
        let id = placement_id;
        self.set(Collection::Placements, id, field::ROOM, Value::string(slot.room))
            .set(
                Collection::Placements,
                id,
                field::START_SLOT,
                Value::int(slot.start_slot),
            )
            .set(Collection::Placements, id, field::SPAN, Value::int(slot.span))
            .set(
                Collection::Placements,
                id,
                field::PLACED_BY,
                Value::string(placed_by),
            )
            .set(
                Collection::Placements,
                id,
                field::PLACED_AT,
                Value::int(placed_at as i64),
            )
    }

    /// Take a session off the grid; it goes back to `proposed`.
    pub fn unplace_session(self, session: &str) -> Self {
        self.push(Intent::UnplaceSession {
            session: session.into(),
        })
    }

    // Interest and comments

    /// No-op if the user already marked this session. Each live mark adds
    /// one to the session's interest, on top of its counter.
    pub fn mark_interest(self, session: &str, user: &str) -> Self {
        self.push(Intent::MarkInterest {
            session: session.into(),
            user: user.into(),
        })
    }

    pub fn clear_interest(self, session: &str, user: &str) -> Self {
        self.push(Intent::ClearInterest {
            session: session.into(),
            user: user.into(),
        })
    }

    pub fn add_comment(self, id: &str, session: &str, user: &str, text: &str) -> Self {
        self.create(Collection::Comments, id)
            .set(Collection::Comments, id, field::SESSION, Value::string(session))
            .set(Collection::Comments, id, field::USER, Value::string(user))
            .set_text(Collection::Comments, id, field::TEXT, text)
            .set(
                Collection::Comments,
                id,
                field::CREATED_AT,
                Value::int(now_millis() as i64),
            )
    }
}
