//! Field mutations and the changes that carry them
//!
//! A `Mutation` is already stamped when it leaves the replica that produced
//! it: it is the delta that the target field merges in. Applying the same
//! mutation twice therefore has no further effect.

use super::clock::{ActorId, Stamp};
use super::counter::Tally;
use super::horizon::SeqNum;
use super::schema::Collection;
use super::sequence::{ElementId, SeqElement};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar or list value stored in a register field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String elements of a list value; non-string elements are skipped.
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Identity of a change: author plus the author's sequence number.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    pub actor: ActorId,
    pub seq: SeqNum,
}

impl ChangeId {
    pub fn new(actor: ActorId, seq: SeqNum) -> Self {
        Self { actor, seq }
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.actor, self.seq)
    }
}

/// Address of one record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub collection: Collection,
    pub id: String,
}

impl RecordRef {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// One stamped field-level write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    /// Bring a record into existence.
    Create { target: RecordRef, stamp: Stamp },

    /// Remove a record from its table (its history is kept).
    Remove { target: RecordRef, stamp: Stamp },

    /// Last-writer-wins write to a register field.
    Set {
        target: RecordRef,
        field: String,
        value: Value,
        stamp: Stamp,
    },

    /// The author's absolute counter totals after the write.
    Count {
        target: RecordRef,
        field: String,
        totals: Tally,
        stamp: Stamp,
    },

    /// Elements inserted into a text field. Never empty.
    InsertText {
        target: RecordRef,
        field: String,
        elements: Vec<SeqElement<char>>,
    },

    /// Elements tombstoned in a text field.
    DeleteText {
        target: RecordRef,
        field: String,
        ids: Vec<ElementId>,
        stamp: Stamp,
    },
}

impl Mutation {
    pub fn target(&self) -> &RecordRef {
        match self {
            Mutation::Create { target, .. }
            | Mutation::Remove { target, .. }
            | Mutation::Set { target, .. }
            | Mutation::Count { target, .. }
            | Mutation::InsertText { target, .. }
            | Mutation::DeleteText { target, .. } => target,
        }
    }

    /// The newest stamp this mutation carries.
    pub fn stamp(&self) -> Stamp {
        match self {
            Mutation::Create { stamp, .. }
            | Mutation::Remove { stamp, .. }
            | Mutation::Set { stamp, .. }
            | Mutation::Count { stamp, .. }
            | Mutation::DeleteText { stamp, .. } => stamp.clone(),
            Mutation::InsertText { elements, .. } => elements
                .iter()
                .map(|e| e.id.clone())
                .max()
                .unwrap_or_else(Stamp::origin),
        }
    }
}

/// An atomic, causally-stamped batch of mutations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,

    /// Heads of the author's history when the change was made.
    pub parents: Vec<ChangeId>,

    /// Wall-clock millis at the author; informational only.
    pub timestamp: u64,

    pub mutations: Vec<Mutation>,
}

impl Change {
    pub fn author(&self) -> &ActorId {
        &self.id.actor
    }

    /// Highest Lamport counter used by any mutation.
    pub fn max_counter(&self) -> u64 {
        self.mutations
            .iter()
            .map(|m| m.stamp().counter)
            .max()
            .unwrap_or(0)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_text_stamp_is_newest_element() {
        let m = Mutation::InsertText {
            target: RecordRef::new(Collection::Sessions, "s1"),
            field: "title".into(),
            elements: vec![
                SeqElement {
                    id: Stamp::new(4, "A"),
                    anchor: None,
                    value: 'h',
                },
                SeqElement {
                    id: Stamp::new(5, "A"),
                    anchor: Some(Stamp::new(4, "A")),
                    value: 'i',
                },
            ],
        };
        assert_eq!(m.stamp(), Stamp::new(5, "A"));
        assert_eq!(m.target().id, "s1");
    }

    #[test]
    fn test_change_survives_cbor() {
        let change = Change {
            id: ChangeId::new("A".into(), 1),
            parents: vec![],
            timestamp: 100,
            mutations: vec![
                Mutation::Create {
                    target: RecordRef::new(Collection::Rooms, "r1"),
                    stamp: Stamp::new(1, "A"),
                },
                Mutation::Set {
                    target: RecordRef::new(Collection::Rooms, "r1"),
                    field: "capacity".into(),
                    value: Value::int(40),
                    stamp: Stamp::new(2, "A"),
                },
            ],
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&change, &mut buf).unwrap();
        let restored: Change = ciborium::from_reader(&buf[..]).unwrap();
        assert_eq!(restored, change);
        assert_eq!(restored.max_counter(), 2);
    }

    #[test]
    fn test_value_string_list() {
        let tags = Value::strings(["rust", "crdt"]);
        assert_eq!(tags.as_string_list(), vec!["rust", "crdt"]);
        assert!(Value::Null.as_string_list().is_empty());
    }
}
