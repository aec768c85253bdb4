//! The document store
//!
//! Holds one `Table<Record>` per collection. Records are maps of named CRDT
//! fields; which names and kinds are allowed is decided by the schema when a
//! change is built, not here. Applying a mutation is infallible and
//! idempotent: each mutation merges a stamped delta into its field.

use super::counter::Counter;
use super::operation::{Change, Mutation, Value};
use super::register::Register;
use super::schema::{Collection, FieldKind};
use super::sequence::Sequence;
use super::table::{Entry, Table};
use super::Mergeable;
use std::collections::BTreeMap;

/// A single field of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Register(Register<Value>),
    Counter(Counter),
    Text(Sequence<char>),
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Register => Field::Register(Register::default()),
            FieldKind::Counter => Field::Counter(Counter::new()),
            FieldKind::Text => Field::Text(Sequence::new()),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Register(_) => FieldKind::Register,
            Field::Counter(_) => FieldKind::Counter,
            Field::Text(_) => FieldKind::Text,
        }
    }
}

impl Mergeable for Field {
    fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Field::Register(a), Field::Register(b)) => a.merge(b),
            (Field::Counter(a), Field::Counter(b)) => a.merge(b),
            (Field::Text(a), Field::Text(b)) => a.merge(b),
            // Kinds are fixed by the schema; a mismatch is left alone.
            _ => {}
        }
    }
}

/// A record: named fields, created lazily on first write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Field>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Field for writing, created with `kind` if missing.
    pub fn field_mut(&mut self, name: &str, kind: FieldKind) -> &mut Field {
        self.fields
            .entry(name.to_string())
            .or_insert_with(|| Field::new(kind))
    }

    /// Register value, or `Value::Null` if never written.
    pub fn value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        match self.fields.get(name) {
            Some(Field::Register(r)) => r.get(),
            _ => &NULL,
        }
    }

    pub fn register(&self, name: &str) -> Option<&Register<Value>> {
        match self.fields.get(name) {
            Some(Field::Register(r)) => Some(r),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.value(name).as_str()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.value(name).as_int()
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.value(name).as_bool()
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        match self.fields.get(name) {
            Some(Field::Counter(c)) => Some(c),
            _ => None,
        }
    }

    pub fn sequence(&self, name: &str) -> Option<&Sequence<char>> {
        match self.fields.get(name) {
            Some(Field::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Visible text of a text field (empty if never written).
    pub fn text(&self, name: &str) -> String {
        self.sequence(name).map(|s| s.text()).unwrap_or_default()
    }
}

impl Mergeable for Record {
    fn merge(&mut self, other: &Self) {
        for (name, theirs) in &other.fields {
            match self.fields.get_mut(name) {
                Some(ours) => ours.merge(theirs),
                None => {
                    self.fields.insert(name.clone(), theirs.clone());
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentStore {
    tables: BTreeMap<Collection, Table<Record>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, collection: Collection) -> Option<&Table<Record>> {
        self.tables.get(&collection)
    }

    fn table_mut(&mut self, collection: Collection) -> &mut Table<Record> {
        self.tables.entry(collection).or_default()
    }

    /// A live record.
    pub fn record(&self, collection: Collection, id: &str) -> Option<&Record> {
        self.tables.get(&collection)?.get(id)
    }

    /// Live or removed entry, with its existence stamps.
    pub fn entry(&self, collection: Collection, id: &str) -> Option<&Entry<Record>> {
        self.tables.get(&collection)?.entry(id)
    }

    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.record(collection, id).is_some()
    }

    /// The id has been used at some point, even if since removed.
    pub fn knows(&self, collection: Collection, id: &str) -> bool {
        self.tables
            .get(&collection)
            .map(|t| t.knows(id))
            .unwrap_or(false)
    }

    /// Live records of a collection, in id order.
    pub fn records(&self, collection: Collection) -> impl Iterator<Item = (&String, &Record)> {
        self.tables
            .get(&collection)
            .into_iter()
            .flat_map(|t| t.iter())
    }

    pub fn apply_change(&mut self, change: &Change) {
        for mutation in &change.mutations {
            self.apply(mutation);
        }
    }

    pub fn apply(&mut self, mutation: &Mutation) {
        let target = mutation.target();
        let table = self.table_mut(target.collection);

        match mutation {
            Mutation::Create { stamp, .. } => {
                table.insert(target.id.clone(), Record::default(), stamp.clone());
            }
            Mutation::Remove { stamp, .. } => {
                table.remove(&target.id, stamp.clone());
            }
            Mutation::Set {
                field, value, stamp, ..
            } => {
                let record = table.touch(&target.id, stamp);
                if let Field::Register(r) = record.field_mut(field, FieldKind::Register) {
                    r.assign(value.clone(), stamp.clone());
                }
            }
            Mutation::Count {
                field,
                totals,
                stamp,
                ..
            } => {
                let record = table.touch(&target.id, stamp);
                if let Field::Counter(c) = record.field_mut(field, FieldKind::Counter) {
                    c.absorb(&stamp.actor, *totals);
                }
            }
            Mutation::InsertText {
                field, elements, ..
            } => {
                let stamp = mutation.stamp();
                let record = table.touch(&target.id, &stamp);
                if let Field::Text(seq) = record.field_mut(field, FieldKind::Text) {
                    for element in elements {
                        seq.integrate(element.clone());
                    }
                }
            }
            Mutation::DeleteText {
                field, ids, stamp, ..
            } => {
                let record = table.touch(&target.id, stamp);
                if let Field::Text(seq) = record.field_mut(field, FieldKind::Text) {
                    seq.remove(ids);
                }
            }
        }
    }
}

impl Mergeable for DocumentStore {
    fn merge(&mut self, other: &Self) {
        for (collection, theirs) in &other.tables {
            self.table_mut(*collection).merge(theirs);
        }
    }
}
