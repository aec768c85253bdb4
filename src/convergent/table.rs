//! Unordered table of keyed records
//!
//! Removing a record does not erase it: the entry keeps its fields and the
//! stamp of the removal, so that changes from replicas that had not yet seen
//! the removal still merge correctly. Existence is last-writer-wins between
//! the newest write that touched the record and the newest removal.

use super::clock::Stamp;
use super::Mergeable;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct Entry<R> {
    record: R,
    touched: Stamp,
    removed: Stamp,
}

impl<R> Entry<R> {
    /// Live iff touched after the last removal.
    pub fn exists(&self) -> bool {
        self.touched > self.removed
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    /// Newest stamp of a create or field write.
    pub fn touched(&self) -> &Stamp {
        &self.touched
    }

    /// Newest removal stamp (`Stamp::origin()` if never removed).
    pub fn removed(&self) -> &Stamp {
        &self.removed
    }
}

impl<R: Default> Default for Entry<R> {
    fn default() -> Self {
        Self {
            record: R::default(),
            touched: Stamp::origin(),
            removed: Stamp::origin(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table<R> {
    entries: BTreeMap<String, Entry<R>>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<R: Mergeable + Default + Clone> Table<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or re-create) a record.
    pub fn insert(&mut self, id: impl Into<String>, record: R, stamp: Stamp) {
        let entry = self.entries.entry(id.into()).or_default();
        entry.record.merge(&record);
        if stamp > entry.touched {
            entry.touched = stamp;
        }
    }

    /// Record a write against `id` and hand back its record for mutation.
    pub fn touch(&mut self, id: &str, stamp: &Stamp) -> &mut R {
        let entry = self.entries.entry(id.to_string()).or_default();
        if *stamp > entry.touched {
            entry.touched = stamp.clone();
        }
        &mut entry.record
    }

    pub fn remove(&mut self, id: &str, stamp: Stamp) {
        let entry = self.entries.entry(id.to_string()).or_default();
        if stamp > entry.removed {
            entry.removed = stamp;
        }
    }

    /// A live record.
    pub fn get(&self, id: &str) -> Option<&R> {
        self.entries
            .get(id)
            .filter(|e| e.exists())
            .map(|e| &e.record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Whether the id was ever used, live or not.
    pub fn knows(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<&Entry<R>> {
        self.entries.get(id)
    }

    /// Live records in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &R)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.exists())
            .map(|(id, e)| (id, &e.record))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Mergeable + Default + Clone> Mergeable for Table<R> {
    fn merge(&mut self, other: &Self) {
        for (id, theirs) in &other.entries {
            let ours = self.entries.entry(id.clone()).or_default();
            ours.record.merge(&theirs.record);
            if theirs.touched > ours.touched {
                ours.touched = theirs.touched.clone();
            }
            if theirs.removed > ours.removed {
                ours.removed = theirs.removed.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergent::register::Register;

    fn reg(v: i64, counter: u64, actor: &str) -> Register<i64> {
        Register::new(v, Stamp::new(counter, actor))
    }

    #[test]
    fn test_insert_remove_lifecycle() {
        let mut t: Table<Register<i64>> = Table::new();
        t.insert("r1", reg(1, 1, "A"), Stamp::new(1, "A"));
        assert!(t.contains("r1"));

        t.remove("r1", Stamp::new(2, "A"));
        assert!(!t.contains("r1"));
        assert!(t.knows("r1"));
        assert!(t.is_empty());
    }

    #[test]
    fn test_concurrent_edit_after_delete_wins_when_later() {
        let mut base: Table<Register<i64>> = Table::new();
        base.insert("r1", reg(1, 1, "A"), Stamp::new(1, "A"));

        let mut deleter = base.clone();
        deleter.remove("r1", Stamp::new(2, "A"));

        let mut editor = base.clone();
        editor.touch("r1", &Stamp::new(3, "B")).assign(9, Stamp::new(3, "B"));

        let mut ab = deleter.clone();
        ab.merge(&editor);
        let mut ba = editor.clone();
        ba.merge(&deleter);

        assert_eq!(ab, ba);
        assert_eq!(ab.get("r1").map(|r| *r.get()), Some(9));
    }

    #[test]
    fn test_delete_wins_over_older_concurrent_edit() {
        let mut base: Table<Register<i64>> = Table::new();
        base.insert("r1", reg(1, 1, "A"), Stamp::new(1, "A"));

        let mut deleter = base.clone();
        deleter.remove("r1", Stamp::new(5, "A"));

        let mut editor = base;
        editor.touch("r1", &Stamp::new(2, "B")).assign(9, Stamp::new(2, "B"));

        deleter.merge(&editor);
        assert!(!deleter.contains("r1"));
    }
}
