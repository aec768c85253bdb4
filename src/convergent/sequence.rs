//! Replicated sequence (used for text fields)
//!
//! Each element is identified by the stamp of the write that inserted it and
//! remembers the element it was inserted after (its anchor). The visible order
//! is a depth-first walk of the anchor tree, with siblings under the same
//! anchor visited newest-stamp first. Deletions only set a tombstone flag so
//! that later inserts anchored on a deleted element still find their place.
//!
//! Concurrent inserts at the same position both survive: they become siblings
//! under the same anchor and are ordered by stamp (counter, then actor id).

use super::clock::{LogicalClock, Stamp};
use super::Mergeable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element ids are insertion stamps.
pub type ElementId = Stamp;

/// Wire form of a single inserted element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqElement<T> {
    pub id: ElementId,
    /// `None` means "at the start".
    pub anchor: Option<ElementId>,
    pub value: T,
}

#[derive(Clone, Debug, PartialEq)]
struct Node<T> {
    anchor: Option<ElementId>,
    value: T,
    removed: bool,
}

#[derive(Clone, Debug)]
pub struct Sequence<T> {
    nodes: BTreeMap<ElementId, Node<T>>,
    /// anchor -> children, sorted newest first. The start sentinel is keyed
    /// by `Stamp::origin()`.
    children: BTreeMap<ElementId, Vec<ElementId>>,
    visible: usize,
    max_counter: u64,
}

impl<T> Default for Sequence<T> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            children: BTreeMap::new(),
            visible: 0,
            max_counter: 0,
        }
    }
}

impl<T: PartialEq> PartialEq for Sequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl<T: Clone> Sequence<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visible (non-tombstoned) elements.
    pub fn len(&self) -> usize {
        self.visible
    }

    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }

    /// Visible values in document order. The iterator borrows the sequence
    /// and can be cloned to restart from the same point.
    pub fn iter(&self) -> Iter<'_, T> {
        let origin = Stamp::origin();
        let mut stack = Vec::new();
        if let Some(roots) = self.children.get(&origin) {
            stack.push(roots.iter());
        }
        Iter { seq: self, stack }
    }

    /// Id of the element currently at a visible position.
    pub fn id_at(&self, index: usize) -> Option<&ElementId> {
        self.iter().ids().nth(index)
    }

    /// Build the elements for inserting `items` before the visible position
    /// `index`, without applying them. `None` if `index > len()`.
    pub fn prepare_insert(
        &self,
        index: usize,
        items: impl IntoIterator<Item = T>,
        clock: &mut LogicalClock,
    ) -> Option<Vec<SeqElement<T>>> {
        if index > self.visible {
            return None;
        }
        let mut anchor = if index == 0 {
            None
        } else {
            Some(self.id_at(index - 1)?.clone())
        };

        clock.observe(self.max_counter);
        let mut elements = Vec::new();
        for value in items {
            let id = clock.tick();
            elements.push(SeqElement {
                id: id.clone(),
                anchor: anchor.replace(id),
                value,
            });
        }
        Some(elements)
    }

    /// Ids of `count` visible elements starting at `index`. `None` if the
    /// range runs past the end.
    pub fn prepare_delete(&self, index: usize, count: usize) -> Option<Vec<ElementId>> {
        if index.checked_add(count).map_or(true, |end| end > self.visible) {
            return None;
        }
        Some(self.iter().ids().skip(index).take(count).cloned().collect())
    }

    pub fn insert_at(
        &mut self,
        index: usize,
        items: impl IntoIterator<Item = T>,
        clock: &mut LogicalClock,
    ) -> Option<Vec<SeqElement<T>>> {
        let elements = self.prepare_insert(index, items, clock)?;
        for element in &elements {
            self.integrate(element.clone());
        }
        Some(elements)
    }

    pub fn delete_at(&mut self, index: usize, count: usize) -> Option<Vec<ElementId>> {
        let ids = self.prepare_delete(index, count)?;
        self.remove(&ids);
        Some(ids)
    }

    /// Add an element. Already-known ids are ignored.
    pub fn integrate(&mut self, element: SeqElement<T>) {
        self.integrate_node(element.id, element.anchor, element.value, false);
    }

    /// Tombstone elements by id.
    pub fn remove(&mut self, ids: &[ElementId]) {
        for id in ids {
            if let Some(node) = self.nodes.get_mut(id) {
                if !node.removed {
                    node.removed = true;
                    self.visible -= 1;
                }
            }
        }
    }

    fn integrate_node(&mut self, id: ElementId, anchor: Option<ElementId>, value: T, removed: bool) {
        if self.nodes.contains_key(&id) {
            return;
        }
        self.max_counter = self.max_counter.max(id.counter);

        let key = anchor.clone().unwrap_or_else(Stamp::origin);
        let siblings = self.children.entry(key).or_default();
        // Newest first
        let pos = siblings
            .binary_search_by(|other| id.cmp(other))
            .unwrap_or_else(|p| p);
        siblings.insert(pos, id.clone());

        if !removed {
            self.visible += 1;
        }
        self.nodes.insert(
            id,
            Node {
                anchor,
                value,
                removed,
            },
        );
    }
}

impl Sequence<char> {
    pub fn text(&self) -> String {
        self.iter().collect()
    }
}

impl<T: Clone> Mergeable for Sequence<T> {
    fn merge(&mut self, other: &Self) {
        for (id, node) in &other.nodes {
            if self.nodes.contains_key(id) {
                if node.removed {
                    self.remove(std::slice::from_ref(id));
                }
            } else {
                self.integrate_node(id.clone(), node.anchor.clone(), node.value.clone(), node.removed);
            }
        }
    }
}

/// Depth-first walk over visible elements.
#[derive(Clone)]
pub struct Iter<'a, T> {
    seq: &'a Sequence<T>,
    stack: Vec<std::slice::Iter<'a, ElementId>>,
}

impl<'a, T> Iter<'a, T> {
    /// Yield element ids instead of values.
    pub fn ids(self) -> impl Iterator<Item = &'a ElementId> {
        IdIter { inner: self }
    }

    fn next_entry(&mut self) -> Option<(&'a ElementId, &'a T)> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(id) => {
                    if let Some(kids) = self.seq.children.get(id) {
                        self.stack.push(kids.iter());
                    }
                    if let Some(node) = self.seq.nodes.get(id) {
                        if !node.removed {
                            return Some((id, &node.value));
                        }
                    }
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|(_, v)| v)
    }
}

struct IdIter<'a, T> {
    inner: Iter<'a, T>,
}

impl<'a, T> Iterator for IdIter<'a, T> {
    type Item = &'a ElementId;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_entry().map(|(id, _)| id)
    }
}
