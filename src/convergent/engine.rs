//! The change engine
//!
//! Owns one replica's view of the document: the materialized store, the
//! causal history that explains it, and the Lamport clock. Local edits are
//! committed through `commit`, remote ones folded in through `merge`.
//!
//! A local commit is staged against a copy of the store, so a batch that
//! fails validation halfway leaves nothing behind. Remote changes are applied
//! in an order consistent with their parents; ones whose parents are missing
//! wait in a buffer until the parents show up.

use super::builder::{ChangeBuilder, Intent};
use super::clock::{ActorId, LogicalClock};
use super::counter::Counter;
use super::document::{DocumentStore, Record};
use super::horizon::Horizon;
use super::operation::{now_millis, Change, ChangeId, Mutation, RecordRef, Value};
use super::resolver::{first_overlap, ConflictResolver, RemovedPlacement, Slotted};
use super::schema::{
    collection_spec, field, Collection, FieldKind, FieldSpec, SessionState, ValueType, MAX_SPAN,
};
use super::sequence::Sequence;
use super::state::BoardState;
use crate::error::{MergeError, ValidationError};
use std::collections::{BTreeMap, BTreeSet};

/// What a call to `merge` did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeReport {
    /// Newly applied changes, in application order.
    pub applied: Vec<ChangeId>,
    /// Changes that were already known or already buffered.
    pub skipped: usize,
    /// Placements the resolver took off the grid.
    pub unplaced: Vec<RemovedPlacement>,
    /// The local change recording those repairs, if any.
    pub repair: Option<Change>,
}

impl MergeReport {
    /// Whether the document changed.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }
}

pub struct ChangeEngine {
    clock: LogicalClock,
    store: DocumentStore,
    history: BTreeMap<ChangeId, Change>,
    /// Change ids in the order they were applied here (always causal).
    log: Vec<ChangeId>,
    horizon: Horizon,
    heads: BTreeSet<ChangeId>,
    pending: BTreeMap<ChangeId, Change>,
    resolver: ConflictResolver,
}

impl ChangeEngine {
    pub fn new(actor: ActorId) -> Self {
        Self {
            clock: LogicalClock::new(actor),
            store: DocumentStore::new(),
            history: BTreeMap::new(),
            log: Vec::new(),
            horizon: Horizon::new(),
            heads: BTreeSet::new(),
            pending: BTreeMap::new(),
            resolver: ConflictResolver::new(),
        }
    }

    /// Rebuild an engine by replaying a saved history.
    pub fn from_history(actor: ActorId, changes: Vec<Change>) -> Result<Self, MergeError> {
        let mut engine = Self::new(actor);
        engine.merge(changes)?;
        Ok(engine)
    }

    pub fn actor(&self) -> &ActorId {
        self.clock.actor()
    }

    /// Version summary: highest change seq held per actor.
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn history_len(&self) -> usize {
        self.log.len()
    }

    /// Buffered remote changes still waiting for parents.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Full history in causal order.
    pub fn history(&self) -> impl Iterator<Item = &Change> {
        self.log.iter().filter_map(|id| self.history.get(id))
    }

    /// Changes a peer with summary `theirs` has not seen, in causal order.
    pub fn changes_since(&self, theirs: &Horizon) -> Vec<Change> {
        self.history()
            .filter(|c| !theirs.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn state(&self) -> BoardState {
        BoardState::from_store(&self.store)
    }

    /// Validate, stamp, and apply a local batch. All or nothing.
    pub fn commit(&mut self, builder: ChangeBuilder) -> Result<Change, ValidationError> {
        if builder.is_empty() {
            return Err(ValidationError::EmptyChange);
        }
        let mut staging = Staging::new(&self.store, &self.clock);
        for intent in builder.into_intents() {
            staging.apply(intent)?;
        }
        staging.check_invariants()?;
        self.finish_commit(staging)
    }

    /// Commit resolver repairs. They are valid by construction, so only the
    /// per-mutation checks run.
    fn commit_repair(&mut self, builder: ChangeBuilder) -> Result<Change, ValidationError> {
        let mut staging = Staging::new(&self.store, &self.clock);
        for intent in builder.into_intents() {
            staging.apply(intent)?;
        }
        self.finish_commit(staging)
    }

    fn finish_commit(&mut self, staging: Staging) -> Result<Change, ValidationError> {
        if staging.mutations.is_empty() {
            return Err(ValidationError::EmptyChange);
        }
        let actor = self.clock.actor().clone();
        let change = Change {
            id: ChangeId::new(actor.clone(), self.horizon.next_seq(&actor)),
            parents: self.heads.iter().cloned().collect(),
            timestamp: now_millis(),
            mutations: staging.mutations,
        };
        self.store = staging.store;
        self.clock = staging.clock;
        log::debug!(
            "Committed {} ({} mutations)",
            change.id,
            change.mutations.len()
        );
        self.record(change.clone());
        Ok(change)
    }

    fn record(&mut self, change: Change) {
        for parent in &change.parents {
            self.heads.remove(parent);
        }
        self.heads.insert(change.id.clone());
        self.horizon.record(&change.id);
        self.log.push(change.id.clone());
        self.history.insert(change.id.clone(), change);
    }

    /// Fold in remote changes, then repair scheduling conflicts once.
    ///
    /// Already-known changes are skipped. Changes whose parents are missing
    /// are kept and applied by a later merge; if any remain after this one,
    /// the result is `MergeError::HistoryGap` naming the missing parents.
    pub fn merge(&mut self, changes: Vec<Change>) -> Result<MergeReport, MergeError> {
        let mut report = MergeReport::default();

        for change in changes {
            if self.history.contains_key(&change.id) || self.pending.contains_key(&change.id) {
                report.skipped += 1;
                continue;
            }
            self.pending.insert(change.id.clone(), change);
        }

        loop {
            let ready: Vec<ChangeId> = self
                .pending
                .values()
                .filter(|c| c.parents.iter().all(|p| self.history.contains_key(p)))
                .map(|c| c.id.clone())
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                if let Some(change) = self.pending.remove(&id) {
                    self.clock.observe(change.max_counter());
                    self.store.apply_change(&change);
                    self.record(change);
                    report.applied.push(id);
                }
            }
        }

        if report.changed() {
            let repair = self.resolver.resolve(&self.store);
            if !repair.is_empty() {
                match self.commit_repair(repair.to_builder()) {
                    Ok(change) => {
                        report.repair = Some(change);
                        report.unplaced = repair.removed;
                    }
                    Err(e) => log::warn!("Could not commit scheduling repair: {}", e),
                }
            }
            log::debug!(
                "Merged {} change(s), skipped {}, {} repair(s)",
                report.applied.len(),
                report.skipped,
                report.unplaced.len()
            );
        }

        if self.pending.is_empty() {
            return Ok(report);
        }

        let missing: BTreeSet<ChangeId> = self
            .pending
            .values()
            .flat_map(|c| c.parents.iter())
            .filter(|p| !self.history.contains_key(*p) && !self.pending.contains_key(*p))
            .cloned()
            .collect();
        log::warn!(
            "{} change(s) waiting on {} missing parent(s)",
            self.pending.len(),
            missing.len()
        );
        Err(MergeError::HistoryGap {
            missing: missing.into_iter().collect(),
            report,
        })
    }
}

/// A local batch being built on a scratch copy of the document.
struct Staging {
    store: DocumentStore,
    clock: LogicalClock,
    /// Records created by this batch; their immutable fields are writable.
    created: BTreeSet<RecordRef>,
    mutations: Vec<Mutation>,
}

impl Staging {
    fn new(store: &DocumentStore, clock: &LogicalClock) -> Self {
        Self {
            store: store.clone(),
            clock: clock.clone(),
            created: BTreeSet::new(),
            mutations: Vec::new(),
        }
    }

    fn push(&mut self, mutation: Mutation) {
        self.store.apply(&mutation);
        self.mutations.push(mutation);
    }

    fn live(&self, target: &RecordRef) -> Result<&Record, ValidationError> {
        self.store
            .record(target.collection, &target.id)
            .ok_or_else(|| ValidationError::UnknownRecord(target.clone()))
    }

    fn field_spec(
        &self,
        target: &RecordRef,
        name: &str,
        kind: FieldKind,
    ) -> Result<FieldSpec, ValidationError> {
        let spec = collection_spec(target.collection);
        let field_spec = spec
            .field(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownField {
                collection: target.collection,
                field: name.to_string(),
            })?;
        if field_spec.kind != kind {
            return Err(ValidationError::WrongFieldKind {
                field: name.to_string(),
                expected: kind,
            });
        }
        if field_spec.immutable && !self.created.contains(target) {
            return Err(ValidationError::ImmutableField {
                target: target.clone(),
                field: name.to_string(),
            });
        }
        Ok(field_spec)
    }

    fn apply(&mut self, intent: Intent) -> Result<(), ValidationError> {
        match intent {
            Intent::Create { target } => {
                let reused = match target.collection {
                    // Interest marks are keyed by (session, user) and may be
                    // marked again after being cleared.
                    Collection::Interests => self.store.contains(target.collection, &target.id),
                    _ => self.store.knows(target.collection, &target.id),
                };
                if reused {
                    return Err(ValidationError::DuplicateId(target));
                }
                let stamp = self.clock.tick();
                self.created.insert(target.clone());
                self.push(Mutation::Create { target, stamp });
            }

            Intent::Remove { target } => {
                if collection_spec(target.collection).append_only {
                    return Err(ValidationError::AppendOnly(target.collection));
                }
                self.live(&target)?;
                let stamp = self.clock.tick();
                self.push(Mutation::Remove { target, stamp });
            }

            Intent::Set {
                target,
                field: name,
                value,
            } => {
                self.live(&target)?;
                let spec = self.field_spec(&target, &name, FieldKind::Register)?;
                if !value_matches(spec.value_type, &value) {
                    return Err(ValidationError::TypeMismatch { field: name });
                }
                if target.collection == Collection::Sessions && name == field::STATE {
                    let state = value.as_str().unwrap_or_default();
                    if SessionState::parse(state).is_none() {
                        return Err(ValidationError::InvalidState(state.to_string()));
                    }
                }
                let stamp = self.clock.tick();
                self.push(Mutation::Set {
                    target,
                    field: name,
                    value,
                    stamp,
                });
            }

            Intent::Count {
                target,
                field: name,
                amount,
                decrement,
            } => {
                self.field_spec(&target, &name, FieldKind::Counter)?;
                let mut counter = self
                    .live(&target)?
                    .counter(&name)
                    .cloned()
                    .unwrap_or_else(Counter::new);
                if amount == 0 {
                    return Ok(());
                }
                let overflow = || ValidationError::CounterOverflow {
                    field: name.clone(),
                };
                if i64::try_from(amount).is_err() {
                    return Err(overflow());
                }
                let actor = self.clock.actor().clone();
                let totals = if decrement {
                    counter.decrement(&actor, amount)
                } else {
                    counter.increment(&actor, amount)
                }
                .ok_or_else(overflow)?;
                let stamp = self.clock.tick();
                self.push(Mutation::Count {
                    target,
                    field: name,
                    totals,
                    stamp,
                });
            }

            Intent::InsertText {
                target,
                field: name,
                index,
                text,
            } => {
                self.field_spec(&target, &name, FieldKind::Text)?;
                if text.is_empty() {
                    self.live(&target)?;
                    return Ok(());
                }
                let seq = self.text(&target, &name)?;
                let len = seq.len();
                let elements = seq
                    .prepare_insert(index, text.chars(), &mut self.clock)
                    .ok_or(ValidationError::TextIndexOutOfRange {
                        field: name.clone(),
                        index,
                        count: 0,
                        len,
                    })?;
                self.push(Mutation::InsertText {
                    target,
                    field: name,
                    elements,
                });
            }

            Intent::DeleteText {
                target,
                field: name,
                index,
                count,
            } => {
                self.field_spec(&target, &name, FieldKind::Text)?;
                let seq = self.text(&target, &name)?;
                let len = seq.len();
                let ids = seq
                    .prepare_delete(index, count)
                    .ok_or(ValidationError::TextIndexOutOfRange {
                        field: name.clone(),
                        index,
                        count,
                        len,
                    })?;
                if ids.is_empty() {
                    return Ok(());
                }
                let stamp = self.clock.tick();
                self.push(Mutation::DeleteText {
                    target,
                    field: name,
                    ids,
                    stamp,
                });
            }

            Intent::SetText {
                target,
                field: name,
                text,
            } => {
                self.field_spec(&target, &name, FieldKind::Text)?;
                let current: Vec<char> = self.text(&target, &name)?.iter().copied().collect();
                let wanted: Vec<char> = text.chars().collect();

                let prefix = current
                    .iter()
                    .zip(&wanted)
                    .take_while(|(a, b)| a == b)
                    .count();
                let suffix = current[prefix..]
                    .iter()
                    .rev()
                    .zip(wanted[prefix..].iter().rev())
                    .take_while(|(a, b)| a == b)
                    .count();

                self.apply(Intent::DeleteText {
                    target: target.clone(),
                    field: name.clone(),
                    index: prefix,
                    count: current.len() - prefix - suffix,
                })?;
                self.apply(Intent::InsertText {
                    target,
                    field: name,
                    index: prefix,
                    text: wanted[prefix..wanted.len() - suffix].iter().collect(),
                })?;
            }

            domain => {
                for expanded in domain.expand(&self.store) {
                    self.apply(expanded)?;
                }
            }
        }
        Ok(())
    }

    /// Current contents of a text field (empty if never written).
    fn text(&self, target: &RecordRef, name: &str) -> Result<Sequence<char>, ValidationError> {
        Ok(self
            .live(target)?
            .sequence(name)
            .cloned()
            .unwrap_or_default())
    }

    /// Scheduling rules that span records. Merged states always satisfy
    /// them, so any violation was introduced by this batch.
    fn check_invariants(&self) -> Result<(), ValidationError> {
        let mut by_session: BTreeMap<String, String> = BTreeMap::new();
        let mut by_room: BTreeMap<String, Vec<Slotted>> = BTreeMap::new();

        for (id, record) in self.store.records(Collection::Placements) {
            let target = RecordRef::new(Collection::Placements, id.clone());
            for (name, collection) in [
                (field::SESSION, Collection::Sessions),
                (field::ROOM, Collection::Rooms),
            ] {
                let referenced = record.str(name).ok_or_else(|| ValidationError::TypeMismatch {
                    field: name.to_string(),
                })?;
                if !self.store.contains(collection, referenced) {
                    return Err(ValidationError::DanglingReference {
                        target: target.clone(),
                        field: name.to_string(),
                        missing: RecordRef::new(collection, referenced),
                    });
                }
            }
            let span = record.int(field::SPAN).unwrap_or(0);
            if !(1..=MAX_SPAN).contains(&span) {
                return Err(ValidationError::InvalidSpan(span));
            }
            let start = record
                .int(field::START_SLOT)
                .ok_or_else(|| ValidationError::TypeMismatch {
                    field: field::START_SLOT.to_string(),
                })?;
            if start < 0 {
                return Err(ValidationError::NegativeSlot(start));
            }

            let slotted = Slotted::read(id, record);
            if by_session
                .insert(slotted.session.clone(), slotted.id.clone())
                .is_some()
            {
                return Err(ValidationError::AlreadyPlaced {
                    session: slotted.session,
                });
            }
            by_room.entry(slotted.room.clone()).or_default().push(slotted);
        }

        for (room, mut placements) in by_room {
            placements.sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
            if let Some(i) = first_overlap(&placements) {
                let changed = |p: &Slotted| {
                    self.mutations.iter().any(|m| {
                        m.target().collection == Collection::Placements && m.target().id == p.id
                    })
                };
                let other = if changed(&placements[i + 1]) {
                    &placements[i]
                } else {
                    &placements[i + 1]
                };
                return Err(ValidationError::Overlap {
                    room,
                    other: other.id.clone(),
                });
            }
        }

        for target in &self.created {
            if !matches!(
                target.collection,
                Collection::Comments | Collection::Interests
            ) {
                continue;
            }
            let Some(record) = self.store.record(target.collection, &target.id) else {
                continue;
            };
            let session = record.str(field::SESSION).unwrap_or_default();
            if !self.store.contains(Collection::Sessions, session) {
                return Err(ValidationError::DanglingReference {
                    target: target.clone(),
                    field: field::SESSION.to_string(),
                    missing: RecordRef::new(Collection::Sessions, session),
                });
            }
        }
        Ok(())
    }
}

fn value_matches(expected: Option<ValueType>, value: &Value) -> bool {
    match (expected, value) {
        (_, Value::Null) => true,
        (Some(ValueType::String), Value::String(_)) => true,
        (Some(ValueType::Int), Value::Int(_)) => true,
        (Some(ValueType::Bool), Value::Bool(_)) => true,
        (Some(ValueType::StringList), Value::List(items)) => {
            items.iter().all(|v| matches!(v, Value::String(_)))
        }
        _ => false,
    }
}
