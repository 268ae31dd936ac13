//! The stateful core of a relation.
//!
//! A [`RelationState`] holds the currently loaded endpoints of one relation
//! edge plus four pending-change buffers. Setters only diff and buffer;
//! [`RelationState::save`] turns the buffers into writes and
//! [`RelationState::reload`] re-derives the endpoints from storage. Both
//! work on a copy and only replace `self` once the store has answered, so
//! a failed or cancelled call leaves the state exactly as it was.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use sqlrel_core::{EntityType, Error, Query, Record, RecordStore, Result, try_outcome};

use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::fetch::ReloadFetcher;
use crate::idlist;
use crate::reconcile::SaveReconciler;
use crate::RelationConfig;

/// A secondary value as assigned or read: one record for scalar kinds,
/// a set of records for collection kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Secondary {
    One(Record),
    Many(Vec<Record>),
}

impl Secondary {
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Secondary::One(record) => vec![record],
            Secondary::Many(records) => records,
        }
    }

    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Secondary::One(record) => Some(record),
            Secondary::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Secondary::One(_) => None,
            Secondary::Many(records) => Some(records),
        }
    }
}

impl From<Record> for Secondary {
    fn from(record: Record) -> Self {
        Secondary::One(record)
    }
}

impl From<Vec<Record>> for Secondary {
    fn from(records: Vec<Record>) -> Self {
        Secondary::Many(records)
    }
}

fn position(list: &[Record], record: &Record) -> Option<usize> {
    list.iter().position(|r| r.same_entity(record))
}

fn dedup(records: Vec<Record>) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::with_capacity(records.len());
    for record in records {
        if position(&out, &record).is_none() {
            out.push(record);
        }
    }
    out
}

fn check_type(expected: &EntityType, record: &Record) -> Result<()> {
    if record.is(expected) {
        Ok(())
    } else {
        Err(Error::wrong_model_type(expected.name, record.entity().name))
    }
}

/// Loaded endpoints and pending changes for one relation edge.
///
/// The secondary is stored as a list for every kind; scalar kinds hold at
/// most one element. `secondary_to_add` and `secondary_to_remove` never
/// share a record, and for scalar kinds `secondary_to_add` is either empty
/// or equal to the current secondary. `stored` remembers which secondaries
/// were linked in storage as of the last reload or save, so unassigning one
/// of them always queues a removal.
#[derive(Debug, Clone)]
pub struct RelationState {
    pub(crate) descriptor: Arc<RelationDescriptor>,
    pub(crate) config: RelationConfig,
    pub(crate) primary: Option<Record>,
    pub(crate) secondary: Option<Vec<Record>>,
    pub(crate) primary_to_add: Option<Record>,
    pub(crate) primary_to_remove: Option<Record>,
    pub(crate) secondary_to_add: Vec<Record>,
    pub(crate) secondary_to_remove: Vec<Record>,
    pub(crate) stored: Vec<Record>,
    pub(crate) hydrated: bool,
}

impl RelationState {
    pub fn new(descriptor: Arc<RelationDescriptor>) -> Self {
        Self {
            descriptor,
            config: RelationConfig::default(),
            primary: None,
            secondary: None,
            primary_to_add: None,
            primary_to_remove: None,
            secondary_to_add: Vec::new(),
            secondary_to_remove: Vec::new(),
            stored: Vec::new(),
            hydrated: false,
        }
    }

    pub fn with_config(mut self, config: RelationConfig) -> Self {
        self.config = config;
        self
    }

    /// A state anchored on `primary`, with nothing pending.
    pub fn for_primary(descriptor: Arc<RelationDescriptor>, primary: Record) -> Result<Self> {
        check_type(descriptor.primary(), &primary)?;
        let mut state = Self::new(descriptor);
        state.primary = Some(primary);
        Ok(state)
    }

    pub fn descriptor(&self) -> &Arc<RelationDescriptor> {
        &self.descriptor
    }

    pub fn config(&self) -> RelationConfig {
        self.config
    }

    pub fn kind(&self) -> RelationKind {
        self.descriptor.kind()
    }

    pub fn primary(&self) -> Option<&Record> {
        self.primary.as_ref()
    }

    /// The loaded secondary, shaped by the relation's multiplicity.
    pub fn secondary(&self) -> Option<Secondary> {
        let records = self.secondary.as_ref()?;
        if self.kind().is_collection() {
            Some(Secondary::Many(records.clone()))
        } else {
            records.first().cloned().map(Secondary::One)
        }
    }

    /// The loaded secondary records; empty when nothing is loaded.
    pub fn secondary_records(&self) -> &[Record] {
        self.secondary.as_deref().unwrap_or(&[])
    }

    pub fn primary_to_add(&self) -> Option<&Record> {
        self.primary_to_add.as_ref()
    }

    pub fn primary_to_remove(&self) -> Option<&Record> {
        self.primary_to_remove.as_ref()
    }

    pub fn secondary_to_add(&self) -> &[Record] {
        &self.secondary_to_add
    }

    pub fn secondary_to_remove(&self) -> &[Record] {
        &self.secondary_to_remove
    }

    /// Whether any pending buffer is populated.
    pub fn has_pending(&self) -> bool {
        self.primary_to_add.is_some()
            || self.primary_to_remove.is_some()
            || !self.secondary_to_add.is_empty()
            || !self.secondary_to_remove.is_empty()
    }

    /// Whether the state was loaded from storage or assigned since creation.
    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    /// Force the next lazy read to reload. A state holding unsaved changes
    /// is left alone, since a reload would discard them. Returns whether the
    /// state was marked.
    pub(crate) fn mark_stale(&mut self) -> bool {
        if self.has_pending() {
            return false;
        }
        self.hydrated = false;
        true
    }

    pub(crate) fn clear_pending(&mut self) {
        self.primary_to_add = None;
        self.primary_to_remove = None;
        self.secondary_to_add.clear();
        self.secondary_to_remove.clear();
    }

    /// Replace the primary. Never performs I/O.
    ///
    /// Replacing a persisted primary with a different entity queues the old
    /// one in `primary_to_remove` (keeping the first displaced primary if
    /// several replacements happen before a save); assigning back the
    /// displaced primary cancels the pending replacement.
    pub fn set_primary(&mut self, primary: Option<Record>) -> Result<()> {
        if let Some(new) = &primary {
            check_type(self.descriptor.primary(), new)?;
        }
        let old = self.primary.take();
        match (&old, &primary) {
            (_, Some(new))
                if self
                    .primary_to_remove
                    .as_ref()
                    .is_some_and(|removed| removed.same_entity(new)) =>
            {
                self.primary_to_remove = None;
                self.primary_to_add = None;
            }
            (Some(old), Some(new)) if !old.same_entity(new) => {
                if self.primary_to_remove.is_none() && old.has_id() {
                    self.primary_to_remove = Some(old.clone());
                }
                self.primary_to_add = Some(new.clone());
            }
            (Some(_), Some(_)) => {}
            (Some(old), None) => {
                if self.primary_to_remove.is_none() && old.has_id() {
                    self.primary_to_remove = Some(old.clone());
                }
                self.primary_to_add = None;
            }
            (None, Some(new)) => {
                if self.primary_to_remove.is_some() {
                    self.primary_to_add = Some(new.clone());
                }
            }
            (None, None) => {}
        }
        tracing::debug!(
            relation = %self.descriptor.id(),
            replacing = self.primary_to_remove.is_some(),
            "Primary assigned"
        );
        self.primary = primary;
        Ok(())
    }

    /// Assign the secondary, diffing it against the loaded value.
    ///
    /// Scalar kinds take `Secondary::One`, collection kinds
    /// `Secondary::Many` (duplicates are dropped, first occurrence wins);
    /// `None` clears the relation. Records added here are queued for
    /// linking, records dropped are queued for unlinking unless they were
    /// only ever pending addition, and re-adding a record that is pending
    /// removal cancels the removal.
    pub fn set_secondary(&mut self, secondary: Option<Secondary>) -> Result<()> {
        let kind = self.kind();
        let new = match secondary {
            None => None,
            Some(Secondary::One(record)) if !kind.is_collection() => Some(vec![record]),
            Some(Secondary::Many(records)) if kind.is_collection() => Some(dedup(records)),
            Some(Secondary::One(_)) => {
                return Err(Error::wrong_model_type(
                    &format!("collection of {}", self.descriptor.secondary().name),
                    "single record",
                ));
            }
            Some(Secondary::Many(_)) => {
                return Err(Error::wrong_model_type(
                    self.descriptor.secondary().name,
                    "collection",
                ));
            }
        };
        for record in new.iter().flatten() {
            check_type(self.descriptor.secondary(), record)?;
        }

        let old = self.secondary.take().unwrap_or_default();
        let incoming: &[Record] = new.as_deref().unwrap_or(&[]);

        for item in &old {
            if position(incoming, item).is_some() {
                continue;
            }
            if let Some(i) = position(&self.secondary_to_add, item) {
                self.secondary_to_add.remove(i);
                if position(&self.stored, item).is_none() {
                    continue;
                }
            }
            if position(&self.secondary_to_remove, item).is_none() {
                self.secondary_to_remove.push(item.clone());
            }
        }
        for item in incoming {
            if let Some(i) = position(&self.secondary_to_remove, item) {
                self.secondary_to_remove.remove(i);
            } else if position(&old, item).is_none() && position(&self.secondary_to_add, item).is_none()
            {
                self.secondary_to_add.push(item.clone());
            }
        }
        if !kind.is_collection() {
            self.secondary_to_add = incoming.to_vec();
        }

        tracing::trace!(
            relation = %self.descriptor.id(),
            to_add = self.secondary_to_add.len(),
            to_remove = self.secondary_to_remove.len(),
            "Secondary assigned"
        );
        self.secondary = new;
        self.hydrated = true;
        Ok(())
    }

    /// Convenience for scalar kinds.
    pub fn set_secondary_one(&mut self, record: Option<Record>) -> Result<()> {
        self.set_secondary(record.map(Secondary::One))
    }

    /// Convenience for collection kinds.
    pub fn set_secondary_many(&mut self, records: Vec<Record>) -> Result<()> {
        self.set_secondary(Some(Secondary::Many(records)))
    }

    /// Whether reassigning the primary now would leave a removal that
    /// should be flushed first.
    pub fn needs_flush_before_reassign(&self) -> bool {
        (self.primary.is_some() && !self.secondary_to_remove.is_empty())
            || (self.primary_to_remove.is_some() && self.secondary.is_some())
    }

    /// Save pending changes if [`needs_flush_before_reassign`] says so.
    /// Returns whether a save ran.
    ///
    /// [`needs_flush_before_reassign`]: RelationState::needs_flush_before_reassign
    pub async fn flush_before_reassign<S: RecordStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<bool, Error> {
        if !self.needs_flush_before_reassign() {
            return Outcome::Ok(false);
        }
        self.save(cx, store).await.map(|()| true)
    }

    fn check_complete(&self) -> Result<()> {
        let primary_side =
            self.primary.is_some() || self.primary_to_add.is_some() || self.primary_to_remove.is_some();
        let secondary_side = self.secondary.is_some()
            || !self.secondary_to_add.is_empty()
            || !self.secondary_to_remove.is_empty();
        if primary_side && secondary_side {
            Ok(())
        } else {
            Err(Error::incomplete_relation(format!(
                "cannot save incomplete relation {}: primary {}, secondary {}",
                self.descriptor.id(),
                if primary_side { "set" } else { "missing" },
                if secondary_side { "set" } else { "missing" },
            )))
        }
    }

    /// Reconcile pending changes into writes.
    ///
    /// With `atomic_save` enabled and a transactional store, all writes of
    /// one call share a transaction that is rolled back on any failure.
    /// Buffers are cleared only after every write succeeded.
    #[tracing::instrument(level = "debug", skip(self, cx, store), fields(relation = %self.descriptor.id()))]
    pub async fn save<S: RecordStore>(&mut self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        if let Err(e) = self.check_complete() {
            return Outcome::Err(e);
        }
        let descriptor = Arc::clone(&self.descriptor);
        let atomic = self.config.atomic_save && store.supports_transactions();
        if atomic {
            try_outcome!(store.begin(cx).await);
        }

        let mut work = self.clone();
        let outcome = SaveReconciler::new(cx, store, &descriptor)
            .run(&mut work)
            .await;
        let outcome = match outcome {
            Outcome::Ok(()) if atomic => store.commit(cx).await,
            other => other,
        };

        match outcome {
            Outcome::Ok(()) => {
                work.clear_pending();
                work.stored = work.secondary_records().to_vec();
                work.hydrated = true;
                *self = work;
                tracing::info!(kind = %descriptor.kind(), "Relation saved");
                Outcome::Ok(())
            }
            failed => {
                if atomic {
                    tracing::warn!(relation = %descriptor.id(), "Save failed; rolling back");
                    if let Outcome::Err(e) = store.rollback(cx).await {
                        tracing::warn!(error = %e, "Rollback failed");
                    }
                }
                failed
            }
        }
    }

    /// Re-derive the relation from storage, discarding pending changes.
    ///
    /// Anchors on the primary when it can (a persisted id, or for
    /// `BelongsToOne`/`SetContains` a stored link value), otherwise on the
    /// secondary. Fails with `EmptyRelation` when neither side anchors a
    /// query.
    #[tracing::instrument(level = "debug", skip(self, cx, store), fields(relation = %self.descriptor.id()))]
    pub async fn reload<S: RecordStore>(&mut self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        let descriptor = Arc::clone(&self.descriptor);
        let reloaded = try_outcome!(
            ReloadFetcher::new(cx, store, &descriptor)
                .fetch(self.primary.clone(), self.secondary.clone())
                .await
        );
        self.primary = reloaded.primary;
        self.secondary = reloaded.secondary;
        self.stored = self.secondary_records().to_vec();
        self.clear_pending();
        self.hydrated = true;
        tracing::info!(
            kind = %descriptor.kind(),
            secondaries = self.secondary_records().len(),
            "Relation reloaded"
        );
        Outcome::Ok(())
    }

    /// The query selecting the related rows (pivot rows for many-to-many),
    /// or `None` when the primary cannot anchor one.
    pub fn query(&self) -> Option<Query> {
        let d = &self.descriptor;
        let primary = self.primary.as_ref()?;
        match d.kind() {
            RelationKind::OwnsOne | RelationKind::OwnsMany => {
                let pid = primary.id()?;
                Some(Query::new(d.secondary()).equal(d.fk(), pid.clone()))
            }
            RelationKind::BelongsToOne => {
                let owner = primary.get(d.fk()).filter(|v| !v.is_null())?;
                Some(Query::new(d.secondary()).equal(d.secondary().id_column, owner.clone()))
            }
            RelationKind::ManyToMany => {
                let pivot = d.pivot()?;
                let pid = primary.id()?;
                Some(Query::new(pivot.entity).equal(pivot.primary_column.as_str(), pid.clone()))
            }
            RelationKind::SetContains => {
                let ids = idlist::parse(&primary.value(d.fk()), d.fk()).ok()?;
                Some(Query::new(d.secondary()).is_in(d.secondary().id_column, ids))
            }
            RelationKind::SetContainedIn => {
                let pid = primary.id()?.as_str()?;
                Some(Query::new(d.secondary()).contains(d.fk(), pid))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrel_core::{Condition, RelationErrorKind, Value};

    static OWNER: EntityType = EntityType::new("Owner", "owners", &["id"]);
    static OWNED: EntityType = EntityType::new("Owned", "owned", &["id", "owner_id"]);

    fn owns_many() -> Arc<RelationDescriptor> {
        Arc::new(RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap())
    }

    fn owns_one() -> Arc<RelationDescriptor> {
        Arc::new(RelationDescriptor::new(RelationKind::OwnsOne, &OWNER, &OWNED, "owner_id").unwrap())
    }

    fn owned(id: &str) -> Record {
        Record::new(&OWNED).with("id", id)
    }

    fn ids(records: &[Record]) -> Vec<Value> {
        records.iter().map(|r| r.value("id")).collect()
    }

    #[test]
    fn collection_diff_queues_adds_and_removes() {
        let mut state = RelationState::new(owns_many());
        state.secondary = Some(vec![owned("a"), owned("b")]);

        state
            .set_secondary_many(vec![owned("b"), owned("c"), owned("c")])
            .unwrap();
        assert_eq!(ids(state.secondary_to_add()), vec![Value::from("c")]);
        assert_eq!(ids(state.secondary_to_remove()), vec![Value::from("a")]);
        assert_eq!(state.secondary_records().len(), 2);

        // re-adding a pending removal cancels it instead of queueing an add
        state
            .set_secondary_many(vec![owned("a"), owned("b"), owned("c")])
            .unwrap();
        assert_eq!(ids(state.secondary_to_add()), vec![Value::from("c")]);
        assert!(state.secondary_to_remove().is_empty());
    }

    #[test]
    fn clearing_drops_unsaved_additions_instead_of_removing() {
        let mut state = RelationState::new(owns_many());
        state.secondary = Some(vec![owned("a")]);
        state.set_secondary_many(vec![owned("a"), owned("new")]).unwrap();
        state.set_secondary(None).unwrap();
        assert!(state.secondary_to_add().is_empty());
        assert_eq!(ids(state.secondary_to_remove()), vec![Value::from("a")]);
        assert!(state.secondary().is_none());
    }

    #[test]
    fn scalar_to_add_mirrors_secondary() {
        let mut state = RelationState::new(owns_one());
        state.set_secondary_one(Some(owned("x"))).unwrap();
        assert_eq!(ids(state.secondary_to_add()), vec![Value::from("x")]);

        state.set_secondary_one(Some(owned("y"))).unwrap();
        assert_eq!(ids(state.secondary_to_add()), vec![Value::from("y")]);
        // x was never saved, so nothing to unlink
        assert!(state.secondary_to_remove().is_empty());

        state.clear_pending();
        state.set_secondary_one(None).unwrap();
        assert!(state.secondary_to_add().is_empty());
        assert_eq!(ids(state.secondary_to_remove()), vec![Value::from("y")]);
    }

    #[test]
    fn unassigning_a_stored_scalar_always_queues_removal() {
        let mut state = RelationState::new(owns_one());
        state.secondary = Some(vec![owned("x")]);
        state.stored = vec![owned("x")];

        // reassigning the loaded record mirrors it into to_add
        state.set_secondary_one(Some(owned("x"))).unwrap();
        state.set_secondary_one(None).unwrap();
        assert!(state.secondary_to_add().is_empty());
        assert_eq!(ids(state.secondary_to_remove()), vec![Value::from("x")]);

        state.set_secondary_one(Some(owned("y"))).unwrap();
        state.set_secondary_one(Some(owned("x"))).unwrap();
        assert!(state.secondary_to_remove().is_empty());
        state.set_secondary_one(None).unwrap();
        assert!(state.secondary_to_add().is_empty());
        assert_eq!(ids(state.secondary_to_remove()), vec![Value::from("x")]);
    }

    #[test]
    fn never_both_pending_add_and_remove() {
        let mut state = RelationState::new(owns_many());
        state.secondary = Some(vec![owned("a")]);
        state.set_secondary_many(vec![owned("b")]).unwrap();
        state.set_secondary_many(vec![owned("a")]).unwrap();
        state.set_secondary_many(vec![owned("b"), owned("a")]).unwrap();
        for added in state.secondary_to_add() {
            assert!(position(state.secondary_to_remove(), added).is_none());
        }
        assert_eq!(ids(state.secondary_to_add()), vec![Value::from("b")]);
        assert!(state.secondary_to_remove().is_empty());
    }

    #[test]
    fn wrong_types_and_multiplicities_are_rejected() {
        let mut state = RelationState::new(owns_many());
        let err = state
            .set_secondary(Some(Secondary::One(owned("a"))))
            .unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::WrongModelType));

        let err = state
            .set_secondary_many(vec![Record::new(&OWNER).with("id", "o1")])
            .unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::WrongModelType));

        let err = state.set_primary(Some(owned("a"))).unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::WrongModelType));
        assert!(!state.has_pending());
    }

    #[test]
    fn replacing_primary_tracks_the_first_displaced_owner() {
        let o1 = Record::new(&OWNER).with("id", "o1");
        let o2 = Record::new(&OWNER).with("id", "o2");
        let o3 = Record::new(&OWNER).with("id", "o3");
        let mut state = RelationState::for_primary(owns_many(), o1.clone()).unwrap();

        state.set_primary(Some(o2)).unwrap();
        state.set_primary(Some(o3.clone())).unwrap();
        assert_eq!(state.primary_to_remove(), Some(&o1));
        assert_eq!(state.primary_to_add(), Some(&o3));

        state.set_primary(Some(o1.clone())).unwrap();
        assert!(state.primary_to_remove().is_none());
        assert!(state.primary_to_add().is_none());
        assert_eq!(state.primary(), Some(&o1));
    }

    #[test]
    fn flush_is_needed_only_with_pending_removals() {
        let o1 = Record::new(&OWNER).with("id", "o1");
        let mut state = RelationState::for_primary(owns_many(), o1).unwrap();
        state.secondary = Some(vec![owned("a")]);
        assert!(!state.needs_flush_before_reassign());
        state.set_secondary_many(Vec::new()).unwrap();
        assert!(state.needs_flush_before_reassign());
    }

    #[test]
    fn query_anchors_on_the_primary_id() {
        let mut state = RelationState::new(owns_many());
        assert!(state.query().is_none());
        state.set_primary(Some(Record::new(&OWNER))).unwrap();
        assert!(state.query().is_none());
        state
            .set_primary(Some(Record::new(&OWNER).with("id", "o1")))
            .unwrap();
        let query = state.query().unwrap();
        assert_eq!(query.entity().table, "owned");
        assert_eq!(
            query.conditions(),
            &[Condition::Equal {
                column: "owner_id".to_string(),
                value: Value::from("o1"),
            }]
        );
    }
}
