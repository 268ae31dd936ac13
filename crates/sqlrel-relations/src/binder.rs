//! Binding relations to owning records.
//!
//! A [`RelationBinder`] is what the factory functions return: a descriptor
//! plus configuration, typed by multiplicity. Binding it to an owner
//! yields a [`BoundRelation`] that reads lazily through the registry's
//! shared state and routes every write through the state's setters.
//!
//! ```ignore
//! let owned = has_many(&OWNER, &OWNED, Some("owner_id"))?;
//! let bound = owned.bind(RelationRegistry::global(), &owner)?;
//! bound.set(vec![d1, d2])?;
//! bound.save(&cx, &store).await;
//! for record in &bound.get(&cx, &store).await? { /* ... */ }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, Index};
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use sqlrel_core::{Error, Record, RecordStore, Result, try_outcome};

use crate::RelationConfig;
use crate::descriptor::RelationDescriptor;
use crate::handle::RelationHandle;
use crate::registry::RelationRegistry;
use crate::state::{RelationState, Secondary};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::One {}
    impl Sealed for super::Many {}
}

/// How many secondaries a relation holds.
pub trait Multiplicity: sealed::Sealed + Send + Sync + 'static {
    /// The value a bound relation reads and writes.
    type Value: Clone + fmt::Debug + Default + Send + Sync;

    const COLLECTION: bool;

    fn read(state: &RelationState) -> Self::Value;

    fn into_secondary(value: Self::Value) -> Option<Secondary>;
}

/// Zero or one secondary.
#[derive(Debug, Clone, Copy)]
pub struct One;

/// Any number of secondaries.
#[derive(Debug, Clone, Copy)]
pub struct Many;

impl Multiplicity for One {
    type Value = Option<Record>;

    const COLLECTION: bool = false;

    fn read(state: &RelationState) -> Self::Value {
        state.secondary_records().first().cloned()
    }

    fn into_secondary(value: Self::Value) -> Option<Secondary> {
        value.map(Secondary::One)
    }
}

impl Multiplicity for Many {
    type Value = Vec<Record>;

    const COLLECTION: bool = true;

    fn read(state: &RelationState) -> Self::Value {
        state.secondary_records().to_vec()
    }

    fn into_secondary(value: Self::Value) -> Option<Secondary> {
        Some(Secondary::Many(value))
    }
}

/// A relation definition, ready to bind to owning records.
pub struct RelationBinder<M: Multiplicity> {
    descriptor: Arc<RelationDescriptor>,
    config: RelationConfig,
    _multiplicity: PhantomData<M>,
}

impl<M: Multiplicity> RelationBinder<M> {
    /// Wrap a descriptor. Fails with `InvalidDescriptor` when the
    /// descriptor's kind does not match the multiplicity.
    pub fn new(descriptor: RelationDescriptor) -> Result<Self> {
        if descriptor.kind().is_collection() != M::COLLECTION {
            return Err(Error::invalid_descriptor(format!(
                "{}: a {} relation cannot be bound as {}",
                descriptor.id(),
                descriptor.kind(),
                if M::COLLECTION { "a collection" } else { "a single record" },
            )));
        }
        Ok(Self {
            descriptor: Arc::new(descriptor),
            config: RelationConfig::default(),
            _multiplicity: PhantomData,
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: RelationConfig) -> Self {
        self.config = config;
        self
    }

    /// Name `inverse` as this relation's inverse.
    #[must_use]
    pub fn with_inverse<N: Multiplicity>(mut self, inverse: &RelationBinder<N>) -> Self {
        let descriptor = (*self.descriptor).clone().with_inverse(&inverse.descriptor);
        self.descriptor = Arc::new(descriptor);
        self
    }

    pub fn descriptor(&self) -> &Arc<RelationDescriptor> {
        &self.descriptor
    }

    pub fn config(&self) -> RelationConfig {
        self.config
    }

    /// Bind to `owner`, sharing state with every other binding of the same
    /// persisted owner in `registry`.
    pub fn bind<'r>(&self, registry: &'r RelationRegistry, owner: &Record) -> Result<BoundRelation<'r, M>> {
        let handle = registry.state_for(&self.descriptor, owner, self.config)?;
        Ok(BoundRelation {
            registry,
            handle,
            _multiplicity: PhantomData,
        })
    }

    /// Bind through [`RelationRegistry::global`].
    pub fn bind_global(&self, owner: &Record) -> Result<BoundRelation<'static, M>> {
        self.bind(RelationRegistry::global(), owner)
    }
}

impl<M: Multiplicity> Clone for RelationBinder<M> {
    fn clone(&self) -> Self {
        Self {
            descriptor: Arc::clone(&self.descriptor),
            config: self.config,
            _multiplicity: PhantomData,
        }
    }
}

impl<M: Multiplicity> fmt::Debug for RelationBinder<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationBinder")
            .field("relation", self.descriptor.id())
            .field("config", &self.config)
            .finish()
    }
}

/// Make two binders name each other as inverses.
pub fn link_inverses<A: Multiplicity, B: Multiplicity>(
    a: RelationBinder<A>,
    b: RelationBinder<B>,
) -> (RelationBinder<A>, RelationBinder<B>) {
    let a = a.with_inverse(&b);
    let b = b.with_inverse(&a);
    (a, b)
}

/// A relation bound to one owning record.
pub struct BoundRelation<'r, M: Multiplicity> {
    registry: &'r RelationRegistry,
    handle: RelationHandle,
    _multiplicity: PhantomData<M>,
}

impl<M: Multiplicity> BoundRelation<'_, M> {
    /// The loaded secondary, reloading first when the state is not
    /// hydrated and lazy reload is enabled. An owner with nothing stored
    /// to reload from reads as empty.
    pub async fn get<S: RecordStore>(&self, cx: &Cx, store: &S) -> Outcome<Related<M>, Error> {
        let (hydrated, lazy) = {
            let state = self.handle.lock();
            (state.is_hydrated(), state.config().lazy_reload)
        };
        if !hydrated && lazy {
            match self.handle.reload(cx, store).await {
                Outcome::Err(e) if e.is_empty_relation() => {
                    tracing::debug!(error = %e, "Nothing stored yet; reading as empty");
                }
                other => try_outcome!(other),
            }
        }
        Outcome::Ok(self.loaded())
    }

    /// The secondary as currently held, without any I/O.
    #[must_use]
    pub fn loaded(&self) -> Related<M> {
        let data = M::read(&self.handle.lock());
        Related {
            data,
            handle: self.handle.clone(),
        }
    }

    /// Assign the secondary. Never performs I/O.
    pub fn set(&self, value: M::Value) -> Result<()> {
        self.handle.set_secondary(M::into_secondary(value))
    }

    /// The shared state backing this binding.
    pub fn relation(&self) -> &RelationHandle {
        &self.handle
    }

    /// Save pending changes, then cache the state under the owner's id and
    /// mark cached inverse relations of every touched record stale.
    pub async fn save<S: RecordStore>(&self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        let before = self.handle.snapshot();
        try_outcome!(self.handle.save(cx, store).await);

        if let Some(cached) = self.registry.register(&self.handle) {
            if !cached.ptr_eq(&self.handle) && cached.mark_stale() {
                tracing::debug!("Owner already had cached state; marked it stale");
            }
        }
        if before.config().invalidate_inverse {
            self.invalidate_touched(&before);
        }
        Outcome::Ok(())
    }

    pub async fn reload<S: RecordStore>(&self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        self.handle.reload(cx, store).await
    }

    fn invalidate_touched(&self, before: &RelationState) {
        let after = self.handle.snapshot();
        let descriptor = after.descriptor();
        let mut invalidated = 0usize;

        if let Some(old) = before.primary_to_remove() {
            if let Some(id) = old.id() {
                invalidated += usize::from(self.registry.invalidate(
                    old.entity().name,
                    id,
                    descriptor.id(),
                ));
            }
        }
        if let Some(inverse) = descriptor.inverse() {
            let touched = after
                .secondary_records()
                .iter()
                .chain(before.secondary_to_remove());
            for record in touched {
                if let Some(id) = record.id() {
                    invalidated +=
                        usize::from(self.registry.invalidate(record.entity().name, id, inverse));
                }
            }
        }
        if invalidated > 0 {
            tracing::debug!(relation = %descriptor.id(), invalidated, "Invalidated cached relations");
        }
    }
}

impl<M: Multiplicity> fmt::Debug for BoundRelation<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRelation")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Loaded secondary data together with the relation it came from.
pub struct Related<M: Multiplicity> {
    data: M::Value,
    handle: RelationHandle,
}

impl<M: Multiplicity> Related<M> {
    pub fn data(&self) -> &M::Value {
        &self.data
    }

    pub fn into_data(self) -> M::Value {
        self.data
    }

    /// The backing relation, for direct `save`/`reload`/`query` access.
    pub fn relation(&self) -> &RelationHandle {
        &self.handle
    }
}

impl Related<One> {
    pub fn get(&self) -> Option<&Record> {
        self.data.as_ref()
    }

    pub fn is_some(&self) -> bool {
        self.data.is_some()
    }
}

impl Related<Many> {
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.data.get(index)
    }
}

impl<M: Multiplicity> Deref for Related<M> {
    type Target = M::Value;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Index<usize> for Related<Many> {
    type Output = Record;

    fn index(&self, index: usize) -> &Record {
        &self.data[index]
    }
}

impl<'a> IntoIterator for &'a Related<Many> {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<M: Multiplicity> Clone for Related<M> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<M: Multiplicity> fmt::Debug for Related<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Related").field("data", &self.data).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{belongs_to, has_many};
    use asupersync::runtime::RuntimeBuilder;
    use sqlrel_core::{EntityType, Value};
    use sqlrel_memory::{MemoryStore, StatementKind};

    static OWNER: EntityType = EntityType::new("Owner", "owners", &["id", "name"]);
    static OWNED: EntityType = EntityType::new("Owned", "owned", &["id", "owner_id"]);

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(value) => value,
            Outcome::Err(err) => panic!("unexpected error: {err}"),
            Outcome::Cancelled(reason) => panic!("cancelled: {reason:?}"),
            Outcome::Panicked(payload) => panic!("panicked: {payload:?}"),
        }
    }

    fn owner(id: &str) -> Record {
        Record::new(&OWNER).with("id", id).with("name", id)
    }

    fn owned(id: &str, owner: Option<&str>) -> Record {
        Record::new(&OWNED).with("id", id).with("owner_id", owner)
    }

    #[test]
    fn unsaved_owner_reads_as_empty_without_io() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        let registry = RelationRegistry::new();
        let relation = has_many(&OWNER, &OWNED, None).unwrap();

        rt.block_on(async {
            let bound = relation.bind(&registry, &Record::new(&OWNER)).unwrap();
            let related = unwrap_outcome(bound.get(&cx, &store).await);
            assert!(related.is_empty());
            assert!(store.statements().is_empty());
            assert!(registry.is_empty());
        });
    }

    #[test]
    fn first_read_reloads_once() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        store
            .seed([owner("o1"), owned("d2", Some("o1")), owned("d1", Some("o1"))])
            .unwrap();
        let registry = RelationRegistry::new();
        let relation = has_many(&OWNER, &OWNED, None).unwrap();

        rt.block_on(async {
            let bound = relation.bind(&registry, &owner("o1")).unwrap();
            let related = unwrap_outcome(bound.get(&cx, &store).await);
            let ids: Vec<Value> = related.iter().map(|r| r.value("id")).collect();
            assert_eq!(ids, vec![Value::from("d1"), Value::from("d2")]);
            assert_eq!(related[1].value("owner_id"), Value::from("o1"));

            let again = unwrap_outcome(bound.get(&cx, &store).await);
            assert_eq!(again.len(), 2);
            assert_eq!(store.count_statements(StatementKind::Select, "owned"), 1);
        });
    }

    #[test]
    fn saving_marks_cached_inverses_stale() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        store
            .seed([owner("o1"), owner("o2"), owned("d1", Some("o1"))])
            .unwrap();
        let registry = RelationRegistry::new();
        let (owned_by, owner_of) = link_inverses(
            has_many(&OWNER, &OWNED, None).unwrap(),
            belongs_to(&OWNED, &OWNER, None).unwrap(),
        );

        rt.block_on(async {
            let d1 = owned("d1", Some("o1"));
            let back = owner_of.bind(&registry, &d1).unwrap();
            let current = unwrap_outcome(back.get(&cx, &store).await);
            assert_eq!(current.get().and_then(Record::id), Some(&Value::from("o1")));

            let forward = owned_by.bind(&registry, &owner("o2")).unwrap();
            forward.set(vec![d1.clone()]).unwrap();
            unwrap_outcome(forward.save(&cx, &store).await);

            assert!(!back.relation().is_hydrated());
            let current = unwrap_outcome(back.get(&cx, &store).await);
            assert_eq!(current.get().and_then(Record::id), Some(&Value::from("o2")));
        });
    }

    #[test]
    fn inverse_save_keeps_an_unsaved_assignment() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        store
            .seed([owner("o1"), owner("o2"), owner("o3"), owned("d1", Some("o1"))])
            .unwrap();
        let registry = RelationRegistry::new();
        let (owned_by, owner_of) = link_inverses(
            has_many(&OWNER, &OWNED, None).unwrap(),
            belongs_to(&OWNED, &OWNER, None).unwrap(),
        );

        rt.block_on(async {
            let d1 = owned("d1", Some("o1"));
            let back = owner_of.bind(&registry, &d1).unwrap();
            back.set(Some(owner("o3"))).unwrap();
            assert!(back.relation().has_pending());

            let forward = owned_by.bind(&registry, &owner("o2")).unwrap();
            forward.set(vec![d1.clone()]).unwrap();
            unwrap_outcome(forward.save(&cx, &store).await);

            assert!(back.relation().is_hydrated());
            assert!(back.relation().has_pending());
            let current = unwrap_outcome(back.get(&cx, &store).await);
            assert_eq!(current.get().and_then(Record::id), Some(&Value::from("o3")));
        });
    }

    #[test]
    fn related_exposes_its_relation() {
        let registry = RelationRegistry::new();
        let relation = has_many(&OWNER, &OWNED, None).unwrap();
        let bound = relation.bind(&registry, &owner("o1")).unwrap();
        bound.set(vec![owned("a", None), owned("b", None)]).unwrap();

        let related = bound.loaded();
        assert_eq!(related.len(), 2);
        assert_eq!(related.get(0).map(|r| r.value("id")), Some(Value::from("a")));
        assert!(related.relation().ptr_eq(bound.relation()));
        assert_eq!((&related).into_iter().count(), 2);
        assert_eq!(related.relation().snapshot().secondary_to_add().len(), 2);
    }
}
