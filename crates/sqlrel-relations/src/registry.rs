//! Per-instance relation state cache.
//!
//! Every persisted record gets at most one live [`RelationState`] per
//! descriptor. Repeated binds of the same record through the same
//! descriptor return handles to the same state, so pending changes made
//! through one handle are visible through the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use sqlrel_core::{Error, Record, Result, Value};

use crate::RelationConfig;
use crate::descriptor::{DescriptorId, RelationDescriptor};
use crate::handle::RelationHandle;
use crate::state::RelationState;

/// Cache key: the owning record's type and id plus the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    entity: &'static str,
    id: String,
    descriptor: DescriptorId,
}

impl RegistryKey {
    pub fn new(entity: &'static str, id: &Value, descriptor: DescriptorId) -> Self {
        Self {
            entity,
            id: id.cache_key(),
            descriptor,
        }
    }

    /// Key for `owner` through `descriptor`, if the owner has an id.
    pub fn for_record(owner: &Record, descriptor: &RelationDescriptor) -> Option<Self> {
        owner
            .id()
            .map(|id| Self::new(owner.entity().name, id, descriptor.id().clone()))
    }

    pub fn descriptor(&self) -> &DescriptorId {
        &self.descriptor
    }
}

/// Relation states keyed by owning record and descriptor.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    states: Mutex<HashMap<RegistryKey, RelationHandle>>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static RelationRegistry {
        static GLOBAL: OnceLock<RelationRegistry> = OnceLock::new();
        GLOBAL.get_or_init(RelationRegistry::new)
    }

    fn states(&self) -> MutexGuard<'_, HashMap<RegistryKey, RelationHandle>> {
        match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Relation registry mutex was poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The state for `owner` through `descriptor`, created on first use.
    ///
    /// Owners without an id get a fresh state that is not cached; call
    /// [`RelationRegistry::register`] once a save has assigned the id.
    pub fn state_for(
        &self,
        descriptor: &Arc<RelationDescriptor>,
        owner: &Record,
        config: RelationConfig,
    ) -> Result<RelationHandle> {
        if !owner.is(descriptor.primary()) {
            return Err(Error::wrong_model_type(
                descriptor.primary().name,
                owner.entity().name,
            ));
        }
        let Some(key) = RegistryKey::for_record(owner, descriptor) else {
            tracing::trace!(relation = %descriptor.id(), "Unsaved owner; state not cached");
            let state = RelationState::for_primary(Arc::clone(descriptor), owner.clone())?;
            return Ok(RelationHandle::new(state.with_config(config)));
        };

        let mut states = self.states();
        if let Some(handle) = states.get(&key) {
            return Ok(handle.clone());
        }
        let state = RelationState::for_primary(Arc::clone(descriptor), owner.clone())?;
        let handle = RelationHandle::new(state.with_config(config));
        tracing::debug!(relation = %descriptor.id(), owner = %key.id, "Created relation state");
        states.insert(key, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, owner: &Record, descriptor: &RelationDescriptor) -> Option<RelationHandle> {
        let key = RegistryKey::for_record(owner, descriptor)?;
        self.states().get(&key).cloned()
    }

    /// Cache `handle` under its current primary. An existing entry for the
    /// same key is kept and returned instead.
    pub fn register(&self, handle: &RelationHandle) -> Option<RelationHandle> {
        let state = handle.lock();
        let key = RegistryKey::for_record(state.primary.as_ref()?, &state.descriptor)?;
        drop(state);
        let mut states = self.states();
        Some(states.entry(key).or_insert_with(|| handle.clone()).clone())
    }

    /// Drop the cached state for one owner and descriptor.
    pub fn evict(&self, owner: &Record, descriptor: &RelationDescriptor) -> Option<RelationHandle> {
        let key = RegistryKey::for_record(owner, descriptor)?;
        self.states().remove(&key)
    }

    /// Drop every cached state owned by `owner`. Returns how many were removed.
    pub fn evict_instance(&self, owner: &Record) -> usize {
        let Some(id) = owner.id().map(Value::cache_key) else {
            return 0;
        };
        let entity = owner.entity().name;
        let mut states = self.states();
        let before = states.len();
        states.retain(|key, _| !(key.entity == entity && key.id == id));
        before - states.len()
    }

    /// Mark the cached state stale so the next bound read reloads it.
    /// States with unsaved changes keep them and are not marked. Returns
    /// whether an entry was marked.
    pub fn invalidate(&self, entity: &'static str, id: &Value, descriptor: &DescriptorId) -> bool {
        let key = RegistryKey::new(entity, id, descriptor.clone());
        let Some(handle) = self.states().get(&key).cloned() else {
            return false;
        };
        let marked = handle.mark_stale();
        if !marked {
            tracing::debug!(
                relation = %descriptor,
                owner = %key.id,
                "Cached relation has pending changes; not invalidated"
            );
        }
        marked
    }

    pub fn clear(&self) {
        self.states().clear();
    }

    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RelationKind;
    use crate::state::Secondary;
    use sqlrel_core::{EntityType, RelationErrorKind};

    static OWNER: EntityType = EntityType::new("Owner", "owners", &["id"]);
    static OWNED: EntityType = EntityType::new("Owned", "owned", &["id", "owner_id"]);

    fn descriptor() -> Arc<RelationDescriptor> {
        Arc::new(RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap())
    }

    #[test]
    fn persisted_owners_share_one_state() {
        let registry = RelationRegistry::new();
        let d = descriptor();
        let owner = Record::new(&OWNER).with("id", "o1");

        let a = registry.state_for(&d, &owner, RelationConfig::default()).unwrap();
        let b = registry.state_for(&d, &owner.clone(), RelationConfig::default()).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.len(), 1);

        a.set_secondary(Some(vec![Record::new(&OWNED).with("id", "x")].into()))
            .unwrap();
        assert!(b.has_pending());
    }

    #[test]
    fn unsaved_owners_are_not_cached() {
        let registry = RelationRegistry::new();
        let d = descriptor();
        let owner = Record::new(&OWNER);
        let a = registry.state_for(&d, &owner, RelationConfig::default()).unwrap();
        let b = registry.state_for(&d, &owner, RelationConfig::default()).unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(registry.is_empty());

        a.set_primary(Some(Record::new(&OWNER).with("id", "o9"))).unwrap();
        let registered = registry.register(&a).unwrap();
        assert!(registered.ptr_eq(&a));
        assert!(registry.get(&Record::new(&OWNER).with("id", "o9"), &d).is_some());
    }

    #[test]
    fn wrong_owner_type_is_rejected() {
        let registry = RelationRegistry::new();
        let err = registry
            .state_for(&descriptor(), &Record::new(&OWNED).with("id", "x"), RelationConfig::default())
            .unwrap_err();
        assert_eq!(err.relation_kind(), Some(RelationErrorKind::WrongModelType));
    }

    #[test]
    fn eviction_and_invalidation() {
        let registry = RelationRegistry::new();
        let d = descriptor();
        let owner = Record::new(&OWNER).with("id", "o1");
        let handle = registry.state_for(&d, &owner, RelationConfig::default()).unwrap();
        handle.set_secondary(Some(Secondary::Many(Vec::new()))).unwrap();
        assert!(handle.is_hydrated());

        assert!(registry.invalidate("Owner", &Value::from("o1"), d.id()));
        assert!(!handle.is_hydrated());
        assert!(!registry.invalidate("Owner", &Value::from("o2"), d.id()));

        assert_eq!(registry.evict_instance(&owner), 1);
        assert!(registry.is_empty());
        assert!(registry.evict(&owner, &d).is_none());
    }

    #[test]
    fn invalidation_keeps_unsaved_changes() {
        let registry = RelationRegistry::new();
        let d = descriptor();
        let owner = Record::new(&OWNER).with("id", "o1");
        let handle = registry.state_for(&d, &owner, RelationConfig::default()).unwrap();
        handle
            .set_secondary(Some(Secondary::Many(vec![Record::new(&OWNED).with("id", "x")])))
            .unwrap();

        assert!(!registry.invalidate("Owner", &Value::from("o1"), d.id()));
        assert!(handle.is_hydrated());
        assert!(handle.has_pending());
    }
}
