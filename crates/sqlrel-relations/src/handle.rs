//! Shared, lockable relation state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use asupersync::{Cx, Outcome};
use sqlrel_core::{Error, Query, Record, RecordStore, Result};

use crate::descriptor::RelationDescriptor;
use crate::state::{RelationState, Secondary};

/// A cloneable handle to one [`RelationState`].
///
/// Every clone observes the same state. Async operations run against a
/// snapshot and publish it back only on success; the lock is never held
/// across an await point.
#[derive(Clone)]
pub struct RelationHandle {
    inner: Arc<Mutex<RelationState>>,
}

impl RelationHandle {
    pub fn new(state: RelationState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RelationState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Relation state mutex was poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RelationState {
        self.lock().clone()
    }

    /// Whether both handles share one state.
    #[must_use]
    pub fn ptr_eq(&self, other: &RelationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn descriptor(&self) -> Arc<RelationDescriptor> {
        Arc::clone(&self.lock().descriptor)
    }

    #[must_use]
    pub fn primary(&self) -> Option<Record> {
        self.lock().primary.clone()
    }

    #[must_use]
    pub fn secondary(&self) -> Option<Secondary> {
        self.lock().secondary()
    }

    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.lock().is_hydrated()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock().has_pending()
    }

    pub fn set_primary(&self, primary: Option<Record>) -> Result<()> {
        self.lock().set_primary(primary)
    }

    pub fn set_secondary(&self, secondary: Option<Secondary>) -> Result<()> {
        self.lock().set_secondary(secondary)
    }

    #[must_use]
    pub fn query(&self) -> Option<Query> {
        self.lock().query()
    }

    pub(crate) fn mark_stale(&self) -> bool {
        self.lock().mark_stale()
    }

    /// Save pending changes. Assignments made through another clone while
    /// the save is in flight are overwritten by the saved state.
    pub async fn save<S: RecordStore>(&self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        let mut state = self.snapshot();
        let outcome = state.save(cx, store).await;
        if matches!(outcome, Outcome::Ok(())) {
            *self.lock() = state;
        }
        outcome
    }

    pub async fn reload<S: RecordStore>(&self, cx: &Cx, store: &S) -> Outcome<(), Error> {
        let mut state = self.snapshot();
        let outcome = state.reload(cx, store).await;
        if matches!(outcome, Outcome::Ok(())) {
            *self.lock() = state;
        }
        outcome
    }

    pub async fn flush_before_reassign<S: RecordStore>(
        &self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<bool, Error> {
        let mut state = self.snapshot();
        let outcome = state.flush_before_reassign(cx, store).await;
        if matches!(outcome, Outcome::Ok(true)) {
            *self.lock() = state;
        }
        outcome
    }
}

impl fmt::Debug for RelationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("RelationHandle")
            .field("relation", state.descriptor.id())
            .field("hydrated", &state.hydrated)
            .field("pending", &state.has_pending())
            .finish()
    }
}
