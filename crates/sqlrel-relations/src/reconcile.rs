//! Turning pending buffers into writes.
//!
//! Every kind runs the same three passes, each expressed as set-based
//! statements: clear links to removed secondaries (stale), clear links
//! owned by a displaced primary (primary-level), then link the current
//! secondaries (add). Endpoints that were never stored are inserted
//! first so that ids exist before they are linked.

use std::collections::BTreeSet;

use asupersync::{Cx, Outcome};
use sqlrel_core::{EntityType, Error, Record, RecordStore, Value, try_outcome, try_result};
use sqlrel_query::{QueryBuilder, assign};

use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::idlist;
use crate::state::RelationState;

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(|r| r.id().cloned()).collect()
}

fn stored_value(fresh: &[Record], id: &Value, column: &str) -> Option<Value> {
    fresh
        .iter()
        .find(|r| r.id() == Some(id))
        .map(|r| r.value(column))
}

pub(crate) struct SaveReconciler<'a, S: RecordStore> {
    cx: &'a Cx,
    store: &'a S,
    descriptor: &'a RelationDescriptor,
}

impl<'a, S: RecordStore> SaveReconciler<'a, S> {
    pub(crate) fn new(cx: &'a Cx, store: &'a S, descriptor: &'a RelationDescriptor) -> Self {
        Self {
            cx,
            store,
            descriptor,
        }
    }

    fn on(&self, entity: &'static EntityType) -> QueryBuilder<'a, S> {
        QueryBuilder::new(self.store, entity)
    }

    fn checkpoint(&self) -> Outcome<(), Error> {
        match self.cx.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None => Outcome::Ok(()),
        }
    }

    pub(crate) async fn run(&self, state: &mut RelationState) -> Outcome<(), Error> {
        try_outcome!(self.checkpoint());
        match self.descriptor.kind() {
            RelationKind::OwnsOne | RelationKind::OwnsMany => self.save_owner(state).await,
            RelationKind::BelongsToOne => self.save_belongs_to(state).await,
            RelationKind::ManyToMany => self.save_many_to_many(state).await,
            RelationKind::SetContains => self.save_contains(state).await,
            RelationKind::SetContainedIn => self.save_contained_in(state).await,
        }
    }

    /// Insert every record that has no id or whose id is not stored yet.
    /// Records are replaced by their stored form.
    async fn persist_missing(&self, records: &mut [Record]) -> Outcome<(), Error> {
        let Some(entity) = records.first().map(Record::entity) else {
            return Outcome::Ok(());
        };
        let known = ids(records);
        let existing: Vec<Value> = if known.is_empty() {
            Vec::new()
        } else {
            let rows = try_outcome!(
                self.on(entity)
                    .is_in(entity.id_column, known)
                    .get(self.cx)
                    .await
            );
            rows.into_iter().filter_map(|r| r.id().cloned()).collect()
        };
        for record in records.iter_mut() {
            let stored = record.id().is_some_and(|id| existing.contains(id));
            if !stored {
                *record = try_outcome!(self.on(entity).insert(self.cx, record.clone()).await);
            }
        }
        Outcome::Ok(())
    }

    /// Write the full record, inserting it when it is not stored.
    async fn persist(&self, record: &mut Record) -> Outcome<(), Error> {
        let entity = record.entity();
        let exists = match record.id().cloned() {
            Some(id) => try_outcome!(self.on(entity).find(self.cx, &id).await).is_some(),
            None => false,
        };
        if !exists {
            *record = try_outcome!(self.on(entity).insert(self.cx, record.clone()).await);
            return Outcome::Ok(());
        }
        let Some(id) = record.id().cloned() else {
            return Outcome::Ok(());
        };
        let changes: Vec<(String, Value)> = record
            .values()
            .filter(|(column, _)| *column != entity.id_column)
            .map(|(column, value)| assign(column, value.clone()))
            .collect();
        try_outcome!(
            self.on(entity)
                .equal(entity.id_column, id)
                .update(self.cx, &changes)
                .await
        );
        Outcome::Ok(())
    }

    async fn save_owner(&self, state: &mut RelationState) -> Outcome<(), Error> {
        let d = self.descriptor;
        let fk = d.fk();
        let secondary = d.secondary();
        let id_column = secondary.id_column;

        if let Some(primary) = state.primary.as_mut() {
            try_outcome!(self.persist_missing(std::slice::from_mut(primary)).await);
        }
        if let Some(records) = state.secondary.as_mut() {
            try_outcome!(self.persist_missing(records).await);
        }

        let pid = state.primary.as_ref().and_then(|p| p.id().cloned());
        let old_id = state.primary_to_remove.as_ref().and_then(|p| p.id().cloned());
        let owners: Vec<Value> = pid.iter().chain(old_id.iter()).cloned().collect();
        let current = ids(state.secondary_records());
        let removed = ids(&state.secondary_to_remove);

        try_outcome!(self.checkpoint());
        if !removed.is_empty() && !owners.is_empty() {
            let cleared = try_outcome!(
                self.on(secondary)
                    .is_in(id_column, removed)
                    .is_in(fk, owners)
                    .update(self.cx, &[assign(fk, Value::Null)])
                    .await
            );
            tracing::debug!(relation = %d.id(), cleared, "Unlinked removed secondaries");
        }

        if let Some(old_id) = &old_id {
            if !current.is_empty() {
                try_outcome!(
                    self.on(secondary)
                        .is_in(id_column, current.clone())
                        .equal(fk, old_id.clone())
                        .update(self.cx, &[assign(fk, Value::Null)])
                        .await
                );
                for record in state.secondary.iter_mut().flatten() {
                    if record.value(fk).loosely_eq(old_id) {
                        try_result!(record.set(fk, Value::Null));
                    }
                }
            }
        }

        if let Some(pid) = &pid {
            if !current.is_empty() {
                let linked = try_outcome!(
                    self.on(secondary)
                        .is_in(id_column, current)
                        .update(self.cx, &[assign(fk, pid.clone())])
                        .await
                );
                for record in state.secondary.iter_mut().flatten() {
                    try_result!(record.set(fk, pid.clone()));
                }
                tracing::debug!(relation = %d.id(), linked, "Linked secondaries");
            }
        }
        Outcome::Ok(())
    }

    async fn save_belongs_to(&self, state: &mut RelationState) -> Outcome<(), Error> {
        let d = self.descriptor;
        let fk = d.fk();
        let primary_type = d.primary();
        let id_column = primary_type.id_column;

        // The owner must exist before the row pointing at it.
        if let Some(records) = state.secondary.as_mut() {
            try_outcome!(self.persist_missing(records).await);
        }
        let sid = state
            .secondary
            .as_ref()
            .and_then(|records| records.first())
            .and_then(|s| s.id().cloned());
        if let Some(primary) = state.primary.as_mut() {
            if let Some(sid) = &sid {
                try_result!(primary.set(fk, sid.clone()));
            }
            try_outcome!(self.persist_missing(std::slice::from_mut(primary)).await);
        }

        let pid = state.primary.as_ref().and_then(|p| p.id().cloned());
        let old_id = state.primary_to_remove.as_ref().and_then(|p| p.id().cloned());
        let removed = ids(&state.secondary_to_remove);

        try_outcome!(self.checkpoint());
        if let Some(pid) = &pid {
            if !removed.is_empty() {
                try_outcome!(
                    self.on(primary_type)
                        .equal(id_column, pid.clone())
                        .is_in(fk, removed.clone())
                        .update(self.cx, &[assign(fk, Value::Null)])
                        .await
                );
                if sid.is_none() {
                    if let Some(primary) = state.primary.as_mut() {
                        let current = primary.value(fk);
                        if removed.iter().any(|r| r.loosely_eq(&current)) {
                            try_result!(primary.set(fk, Value::Null));
                        }
                    }
                }
            }
        }

        if let Some(old_id) = &old_id {
            let owners: Vec<Value> = sid.iter().cloned().chain(removed).collect();
            if !owners.is_empty() && pid.as_ref() != Some(old_id) {
                try_outcome!(
                    self.on(primary_type)
                        .equal(id_column, old_id.clone())
                        .is_in(fk, owners)
                        .update(self.cx, &[assign(fk, Value::Null)])
                        .await
                );
            }
        }

        if let (Some(pid), Some(sid)) = (&pid, &sid) {
            try_outcome!(
                self.on(primary_type)
                    .equal(id_column, pid.clone())
                    .update(self.cx, &[assign(fk, sid.clone())])
                    .await
            );
            tracing::debug!(relation = %d.id(), "Linked owner");
        }
        Outcome::Ok(())
    }

    async fn save_many_to_many(&self, state: &mut RelationState) -> Outcome<(), Error> {
        let d = self.descriptor;
        let Some(pivot) = d.pivot() else {
            return Outcome::Err(Error::invalid_descriptor(format!(
                "{} has no pivot table",
                d.id()
            )));
        };
        let pcol = pivot.primary_column.as_str();
        let scol = pivot.secondary_column.as_str();

        if let Some(primary) = state.primary.as_mut() {
            try_outcome!(self.persist_missing(std::slice::from_mut(primary)).await);
        }
        if let Some(records) = state.secondary.as_mut() {
            try_outcome!(self.persist_missing(records).await);
        }

        let pid = state.primary.as_ref().and_then(|p| p.id().cloned());
        let old_id = state.primary_to_remove.as_ref().and_then(|p| p.id().cloned());
        let current = ids(state.secondary_records());
        let removed = ids(&state.secondary_to_remove);

        try_outcome!(self.checkpoint());
        let owners: Vec<Value> = pid.iter().chain(old_id.iter()).cloned().collect();
        if !removed.is_empty() && !owners.is_empty() {
            let deleted = try_outcome!(
                self.on(pivot.entity)
                    .is_in(scol, removed.clone())
                    .is_in(pcol, owners)
                    .delete(self.cx)
                    .await
            );
            tracing::debug!(relation = %d.id(), deleted, "Deleted stale pivot rows");
        }

        if let Some(old_id) = &old_id {
            if pid.as_ref() != Some(old_id) {
                let touched: Vec<Value> = current.iter().cloned().chain(removed).collect();
                try_outcome!(
                    self.on(pivot.entity)
                        .equal(pcol, old_id.clone())
                        .is_in(scol, touched)
                        .delete(self.cx)
                        .await
                );
            }
        }

        if let Some(pid) = &pid {
            if !current.is_empty() {
                let existing: Vec<Value> = try_outcome!(
                    self.on(pivot.entity)
                        .equal(pcol, pid.clone())
                        .is_in(scol, current.clone())
                        .get(self.cx)
                        .await
                )
                .into_iter()
                .map(|row| row.value(scol))
                .collect();
                let mut rows: Vec<Record> = Vec::new();
                for sid in current {
                    let linked = existing.iter().any(|e| e.loosely_eq(&sid))
                        || rows.iter().any(|r| r.value(scol).loosely_eq(&sid));
                    if !linked {
                        rows.push(
                            Record::new(pivot.entity)
                                .with(pcol, pid.clone())
                                .with(scol, sid),
                        );
                    }
                }
                let inserted = try_outcome!(self.on(pivot.entity).insert_many(self.cx, rows).await);
                tracing::debug!(relation = %d.id(), inserted, "Inserted pivot rows");
            }
        }
        Outcome::Ok(())
    }

    async fn save_contains(&self, state: &mut RelationState) -> Outcome<(), Error> {
        let d = self.descriptor;
        let fk = d.fk();
        let primary_type = d.primary();
        let secondary_id = d.secondary().id_column;

        if let Some(records) = state.secondary.as_mut() {
            try_outcome!(self.persist_missing(records).await);
        }
        let mut list = BTreeSet::new();
        for record in state.secondary_records() {
            let id = try_result!(record.value(secondary_id).expect_text(secondary_id)).to_string();
            list.insert(id);
        }

        try_outcome!(self.checkpoint());
        let pid = state.primary.as_ref().and_then(|p| p.id().cloned());
        if let Some(old_id) = state.primary_to_remove.as_ref().and_then(|p| p.id().cloned()) {
            if pid.as_ref() != Some(&old_id) {
                try_outcome!(
                    self.on(primary_type)
                        .equal(primary_type.id_column, old_id)
                        .update(self.cx, &[assign(fk, Value::Null)])
                        .await
                );
            }
        }

        // The list is rebuilt from the live set, which also drops removals.
        if let Some(primary) = state.primary.as_mut() {
            try_result!(primary.set(fk, idlist::join(&list)));
            try_outcome!(self.persist(primary).await);
            tracing::debug!(relation = %d.id(), members = list.len(), "Stored id list");
        }
        Outcome::Ok(())
    }

    async fn save_contained_in(&self, state: &mut RelationState) -> Outcome<(), Error> {
        let d = self.descriptor;
        let fk = d.fk();
        let secondary = d.secondary();
        let primary_id = d.primary().id_column;

        if let Some(primary) = state.primary.as_mut() {
            try_outcome!(self.persist_missing(std::slice::from_mut(primary)).await);
        }
        let pid = match state.primary.as_ref().and_then(Record::id) {
            Some(id) => Some(try_result!(id.expect_text(primary_id)).to_string()),
            None => None,
        };
        let old = match state.primary_to_remove.as_ref().and_then(Record::id) {
            Some(id) => Some(try_result!(id.expect_text(primary_id)).to_string()),
            None => None,
        }
        .filter(|old| pid.as_ref() != Some(old));

        let touched: Vec<Value> = ids(state.secondary_records())
            .into_iter()
            .chain(ids(&state.secondary_to_remove))
            .collect();
        let fresh = if touched.is_empty() {
            Vec::new()
        } else {
            try_outcome!(
                self.on(secondary)
                    .is_in(secondary.id_column, touched)
                    .get(self.cx)
                    .await
            )
        };

        try_outcome!(self.checkpoint());
        for record in &state.secondary_to_remove {
            let Some(id) = record.id() else { continue };
            let Some(stored) = stored_value(&fresh, id, fk) else {
                continue;
            };
            let mut list = try_result!(idlist::parse(&stored, fk));
            let before = list.len();
            for owner in pid.iter().chain(old.iter()) {
                list.remove(owner);
            }
            if list.len() != before {
                try_outcome!(
                    self.on(secondary)
                        .equal(secondary.id_column, id.clone())
                        .update(self.cx, &[assign(fk, idlist::join(&list))])
                        .await
                );
            }
        }

        for record in state.secondary.iter_mut().flatten() {
            let stored = record.id().and_then(|id| stored_value(&fresh, id, fk));
            let base = stored.clone().unwrap_or_else(|| record.value(fk));
            let mut list = try_result!(idlist::parse(&base, fk));
            if let Some(old) = &old {
                list.remove(old);
            }
            if let Some(pid) = &pid {
                list.insert(pid.clone());
            }
            let value = idlist::join(&list);
            try_result!(record.set(fk, value.clone()));
            match (stored, record.id().cloned()) {
                (Some(previous), Some(id)) => {
                    if previous != value {
                        try_outcome!(
                            self.on(secondary)
                                .equal(secondary.id_column, id)
                                .update(self.cx, &[assign(fk, value)])
                                .await
                        );
                    }
                }
                _ => {
                    *record = try_outcome!(self.on(secondary).insert(self.cx, record.clone()).await);
                }
            }
        }
        tracing::debug!(relation = %d.id(), "Updated containing lists");
        Outcome::Ok(())
    }
}
