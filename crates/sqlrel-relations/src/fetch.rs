//! Re-deriving a relation from storage.

use std::collections::{BTreeMap, BTreeSet};

use asupersync::{Cx, Outcome};
use sqlrel_core::{EntityType, Error, OrderBy, Record, RecordStore, Value, try_outcome, try_result};
use sqlrel_query::QueryBuilder;

use crate::descriptor::{RelationDescriptor, RelationKind};
use crate::idlist;

/// Endpoints as found in storage.
#[derive(Debug)]
pub(crate) struct Reloaded {
    pub(crate) primary: Option<Record>,
    pub(crate) secondary: Option<Vec<Record>>,
}

pub(crate) struct ReloadFetcher<'a, S: RecordStore> {
    cx: &'a Cx,
    store: &'a S,
    descriptor: &'a RelationDescriptor,
}

impl<'a, S: RecordStore> ReloadFetcher<'a, S> {
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

    fn by_id(entity: &'static EntityType) -> OrderBy {
        OrderBy::asc(entity.id_column)
    }

    fn empty(&self) -> Error {
        Error::empty_relation(format!(
            "nothing to reload {} from: neither side is stored",
            self.descriptor.id()
        ))
    }

    pub(crate) async fn fetch(
        &self,
        primary: Option<Record>,
        secondary: Option<Vec<Record>>,
    ) -> Outcome<Reloaded, Error> {
        if let Some(reason) = self.cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        match self.descriptor.kind() {
            RelationKind::OwnsOne | RelationKind::OwnsMany => {
                self.fetch_owner(primary, secondary).await
            }
            RelationKind::BelongsToOne => self.fetch_belongs_to(primary, secondary).await,
            RelationKind::ManyToMany => self.fetch_many_to_many(primary, secondary).await,
            RelationKind::SetContains => self.fetch_contains(primary, secondary).await,
            RelationKind::SetContainedIn => self.fetch_contained_in(primary).await,
        }
    }

    /// The stored copy of `record`, or `record` itself when it has no
    /// stored counterpart.
    async fn refresh(&self, record: &Record) -> Outcome<Record, Error> {
        let fresh = match record.id() {
            Some(id) => try_outcome!(self.on(record.entity()).find(self.cx, id).await),
            None => None,
        };
        Outcome::Ok(fresh.unwrap_or_else(|| record.clone()))
    }

    async fn fetch_owner(
        &self,
        primary: Option<Record>,
        secondary: Option<Vec<Record>>,
    ) -> Outcome<Reloaded, Error> {
        let d = self.descriptor;
        let fk = d.fk();
        if let Some(pid) = primary.as_ref().and_then(|p| p.id().cloned()) {
            let rows = try_outcome!(
                self.on(d.secondary())
                    .equal(fk, pid)
                    .order_by(Self::by_id(d.secondary()))
                    .get(self.cx)
                    .await
            );
            let secondary = if d.kind().is_collection() {
                Some(rows)
            } else {
                rows.into_iter().next().map(|row| vec![row])
            };
            return Outcome::Ok(Reloaded { primary, secondary });
        }

        let anchor = secondary
            .iter()
            .flatten()
            .map(|s| s.value(fk))
            .find(|owner| !owner.is_null());
        if let Some(owner) = anchor {
            let primary = try_outcome!(self.on(d.primary()).find(self.cx, &owner).await);
            return Outcome::Ok(Reloaded { primary, secondary });
        }
        Outcome::Err(self.empty())
    }

    async fn fetch_belongs_to(
        &self,
        primary: Option<Record>,
        secondary: Option<Vec<Record>>,
    ) -> Outcome<Reloaded, Error> {
        let d = self.descriptor;
        let fk = d.fk();
        if let Some(primary) = &primary {
            let current = try_outcome!(self.refresh(primary).await);
            let owner = current.value(fk);
            if current.has_id() || !owner.is_null() {
                let secondary = if owner.is_null() {
                    None
                } else {
                    try_outcome!(self.on(d.secondary()).find(self.cx, &owner).await).map(|s| vec![s])
                };
                return Outcome::Ok(Reloaded {
                    primary: Some(current),
                    secondary,
                });
            }
        }

        let sid = secondary
            .iter()
            .flatten()
            .find_map(|s| s.id().cloned());
        if let Some(sid) = sid {
            let primary = try_outcome!(
                self.on(d.primary())
                    .equal(fk, sid)
                    .order_by(Self::by_id(d.primary()))
                    .first(self.cx)
                    .await
            );
            return Outcome::Ok(Reloaded { primary, secondary });
        }
        Outcome::Err(self.empty())
    }

    async fn fetch_many_to_many(
        &self,
        primary: Option<Record>,
        secondary: Option<Vec<Record>>,
    ) -> Outcome<Reloaded, Error> {
        let d = self.descriptor;
        let Some(pivot) = d.pivot() else {
            return Outcome::Err(Error::invalid_descriptor(format!(
                "{} has no pivot table",
                d.id()
            )));
        };
        let pcol = pivot.primary_column.as_str();
        let scol = pivot.secondary_column.as_str();

        if let Some(pid) = primary.as_ref().and_then(|p| p.id().cloned()) {
            let links = try_outcome!(self.on(pivot.entity).equal(pcol, pid).get(self.cx).await);
            let linked: Vec<Value> = links
                .iter()
                .map(|row| row.value(scol))
                .filter(|sid| !sid.is_null())
                .collect();
            let rows = try_outcome!(
                self.on(d.secondary())
                    .is_in(d.secondary().id_column, linked)
                    .order_by(Self::by_id(d.secondary()))
                    .get(self.cx)
                    .await
            );
            return Outcome::Ok(Reloaded {
                primary,
                secondary: Some(rows),
            });
        }

        let sids: Vec<Value> = secondary
            .iter()
            .flatten()
            .filter_map(|s| s.id().cloned())
            .collect();
        if sids.is_empty() {
            return Outcome::Err(self.empty());
        }
        let wanted: BTreeSet<String> = sids.iter().map(Value::cache_key).collect();
        let links = try_outcome!(
            self.on(pivot.entity)
                .is_in(scol, sids)
                .order_by(OrderBy::asc(pcol))
                .get(self.cx)
                .await
        );
        // The primary linked to every known secondary.
        let mut by_primary: BTreeMap<String, (Value, BTreeSet<String>)> = BTreeMap::new();
        for link in &links {
            let pid = link.value(pcol);
            by_primary
                .entry(pid.cache_key())
                .or_insert_with(|| (pid, BTreeSet::new()))
                .1
                .insert(link.value(scol).cache_key());
        }
        let owner = by_primary
            .into_values()
            .find(|(_, linked)| wanted.is_subset(linked))
            .map(|(pid, _)| pid);
        let primary = match owner {
            Some(pid) => try_outcome!(self.on(d.primary()).find(self.cx, &pid).await),
            None => None,
        };
        Outcome::Ok(Reloaded { primary, secondary })
    }

    async fn fetch_contains(
        &self,
        primary: Option<Record>,
        secondary: Option<Vec<Record>>,
    ) -> Outcome<Reloaded, Error> {
        let d = self.descriptor;
        let fk = d.fk();
        if let Some(primary) = &primary {
            let current = try_outcome!(self.refresh(primary).await);
            let list = current.value(fk);
            if current.has_id() || !list.is_null() {
                let ids = try_result!(idlist::parse(&list, fk));
                let rows = try_outcome!(
                    self.on(d.secondary())
                        .is_in(d.secondary().id_column, ids)
                        .order_by(Self::by_id(d.secondary()))
                        .get(self.cx)
                        .await
                );
                return Outcome::Ok(Reloaded {
                    primary: Some(current),
                    secondary: Some(rows),
                });
            }
        }

        let records = secondary.as_deref().unwrap_or(&[]);
        if !records.is_empty() && records.iter().all(Record::has_id) {
            let id_column = d.secondary().id_column;
            let mut ids = BTreeSet::new();
            for record in records {
                ids.insert(try_result!(record.value(id_column).expect_text(id_column)).to_string());
            }
            let primary = try_outcome!(
                self.on(d.primary())
                    .equal(fk, idlist::join(&ids))
                    .order_by(Self::by_id(d.primary()))
                    .first(self.cx)
                    .await
            );
            return Outcome::Ok(Reloaded { primary, secondary });
        }
        Outcome::Err(self.empty())
    }

    async fn fetch_contained_in(&self, primary: Option<Record>) -> Outcome<Reloaded, Error> {
        let d = self.descriptor;
        let fk = d.fk();
        let Some(pid) = primary.as_ref().and_then(Record::id) else {
            return Outcome::Err(self.empty());
        };
        let pid = try_result!(pid.expect_text(d.primary().id_column)).to_string();
        let rows = try_outcome!(
            self.on(d.secondary())
                .contains(fk, pid.clone())
                .order_by(Self::by_id(d.secondary()))
                .get(self.cx)
                .await
        );
        // LIKE also matches ids that merely share a substring.
        let rows = rows
            .into_iter()
            .filter(|row| idlist::contains(&row.value(fk), &pid))
            .collect();
        Outcome::Ok(Reloaded {
            primary,
            secondary: Some(rows),
        })
    }
}
