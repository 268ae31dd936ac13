use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use sqlrel::prelude::*;
use sqlrel::{RelationDescriptor, RelationErrorKind, StatementKind};

static OWNER: EntityType = EntityType::new("Owner", "owners", &["id", "name", "owned_ids"]);
static OWNED: EntityType =
    EntityType::new("Owned", "owned", &["id", "name", "owner_id", "owner_ids"]);
static USER: EntityType = EntityType::new("User", "users", &["id", "name"]);
static ROLE: EntityType = EntityType::new("Role", "roles", &["id", "name"]);
static USER_ROLE: EntityType =
    EntityType::new("UserRole", "user_roles", &["id", "user_id", "role_id"]);

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn record(entity: &'static EntityType, id: &str) -> Record {
    Record::new(entity).with("id", id).with("name", id)
}

fn all_kinds() -> Vec<RelationDescriptor> {
    vec![
        RelationDescriptor::new(RelationKind::OwnsOne, &OWNER, &OWNED, "owner_id").unwrap(),
        RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap(),
        RelationDescriptor::new(RelationKind::BelongsToOne, &OWNED, &OWNER, "owner_id").unwrap(),
        RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "role_id").unwrap(),
        RelationDescriptor::new(RelationKind::SetContains, &OWNER, &OWNED, "owned_ids").unwrap(),
        RelationDescriptor::new(RelationKind::SetContainedIn, &OWNER, &OWNED, "owner_ids")
            .unwrap(),
    ]
}

/// A primary with an id and a secondary value of the right shape.
fn sample(descriptor: &RelationDescriptor) -> (Record, Secondary) {
    let primary = record(descriptor.primary(), "p1");
    let secondary = if descriptor.kind().is_collection() {
        Secondary::Many(vec![
            record(descriptor.secondary(), "s1"),
            record(descriptor.secondary(), "s2"),
        ])
    } else {
        Secondary::One(record(descriptor.secondary(), "s1"))
    };
    (primary, secondary)
}

fn secondary_ids(state: &RelationState) -> Vec<Value> {
    let mut ids: Vec<Value> = state
        .secondary_records()
        .iter()
        .map(|r| r.value("id"))
        .collect();
    ids.sort_by(Value::sort_cmp);
    ids
}

#[test]
fn save_without_endpoints_is_incomplete_for_every_kind() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        for descriptor in all_kinds() {
            let store = MemoryStore::new();
            let descriptor = Arc::new(descriptor);
            let (primary, _) = sample(&descriptor);

            let mut empty = RelationState::new(Arc::clone(&descriptor));
            let Outcome::Err(err) = empty.save(&cx, &store).await else {
                panic!("{} saved without endpoints", descriptor.kind());
            };
            assert_eq!(err.relation_kind(), Some(RelationErrorKind::IncompleteRelation));

            let mut primary_only = RelationState::for_primary(descriptor, primary).unwrap();
            let Outcome::Err(err) = primary_only.save(&cx, &store).await else {
                panic!("saved without a secondary");
            };
            assert_eq!(err.relation_kind(), Some(RelationErrorKind::IncompleteRelation));
            assert!(store.statements().is_empty());
        }
    });
}

#[test]
fn assigned_secondary_reads_back_before_save() {
    for descriptor in all_kinds() {
        let descriptor = Arc::new(descriptor);
        let (primary, secondary) = sample(&descriptor);
        let mut state = RelationState::for_primary(descriptor, primary).unwrap();
        state.set_secondary(Some(secondary.clone())).unwrap();
        assert_eq!(state.secondary(), Some(secondary));
    }
}

#[test]
fn save_clears_buffers_and_reload_restores_every_kind() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        for descriptor in all_kinds() {
            let store = MemoryStore::new();
            let descriptor = Arc::new(descriptor);
            let kind = descriptor.kind();
            let (primary, secondary) = sample(&descriptor);

            let mut state = RelationState::for_primary(Arc::clone(&descriptor), primary.clone()).unwrap();
            state.set_secondary(Some(secondary)).unwrap();
            assert!(state.has_pending());
            unwrap_outcome(state.save(&cx, &store).await);

            assert!(state.secondary_to_add().is_empty(), "{kind}");
            assert!(state.secondary_to_remove().is_empty(), "{kind}");
            assert!(state.primary_to_add().is_none(), "{kind}");
            assert!(state.primary_to_remove().is_none(), "{kind}");
            assert!(!store.in_transaction());

            let expected = secondary_ids(&state);
            let mut fresh = RelationState::for_primary(descriptor, primary).unwrap();
            unwrap_outcome(fresh.reload(&cx, &store).await);
            assert_eq!(secondary_ids(&fresh), expected, "{kind}");
        }
    });
}

#[test]
fn owns_many_reload_restores_the_saved_set() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store
        .seed([record(&OWNER, "p"), record(&OWNED, "b"), record(&OWNED, "a")])
        .unwrap();
    let descriptor =
        Arc::new(RelationDescriptor::new(RelationKind::OwnsMany, &OWNER, &OWNED, "owner_id").unwrap());

    rt.block_on(async {
        let mut state = RelationState::for_primary(Arc::clone(&descriptor), record(&OWNER, "p")).unwrap();
        state
            .set_secondary_many(vec![record(&OWNED, "b"), record(&OWNED, "a")])
            .unwrap();
        unwrap_outcome(state.save(&cx, &store).await);

        // pending edits are discarded by a reload
        state.set_secondary_many(Vec::new()).unwrap();
        unwrap_outcome(state.reload(&cx, &store).await);
        assert!(!state.has_pending());
        assert_eq!(secondary_ids(&state), vec![Value::from("a"), Value::from("b")]);

        // the primary can be derived back from a secondary alone
        let mut inverse = RelationState::new(descriptor);
        inverse
            .set_secondary_many(vec![store.peek(&OWNED, "a").unwrap()])
            .unwrap();
        unwrap_outcome(inverse.reload(&cx, &store).await);
        assert_eq!(inverse.primary().map(|p| p.value("id")), Some(Value::from("p")));
    });
}

#[test]
fn belongs_to_persists_an_unsaved_owner_first() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::BelongsToOne, &OWNED, &OWNER, "owner_id").unwrap(),
    );

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&OWNED, "d1")).unwrap();
        state
            .set_secondary_one(Some(Record::new(&OWNER).with("name", "acme")))
            .unwrap();
        unwrap_outcome(state.save(&cx, &store).await);

        let owner_id = state.secondary_records()[0]
            .id()
            .cloned()
            .expect("owner id assigned on save");
        assert_eq!(state.primary().unwrap().value("owner_id"), owner_id);
        assert_eq!(store.peek(&OWNED, "d1").unwrap().value("owner_id"), owner_id);
        assert_eq!(store.peek(&OWNER, owner_id).unwrap().value("name"), Value::from("acme"));
    });
}

#[test]
fn belongs_to_reassignment_moves_the_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store
        .seed([
            record(&OWNER, "o1"),
            record(&OWNER, "o2"),
            record(&OWNED, "d1").with("owner_id", "o1"),
        ])
        .unwrap();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::BelongsToOne, &OWNED, &OWNER, "owner_id").unwrap(),
    );

    rt.block_on(async {
        let mut state =
            RelationState::for_primary(descriptor, store.peek(&OWNED, "d1").unwrap()).unwrap();
        unwrap_outcome(state.reload(&cx, &store).await);
        assert_eq!(
            state.secondary(),
            Some(Secondary::One(store.peek(&OWNER, "o1").unwrap()))
        );

        state.set_secondary_one(Some(record(&OWNER, "o2"))).unwrap();
        assert_eq!(state.secondary_to_remove().len(), 1);
        unwrap_outcome(state.save(&cx, &store).await);
        assert_eq!(store.peek(&OWNED, "d1").unwrap().value("owner_id"), Value::from("o2"));

        state.set_secondary_one(None).unwrap();
        unwrap_outcome(state.save(&cx, &store).await);
        assert!(store.peek(&OWNED, "d1").unwrap().value("owner_id").is_null());
    });
}

#[test]
fn owns_one_unlinks_a_reassigned_then_cleared_secondary() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store
        .seed([record(&OWNER, "o1"), record(&OWNED, "x").with("owner_id", "o1")])
        .unwrap();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::OwnsOne, &OWNER, &OWNED, "owner_id").unwrap(),
    );

    rt.block_on(async {
        let mut state =
            RelationState::for_primary(descriptor, store.peek(&OWNER, "o1").unwrap()).unwrap();
        unwrap_outcome(state.reload(&cx, &store).await);
        let x = store.peek(&OWNED, "x").unwrap();

        state.set_secondary_one(Some(x)).unwrap();
        state.set_secondary_one(None).unwrap();
        assert_eq!(state.secondary_to_remove().len(), 1);
        unwrap_outcome(state.save(&cx, &store).await);
        assert!(store.peek(&OWNED, "x").unwrap().value("owner_id").is_null());
    });
}

#[test]
fn many_to_many_save_is_idempotent() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let descriptor = Arc::new(
        RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "role_id").unwrap(),
    );

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&USER, "u1")).unwrap();
        state.set_secondary_many(vec![record(&ROLE, "admin")]).unwrap();
        unwrap_outcome(state.save(&cx, &store).await);
        unwrap_outcome(state.save(&cx, &store).await);

        let rows = store.rows(&USER_ROLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("user_id"), Value::from("u1"));
        assert_eq!(rows[0].value("role_id"), Value::from("admin"));
    });
}

#[test]
fn many_to_many_reassigning_the_primary_moves_pivot_rows() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let descriptor = Arc::new(
        RelationDescriptor::many_to_many(&USER, &ROLE, &USER_ROLE, "user_id", "role_id").unwrap(),
    );

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&USER, "u1")).unwrap();
        state.set_secondary_many(vec![record(&ROLE, "admin")]).unwrap();
        unwrap_outcome(state.save(&cx, &store).await);

        state.set_primary(Some(record(&USER, "u2"))).unwrap();
        unwrap_outcome(state.save(&cx, &store).await);

        let rows = store.rows(&USER_ROLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("user_id"), Value::from("u2"));
    });
}

#[test]
fn set_contains_stores_a_sorted_list() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::SetContains, &OWNER, &OWNED, "owned_ids").unwrap(),
    );

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&OWNER, "o1")).unwrap();
        state
            .set_secondary_many(vec![record(&OWNED, "x9"), record(&OWNED, "a1")])
            .unwrap();
        unwrap_outcome(state.save(&cx, &store).await);
        assert_eq!(
            store.peek(&OWNER, "o1").unwrap().value("owned_ids"),
            Value::from("a1,x9")
        );

        state.set_secondary_many(Vec::new()).unwrap();
        unwrap_outcome(state.save(&cx, &store).await);
        assert!(store.peek(&OWNER, "o1").unwrap().value("owned_ids").is_null());
    });
}

#[test]
fn set_contained_in_rewrites_each_list_individually() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store
        .seed([
            record(&OWNER, "o1"),
            record(&OWNED, "d1").with("owner_ids", "o0"),
            record(&OWNED, "d2"),
            record(&OWNED, "d3").with("owner_ids", "o0,o1"),
        ])
        .unwrap();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::SetContainedIn, &OWNER, &OWNED, "owner_ids").unwrap(),
    );
    let list = |id: &str| store.peek(&OWNED, id).unwrap().value("owner_ids");

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&OWNER, "o1")).unwrap();
        state
            .set_secondary_many(vec![
                store.peek(&OWNED, "d1").unwrap(),
                store.peek(&OWNED, "d2").unwrap(),
                store.peek(&OWNED, "d3").unwrap(),
            ])
            .unwrap();
        store.clear_log();
        unwrap_outcome(state.save(&cx, &store).await);

        assert_eq!(list("d1"), Value::from("o0,o1"));
        assert_eq!(list("d2"), Value::from("o1"));
        assert_eq!(list("d3"), Value::from("o0,o1"));
        // d3 already listed o1
        assert_eq!(store.count_statements(StatementKind::Update, "owned"), 2);

        state
            .set_secondary_many(vec![store.peek(&OWNED, "d1").unwrap()])
            .unwrap();
        store.clear_log();
        unwrap_outcome(state.save(&cx, &store).await);

        assert_eq!(list("d1"), Value::from("o0,o1"));
        assert!(list("d2").is_null());
        assert_eq!(list("d3"), Value::from("o0"));
        assert_eq!(store.count_statements(StatementKind::Update, "owned"), 2);
    });
}

#[test]
fn set_contained_in_reload_matches_ids_exactly() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();
    store
        .seed([
            record(&OWNED, "x").with("owner_ids", "a10"),
            record(&OWNED, "y").with("owner_ids", "a1,b2"),
        ])
        .unwrap();
    let descriptor = Arc::new(
        RelationDescriptor::new(RelationKind::SetContainedIn, &OWNER, &OWNED, "owner_ids").unwrap(),
    );

    rt.block_on(async {
        let mut state = RelationState::for_primary(descriptor, record(&OWNER, "a1")).unwrap();
        unwrap_outcome(state.reload(&cx, &store).await);
        assert_eq!(secondary_ids(&state), vec![Value::from("y")]);
    });
}

#[test]
fn reload_without_an_anchor_is_empty() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let store = MemoryStore::new();

    rt.block_on(async {
        for descriptor in all_kinds() {
            let mut state = RelationState::new(Arc::new(descriptor));
            let Outcome::Err(err) = state.reload(&cx, &store).await else {
                panic!("reloaded without an anchor");
            };
            assert!(err.is_empty_relation());
            assert!(!state.is_hydrated());
        }
    });
}
