mod common;

use async_trait::async_trait;
use common::{admin_debug, ctx, doc, event_engine, memory_state, seed_events, user, Comment, Event, Note};
use crudmap::{
    CreateHook, CrudConfig, CrudEngine, EngineConfig, EngineError, ListParams, MemoryStore, PredefinedQuery,
    RelatedModels, RequestContext, RequestIdentity, Store, StoreTx,
};
use serde_json::{json, Value};

fn filtered(filter: Value) -> ListParams {
    ListParams {
        filter: Some(filter.to_string()),
        ..Default::default()
    }
}

async fn seeded() -> (MemoryStore, CrudEngine<Event>) {
    let (store, engine) = event_engine(CrudConfig::new()).await;
    seed_events(
        &store,
        &[(5, "alpha", 10, false), (5, "beta", 20, false), (6, "gamma", 30, false), (5, "delta", 40, true)],
    )
    .await;
    (store, engine)
}

fn titles(items: &[serde_json::Map<String, Value>]) -> Vec<&str> {
    items.iter().map(|i| i["title"].as_str().unwrap_or_default()).collect()
}

#[tokio::test]
async fn list_is_scoped_to_owner_and_hides_soft_deleted() {
    let (_store, engine) = seeded().await;

    let mine = engine.list(&ListParams::default(), &mut ctx(user(5))).await.unwrap();
    assert_eq!(titles(&mine.items), vec!["alpha", "beta"]);
    assert_eq!((mine.total_items, mine.pages), (2, 1));
    assert!(mine.items.iter().all(|i| !i.contains_key("secret")));
    assert_eq!(mine.items[0]["created_at"], json!(1_714_557_600));

    let adults = engine
        .list(&filtered(json!({"age": {"op": "gte", "v": 15}})), &mut ctx(user(5)))
        .await
        .unwrap();
    assert_eq!(titles(&adults.items), vec!["beta"]);

    let everyone = engine.list(&ListParams::default(), &mut ctx(RequestIdentity::admin())).await.unwrap();
    assert_eq!(everyone.total_items, 3);
    assert_eq!(everyone.items[0]["secret"], json!("secret of alpha"));

    let removed = engine
        .list(&filtered(json!({"is_removed": true})), &mut ctx(RequestIdentity::admin()))
        .await
        .unwrap();
    assert_eq!(titles(&removed.items), vec!["delta"]);
}

#[tokio::test]
async fn anonymous_list_is_an_empty_no_access_page() {
    let (_store, engine) = seeded().await;
    let page = engine
        .list(&ListParams::default(), &mut ctx(RequestIdentity::anonymous()))
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_items, 0);
    assert_eq!(page.msg.as_deref(), Some("no access"));
}

#[tokio::test]
async fn list_pages_and_sorts() {
    let (store, engine) = seeded().await;
    seed_events(&store, &[(5, "epsilon", 50, false), (5, "zeta", 60, false)]).await;
    let params = ListParams {
        sort_field: Some("age".into()),
        order: -1,
        per_page: 2,
        page: 2,
        ..Default::default()
    };
    let page = engine.list(&params, &mut ctx(user(5))).await.unwrap();
    assert_eq!(page.total_items, 4);
    assert_eq!(page.pages, 2);
    assert_eq!(titles(&page.items), vec!["beta", "alpha"]);
}

#[tokio::test]
async fn huge_page_number_returns_an_empty_page() {
    let (_store, engine) = seeded().await;
    let params = ListParams {
        page: i64::MAX,
        per_page: 1000,
        ..Default::default()
    };
    let page = engine.list(&params, &mut ctx(user(5))).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.total_items, 2);
}

#[tokio::test]
async fn lookup_matches_literal_substrings() {
    let (store, engine) = event_engine(CrudConfig::new()).await;
    seed_events(&store, &[(5, "abc", 1, false), (5, "100% done", 1, false), (5, "plain", 1, false)]).await;
    let lookup = |needle: &str| filtered(json!({"title": {"op": "lookup", "v": needle}}));

    let res = engine.list(&lookup("a_c"), &mut ctx(user(5))).await.unwrap();
    assert_eq!(res.total_items, 0);
    let res = engine.list(&lookup("%"), &mut ctx(user(5))).await.unwrap();
    assert_eq!(titles(&res.items), vec!["100% done"]);
    let res = engine.list(&lookup("la"), &mut ctx(user(5))).await.unwrap();
    assert_eq!(titles(&res.items), vec!["plain"]);
}

#[tokio::test]
async fn malformed_filter_is_a_validation_error() {
    let (_store, engine) = seeded().await;
    let params = ListParams {
        filter: Some("{not json".into()),
        ..Default::default()
    };
    let err = engine.list(&params, &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn predefined_query_runs_through_list() {
    let config = CrudConfig::new().predefined(PredefinedQuery::new("young", json!({"age": {"op": "lt", "v": 15}})));
    let (store, engine) = event_engine(config).await;
    seed_events(&store, &[(5, "kid", 8, false), (5, "adult", 40, false)]).await;
    let params = ListParams {
        query: Some("young".into()),
        filter: Some(json!({"title": "adult"}).to_string()),
        ..Default::default()
    };
    let page = engine.list(&params, &mut ctx(user(5))).await.unwrap();
    assert_eq!(titles(&page.items), vec!["kid"]);

    let unknown = ListParams {
        query: Some("old".into()),
        ..Default::default()
    };
    let err = engine.list(&unknown, &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::PredefinedQuery { code: "PQ1", .. }));
}

#[tokio::test]
async fn get_one_respects_ownership() {
    let (_store, engine) = seeded().await;

    let item = engine.get_one("2", &mut ctx(user(5))).await.unwrap();
    assert_eq!(item.item["title"], json!("beta"));
    assert!(!item.created);

    assert!(matches!(
        engine.get_one("3", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    // soft deleted rows are gone for everyone on item routes
    assert!(matches!(
        engine.get_one("4", &mut ctx(RequestIdentity::admin())).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.get_one("1", &mut ctx(RequestIdentity::anonymous())).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.get_one("abc", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::Validation(_)
    ));
}

#[tokio::test]
async fn create_forces_owner_to_caller() {
    let (store, engine) = event_engine(CrudConfig::new()).await;
    let created = engine
        .create(json!({"title": "party", "age": 20, "owner_id": 99, "id": 42}), &mut ctx(user(5)))
        .await
        .unwrap();
    assert!(created.created);
    assert_eq!(created.item["id"], json!(1));
    assert_eq!(created.item["owner_id"], json!(5));
    assert_eq!(created.item["created_at"], Value::Null);
    assert_eq!(created.item["tags"], json!([]));

    let rows = store.rows("events").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["owner_id"], json!(5));

    let by_admin = engine
        .create(json!({"title": "assigned", "owner_id": 8}), &mut ctx(RequestIdentity::admin()))
        .await
        .unwrap();
    assert_eq!(by_admin.item["owner_id"], json!(8));
}

#[tokio::test]
async fn create_rejects_invalid_bodies() {
    let (store, engine) = event_engine(CrudConfig::new()).await;
    let err = engine.create(json!({"title": "  "}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(m) if m.contains("must not be empty")));

    let err = engine.create(json!([1, 2]), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create(json!({"title": "x"}), &mut ctx(RequestIdentity::anonymous()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoAccess));
    assert!(store.rows("events").await.is_empty());
}

struct Stamp;

#[async_trait]
impl CreateHook<Event> for Stamp {
    async fn run(&self, _tx: &mut dyn StoreTx, _ctx: &RequestContext, record: &mut Event) -> Result<(), EngineError> {
        record.created_at = chrono::DateTime::from_timestamp(1_600_000_000, 0);
        Ok(())
    }
}

/// Writes an audit comment, then rejects titles starting with "bad".
struct Audit;

#[async_trait]
impl CreateHook<Event> for Audit {
    async fn run(&self, tx: &mut dyn StoreTx, _ctx: &RequestContext, record: &mut Event) -> Result<(), EngineError> {
        let row = doc(json!({"event_id": record.id, "body": "created", "hidden": false}));
        tx.insert("comments", "id", row).await?;
        if record.title.starts_with("bad") {
            return Err(EngineError::Validation("audit refused".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn create_hooks_share_the_transaction() {
    let config = CrudConfig::new().on_object_create(Stamp).on_after_create(Audit);
    let (store, engine) = event_engine(config).await;

    let ok = engine.create(json!({"title": "fine"}), &mut ctx(user(1))).await.unwrap();
    assert_eq!(ok.item["created_at"], json!(1_600_000_000));
    assert_eq!(store.rows("comments").await.len(), 1);

    let err = engine.create(json!({"title": "bad idea"}), &mut ctx(user(1))).await.unwrap_err();
    assert!(matches!(err, EngineError::Hook(_)));
    assert_eq!(store.rows("events").await.len(), 1);
    assert_eq!(store.rows("comments").await.len(), 1);
}

struct Explode;

#[async_trait]
impl CreateHook<Event> for Explode {
    async fn run(&self, tx: &mut dyn StoreTx, _ctx: &RequestContext, record: &mut Event) -> Result<(), EngineError> {
        tx.insert("comments", "id", doc(json!({"event_id": record.id, "body": "x", "hidden": false})))
            .await?;
        panic!("create hook exploded");
    }
}

#[tokio::test]
async fn panicking_create_hook_is_recovered_and_rolled_back() {
    for config in [
        CrudConfig::<Event>::new().on_object_create(Explode),
        CrudConfig::<Event>::new().on_after_create(Explode),
    ] {
        let (store, engine) = event_engine(config).await;
        let err = engine.create(json!({"title": "x"}), &mut ctx(user(1))).await.unwrap_err();
        match err {
            EngineError::PanicRecovered { cause, stack } => {
                assert!(cause.contains("create hook exploded"));
                assert!(stack.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.rows("events").await.is_empty());
        assert!(store.rows("comments").await.is_empty());
    }
}

#[tokio::test]
async fn update_leaves_omitted_fields_and_owner_alone() {
    let (store, engine) = seeded().await;
    let updated = engine
        .update("1", json!({"age": 33, "owner_id": 9}), &mut ctx(user(5)))
        .await
        .unwrap();
    assert_eq!(updated.item["age"], json!(33));
    assert_eq!(updated.item["title"], json!("alpha"));
    assert_eq!(updated.item["owner_id"], json!(5));

    let row = store.rows("events").await.remove(0);
    assert_eq!(row["age"], json!(33));
    assert_eq!(row["owner_id"], json!(5));
    assert_eq!(row["secret"], json!("secret of alpha"));
}

#[tokio::test]
async fn update_writes_only_changed_fields() {
    let (_store, engine) = seeded().await;
    let mut c = ctx(admin_debug());
    let updated = engine
        .update("2", json!({"title": "beta", "age": 21}), &mut c)
        .await
        .unwrap();
    let logs = updated.logs.unwrap();
    assert!(logs.iter().any(|l| l == r#"update: changed fields ["Age"]"#));
}

#[tokio::test]
async fn update_of_foreign_or_missing_object_is_not_found() {
    let (_store, engine) = seeded().await;
    let err = engine.update("3", json!({"age": 1}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    let err = engine.update("77", json!({"age": 1}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn update_hook_veto_rolls_back() {
    let (store, engine) = seeded().await;

    let err = engine.update("1", json!({"title": "veto"}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Hook(_)));
    assert_eq!(store.rows("events").await[0]["title"], json!("alpha"));

    let err = engine.update("1", json!({"title": "explode"}), &mut ctx(user(5))).await.unwrap_err();
    match err {
        EngineError::PanicRecovered { cause, stack } => {
            assert!(cause.contains("update hook exploded"));
            assert!(stack.is_some_and(|s| !s.is_empty()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(store.rows("events").await[0]["title"], json!("alpha"));
}

#[tokio::test]
async fn delete_sets_soft_delete_flag() {
    let (store, engine) = seeded().await;
    let deleted = engine.delete("1", &mut ctx(user(5))).await.unwrap();
    assert!(deleted.soft);
    assert_eq!(deleted.id, json!(1));

    let rows = store.rows("events").await;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["is_removed"], json!(true));
    assert!(matches!(
        engine.get_one("1", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::NotFound(_)
    ));

    assert!(matches!(
        engine.delete("3", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

async fn note_engine() -> (MemoryStore, CrudEngine<Note>) {
    let (store, state) = memory_state(EngineConfig::default()).await;
    let engine = CrudEngine::new(state, CrudConfig::<Note>::new().store_relation("note_users")).unwrap();
    (store, engine)
}

#[tokio::test]
async fn relation_owned_records_follow_relation_rows() {
    let (store, engine) = note_engine().await;

    let created = engine.create(json!({"text": "hi"}), &mut ctx(user(5))).await.unwrap();
    assert_eq!(created.item["id"], json!(1));
    let rel = store.rows("note_users").await;
    assert_eq!(rel.len(), 1);
    assert_eq!((rel[0]["user_id"].clone(), rel[0]["object_id"].clone()), (json!(5), json!(1)));

    engine.create(json!({"text": "other"}), &mut ctx(user(6))).await.unwrap();

    let mine = engine.list(&ListParams::default(), &mut ctx(user(5))).await.unwrap();
    assert_eq!(mine.total_items, 1);
    assert_eq!(mine.items[0]["text"], json!("hi"));
    let all = engine.list(&ListParams::default(), &mut ctx(RequestIdentity::admin())).await.unwrap();
    assert_eq!(all.total_items, 2);

    assert!(engine.get_one("1", &mut ctx(user(5))).await.is_ok());
    assert!(matches!(
        engine.get_one("1", &mut ctx(user(6))).await.unwrap_err(),
        EngineError::Forbidden(_)
    ));

    let anon = engine
        .create(json!({"text": "nobody"}), &mut ctx(RequestIdentity::anonymous()))
        .await
        .unwrap_err();
    assert!(matches!(anon, EngineError::NoAccess));

    let deleted = engine.delete("1", &mut ctx(user(5))).await.unwrap();
    assert!(!deleted.soft);
    assert_eq!(store.rows("notes").await.len(), 1);
    assert_eq!(store.rows("note_users").await.len(), 1);
}

async fn seed_comments(store: &MemoryStore) {
    let mut tx = store.begin().await.unwrap();
    for (event_id, body, hidden) in [(1, "first", false), (1, "hidden", true), (2, "elsewhere", false), (1, "second", false)] {
        tx.insert("comments", "id", doc(json!({"event_id": event_id, "body": body, "hidden": hidden})))
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn related_items_are_fetched_for_visible_parents() {
    let config = CrudConfig::new().related(
        "comments",
        RelatedModels::<Event, Comment>::new("event_id", |e| Some(e.id.into())),
    );
    let (store, engine) = event_engine(config).await;
    seed_events(&store, &[(5, "alpha", 10, false), (6, "beta", 20, false)]).await;
    seed_comments(&store).await;

    let visible = engine.related("1", "comments", &mut ctx(user(5))).await.unwrap();
    let bodies: Vec<_> = visible.items.iter().map(|c| c["body"].clone()).collect();
    assert_eq!(bodies, vec![json!("first"), json!("second")]);
    assert_eq!((visible.total_items, visible.pages), (2, 1));

    let as_admin = engine.related("1", "comments", &mut ctx(RequestIdentity::admin())).await.unwrap();
    assert_eq!(as_admin.total_items, 3);

    assert!(matches!(
        engine.related("2", "comments", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
    assert!(matches!(
        engine.related("1", "likes", &mut ctx(user(5))).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn permission_checks_gate_reads_and_writes() {
    let config = CrudConfig::new()
        .read_permission(|c, _| c.identity.is_admin || c.identity.role_group >= 1)
        .write_permission(|_, record| record.map_or(true, |r: &Event| r.title != "frozen"));
    let (store, engine) = event_engine(config).await;
    seed_events(&store, &[(5, "frozen", 10, false), (5, "open", 10, false)]).await;

    let err = engine.list(&ListParams::default(), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(m) if m == "no read permission"));
    let editor = RequestIdentity::user(5, 1);
    assert_eq!(
        engine.list(&ListParams::default(), &mut ctx(editor.clone())).await.unwrap().total_items,
        2
    );

    let err = engine.update("1", json!({"age": 11}), &mut ctx(editor.clone())).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(m) if m == "no write permission"));
    assert!(engine.update("2", json!({"age": 11}), &mut ctx(editor.clone())).await.is_ok());
    let err = engine.delete("1", &mut ctx(editor)).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

/// Appends the caller's membership role to the comment body.
struct RoleStamp;

#[async_trait]
impl CreateHook<Comment> for RoleStamp {
    async fn run(&self, _tx: &mut dyn StoreTx, ctx: &RequestContext, record: &mut Comment) -> Result<(), EngineError> {
        if let Some(role) = ctx.relation_role {
            record.body = format!("{} (role {})", record.body, role);
        }
        Ok(())
    }
}

#[tokio::test]
async fn permission_table_grants_rights_through_the_parent() {
    let (store, state) = memory_state(EngineConfig::default()).await;
    let mut tx = store.begin().await.unwrap();
    for (user_id, role) in [(5, 2), (7, 0)] {
        tx.insert("event_members", "id", doc(json!({"user_id": user_id, "object_id": 1, "role": role})))
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
    let config = CrudConfig::<Comment>::new()
        .permission_table("event_members", |c| Some(c.event_id.into()))
        .write_permission(|c, _| c.relation_role.map_or(true, |role| role >= 1))
        .on_object_create(RoleStamp);
    let engine = CrudEngine::new(state, config).unwrap();

    let created = engine
        .create(json!({"event_id": 1, "body": "hi"}), &mut ctx(user(5)))
        .await
        .unwrap();
    assert_eq!(created.item["body"], json!("hi (role 2)"));

    let err = engine.create(json!({"event_id": 1, "body": "x"}), &mut ctx(user(6))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(m) if m == "no right to perform action"));
    let err = engine.create(json!({"event_id": 1, "body": "x"}), &mut ctx(user(7))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(m) if m == "no write permission"));
    let err = engine.create(json!({"event_id": 2, "body": "x"}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    assert!(engine.update("1", json!({"body": "edited"}), &mut ctx(user(5))).await.is_ok());
    let err = engine.update("1", json!({"event_id": 2}), &mut ctx(user(5))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    let err = engine.delete("1", &mut ctx(user(6))).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    assert!(engine
        .create(json!({"event_id": 9, "body": "admin"}), &mut ctx(RequestIdentity::admin()))
        .await
        .is_ok());
    assert_eq!(store.rows("comments").await.len(), 2);
    assert_eq!(store.rows("comments").await[0]["body"], json!("edited"));
}

#[tokio::test]
async fn unregistered_type_cannot_get_an_engine() {
    let (_store, state) = memory_state(EngineConfig::default()).await;
    let state = crudmap::AppState::new(
        state.store.clone(),
        std::sync::Arc::new(crudmap::SchemaRegistry::new()),
        EngineConfig::default(),
    );
    assert!(matches!(
        CrudEngine::<Event>::new(state, CrudConfig::new()),
        Err(EngineError::NotRegistered(_))
    ));
}
