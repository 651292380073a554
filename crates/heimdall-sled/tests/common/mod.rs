//! Shared fixtures for the sled-backed policy tests.

#![allow(dead_code)]

use std::sync::Arc;

use heimdall_core::{FieldGrant, Guard, GuardConfig, Rules, Store, FETCH};
use heimdall_proto::{Cardinality, EntityDef, FilterExpr, Query, Record, RelationDef, Value};
use heimdall_sled::{SledConfig, SledStore};

/// Security context used throughout the tests.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: i64,
    pub admin: bool,
}

impl CurrentUser {
    pub fn admin(id: i64) -> Self {
        Self { id, admin: true }
    }

    pub fn member(id: i64) -> Self {
        Self { id, admin: false }
    }
}

pub struct TestContext {
    pub store: Arc<SledStore>,
    pub guard: Guard<CurrentUser>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    pub fn with_config(config: GuardConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(SledConfig::new(dir.path()).with_flush_every_ms(None))
            .unwrap()
            .with_entity(article_def())
            .with_entity(EntityDef::new("User").with_fields(["name", "admin"]))
            .with_entity(
                EntityDef::new("Comment")
                    .with_fields(["article_id", "author_id", "body", "hidden"])
                    .with_relation(RelationDef::belongs_to("article", "Article", "article_id"))
                    .with_relation(RelationDef::belongs_to("author", "User", "author_id")),
            );
        let store = Arc::new(store);
        let guard = Guard::with_config(store.clone(), config);
        Self {
            store,
            guard,
            _dir: dir,
        }
    }

    /// Insert a row directly, bypassing every policy.
    pub fn insert(&self, entity: &str, attrs: &[(&str, Value)]) -> i64 {
        let mut record = Record::new(entity, "id");
        for (field, value) in attrs {
            record.set(*field, value.clone());
        }
        self.store.insert(&record).unwrap().as_i64().unwrap()
    }

    pub fn article(&self, content: &str, owner: i64, secrecy_level: i64) -> i64 {
        self.insert(
            "Article",
            &[
                ("content", Value::from(content)),
                ("owner_id", Value::Int(owner)),
                ("secrecy_level", Value::Int(secrecy_level)),
            ],
        )
    }

    pub fn comment(&self, article: i64, author: i64, body: &str, hidden: bool) -> i64 {
        self.insert(
            "Comment",
            &[
                ("article_id", Value::Int(article)),
                ("author_id", Value::Int(author)),
                ("body", Value::from(body)),
                ("hidden", Value::Bool(hidden)),
            ],
        )
    }

    /// Raw row, bypassing every policy.
    pub fn raw(&self, entity: &str, id: i64) -> Option<Record> {
        self.store
            .select(&Query::new(entity).where_eq("id", id))
            .unwrap()
            .into_iter()
            .next()
    }

    pub fn row_count(&self, entity: &str) -> u64 {
        self.store.count(&Query::new(entity)).unwrap()
    }

    pub fn register_articles(&self) {
        self.guard.register("Article", article_rules).unwrap();
    }

    pub fn register_comments(&self) {
        self.guard
            .register("Comment", |rules: &mut Rules, user: &CurrentUser, _: Option<&Record>| {
                let user_id = user.id;
                rules.scope(FETCH, |q| q.where_eq("hidden", false));
                rules.scope("delete", move |q| q.where_eq("author_id", user_id));
                rules.can("view", ["article_id", "author_id", "body"]);
                rules.can(
                    "create",
                    vec![
                        FieldGrant::allow("article_id"),
                        FieldGrant::allow("body"),
                        FieldGrant::fixture("author_id", user_id),
                    ],
                );
            })
            .unwrap();
    }
}

pub fn article_def() -> EntityDef {
    EntityDef::new("Article")
        .with_fields(["content", "owner_id", "secrecy_level"])
        .with_relation(RelationDef::belongs_to("owner", "User", "owner_id"))
        .with_relation(RelationDef::has_many("comments", "Comment", "article_id"))
        .with_relation(RelationDef::custom(
            "siblings",
            "Article",
            Cardinality::Many,
            |article| Query::new("Article").where_eq("owner_id", article.value("owner_id")),
        ))
        .with_scope("low_secrecy", |q| q.filter(FilterExpr::lt("secrecy_level", 2)))
}

/// Admins see and write everything. Members fetch articles below secrecy
/// level 5, see the level of their own articles only, create with themselves
/// as owner and may only edit content. No delete scope is defined.
pub fn article_rules(rules: &mut Rules, user: &CurrentUser, article: Option<&Record>) {
    if user.admin {
        rules.scope(FETCH, |q| q);
        rules.can_all(["view", "create", "update"]);
        return;
    }
    rules.scope(FETCH, |q| q.filter(FilterExpr::lt("secrecy_level", 5)));
    rules.can("view", ["content", "owner_id"]);
    if article.is_some_and(|a| a.value("owner_id") == Value::Int(user.id)) {
        rules.can("view", "secrecy_level");
    }
    rules.can(
        "create",
        vec![
            FieldGrant::allow("content"),
            FieldGrant::fixture("owner_id", user.id),
        ],
    );
    rules.can("update", "content");
}
