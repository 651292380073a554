//! Relations, eager loading, named scopes and validators through the proxies.

mod common;

use common::{article_rules, CurrentUser, TestContext};
use heimdall_core::{
    FieldGrant, GuardConfig, GuardError, RawRelated, Related, Rules, SaveOptions, Store, FETCH,
};
use heimdall_proto::{Record, Value};

fn blog() -> (TestContext, i64) {
    let ctx = TestContext::new();
    ctx.register_articles();
    ctx.register_comments();
    let article = ctx.article("post", 2, 1);
    ctx.comment(article, 2, "first", false);
    ctx.comment(article, 3, "second", false);
    ctx.comment(article, 3, "spam", true);
    (ctx, article)
}

#[test]
fn test_has_many_is_restricted() {
    let (ctx, article) = blog();
    let user = CurrentUser::member(3);
    let post = ctx.guard.restrict("Article", &user).unwrap().find(article).unwrap();

    let comments = post
        .association("comments")
        .unwrap()
        .into_collection()
        .unwrap();
    assert_eq!(comments.count().unwrap(), 2);
    assert_eq!(comments.context(), &user);

    let first = comments.first().unwrap().unwrap();
    assert_eq!(first.get("body").unwrap(), Value::from("first"));
    assert!(first.get("hidden").unwrap_err().is_permission_denied());
}

#[test]
fn test_has_many_builds_with_foreign_key() {
    let (ctx, article) = blog();
    let user = CurrentUser::member(4);
    let post = ctx.guard.restrict("Article", &user).unwrap().find(article).unwrap();
    let comments = post
        .association("comments")
        .unwrap()
        .into_collection()
        .unwrap();

    let reply = comments.create([("body", "reply")]).unwrap();
    let id = reply.id().and_then(Value::as_i64).unwrap();
    let stored = ctx.raw("Comment", id).unwrap();
    assert_eq!(stored.value("article_id"), Value::Int(article));
    assert_eq!(stored.value("author_id"), Value::Int(4));
}

#[test]
fn test_belongs_to_ungoverned_target() {
    let (ctx, article) = blog();
    let user = CurrentUser::member(2);
    let post = ctx.guard.restrict("Article", &user).unwrap().find(article).unwrap();

    let err = post.association("owner").unwrap_err();
    assert!(err.is_insecure_operation());

    match post.insecure_association("owner").unwrap() {
        RawRelated::One(owner) => assert!(owner.is_none()),
        other => panic!("unexpected relation data: {other:?}"),
    }
}

#[test]
fn test_insecure_associations_allowed_by_config() {
    let ctx = TestContext::with_config(GuardConfig::new().with_insecure_associations(true));
    ctx.register_articles();
    let owner = ctx.insert("User", &[("name", Value::from("ben"))]);
    let article = ctx.article("post", owner, 1);

    let post = ctx
        .guard
        .restrict("Article", &CurrentUser::member(owner))
        .unwrap()
        .find(article)
        .unwrap();
    match post.association("owner").unwrap() {
        Related::Unrestricted(RawRelated::One(Some(user))) => {
            assert_eq!(user.value("name"), Value::from("ben"));
        }
        other => panic!("unexpected relation: {other:?}"),
    }
}

#[test]
fn test_belongs_to_governed_target() {
    let (ctx, article) = blog();
    let user = CurrentUser::member(3);
    let comment = ctx
        .guard
        .restrict("Comment", &user)
        .unwrap()
        .find_by("body", "second")
        .unwrap()
        .unwrap();
    let post = comment.association("article").unwrap().into_record().unwrap();
    assert_eq!(post.id(), Some(&Value::Int(article)));
    assert!(post.get("secrecy_level").unwrap_err().is_permission_denied());

    ctx.guard
        .restrict("Article", &CurrentUser::admin(1))
        .unwrap()
        .find(article)
        .unwrap()
        .set("secrecy_level", 9)
        .save()
        .unwrap();
    let hidden = comment.association("article").unwrap().into_record();
    assert!(hidden.is_none());
}

#[test]
fn test_eager_loading_respects_target_fetch_scope() {
    let (ctx, article) = blog();
    let user = CurrentUser::member(3);
    let posts = ctx
        .guard
        .restrict("Article", &user)
        .unwrap()
        .includes("comments")
        .unwrap();

    let post = posts.find(article).unwrap();
    let comments = post
        .association("comments")
        .unwrap()
        .into_collection()
        .unwrap();
    assert!(comments.is_loaded());
    assert_eq!(comments.count().unwrap(), 2);
    let bodies: Vec<Value> = comments
        .to_vec()
        .unwrap()
        .iter()
        .map(|c| c.get("body").unwrap())
        .collect();
    assert_eq!(bodies, vec![Value::from("first"), Value::from("second")]);

    let refined = comments.where_eq("author_id", 3);
    assert!(!refined.is_loaded());
    assert_eq!(refined.count().unwrap(), 1);
}

#[test]
fn test_eager_loading_without_filtering() {
    let ctx = TestContext::with_config(GuardConfig::new().with_eager_load_filtering(false));
    ctx.register_articles();
    ctx.register_comments();
    let article = ctx.article("post", 2, 1);
    ctx.comment(article, 2, "shown", false);
    ctx.comment(article, 2, "hidden", true);

    let post = ctx
        .guard
        .restrict("Article", &CurrentUser::member(2))
        .unwrap()
        .includes("comments")
        .unwrap()
        .find(article)
        .unwrap();
    let comments = post
        .association("comments")
        .unwrap()
        .into_collection()
        .unwrap();
    assert_eq!(comments.count().unwrap(), 2);
}

#[test]
fn test_nested_includes() {
    let (ctx, article) = blog();
    let admin = CurrentUser::admin(1);
    let err = ctx
        .guard
        .restrict("Comment", &admin)
        .unwrap()
        .includes("article.nope")
        .unwrap_err();
    assert!(matches!(err, GuardError::NoSuchMethod { .. }));

    let comments = ctx
        .guard
        .restrict("Comment", &admin)
        .unwrap()
        .includes("article.comments")
        .unwrap();
    let comment = comments.first().unwrap().unwrap();
    let post = comment.association("article").unwrap().into_record().unwrap();
    assert_eq!(post.id(), Some(&Value::Int(article)));
    let siblings = post
        .association("comments")
        .unwrap()
        .into_collection()
        .unwrap();
    assert!(siblings.is_loaded());
    assert_eq!(siblings.count().unwrap(), 2);
}

#[test]
fn test_host_defined_relation_requires_declaration() {
    let (ctx, article) = blog();
    ctx.article("other", 2, 2);
    let user = CurrentUser::member(2);
    let post = ctx.guard.restrict("Article", &user).unwrap().find(article).unwrap();

    assert!(post.association("siblings").unwrap_err().is_insecure_operation());
    assert!(matches!(
        post.association("cousins").unwrap_err(),
        GuardError::NoSuchMethod { .. }
    ));

    ctx.guard.declare_relation("Article", "siblings").unwrap();
    let siblings = post
        .association("siblings")
        .unwrap()
        .into_collection()
        .unwrap();
    assert_eq!(siblings.count().unwrap(), 2);
}

#[test]
fn test_host_scopes_require_declaration() {
    let (ctx, _article) = blog();
    ctx.article("open", 3, 0);
    ctx.article("closed", 3, 4);
    let user = CurrentUser::member(3);

    let articles = ctx.guard.restrict("Article", &user).unwrap();
    assert!(articles
        .clone()
        .scope("low_secrecy")
        .unwrap_err()
        .is_insecure_operation());

    ctx.guard.declare_scope("Article", "low_secrecy").unwrap();
    let low = articles.scope("low_secrecy").unwrap();
    assert_eq!(low.count().unwrap(), 2);
}

#[test]
fn test_validators_run_on_save() {
    let ctx = TestContext::new();
    ctx.guard
        .register(
            "Article",
            |rules: &mut Rules, user: &CurrentUser, _: Option<&Record>| {
                rules.scope(FETCH, |q| q);
                rules.can("view", ["content", "secrecy_level"]);
                rules.can(
                    "create",
                    vec![
                        FieldGrant::validated("content", "presence", true)
                            .and_validates("length", [("maximum", 10)]),
                        FieldGrant::validated("secrecy_level", "inclusion", 0..=4),
                        FieldGrant::fixture("owner_id", user.id),
                    ],
                );
            },
        )
        .unwrap();

    let articles = ctx.guard.restrict("Article", &CurrentUser::member(2)).unwrap();

    let mut invalid = articles
        .build([("content", Value::from("")), ("secrecy_level", Value::Int(7))])
        .unwrap();
    assert!(!invalid.save().unwrap());
    assert!(invalid.is_new());
    assert_eq!(invalid.errors().on("content"), vec!["can't be blank"]);
    assert_eq!(
        invalid.errors().on("secrecy_level"),
        vec!["is not included in the list"]
    );
    assert!(matches!(
        invalid.save_strict(),
        Err(GuardError::RecordInvalid(_))
    ));
    assert!(invalid
        .save_with(SaveOptions { validate: false })
        .unwrap_err()
        .is_insecure_operation());
    assert_eq!(ctx.row_count("Article"), 0);

    let too_long = articles
        .create([("content", Value::from("far too long")), ("secrecy_level", Value::Int(1))])
        .unwrap();
    assert!(too_long.is_new());
    assert_eq!(
        too_long.errors().on("content"),
        vec!["is too long (maximum is 10 characters)"]
    );

    articles
        .create_strict([("content", Value::from("fine")), ("secrecy_level", Value::Int(1))])
        .unwrap();
    assert_eq!(ctx.row_count("Article"), 1);
}

#[test]
fn test_unknown_validator_is_a_config_error() {
    let ctx = TestContext::new();
    ctx.guard
        .register(
            "Article",
            |rules: &mut Rules, _: &CurrentUser, _: Option<&Record>| {
                rules.scope(FETCH, |q| q);
                rules.can("create", FieldGrant::validated("content", "palindrome", true));
            },
        )
        .unwrap();
    let err = ctx
        .guard
        .restrict("Article", &CurrentUser::member(1))
        .unwrap_err();
    assert!(matches!(err, GuardError::Config(_)));
}

#[test]
fn test_missing_fetch_scope_is_a_config_error() {
    let ctx = TestContext::new();
    ctx.guard
        .register("Article", |rules: &mut Rules, _: &CurrentUser, _: Option<&Record>| {
            rules.can("view", "content");
        })
        .unwrap();
    let err = ctx
        .guard
        .restrict("Article", &CurrentUser::member(1))
        .unwrap_err();
    assert!(matches!(err, GuardError::Config(_)));
}

#[test]
fn test_reload_goes_through_fetch_scope() {
    let ctx = TestContext::new();
    ctx.register_articles();
    let id = ctx.article("v1", 2, 1);
    let user = CurrentUser::member(2);
    let mut article = ctx.guard.restrict("Article", &user).unwrap().find(id).unwrap();

    let mut raw = ctx.raw("Article", id).unwrap();
    raw.set("content", "v2");
    ctx.store.update(&raw).unwrap();
    article.reload().unwrap();
    assert_eq!(article.get("content").unwrap(), Value::from("v2"));

    raw.set("secrecy_level", 8);
    ctx.store.update(&raw).unwrap();
    assert!(matches!(
        article.reload(),
        Err(GuardError::RecordNotFound { .. })
    ));
}

#[test]
fn test_custom_actions() {
    let ctx = TestContext::new();
    ctx.guard
        .register(
            "Article",
            |rules: &mut Rules, user: &CurrentUser, article: Option<&Record>| {
                article_rules(rules, user, article);
                if user.admin {
                    rules.can("publish", "secrecy_level");
                }
            },
        )
        .unwrap();
    let admin = ctx
        .guard
        .restrictions("Article", &CurrentUser::admin(1), None)
        .unwrap();
    let member = ctx
        .guard
        .restrictions("Article", &CurrentUser::member(2), None)
        .unwrap();
    assert!(admin.can(&"publish".into()));
    assert!(!member.can(&"publish".into()));
}
