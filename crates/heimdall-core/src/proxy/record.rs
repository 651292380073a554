//! Restricted view of a single record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use heimdall_proto::{
    Cardinality, Errors, FilterExpr, Preloaded, Query, Record, RelationDef, Value,
};
use tracing::{debug, warn};

use super::{normalize_field, CollectionProxy, ProxyOptions};
use crate::error::{GuardError, GuardResult};
use crate::guard::Guard;
use crate::model::Model;
use crate::policy::{Action, DecisionTable, SecurityContext, DELETE, FETCH};
use crate::validation::run_validators;

/// Options for a save call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run the action's validators. Disabling this is refused.
    pub validate: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// Related rows returned without policy enforcement.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRelated {
    /// Single-valued relation.
    One(Option<Record>),
    /// Multi-valued relation.
    Many(Vec<Record>),
}

/// Result of following a relation from a record proxy.
#[derive(Debug)]
pub enum Related<C: SecurityContext> {
    /// Single-valued relation into a governed entity.
    One(Option<RecordProxy<C>>),
    /// Multi-valued relation into a governed entity.
    Many(CollectionProxy<C>),
    /// Relation into an ungoverned entity, allowed by configuration.
    Unrestricted(RawRelated),
}

impl<C: SecurityContext> Related<C> {
    /// The related record of a single-valued relation.
    pub fn into_record(self) -> Option<RecordProxy<C>> {
        match self {
            Related::One(record) => record,
            _ => None,
        }
    }

    /// The related collection of a multi-valued relation.
    pub fn into_collection(self) -> Option<CollectionProxy<C>> {
        match self {
            Related::Many(collection) => Some(collection),
            _ => None,
        }
    }
}

/// One record seen through the policy of a security context.
///
/// Field reads are checked against the `view` whitelist. Writes go straight
/// to the record; [`save`](Self::save) is where they are checked.
#[derive(Clone)]
pub struct RecordProxy<C: SecurityContext> {
    guard: Guard<C>,
    model: Arc<Model<C>>,
    record: Record,
    context: C,
    options: ProxyOptions,
    table: Arc<DecisionTable>,
}

impl<C: SecurityContext> RecordProxy<C> {
    pub(crate) fn new(
        guard: Guard<C>,
        model: Arc<Model<C>>,
        record: Record,
        context: C,
        options: ProxyOptions,
    ) -> GuardResult<Self> {
        let table = model.restrictions(&context, Some(&record))?;
        Ok(Self {
            guard,
            model,
            record,
            context,
            options,
            table,
        })
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        self.record.entity()
    }

    /// Primary-key value, if saved. Always readable.
    pub fn id(&self) -> Option<&Value> {
        self.record.id()
    }

    /// Check whether the record has never been saved.
    pub fn is_new(&self) -> bool {
        self.record.is_new()
    }

    /// Check whether any field changed since load or last save.
    pub fn has_changes(&self) -> bool {
        self.record.has_changes()
    }

    /// Validation and permission errors from the last save.
    pub fn errors(&self) -> &Errors {
        self.record.errors()
    }

    /// Security context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Proxy options.
    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Check whether denied reads return `Null`.
    pub fn is_implicit(&self) -> bool {
        self.options.implicit
    }

    /// Decision table in effect for this record.
    pub fn restrictions(&self) -> &Arc<DecisionTable> {
        &self.table
    }

    /// Read a field.
    ///
    /// Fields outside the `view` whitelist fail with a permission error, or
    /// read as `Null` in implicit mode.
    pub fn get(&self, field: &str) -> GuardResult<Value> {
        let field = normalize_field(field);
        if self.table.is_allowed(&Action::View, field) {
            return Ok(self.record.value(field));
        }
        if self.options.implicit {
            return Ok(Value::Null);
        }
        debug!(entity = self.entity(), field, "denied field read");
        Err(GuardError::PermissionDenied(format!(
            "attempted to read attribute '{field}' of {} which is not viewable",
            self.entity()
        )))
    }

    /// Every viewable attribute that is set.
    pub fn visible_attributes(&self) -> BTreeMap<String, Value> {
        self.record
            .attributes()
            .iter()
            .filter(|(field, _)| self.table.is_allowed(&Action::View, field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Assign a field. Checked on save.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.record.set(normalize_field(field), value);
        self
    }

    /// Assign several fields. Checked on save.
    pub fn assign<I, K, V>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (field, value) in attributes {
            self.set(field.as_ref(), value);
        }
        self
    }

    /// Follow a relation.
    ///
    /// Only relations known from schema reflection, or host-defined relations
    /// declared safe, can be followed. Related records of a governed entity
    /// come back restricted to the same context; an ungoverned target is
    /// refused unless the configuration allows insecure associations.
    pub fn association(&self, name: &str) -> GuardResult<Related<C>> {
        let relation = self.relation(name)?;

        let Some(target) = self.guard.find_model(&relation.target) else {
            if self.guard.config().allow_insecure_associations {
                return Ok(Related::Unrestricted(self.load_raw(relation)?));
            }
            warn!(
                entity = self.entity(),
                relation = name,
                target = %relation.target,
                "refused association to an entity without policy"
            );
            return Err(GuardError::InsecureOperation(format!(
                "association '{name}' of {} leads to {}, which has no policy; \
                 use insecure_association to bypass",
                self.entity(),
                relation.target
            )));
        };

        if self.options.eager_loaded.get(name).is_some() {
            if let Some(data) = self.record.preloaded(name) {
                return self.wrap_preloaded(relation, target, data.clone());
            }
        }

        let options = self.options.without_eager_loaded();
        match relation.cardinality {
            Cardinality::One => {
                let Some(query) = relation.query_for(&self.record) else {
                    return Ok(Related::One(None));
                };
                let collection = CollectionProxy::new(
                    self.guard.clone(),
                    target,
                    self.context.clone(),
                    options,
                    Some(query),
                )?;
                Ok(Related::One(collection.first()?))
            }
            Cardinality::Many => {
                let query = self.related_query(relation);
                Ok(Related::Many(CollectionProxy::new(
                    self.guard.clone(),
                    target,
                    self.context.clone(),
                    options,
                    Some(query),
                )?))
            }
        }
    }

    /// Follow a relation without any policy enforcement.
    pub fn insecure_association(&self, name: &str) -> GuardResult<RawRelated> {
        let relation = self.model.entity().relation(name).ok_or_else(|| {
            GuardError::NoSuchMethod {
                entity: self.entity().to_string(),
                method: name.to_string(),
            }
        })?;
        debug!(entity = self.entity(), relation = name, "insecure association access");
        self.load_raw(relation)
    }

    fn relation(&self, name: &str) -> GuardResult<&RelationDef> {
        let relation = self.model.entity().relation(name).ok_or_else(|| {
            GuardError::NoSuchMethod {
                entity: self.entity().to_string(),
                method: name.to_string(),
            }
        })?;
        if !relation.is_reflected() && !self.model.is_declared_relation(name) {
            warn!(
                entity = self.entity(),
                relation = name,
                "refused undeclared host-defined relation"
            );
            return Err(GuardError::InsecureOperation(format!(
                "relation '{name}' of {} is host-defined and was not declared safe",
                self.entity()
            )));
        }
        Ok(relation)
    }

    /// Query for the related rows; matches nothing when the key is unset.
    fn related_query(&self, relation: &RelationDef) -> Query {
        relation
            .query_for(&self.record)
            .unwrap_or_else(|| Query::new(&relation.target).filter(FilterExpr::False))
    }

    fn wrap_preloaded(
        &self,
        relation: &RelationDef,
        target: Arc<Model<C>>,
        data: Preloaded,
    ) -> GuardResult<Related<C>> {
        let options = self.options.for_relation(&relation.name);
        match data {
            Preloaded::One(None) => Ok(Related::One(None)),
            Preloaded::One(Some(record)) => Ok(Related::One(Some(RecordProxy::new(
                self.guard.clone(),
                target,
                *record,
                self.context.clone(),
                options,
            )?))),
            Preloaded::Many(rows) => Ok(Related::Many(CollectionProxy::preloaded(
                self.guard.clone(),
                target,
                self.context.clone(),
                options,
                self.related_query(relation),
                rows,
            )?)),
        }
    }

    fn load_raw(&self, relation: &RelationDef) -> GuardResult<RawRelated> {
        if let Some(data) = self.record.preloaded(&relation.name) {
            return Ok(match data.clone() {
                Preloaded::One(record) => RawRelated::One(record.map(|r| *r)),
                Preloaded::Many(rows) => RawRelated::Many(rows),
            });
        }
        let rows = match relation.query_for(&self.record) {
            Some(query) => self.guard.store().select(&query)?,
            None => Vec::new(),
        };
        Ok(match relation.cardinality {
            Cardinality::One => RawRelated::One(rows.into_iter().next()),
            Cardinality::Many => RawRelated::Many(rows),
        })
    }

    /// Save with validation. Returns `false` when validators added errors.
    pub fn save(&mut self) -> GuardResult<bool> {
        self.save_with(SaveOptions::default())
    }

    /// Save with validation, failing with [`GuardError::RecordInvalid`] when
    /// validators added errors.
    pub fn save_strict(&mut self) -> GuardResult<()> {
        if self.save()? {
            Ok(())
        } else {
            Err(GuardError::RecordInvalid(self.record.errors().clone()))
        }
    }

    /// Save with explicit options.
    ///
    /// Every changed field must either equal its fixture for the save action
    /// or be whitelisted for it. The first offending field gets an error on
    /// the record and fails the save with a permission error.
    pub fn save_with(&mut self, options: SaveOptions) -> GuardResult<bool> {
        if !options.validate {
            warn!(entity = self.entity(), "refused save without validation");
            return Err(GuardError::InsecureOperation(format!(
                "saving {} without validation would bypass its policy",
                self.entity()
            )));
        }

        let action = Action::for_save(self.record.is_new());
        let table = Arc::clone(&self.table);
        if !table.can(&action) {
            debug!(entity = self.entity(), %action, "denied save");
            return Err(GuardError::PermissionDenied(format!(
                "{} does not permit {action}",
                self.entity()
            )));
        }

        self.record.errors_mut().clear();
        let changed: Vec<String> = self.record.changed_fields().map(str::to_owned).collect();
        for field in changed {
            let value = self.record.value(&field);
            let denial = match table.fixture(&action, &field) {
                Some(fixture) if fixture.loose_eq(&value) => None,
                Some(fixture) => Some(format!("must be {fixture}")),
                None if table.is_allowed(&action, &field) => None,
                None => Some("is not permitted".to_string()),
            };
            if let Some(message) = denial {
                self.record.errors_mut().add(&field, message);
                debug!(entity = self.entity(), %action, field = %field, "denied field write");
                return Err(GuardError::PermissionDenied(format!(
                    "attempted to {action} attribute '{field}' of {} without permission",
                    self.entity()
                )));
            }
        }

        if !run_validators(&mut self.record, table.validators(&action)) {
            return Ok(false);
        }

        let store = self.guard.store();
        let id = if self.record.is_new() {
            store.insert(&self.record)?
        } else {
            store.update(&self.record)?;
            self.record.value(self.record.primary_key())
        };
        self.record.mark_persisted(id);
        self.table = self.model.restrictions(&self.context, Some(&self.record))?;
        Ok(true)
    }

    /// Delete the record if it lies within the delete scope.
    pub fn destroy(&self) -> GuardResult<()> {
        self.remove("destroy")
    }

    /// Same check as [`destroy`](Self::destroy).
    pub fn delete(&self) -> GuardResult<()> {
        self.remove("delete")
    }

    fn remove(&self, verb: &str) -> GuardResult<()> {
        let Some(id) = self.record.id().cloned() else {
            return Err(GuardError::PermissionDenied(format!(
                "cannot {verb} an unsaved {}",
                self.entity()
            )));
        };
        if !self.table.has_scope(DELETE) {
            warn!(
                entity = self.entity(),
                "no delete scope defined, deletion is limited by the fetch scope only"
            );
        }
        let query = self.identity_query(DELETE, &id);
        if !self.guard.store().exists(&query)? {
            debug!(entity = self.entity(), id = %id, verb, "denied deletion");
            return Err(GuardError::PermissionDenied(format!(
                "attempted to {verb} {} {id} outside its delete scope",
                self.entity()
            )));
        }
        self.guard.store().delete(self.entity(), &id)?;
        Ok(())
    }

    fn identity_query(&self, scope: &str, id: &Value) -> Query {
        self.table
            .request_scope(scope, None)
            .where_eq(self.record.primary_key(), id.clone())
            .limit(1)
    }

    /// Check whether the record can be fetched in this context.
    pub fn visible(&self) -> GuardResult<bool> {
        match self.record.id() {
            Some(id) => Ok(self.guard.store().exists(&self.identity_query(FETCH, id))?),
            None => Ok(self.table.can(&Action::View)),
        }
    }

    /// Check whether saving this new record is permitted at all.
    pub fn creatable(&self) -> bool {
        self.record.is_new() && self.table.can(&Action::Create)
    }

    /// Check whether updating this record is permitted at all.
    pub fn modifiable(&self) -> bool {
        !self.record.is_new() && self.table.can(&Action::Update)
    }

    /// Check whether the record lies within the delete scope.
    pub fn destroyable(&self) -> GuardResult<bool> {
        match self.record.id() {
            Some(id) => Ok(self.guard.store().exists(&self.identity_query(DELETE, id))?),
            None => Ok(false),
        }
    }

    /// Same record, denied reads return `Null`.
    pub fn implicit(&self) -> Self {
        let mut proxy = self.clone();
        proxy.options.implicit = true;
        proxy
    }

    /// Same record, denied reads fail.
    pub fn explicit(&self) -> Self {
        let mut proxy = self.clone();
        proxy.options.implicit = false;
        proxy
    }

    /// Re-restrict. Identical context and options give back an equivalent
    /// proxy; anything else is an error.
    pub fn restrict(&self, context: &C, options: &ProxyOptions) -> GuardResult<Self> {
        if self.context == *context && self.options == *options {
            return Ok(self.clone());
        }
        Err(GuardError::AlreadyRestricted(format!(
            "{} {}",
            self.entity(),
            self.record.value(self.record.primary_key())
        )))
    }

    /// Reload attributes through the fetch scope.
    pub fn reload(&mut self) -> GuardResult<()> {
        let primary_key = self.record.primary_key().to_string();
        let id = self.record.value(&primary_key);
        let not_found = || GuardError::RecordNotFound {
            entity: self.entity().to_string(),
            field: primary_key.clone(),
            id: id.clone(),
        };
        if id.is_null() {
            return Err(not_found());
        }
        let fresh = self
            .guard
            .store()
            .select(&self.identity_query(FETCH, &id))?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        self.record.reset(fresh.attributes().clone());
        self.table = self.model.restrictions(&self.context, Some(&self.record))?;
        Ok(())
    }

    /// The wrapped record, with no read checks.
    pub fn insecure(&self) -> &Record {
        &self.record
    }

    /// Unwrap the record, with no read checks.
    pub fn into_insecure(self) -> Record {
        self.record
    }
}

impl<C: SecurityContext> fmt::Debug for RecordProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordProxy")
            .field("entity", &self.entity())
            .field("id", &self.record.id())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::policy::FieldGrant;
    use crate::store::Store;
    use crate::testing::{memory_store, MemoryStore, User};

    fn setup(config: GuardConfig) -> (Arc<MemoryStore>, Guard<User>) {
        let store = Arc::new(memory_store());
        let guard = Guard::with_config(store.clone(), config);
        guard
            .register("Article", |rules, user: &User, record: Option<&Record>| {
                let user_id = user.id;
                if user.admin {
                    rules.scope(FETCH, |q| q);
                    rules.can_all(["view", "create", "update"]);
                    return;
                }
                rules.scope(FETCH, |q| q.filter(FilterExpr::lt("secrecy_level", 5)));
                rules.scope(DELETE, move |q| q.where_eq("owner_id", user_id));
                rules.can("view", ["content", "owner_id"]);
                if record.is_some_and(|r| r.value("owner_id") == Value::Int(user_id)) {
                    rules.can("view", "secrecy_level");
                }
                rules.can(
                    "create",
                    vec![
                        FieldGrant::allow("content"),
                        FieldGrant::fixture("owner_id", user_id),
                        FieldGrant::validated("secrecy_level", "inclusion", 0..=4),
                    ],
                );
                rules.can("update", "content");
            })
            .unwrap();
        guard
            .register("Comment", |rules, _user: &User, _record| {
                rules.scope(FETCH, |q| q.where_eq("hidden", false));
                rules.can_all("view");
            })
            .unwrap();
        (store, guard)
    }

    fn seed_article(store: &MemoryStore, owner: i64, level: i64) -> Value {
        store.seed(
            "Article",
            &[
                ("content", Value::from("text")),
                ("owner_id", Value::Int(owner)),
                ("secrecy_level", Value::Int(level)),
            ],
        )
    }

    fn load(store: &MemoryStore, id: &Value) -> Record {
        store
            .select(&Query::new("Article").where_eq("id", id.clone()))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_read_whitelist() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 1, 3);
        let reader = User::new(2, false);

        let proxy = guard
            .restrict_record(load(&store, &id), &reader, ProxyOptions::new())
            .unwrap();
        assert_eq!(proxy.get("content").unwrap(), Value::from("text"));
        assert_eq!(proxy.get("id").unwrap(), id);
        assert!(proxy.get("secrecy_level").unwrap_err().is_permission_denied());
        assert_eq!(proxy.implicit().get("secrecy_level").unwrap(), Value::Null);
        assert!(!proxy.visible_attributes().contains_key("secrecy_level"));

        let owner = User::new(1, false);
        let proxy = guard
            .restrict_record(load(&store, &id), &owner, ProxyOptions::new())
            .unwrap();
        assert_eq!(proxy.get("secrecy_level?").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_save_rejects_unpermitted_change() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 2, 3);
        let user = User::new(2, false);

        let mut proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        proxy.set("secrecy_level", 1);
        let err = proxy.save().unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(proxy.errors().on("secrecy_level"), vec!["is not permitted"]);
        assert_eq!(load(&store, &id).value("secrecy_level"), Value::Int(3));

        let mut proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        proxy.set("content", "edited");
        assert!(proxy.save().unwrap());
        assert_eq!(load(&store, &id).value("content"), Value::from("edited"));
    }

    #[test]
    fn test_save_checks_fixtures() {
        let (_store, guard) = setup(GuardConfig::default());
        let user = User::new(2, false);
        let mut record = Record::new("Article", "id");
        record.set("content", "x");
        record.set("secrecy_level", 1);
        record.set("owner_id", 9);

        let mut proxy = guard
            .restrict_record(record, &user, ProxyOptions::new())
            .unwrap();
        assert!(proxy.save().unwrap_err().is_permission_denied());
        assert_eq!(proxy.errors().on("owner_id"), vec!["must be 2"]);

        proxy.set("owner_id", 2);
        assert!(proxy.save().unwrap());
        assert!(!proxy.is_new());
    }

    #[test]
    fn test_save_runs_validators() {
        let (store, guard) = setup(GuardConfig::default());
        let user = User::new(2, false);
        let mut proxy = guard
            .restrict("Article", &user)
            .unwrap()
            .build([("content", "x")])
            .unwrap();
        proxy.set("secrecy_level", 7);

        assert!(!proxy.save().unwrap());
        assert_eq!(
            proxy.errors().on("secrecy_level"),
            vec!["is not included in the list"]
        );
        assert!(matches!(
            proxy.save_strict().unwrap_err(),
            GuardError::RecordInvalid(_)
        ));
        assert_eq!(store.row_count("Article"), 0);

        proxy.set("secrecy_level", 4);
        proxy.save_strict().unwrap();
        assert_eq!(store.row_count("Article"), 1);
    }

    #[test]
    fn test_save_without_validation_is_insecure() {
        let (_store, guard) = setup(GuardConfig::default());
        let admin = User::new(1, true);
        let mut proxy = guard.restrict("Article", &admin).unwrap().new_record().unwrap();
        let err = proxy.save_with(SaveOptions { validate: false }).unwrap_err();
        assert!(err.is_insecure_operation());
    }

    #[test]
    fn test_save_denied_action() {
        let (store, guard) = setup(GuardConfig::default());
        let id = store.seed("Comment", &[("hidden", Value::Bool(false))]);
        let user = User::new(1, false);
        let mut record = store
            .select(&Query::new("Comment").where_eq("id", id))
            .unwrap()
            .remove(0);
        record.set("body", "spam");
        let mut proxy = guard.restrict_record(record, &user, ProxyOptions::new()).unwrap();
        assert!(!proxy.modifiable());
        assert!(proxy.save().unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_destroy_scope() {
        let (store, guard) = setup(GuardConfig::default());
        let own = seed_article(&store, 2, 1);
        let other = seed_article(&store, 3, 1);
        let user = User::new(2, false);

        let proxy = guard
            .restrict_record(load(&store, &other), &user, ProxyOptions::new())
            .unwrap();
        assert!(proxy.visible().unwrap());
        assert!(!proxy.destroyable().unwrap());
        assert!(proxy.destroy().unwrap_err().is_permission_denied());
        assert_eq!(store.row_count("Article"), 2);

        let proxy = guard
            .restrict_record(load(&store, &own), &user, ProxyOptions::new())
            .unwrap();
        assert!(proxy.destroyable().unwrap());
        proxy.destroy().unwrap();
        assert_eq!(store.row_count("Article"), 1);
    }

    #[test]
    fn test_restrict_is_idempotent() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 2, 1);
        let user = User::new(2, false);
        let proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();

        let again = proxy.restrict(&user, &ProxyOptions::new()).unwrap();
        assert_eq!(again.insecure(), proxy.insecure());

        let err = proxy.restrict(&User::new(3, false), &ProxyOptions::new()).unwrap_err();
        assert!(matches!(err, GuardError::AlreadyRestricted(_)));
        let err = proxy
            .restrict(&user, &ProxyOptions::new().with_implicit(true))
            .unwrap_err();
        assert!(matches!(err, GuardError::AlreadyRestricted(_)));
    }

    #[test]
    fn test_association_into_governed_entity() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 2, 1);
        store.seed("Comment", &[("article_id", id.clone()), ("hidden", Value::Bool(false))]);
        store.seed("Comment", &[("article_id", id.clone()), ("hidden", Value::Bool(true))]);
        let user = User::new(2, false);

        let proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        let comments = proxy.association("comments").unwrap().into_collection().unwrap();
        assert_eq!(comments.count().unwrap(), 1);
    }

    #[test]
    fn test_association_into_ungoverned_entity() {
        let (store, guard) = setup(GuardConfig::default());
        let owner = store.seed("User", &[("name", Value::from("bob"))]);
        let id = seed_article(&store, owner.as_i64().unwrap(), 1);
        let user = User::new(2, false);

        let proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        assert!(proxy.association("owner").unwrap_err().is_insecure_operation());
        match proxy.insecure_association("owner").unwrap() {
            RawRelated::One(Some(record)) => assert_eq!(record.value("name"), Value::from("bob")),
            other => panic!("unexpected {other:?}"),
        }

        let (store, guard) = setup(GuardConfig::new().with_insecure_associations(true));
        let owner = store.seed("User", &[("name", Value::from("bob"))]);
        let id = seed_article(&store, owner.as_i64().unwrap(), 1);
        let proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        assert!(matches!(
            proxy.association("owner").unwrap(),
            Related::Unrestricted(RawRelated::One(Some(_)))
        ));
    }

    #[test]
    fn test_undeclared_custom_relation() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 2, 1);
        seed_article(&store, 2, 2);
        let user = User::new(2, false);
        let proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();

        assert!(proxy.association("siblings").unwrap_err().is_insecure_operation());
        assert!(matches!(
            proxy.association("nope").unwrap_err(),
            GuardError::NoSuchMethod { .. }
        ));

        guard.declare_relation("Article", "siblings").unwrap();
        let siblings = proxy.association("siblings").unwrap().into_collection().unwrap();
        assert_eq!(siblings.count().unwrap(), 2);
    }

    #[test]
    fn test_reload() {
        let (store, guard) = setup(GuardConfig::default());
        let id = seed_article(&store, 2, 1);
        let user = User::new(2, false);
        let mut proxy = guard
            .restrict_record(load(&store, &id), &user, ProxyOptions::new())
            .unwrap();
        proxy.set("content", "scratch");
        proxy.reload().unwrap();
        assert_eq!(proxy.get("content").unwrap(), Value::from("text"));
        assert!(!proxy.has_changes());

        let mut fresh = guard.restrict("Article", &user).unwrap().new_record().unwrap();
        assert!(matches!(
            fresh.reload().unwrap_err(),
            GuardError::RecordNotFound { .. }
        ));
    }
}
