//! Rule block evaluation with a single-entry memo.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use heimdall_proto::{EntityDef, Record};
use parking_lot::RwLock;
use tracing::debug;

use super::rules::Rules;
use super::table::DecisionTable;
use crate::error::ConfigError;
use crate::validation::ValidatorCatalog;

/// Caller-supplied subject. Only compared for equality and handed to rule
/// blocks.
pub trait SecurityContext: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> SecurityContext for T {}

/// A rule block: fills a fresh [`Rules`] builder for a context and an
/// optional sample record.
pub type RuleBlock<C> = Arc<dyn Fn(&mut Rules, &C, Option<&Record>) + Send + Sync>;

struct Memo<C> {
    context: C,
    sample: Option<Record>,
    table: Arc<DecisionTable>,
}

impl<C: SecurityContext> Memo<C> {
    fn matches(&self, context: &C, sample: Option<&Record>) -> bool {
        self.context == *context
            && match (&self.sample, sample) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_state(b),
                _ => false,
            }
    }
}

/// A registered rule block for one entity type.
///
/// Keeps the table of the last evaluation and reuses it while the
/// (context, sample) key stays the same.
pub struct Policy<C> {
    entity: Arc<EntityDef>,
    block: RuleBlock<C>,
    catalog: Arc<ValidatorCatalog>,
    memo: RwLock<Option<Arc<Memo<C>>>>,
    compilations: AtomicU64,
}

impl<C: SecurityContext> Policy<C> {
    /// Store a rule block. The block is not run until the first evaluation.
    pub fn new(entity: Arc<EntityDef>, block: RuleBlock<C>, catalog: Arc<ValidatorCatalog>) -> Self {
        Self {
            entity,
            block,
            catalog,
            memo: RwLock::new(None),
            compilations: AtomicU64::new(0),
        }
    }

    /// Entity the policy governs.
    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.entity
    }

    /// Decision table for a context and optional sample record.
    pub fn evaluate(
        &self,
        context: &C,
        sample: Option<&Record>,
    ) -> Result<Arc<DecisionTable>, ConfigError> {
        if let Some(memo) = self.memo.read().as_ref() {
            if memo.matches(context, sample) {
                debug!(entity = %self.entity.name, "reused decision table");
                return Ok(Arc::clone(&memo.table));
            }
        }

        let mut rules = Rules::new(Arc::clone(&self.entity));
        (self.block)(&mut rules, context, sample);
        let table = Arc::new(rules.compile(&self.catalog)?);
        let count = self.compilations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            entity = %self.entity.name,
            with_sample = sample.is_some(),
            compilations = count,
            "compiled decision table"
        );

        *self.memo.write() = Some(Arc::new(Memo {
            context: context.clone(),
            sample: sample.cloned(),
            table: Arc::clone(&table),
        }));
        Ok(table)
    }

    /// Number of times the rule block has been compiled.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl<C> fmt::Debug for Policy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("entity", &self.entity.name)
            .field("compilations", &self.compilations.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Action, FETCH};
    use heimdall_proto::FilterExpr;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        admin: bool,
    }

    fn policy(runs: Arc<AtomicUsize>) -> Policy<User> {
        let entity = Arc::new(EntityDef::new("Article").with_fields(["content", "secrecy_level"]));
        let block: RuleBlock<User> = Arc::new(
            move |rules: &mut Rules, user: &User, _sample: Option<&Record>| {
                runs.fetch_add(1, Ordering::SeqCst);
                let limit = if user.admin { 10 } else { 5 };
                rules.scope(FETCH, move |q| q.filter(FilterExpr::le("secrecy_level", limit)));
                rules.can("view", "content");
                if user.admin {
                    rules.can("view", "secrecy_level");
                }
            },
        );
        Policy::new(entity, block, Arc::new(ValidatorCatalog::builtin()))
    }

    #[test]
    fn test_block_not_run_until_evaluated() {
        let runs = Arc::new(AtomicUsize::new(0));
        let policy = policy(Arc::clone(&runs));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(policy.compilations(), 0);
    }

    #[test]
    fn test_memoized_per_key() {
        let runs = Arc::new(AtomicUsize::new(0));
        let policy = policy(Arc::clone(&runs));
        let alice = User { admin: true };
        let bob = User { admin: false };

        let first = policy.evaluate(&alice, None).unwrap();
        let second = policy.evaluate(&alice, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let other = policy.evaluate(&bob, None).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(first.is_allowed(&Action::View, "secrecy_level"));
        assert!(!other.is_allowed(&Action::View, "secrecy_level"));

        policy.evaluate(&alice, None).unwrap();
        assert_eq!(policy.compilations(), 3);
    }

    #[test]
    fn test_sample_changes_key() {
        let runs = Arc::new(AtomicUsize::new(0));
        let policy = policy(Arc::clone(&runs));
        let alice = User { admin: true };

        let mut record = Record::new("Article", "id");
        record.set("content", "a");
        policy.evaluate(&alice, Some(&record)).unwrap();
        policy.evaluate(&alice, Some(&record)).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        record.set("content", "b");
        policy.evaluate(&alice, Some(&record)).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        policy.evaluate(&alice, None).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_config_error_is_not_memoized() {
        let entity = Arc::new(EntityDef::new("Article"));
        let block: RuleBlock<User> =
            Arc::new(|rules: &mut Rules, _user: &User, _sample: Option<&Record>| {
                rules.can("view", "content");
            });
        let policy = Policy::new(entity, block, Arc::new(ValidatorCatalog::builtin()));
        let user = User { admin: false };
        assert!(policy.evaluate(&user, None).is_err());
        assert!(policy.evaluate(&user, None).is_err());
        assert_eq!(policy.compilations(), 0);
    }
}
