//! Restricted views over records and collections.
//!
//! A [`CollectionProxy`] wraps a query that already carries the fetch scope
//! of its context; a [`RecordProxy`] wraps one record together with the
//! decision table computed for it. Both only ever wrap plain
//! [`Record`](heimdall_proto::Record) / [`Query`](heimdall_proto::Query)
//! values, so a proxy can never end up inside another proxy.

mod collection;
mod record;

use std::collections::BTreeMap;

pub use collection::CollectionProxy;
pub use record::{RawRelated, RecordProxy, Related, SaveOptions};

/// Nested relation names, as used for eager loading.
///
/// Built from dotted paths: `"comments.author"` becomes
/// `{comments: {author: {}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree(BTreeMap<String, IncludeTree>);

impl IncludeTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dotted path.
    pub fn with_path(mut self, path: &str) -> Self {
        self.add_path(path);
        self
    }

    /// Add a dotted path in place.
    pub fn add_path(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
            node = node.0.entry(segment.to_string()).or_default();
        }
    }

    /// Nest a subtree under a relation.
    pub fn with_nested(mut self, relation: impl Into<String>, subtree: IncludeTree) -> Self {
        self.0.entry(relation.into()).or_default().merge(subtree);
        self
    }

    /// Merge another tree into this one.
    pub fn merge(&mut self, other: IncludeTree) {
        for (name, subtree) in other.0 {
            self.0.entry(name).or_default().merge(subtree);
        }
    }

    /// Subtree for a relation, if it is part of the tree.
    pub fn get(&self, relation: &str) -> Option<&IncludeTree> {
        self.0.get(relation)
    }

    /// Check whether the tree names no relations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Top-level relations with their subtrees.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IncludeTree)> {
        self.0.iter().map(|(name, tree)| (name.as_str(), tree))
    }
}

impl From<&str> for IncludeTree {
    fn from(path: &str) -> Self {
        IncludeTree::new().with_path(path)
    }
}

impl<const N: usize> From<[&str; N]> for IncludeTree {
    fn from(paths: [&str; N]) -> Self {
        paths.into_iter().fold(IncludeTree::new(), IncludeTree::with_path)
    }
}

impl From<Vec<&str>> for IncludeTree {
    fn from(paths: Vec<&str>) -> Self {
        paths.into_iter().fold(IncludeTree::new(), IncludeTree::with_path)
    }
}

/// Options carried by a proxy and handed on to the proxies it produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Denied field reads return `Null` instead of failing.
    pub implicit: bool,
    /// Relations whose rows were preloaded with the wrapped data.
    pub eager_loaded: IncludeTree,
}

impl ProxyOptions {
    /// Explicit options with no eager-load annotation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read strategy.
    pub fn with_implicit(mut self, implicit: bool) -> Self {
        self.implicit = implicit;
        self
    }

    /// Set the eager-load annotation.
    pub fn with_eager_loaded(mut self, tree: IncludeTree) -> Self {
        self.eager_loaded = tree;
        self
    }

    /// Same strategy, no eager-load annotation.
    pub(crate) fn without_eager_loaded(&self) -> Self {
        Self {
            implicit: self.implicit,
            eager_loaded: IncludeTree::new(),
        }
    }

    /// Options for the proxies of one relation.
    pub(crate) fn for_relation(&self, relation: &str) -> Self {
        Self {
            implicit: self.implicit,
            eager_loaded: self.eager_loaded.get(relation).cloned().unwrap_or_default(),
        }
    }
}

/// Strip trailing accessor markers (`?`, `=`, `!`) from a field name.
pub fn normalize_field(name: &str) -> &str {
    name.trim_end_matches(['?', '=', '!'])
}
