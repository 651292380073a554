//! Guard configuration.

use serde::{Deserialize, Serialize};

/// How denied field reads are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Denied reads raise a permission error.
    #[default]
    Explicit,
    /// Denied reads return `Null`.
    Implicit,
}

impl Strategy {
    /// Check whether denied reads are softened.
    pub fn is_implicit(self) -> bool {
        matches!(self, Strategy::Implicit)
    }
}

/// Enforcement layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Return raw related values when the target entity has no policy,
    /// instead of refusing the association.
    pub allow_insecure_associations: bool,

    /// Inject the target's fetch filter into eager-loaded includes.
    pub eager_load_filtering: bool,

    /// Read strategy for proxies created without explicit options.
    pub default_strategy: Strategy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            allow_insecure_associations: false,
            eager_load_filtering: true,
            default_strategy: Strategy::Explicit,
        }
    }
}

impl GuardConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow raw access to associations whose target is ungoverned.
    pub fn with_insecure_associations(mut self, allow: bool) -> Self {
        self.allow_insecure_associations = allow;
        self
    }

    /// Enable or disable fetch filtering of eager-loaded includes.
    pub fn with_eager_load_filtering(mut self, enabled: bool) -> Self {
        self.eager_load_filtering = enabled;
        self
    }

    /// Set the default read strategy.
    pub fn with_default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }
}
