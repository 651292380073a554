//! Actions a rule block can grant.

use std::fmt;

/// An action on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    /// Read attributes.
    View,
    /// Save a new record.
    Create,
    /// Save a persisted record.
    Update,
    /// Application-defined action.
    Custom(String),
}

impl Action {
    /// Action name as written in rule blocks.
    pub fn as_str(&self) -> &str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Custom(name) => name,
        }
    }

    /// The save action for a record.
    pub fn for_save(is_new: bool) -> Self {
        if is_new {
            Action::Create
        } else {
            Action::Update
        }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        match name {
            "view" => Action::View,
            "create" => Action::Create,
            "update" => Action::Update,
            other => Action::Custom(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Action::from(name.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One or several actions.
pub trait IntoActions {
    /// Convert into a list of actions.
    fn into_actions(self) -> Vec<Action>;
}

impl IntoActions for Action {
    fn into_actions(self) -> Vec<Action> {
        vec![self]
    }
}

impl IntoActions for &str {
    fn into_actions(self) -> Vec<Action> {
        vec![Action::from(self)]
    }
}

impl<A: Into<Action>, const N: usize> IntoActions for [A; N] {
    fn into_actions(self) -> Vec<Action> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<A: Into<Action>> IntoActions for Vec<A> {
    fn into_actions(self) -> Vec<Action> {
        self.into_iter().map(Into::into).collect()
    }
}
