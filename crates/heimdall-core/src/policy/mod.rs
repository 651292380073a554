//! Policy evaluation: the rule DSL and compiled decision tables.

mod action;
mod evaluator;
mod rules;
mod table;

pub use action::{Action, IntoActions};
pub use evaluator::{Policy, RuleBlock, SecurityContext};
pub use rules::{FieldGrant, IntoFieldGrants, Rules};
pub use table::{DecisionTable, DELETE, FETCH};
