pub mod criterion;
pub mod engine;
pub mod error;
pub mod rule;

pub use criterion::{Criterion, Operator};
pub use engine::RuleSet;
pub use error::{Result, RuleError};
pub use rule::{load_rules, Rule};
