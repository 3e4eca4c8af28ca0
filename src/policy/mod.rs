//! Policy engine: compliance verdicts against a versioned rule table
//!
//! - `pattern` - single-trailing-wildcard matching
//! - `size` - size-class total order
//! - `rules` - rule table loading and the built-in company policy
//! - `engine` - evaluation, annotation and flagging

pub mod engine;
pub mod pattern;
pub mod rules;
pub mod size;

pub use engine::{PolicyEngine, ResourceDescriptor, Verdict};
pub use pattern::Pattern;
pub use rules::{PolicyError, PolicyRule, PolicyTable};
pub use size::SizeClass;
