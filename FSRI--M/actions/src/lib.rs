#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Action rule engine: maps composite pillar scores and contextual flags to
//! persona-scoped recommendations defined in an external YAML document.

/// Typed rule schema and validating parser.
#[path = "../rules.rs"]
pub mod rules;

/// Versioned rule store with validate-then-swap reloads.
#[path = "../store.rs"]
pub mod store;

/// Rule matching and ranking.
#[path = "../matcher.rs"]
pub mod matcher;

pub use matcher::{ActionSuggestion, Extras, MatchRequest, CONDUCIVE_WEATHER_MARKER};
pub use rules::{ActionRule, RuleError, RuleIssue, RuleTable, ValidationErrors, WeatherGate};
pub use store::{
    FileRuleSource, ReloadError, RuleSnapshot, RuleSource, RuleStore, StaticRuleSource,
};
