//! Declarative detection rules -- file grammar, condition AST, and the
//! engine that evaluates every loaded rule against normalized records.

pub mod engine;
pub mod parser;

pub use engine::RuleEngine;
pub use parser::{parse_rule_text, Condition, FieldPath};

use std::collections::BTreeMap;
use thiserror::Error;

/// Rule metadata block (`id`, `description`, `severity`, ...).
pub type RuleMeta = BTreeMap<String, String>;

/// A compiled rule. Immutable once loaded; `RuleEngine::reload` swaps the
/// whole set atomically.
#[derive(Debug, Clone)]
pub struct Rule {
    pub meta: RuleMeta,
    /// Conditions ANDed together; a single condition may be an OR-group.
    pub events: Vec<Condition>,
    /// Raw trailing `condition:`/`match:` block. Parsed for round-tripping
    /// but not evaluated -- matching is driven entirely by `events`.
    pub condition: Vec<String>,
}

impl Rule {
    /// True iff every event condition holds for the document.
    pub fn matches(&self, doc: &serde_json::Value) -> bool {
        self.events.iter().all(|c| c.evaluate(doc))
    }
}

#[derive(Debug, Error)]
pub enum RuleParseError {
    #[error("rule has no events block")]
    NoEvents,
    #[error("unrecognized condition on line {line}: {text}")]
    BadCondition { line: usize, text: String },
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
}
