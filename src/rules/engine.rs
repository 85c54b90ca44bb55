//! Rule engine: loads `.rule` files from a directory and evaluates every
//! loaded rule against normalized records.

use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::rules::{parse_rule_text, Rule, RuleMeta};

const RULE_EXTENSION: &str = "rule";

/// Holds the compiled rule set. `reload` parses the directory again and
/// swaps the whole set in one write, so matchers never see a partial set.
pub struct RuleEngine {
    rules_dir: PathBuf,
    rules: RwLock<Vec<Rule>>,
}

impl RuleEngine {
    /// Load all rules from `rules_dir`. A missing directory yields an
    /// empty set; malformed files are logged and skipped.
    pub fn load(rules_dir: impl Into<PathBuf>) -> Self {
        let rules_dir = rules_dir.into();
        let rules = load_dir(&rules_dir);
        Self {
            rules_dir,
            rules: RwLock::new(rules),
        }
    }

    /// Metadata of every rule whose events all match the document.
    pub fn match_document(&self, doc: &Value) -> Vec<RuleMeta> {
        let rules = self.rules.read().expect("rule set lock poisoned");
        rules
            .iter()
            .filter(|rule| rule.matches(doc))
            .map(|rule| rule.meta.clone())
            .collect()
    }

    /// Re-parse the rules directory and atomically replace the set.
    /// Returns the number of loaded rules.
    pub fn reload(&self) -> Result<usize> {
        let fresh = load_dir(&self.rules_dir);
        let count = fresh.len();
        let mut rules = self.rules.write().expect("rule set lock poisoned");
        *rules = fresh;
        info!(count, dir = %self.rules_dir.display(), "rule set reloaded");
        Ok(count)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().expect("rule set lock poisoned").len()
    }

    /// Loaded rule metadata, for listing.
    pub fn rule_metas(&self) -> Vec<RuleMeta> {
        let rules = self.rules.read().expect("rule set lock poisoned");
        rules.iter().map(|r| r.meta.clone()).collect()
    }
}

fn load_dir(dir: &Path) -> Vec<Rule> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "rules directory unavailable, loading no rules: {e}");
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(RULE_EXTENSION))
        .collect();
    paths.sort();

    let mut rules = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %path.display(), "skipping unreadable rule file: {e}");
                continue;
            }
        };
        match parse_rule_text(&content) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!(file = %path.display(), "skipping malformed rule: {e}"),
        }
    }

    info!(count = rules.len(), dir = %dir.display(), "rules loaded");
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_rule(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_match_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(
            dir.path(),
            "errors.rule",
            "meta:\n  id = \"any-error\"\nevents:\n  $severity = \"ERROR\"\n",
        );

        let engine = RuleEngine::load(dir.path());
        assert_eq!(engine.rule_count(), 1);

        let matches = engine.match_document(&json!({"severity": "error"}));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].get("id").unwrap(), "any-error");

        assert!(engine.match_document(&json!({"severity": "WARNING"})).is_empty());

        write_rule(
            dir.path(),
            "timeouts.rule",
            "meta:\n  id = \"timeouts\"\nevents:\n  $message contains \"timeout\"\n",
        );
        assert_eq!(engine.reload().unwrap(), 2);

        let matches = engine.match_document(&json!({
            "severity": "ERROR",
            "message": "Query timeout after 5000ms"
        }));
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_malformed_rule_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "bad.rule", "events:\n  severity equals ERROR\n");
        write_rule(
            dir.path(),
            "good.rule",
            "meta:\n  id = \"ok\"\nevents:\n  $severity = \"ERROR\"\n",
        );

        let engine = RuleEngine::load(dir.path());
        assert_eq!(engine.rule_count(), 1);
    }

    #[test]
    fn test_non_rule_extension_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "notes.txt", "events:\n  $a = \"b\"\n");
        let engine = RuleEngine::load(dir.path());
        assert_eq!(engine.rule_count(), 0);
    }

    #[test]
    fn test_missing_directory_loads_empty() {
        let engine = RuleEngine::load("/definitely/not/a/real/dir");
        assert_eq!(engine.rule_count(), 0);
        assert!(engine.match_document(&json!({"severity": "ERROR"})).is_empty());
    }
}
