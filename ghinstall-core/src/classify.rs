// ghinstall-core/src/classify.rs

//! Maps the error text of a failed command to human-readable causes.
//!
//! Classification is plain substring containment against an ordered [`RuleTable`].
//! Every matching rule contributes, in table order, so the output for a given text
//! is always the same.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Returned when no rule matches.
pub const UNRECOGNIZED_ERROR: &str = "Unrecognized error type";

/// A single substring rule. Rules with a `parent` belong to a group (usually the
/// tool that produced the message) and render as `"<parent> - <explanation>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub trigger: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ClassificationRule {
    pub fn flat(trigger: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            explanation: explanation.into(),
            parent: None,
        }
    }

    pub fn grouped(
        parent: impl Into<String>,
        trigger: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            explanation: explanation.into(),
            parent: Some(parent.into()),
        }
    }

    fn matches(&self, error_text: &str) -> bool {
        error_text.contains(self.trigger.as_str())
    }

    fn describe(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{} - {}", parent, self.explanation),
            None => self.explanation.clone(),
        }
    }
}

/// Ordered rule set. Evaluation order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<ClassificationRule>,
}

lazy_static! {
    static ref BUILTIN: RuleTable = RuleTable::new(vec![
        ClassificationRule::flat("ModuleNotFoundError", "Missing Python module"),
        ClassificationRule::flat("ImportError", "Import error, possibly missing dependencies"),
        ClassificationRule::flat("SyntaxError", "Python syntax error"),
        ClassificationRule::flat(
            "PermissionError",
            "Permission error, may require admin privileges",
        ),
        ClassificationRule::flat("FileNotFoundError", "File not found"),
        ClassificationRule::flat("ConnectionError", "Connection error, may require network access"),
        ClassificationRule::grouped(
            "pip",
            "Could not find a version",
            "Could not find the specified package version",
        ),
        ClassificationRule::grouped("pip", "Command errored out", "Command execution error"),
        ClassificationRule::grouped(
            "conda",
            "PackagesNotFoundError",
            "Could not find the specified conda package",
        ),
        ClassificationRule::grouped("conda", "CondaEnvironmentError", "Conda environment error"),
    ]);
}

impl RuleTable {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// The rules shipped with ghinstall, built once per process.
    pub fn builtin() -> &'static RuleTable {
        &BUILTIN
    }

    /// Returns a copy of this table with `extra` appended after the existing rules.
    pub fn extended(&self, extra: impl IntoIterator<Item = ClassificationRule>) -> Self {
        let mut rules = self.rules.clone();
        rules.extend(extra);
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Never returns an empty list; falls back to [`UNRECOGNIZED_ERROR`].
    pub fn classify(&self, error_text: &str) -> Vec<String> {
        let causes: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(error_text))
            .map(ClassificationRule::describe)
            .collect();

        if causes.is_empty() {
            vec![UNRECOGNIZED_ERROR.to_string()]
        } else {
            causes
        }
    }
}

/// Classifies `error_text` against the built-in table.
pub fn classify(error_text: &str) -> Vec<String> {
    RuleTable::builtin().classify(error_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_unrecognized() {
        assert_eq!(classify(""), vec![UNRECOGNIZED_ERROR.to_string()]);
    }

    #[test]
    fn test_unknown_text_is_unrecognized() {
        assert_eq!(
            classify("segmentation fault (core dumped)"),
            vec![UNRECOGNIZED_ERROR.to_string()]
        );
    }

    #[test]
    fn test_flat_rule_renders_bare_explanation() {
        let causes = classify("ModuleNotFoundError: No module named 'torch'");
        assert_eq!(causes, vec!["Missing Python module".to_string()]);
    }

    #[test]
    fn test_grouped_rule_renders_parent_prefix() {
        let causes = classify(
            "ERROR: Could not find a version that satisfies the requirement foo==9.9",
        );
        assert_eq!(
            causes,
            vec!["pip - Could not find the specified package version".to_string()]
        );
    }

    #[test]
    fn test_all_matches_reported_in_table_order() {
        // Text order is deliberately the reverse of table order.
        let text = "CondaEnvironmentError: bad env\nPermissionError: denied\nImportError: x";
        let causes = classify(text);
        assert_eq!(
            causes,
            vec![
                "Import error, possibly missing dependencies".to_string(),
                "Permission error, may require admin privileges".to_string(),
                "conda - Conda environment error".to_string(),
            ]
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "ConnectionError\nCommand errored out\nPackagesNotFoundError";
        let first = classify(text);
        for _ in 0..5 {
            assert_eq!(classify(text), first);
        }
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert_eq!(
            classify("modulenotfounderror"),
            vec![UNRECOGNIZED_ERROR.to_string()]
        );
    }

    #[test]
    fn test_injected_table_replaces_builtin() {
        let table = RuleTable::new(vec![
            ClassificationRule::flat("linker `cc` not found", "C toolchain missing"),
            ClassificationRule::grouped("npm", "ERESOLVE", "Dependency resolution conflict"),
        ]);
        assert_eq!(
            table.classify("npm ERR! code ERESOLVE"),
            vec!["npm - Dependency resolution conflict".to_string()]
        );
        // Built-in triggers are not part of this table.
        assert_eq!(
            table.classify("ModuleNotFoundError"),
            vec![UNRECOGNIZED_ERROR.to_string()]
        );
    }

    #[test]
    fn test_extended_table_appends_after_builtin() {
        let table = RuleTable::builtin()
            .extended(vec![ClassificationRule::flat("ModuleNotFound", "Extra rule")]);
        assert_eq!(table.len(), RuleTable::builtin().len() + 1);
        assert_eq!(
            table.classify("ModuleNotFoundError"),
            vec!["Missing Python module".to_string(), "Extra rule".to_string()]
        );
    }

    #[test]
    fn test_empty_table_always_unrecognized() {
        let table = RuleTable::default();
        assert!(table.is_empty());
        assert_eq!(table.classify("anything"), vec![UNRECOGNIZED_ERROR.to_string()]);
    }
}
