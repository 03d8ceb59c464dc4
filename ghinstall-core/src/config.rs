// ghinstall-core/src/config.rs

//! Handles the optional TOML configuration file for the server.

use crate::classify::{ClassificationRule, RuleTable};
use crate::tree::DEFAULT_TREE_DEPTH;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_TREE_DEPTH: usize = 16;

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub repo: RepoConfig,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunnerConfig {
    /// Absent means commands may run forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub include_builtin: bool,
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RepoConfig {
    pub clone_root: Option<PathBuf>,
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
}

fn default_true() -> bool {
    true
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            rules: Vec::new(),
        }
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            clone_root: None,
            tree_depth: DEFAULT_TREE_DEPTH,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(content: &str) -> Result<ServerConfig> {
        let config: ServerConfig = match toml::from_str(content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse TOML content");
                return Err(anyhow!(e)).context("Failed to parse configuration TOML content. Check TOML syntax.");
            }
        };

        if config.runner.timeout_secs == Some(0) {
            return Err(anyhow!("'runner.timeout_secs' must be greater than zero; omit it to disable the timeout."));
        }

        for (i, rule) in config.classifier.rules.iter().enumerate() {
            if rule.trigger.trim().is_empty() {
                return Err(anyhow!("Classifier rule #{} has an empty 'trigger'.", i + 1));
            }
            if rule.explanation.trim().is_empty() {
                return Err(anyhow!("Classifier rule #{} ('{}') has an empty 'explanation'.", i + 1, rule.trigger));
            }
            if rule.parent.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(anyhow!("Classifier rule #{} ('{}') has an empty 'parent'.", i + 1, rule.trigger));
            }
        }

        if config.repo.tree_depth > MAX_TREE_DEPTH {
            return Err(anyhow!(
                "'repo.tree_depth' is {}, the maximum is {}.",
                config.repo.tree_depth,
                MAX_TREE_DEPTH
            ));
        }

        tracing::info!(
            extra_rules = config.classifier.rules.len(),
            "Successfully parsed and validated server configuration."
        );
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<ServerConfig> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse or validate config file: {:?}", path))
    }

    /// The classification table this configuration asks for.
    pub fn rule_table(&self) -> RuleTable {
        let extra = self.classifier.rules.iter().cloned();
        if self.classifier.include_builtin {
            RuleTable::builtin().extended(extra)
        } else {
            RuleTable::new(extra.collect())
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.runner.timeout_secs.map(Duration::from_secs)
    }
}
