// ghinstall-core/src/system.rs

//! Host facts an agent checks before choosing install commands.

use crate::runner::{CommandRunner, RunOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;

/// Tools whose presence on `PATH` is reported.
const PROBED_TOOLS: &[&str] = &["git", "pip", "conda", "npm", "docker"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemInfo {
    /// `unix` or `windows`.
    pub os: String,
    /// `linux`, `macos`, `windows`, ...
    pub platform: String,
    pub arch: String,
    pub python_version: Option<String>,
    pub conda_exists: bool,
    pub tools: BTreeMap<String, bool>,
}

pub fn detect_system_info(runner: &CommandRunner) -> SystemInfo {
    let tools: BTreeMap<String, bool> = PROBED_TOOLS
        .iter()
        .map(|tool| (tool.to_string(), find_in_path(tool)))
        .collect();
    SystemInfo {
        os: env::consts::FAMILY.to_string(),
        platform: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        python_version: python_version(runner),
        conda_exists: tools.get("conda").copied().unwrap_or(false),
        tools,
    }
}

/// Asks `python3`, then `python`, for its version. Older interpreters print it on stderr.
fn python_version(runner: &CommandRunner) -> Option<String> {
    ["python3 --version", "python --version"]
        .iter()
        .map(|command| runner.run(command, &RunOptions::default()))
        .find(|result| result.success())
        .and_then(|result| {
            let text = if result.stdout().trim().is_empty() {
                result.stderr()
            } else {
                result.stdout()
            };
            let version = text.trim();
            (!version.is_empty()).then(|| version.to_string())
        })
}

/// True when an executable called `name` can be found on `PATH`.
pub fn find_in_path(name: &str) -> bool {
    which::which(name).is_ok()
}
