// ghinstall-core/src/lib.rs

//! Building blocks for the ghinstall MCP server.
//!
//! The heart of the crate is the command loop: [`CommandRunner::run`] executes one shell
//! command and, when it fails, passes its standard error through a [`RuleTable`] to attach
//! human-readable causes. [`CommandRunner::run_setup`] applies that to an ordered list of
//! setup commands. The remaining modules are thin helpers for cloning, inspecting and
//! describing the host the installation happens on.

pub mod classify;
pub mod config;
pub mod errors;
pub mod repo;
pub mod runner;
pub mod setup;
pub mod system;
pub mod tree;

pub use classify::{classify, ClassificationRule, RuleTable, UNRECOGNIZED_ERROR};
pub use config::ServerConfig;
pub use errors::InstallError;
pub use repo::{analyze_repository, clone_or_update, RepoAnalysis};
pub use runner::{run, CommandResult, CommandRunner, ExecStatus, RunOptions};
pub use setup::{SetupRun, SetupStep};
pub use system::{detect_system_info, SystemInfo};
