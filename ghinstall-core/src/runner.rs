// ghinstall-core/src/runner.rs

//! Runs one shell command and records how it went.
//!
//! Commands are handed to the platform shell (`sh -c` on Unix, `cmd /C` on Windows)
//! and inherit the caller's environment unchanged. Standard input is closed so a
//! command cannot read from the MCP transport.
//!
//! **Warning:** this executes arbitrary, caller-controlled text with the privileges of
//! the host process. Nothing here sandboxes or validates the command.
//!
//! By default a run blocks until the child exits, however long that takes. Callers that
//! cannot tolerate that pass a timeout and/or a [`CancellationToken`] in [`RunOptions`].
//!
//! On Unix each shell starts in a process group of its own, and an interrupted run kills
//! the whole group, so pipelines, subshells and background jobs the command started go
//! with it. A run counts as finished only once its output pipes close: a background job
//! that keeps stdout open holds the run open until it exits or is killed.

use crate::classify::RuleTable;
#[cfg(unix)]
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cause recorded when the child could not be started or waited on.
pub const SPAWN_FAILURE_CAUSE: &str = "Exception occurred while executing command";
/// Cause recorded when a run is cancelled through its token.
pub const CANCELLED_CAUSE: &str = "Command cancelled before completion";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// The child ran to completion; see the exit code.
    Completed,
    /// The child could not be spawned (bad working directory, missing shell) or waited on.
    SpawnFailed,
    /// The child outlived the caller's timeout and was killed.
    TimedOut,
    /// The caller's cancellation token fired and the child was killed.
    Cancelled,
}

/// Outcome of a single command. Built only by the runner and read-only afterwards.
///
/// `success` is always `exit_code == 0`, and `causes` is non-empty exactly when
/// `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    command: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
    success: bool,
    causes: Vec<String>,
    status: ExecStatus,
}

impl CommandResult {
    fn completed(command: &str, exit_code: i32, stdout: String, stderr: String, rules: &RuleTable) -> Self {
        let success = exit_code == 0;
        let causes = if success { Vec::new() } else { rules.classify(&stderr) };
        Self {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
            success,
            causes,
            status: ExecStatus::Completed,
        }
    }

    fn spawn_failed(command: &str, error: &io::Error) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: error.to_string(),
            success: false,
            causes: vec![SPAWN_FAILURE_CAUSE.to_string()],
            status: ExecStatus::SpawnFailed,
        }
    }

    fn interrupted(command: &str, status: ExecStatus, cause: String) -> Self {
        Self {
            command: command.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: cause.clone(),
            success: false,
            causes: vec![cause],
            status,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }
}

/// Per-run settings. The default runs in the current directory and waits forever.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub working_directory: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_interruptible(&self) -> bool {
        self.timeout.is_some() || self.cancel.is_some()
    }
}

enum Waited {
    Exited { code: i32, stdout: String, stderr: String },
    TimedOut(Duration),
    Cancelled,
}

impl Waited {
    fn exited(output: &std::process::Output) -> Self {
        Waited::Exited {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Runs commands and classifies their failures against a rule table.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    rules: Arc<RuleTable>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Arc::new(RuleTable::builtin().clone()))
    }
}

impl CommandRunner {
    pub fn new(rules: Arc<RuleTable>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Runs `command` to completion. Never fails: every problem is folded into the
    /// returned [`CommandResult`].
    pub fn run(&self, command: &str, options: &RunOptions) -> CommandResult {
        debug!(command, working_directory = ?options.working_directory, "Executing command");

        let mut expression = shell_expression(command)
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        if let Some(dir) = &options.working_directory {
            expression = expression.dir(dir);
        }

        let handle = match expression.start() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(command, error = %e, "Failed to spawn command process");
                return CommandResult::spawn_failed(command, &e);
            }
        };

        let waited = if options.is_interruptible() {
            wait_interruptibly(&handle, options)
        } else {
            handle.wait().map(Waited::exited)
        };

        match waited {
            Ok(Waited::Exited { code, stdout, stderr }) => {
                debug!(
                    "Command exit status: {}\nStdout preview (first 3 lines):\n{}\nStderr preview (first 3 lines):\n{}",
                    code,
                    preview(&stdout),
                    preview(&stderr)
                );
                CommandResult::completed(command, code, stdout, stderr, &self.rules)
            }
            Ok(Waited::TimedOut(after)) => {
                warn!(command, timeout_ms = after.as_millis() as u64, "Command timed out and was killed");
                CommandResult::interrupted(
                    command,
                    ExecStatus::TimedOut,
                    format!("Command timed out after {} ms", after.as_millis()),
                )
            }
            Ok(Waited::Cancelled) => {
                warn!(command, "Command cancelled and was killed");
                CommandResult::interrupted(command, ExecStatus::Cancelled, CANCELLED_CAUSE.to_string())
            }
            Err(e) => {
                warn!(command, error = %e, "Failed while waiting on command process");
                CommandResult::spawn_failed(command, &e)
            }
        }
    }
}

/// Runs `command` with the built-in rule table and no timeout.
pub fn run(command: &str, working_directory: Option<&Path>) -> CommandResult {
    let options = RunOptions {
        working_directory: working_directory.map(Path::to_path_buf),
        ..Default::default()
    };
    CommandRunner::default().run(command, &options)
}

#[cfg(not(unix))]
fn shell_expression(command: &str) -> duct::Expression {
    duct::cmd!("cmd", "/C", command)
}

#[cfg(unix)]
fn shell_expression(command: &str) -> duct::Expression {
    use std::os::unix::process::CommandExt;
    duct::cmd!("sh", "-c", command).before_spawn(|child| {
        child.process_group(0);
        Ok(())
    })
}

/// Kills the shell and everything it started, then reaps the shell.
fn kill_command(handle: &duct::Handle) -> io::Result<()> {
    #[cfg(unix)]
    for pid in handle.pids() {
        // The shell's pid is also its process group id.
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(e.into()),
        }
    }
    handle.kill()
}

fn wait_interruptibly(handle: &duct::Handle, options: &RunOptions) -> io::Result<Waited> {
    let deadline = options.timeout.map(|timeout| (Instant::now() + timeout, timeout));
    loop {
        if let Some(output) = handle.try_wait()? {
            return Ok(Waited::exited(output));
        }
        if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            kill_command(handle)?;
            return Ok(Waited::Cancelled);
        }
        if let Some((at, timeout)) = deadline {
            if Instant::now() >= at {
                kill_command(handle)?;
                return Ok(Waited::TimedOut(timeout));
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn preview(text: &str) -> String {
    text.lines().take(3).collect::<Vec<_>>().join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::classify::{ClassificationRule, UNRECOGNIZED_ERROR};
    use tempfile::tempdir;

    #[test]
    fn test_successful_command_has_no_causes() {
        let result = run("true", None);
        assert_eq!(result.exit_code(), 0);
        assert!(result.success());
        assert_eq!(result.stdout(), "");
        assert_eq!(result.stderr(), "");
        assert!(result.causes().is_empty());
        assert_eq!(result.status(), ExecStatus::Completed);
        assert_eq!(result.command(), "true");
    }

    #[test]
    fn test_stdout_is_captured() {
        let result = run("echo Hello Installer", None);
        assert!(result.success());
        assert_eq!(result.stdout().trim(), "Hello Installer");
    }

    #[test]
    fn test_shell_features_are_available() {
        let result = run("printf 'a\\nb\\n' | wc -l; echo done", None);
        assert!(result.success(), "stderr: {}", result.stderr());
        let lines: Vec<&str> = result.stdout().lines().map(str::trim).collect();
        assert_eq!(lines, vec!["2", "done"]);
    }

    #[test]
    fn test_module_not_found_is_classified() {
        let result = run(
            "echo \"ModuleNotFoundError: No module named 'numpy'\" >&2; exit 1",
            None,
        );
        assert!(!result.success());
        assert_eq!(result.exit_code(), 1);
        assert!(result.stderr().contains("ModuleNotFoundError"));
        assert!(result.causes().contains(&"Missing Python module".to_string()));
        assert_eq!(result.status(), ExecStatus::Completed);
    }

    #[test]
    fn test_unmatched_failure_is_unrecognized() {
        let result = run("exit 3", None);
        assert_eq!(result.exit_code(), 3);
        assert!(!result.success());
        assert_eq!(result.causes(), &[UNRECOGNIZED_ERROR.to_string()]);
    }

    #[test]
    fn test_missing_program_fails_through_shell() {
        let result = run("this_command_does_not_exist_qwertyuiop", None);
        assert_ne!(result.exit_code(), 0);
        assert!(!result.success());
        assert!(!result.causes().is_empty());
        assert!(result.stderr().contains("not found"));
    }

    #[test]
    fn test_invalid_working_directory_is_spawn_failure() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let result = run("true", Some(&missing));
        assert_eq!(result.exit_code(), -1);
        assert!(!result.success());
        assert!(!result.stderr().is_empty());
        assert!(result.stdout().is_empty());
        assert_eq!(result.causes(), &[SPAWN_FAILURE_CAUSE.to_string()]);
        assert_eq!(result.status(), ExecStatus::SpawnFailed);
    }

    #[test]
    fn test_working_directory_is_used() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let result = run("ls", Some(dir.path()));
        assert!(result.success());
        assert!(result.stdout().contains("marker.txt"));
    }

    #[test]
    fn test_injected_rules_are_used() {
        let runner = CommandRunner::new(Arc::new(RuleTable::new(vec![
            ClassificationRule::grouped("npm", "ERESOLVE", "Dependency resolution conflict"),
        ])));
        let result = runner.run("echo 'npm ERR! code ERESOLVE' >&2; exit 1", &RunOptions::default());
        assert_eq!(result.causes(), &["npm - Dependency resolution conflict".to_string()]);
    }

    #[test]
    fn test_timeout_kills_command() {
        let options = RunOptions::default().with_timeout(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let result = CommandRunner::default().run("sleep 5", &options);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.status(), ExecStatus::TimedOut);
        assert_eq!(result.exit_code(), -1);
        assert!(!result.success());
        assert_eq!(result.causes(), &["Command timed out after 200 ms".to_string()]);
    }

    #[test]
    fn test_timeout_not_hit_by_fast_command() {
        let options = RunOptions::default().with_timeout(Some(Duration::from_secs(30)));
        let result = CommandRunner::default().run("echo quick", &options);
        assert_eq!(result.status(), ExecStatus::Completed);
        assert!(result.success());
        assert_eq!(result.stdout().trim(), "quick");
    }

    #[test]
    fn test_cancelled_token_kills_command() {
        let token = CancellationToken::new();
        token.cancel();
        let options = RunOptions::default().with_cancel(token);
        let result = CommandRunner::default().run("sleep 5", &options);
        assert_eq!(result.status(), ExecStatus::Cancelled);
        assert_eq!(result.causes(), &[CANCELLED_CAUSE.to_string()]);
        assert!(!result.success());
    }

    #[test]
    fn test_cancel_while_running_kills_command() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                token.cancel();
            })
        };
        let options = RunOptions::default().with_cancel(token);
        let started = Instant::now();
        let result = CommandRunner::default().run("sleep 5", &options);
        canceller.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(result.status(), ExecStatus::Cancelled);
        assert_eq!(result.exit_code(), -1);
    }

    #[test]
    fn test_timeout_kills_subshells() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("finished.txt");
        let command = format!("(sleep 1; touch '{}'); echo unreachable", marker.display());
        let options = RunOptions::default().with_timeout(Some(Duration::from_millis(200)));

        let result = CommandRunner::default().run(&command, &options);
        assert_eq!(result.status(), ExecStatus::TimedOut);

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "subshell outlived the timeout");
    }

    #[test]
    fn test_timeout_applies_to_background_jobs_holding_output() {
        let options = RunOptions::default().with_timeout(Some(Duration::from_millis(300)));
        let started = Instant::now();
        let result = CommandRunner::default().run("(sleep 5 &); exit 0", &options);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.status(), ExecStatus::TimedOut);
        assert!(!result.success());
    }

    #[test]
    fn test_serialized_fields() {
        let result = run("echo out; echo err >&2; exit 2", None);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["command"], "echo out; echo err >&2; exit 2");
        assert_eq!(value["exit_code"], 2);
        assert_eq!(value["stdout"], "out\n");
        assert_eq!(value["stderr"], "err\n");
        assert_eq!(value["success"], false);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["causes"][0], UNRECOGNIZED_ERROR);
    }
}
