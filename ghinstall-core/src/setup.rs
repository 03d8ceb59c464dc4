// ghinstall-core/src/setup.rs

//! Sequential execution of a repository's setup commands.

use crate::runner::{CommandResult, CommandRunner, RunOptions};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Results of a setup sequence, in the order the commands ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupRun {
    results: Vec<CommandResult>,
    all_successful: bool,
}

impl Default for SetupRun {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupRun {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            all_successful: true,
        }
    }

    pub fn push(&mut self, result: CommandResult) {
        self.all_successful &= result.success();
        self.results.push(result);
    }

    pub fn results(&self) -> &[CommandResult] {
        &self.results
    }

    /// True when every command succeeded. An empty run counts as successful.
    pub fn all_successful(&self) -> bool {
        self.all_successful
    }
}

/// Outcome of running a single entry of a setup list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SetupStep {
    Executed {
        repo_path: Option<PathBuf>,
        step: usize,
        command: String,
        result: CommandResult,
        next_step: Option<usize>,
        finished: bool,
    },
    Exhausted {
        repo_path: Option<PathBuf>,
        finished: bool,
        message: String,
    },
}

impl CommandRunner {
    /// Runs every command in order. A failing command does not stop the ones after it.
    pub fn run_setup<S: AsRef<str>>(&self, commands: &[S], options: &RunOptions) -> SetupRun {
        let mut run = SetupRun::new();
        for (step, command) in commands.iter().enumerate() {
            info!(step, total = commands.len(), command = command.as_ref(), "Running setup command");
            run.push(self.run(command.as_ref(), options));
        }
        info!(
            total = commands.len(),
            all_successful = run.all_successful(),
            "Setup sequence finished"
        );
        run
    }

    /// Runs only `commands[current_step]`, so an agent can drive the sequence one call
    /// at a time and inspect each result before continuing.
    pub fn run_setup_step<S: AsRef<str>>(
        &self,
        commands: &[S],
        current_step: usize,
        options: &RunOptions,
    ) -> SetupStep {
        let repo_path = options.working_directory.clone();
        let Some(command) = commands.get(current_step) else {
            return SetupStep::Exhausted {
                repo_path,
                finished: true,
                message: "All setup commands have been executed.".to_string(),
            };
        };

        info!(step = current_step, total = commands.len(), command = command.as_ref(), "Running setup step");
        let result = self.run(command.as_ref(), options);
        let finished = current_step + 1 == commands.len();
        SetupStep::Executed {
            repo_path,
            step: current_step,
            command: command.as_ref().to_string(),
            result,
            next_step: if finished { None } else { Some(current_step + 1) },
            finished,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_failure_does_not_stop_later_commands() {
        let dir = tempdir().unwrap();
        let commands = ["echo first", "exit 1", "touch third.txt"];
        let run = CommandRunner::default().run_setup(&commands, &RunOptions::in_dir(dir.path()));

        assert_eq!(run.results().len(), 3);
        assert!(!run.all_successful());
        assert!(run.results()[0].success());
        assert!(!run.results()[1].success());
        assert!(run.results()[2].success());
        assert!(dir.path().join("third.txt").exists());
    }

    #[test]
    fn test_commands_run_in_order() {
        let dir = tempdir().unwrap();
        let commands = vec![
            "echo one >> log.txt".to_string(),
            "echo two >> log.txt".to_string(),
            "echo three >> log.txt".to_string(),
        ];
        let run = CommandRunner::default().run_setup(commands.as_slice(), &RunOptions::in_dir(dir.path()));
        assert!(run.all_successful());
        let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(log, "one\ntwo\nthree\n");
    }

    #[test]
    fn test_empty_setup_is_successful() {
        let commands: [&str; 0] = [];
        let run = CommandRunner::default().run_setup(&commands, &RunOptions::default());
        assert!(run.results().is_empty());
        assert!(run.all_successful());
    }

    #[test]
    fn test_setup_run_serializes_aggregate_flag() {
        let run = CommandRunner::default().run_setup(&["true", "false"], &RunOptions::default());
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["all_successful"], false);
        assert_eq!(value["results"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_step_reports_next_step() {
        let commands = ["echo a", "echo b"];
        let step = CommandRunner::default().run_setup_step(&commands, 0, &RunOptions::default());
        match step {
            SetupStep::Executed { step, command, result, next_step, finished, .. } => {
                assert_eq!(step, 0);
                assert_eq!(command, "echo a");
                assert!(result.success());
                assert_eq!(next_step, Some(1));
                assert!(!finished);
            }
            other => panic!("unexpected step outcome: {:?}", other),
        }
    }

    #[test]
    fn test_last_step_is_finished() {
        let dir = tempdir().unwrap();
        let commands = ["echo a", "exit 4"];
        let step = CommandRunner::default().run_setup_step(&commands, 1, &RunOptions::in_dir(dir.path()));
        match step {
            SetupStep::Executed { repo_path, result, next_step, finished, .. } => {
                assert_eq!(repo_path.as_deref(), Some(dir.path()));
                assert_eq!(result.exit_code(), 4);
                assert_eq!(next_step, None);
                assert!(finished);
            }
            other => panic!("unexpected step outcome: {:?}", other),
        }
    }

    #[test]
    fn test_step_past_end_is_exhausted() {
        let commands = ["echo a"];
        let step = CommandRunner::default().run_setup_step(&commands, 1, &RunOptions::default());
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["finished"], true);
        assert_eq!(value["message"], "All setup commands have been executed.");
        assert!(matches!(step, SetupStep::Exhausted { .. }));
    }
}
