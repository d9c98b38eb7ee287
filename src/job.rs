//! Shell command job used by the host binary

use std::process::{Command, ExitStatus};

use crate::scheduler::{Job, JobError};

/// How much of the command's stderr to keep in a failure
const STDERR_LIMIT: usize = 4096;

/// Runs a command through the platform shell
#[derive(Debug, Clone)]
pub struct CommandJob {
    command: String,
}

impl CommandJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn shell(&self) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", self.command.as_str()]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", self.command.as_str()]);
            cmd
        }
    }
}

impl Job for CommandJob {
    fn run(&mut self) -> Result<(), JobError> {
        tracing::debug!(command = %self.command, "Running job");
        let output = self.shell().output().map_err(|source| CommandError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if output.status.success() {
            return Ok(());
        }

        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.len() > STDERR_LIMIT {
            let mut cut = STDERR_LIMIT;
            while !stderr.is_char_boundary(cut) {
                cut -= 1;
            }
            stderr.truncate(cut);
        }

        Err(CommandError::Failed {
            command: self.command.clone(),
            status: output.status,
            stderr,
        }
        .into())
    }
}

/// Command job errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("could not start {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command:?} failed ({status}){}", stderr_suffix(.stderr))]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}
