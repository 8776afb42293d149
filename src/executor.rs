//! Subprocess execution of job commands.
//!
//! Commands are opaque strings handed to the host's command interpreter.
//! Execution failures are data, not errors: the worker routes them through
//! the job state machine rather than propagating them.

use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Runs job commands through the host shell, capturing their output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

/// The result of running a job command to completion.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The command exited with code zero.
    Success,
    /// The command failed; the error carries the message recorded on the job.
    Failure(ExecutionError),
}

/// The ways a command execution can fail.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Non-zero exit. The message is stderr if non-empty, else stdout, else
    /// a generic description of the exit code.
    #[error("{message}")]
    NonZeroExit { code: i32, message: String },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    /// Any other failure to spawn or wait on the subprocess.
    #[error("{0}")]
    Spawn(String),
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Executes `command` through the shell and waits for it to finish.
    pub async fn run(&self, command: &str) -> ExecutionOutcome {
        let mut cmd = shell_command(command);
        // Dropping the future on timeout must take the subprocess with it.
        cmd.kill_on_drop(true);

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_elapsed) => {
                    return ExecutionOutcome::Failure(ExecutionError::Timeout(limit))
                }
            },
            None => cmd.output().await,
        };

        match output {
            Ok(output) if output.status.success() => ExecutionOutcome::Success,
            Ok(output) => {
                let code = output.status.code().unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let message = if !stderr.trim().is_empty() {
                    stderr.trim_end().to_owned()
                } else if !stdout.trim().is_empty() {
                    stdout.trim_end().to_owned()
                } else {
                    format!("command failed with exit code {code}")
                };
                ExecutionOutcome::Failure(ExecutionError::NonZeroExit { code, message })
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                ExecutionOutcome::Failure(ExecutionError::CommandNotFound(command.to_owned()))
            }
            Err(error) => ExecutionOutcome::Failure(ExecutionError::Spawn(error.to_string())),
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
