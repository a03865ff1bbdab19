//! External command execution.
//!
//! Privileged work (reboots, installs, wifi reconfiguration) is delegated to
//! shell scripts. Handlers talk to them through [`CommandRunner`] so the
//! protocol layer can be exercised without touching the host.

use futures::future::BoxFuture;
use std::io;
use std::process::Stdio;

/// Seconds a detached root command waits before running, giving the client
/// time to receive its response.
pub const DETACH_DELAY_SECS: u64 = 5;

/// How a command's standard streams are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Inherit the service's stdio. Used for backgrounded commands.
    Inherit,
    /// Capture stdout and stderr for logging.
    Capture,
}

/// A command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub output: Output,
}

impl CommandSpec {
    /// A command whose output is captured.
    pub fn captured<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            output: Output::Capture,
        }
    }

    /// Run `script` as root in the background after [`DETACH_DELAY_SECS`].
    ///
    /// `sudo -b` returns as soon as the job is forked, so the exit status only
    /// reports whether the job could be scheduled.
    pub fn detached_root(script: &str) -> Self {
        Self {
            program: "sudo".to_string(),
            args: vec![
                "-b".to_string(),
                "bash".to_string(),
                "-c".to_string(),
                format!("sleep {}; {}", DETACH_DELAY_SECS, script),
            ],
            output: Output::Inherit,
        }
    }
}

/// Exit status and captured text of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code. A process killed by a signal reports `-1`.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes external commands on behalf of the method handlers.
///
/// `Err` means the command could not be run at all (missing program,
/// permission denied); a command that ran and failed is `Ok` with a non-zero
/// code.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> BoxFuture<'a, io::Result<CommandOutput>>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, command: &'a CommandSpec) -> BoxFuture<'a, io::Result<CommandOutput>> {
        Box::pin(async move {
            tracing::info!(program = %command.program, args = ?command.args, "running command");

            let mut cmd = tokio::process::Command::new(&command.program);
            cmd.args(&command.args).stdin(Stdio::null());

            let output = match command.output {
                Output::Inherit => {
                    let status = cmd.status().await?;
                    CommandOutput::with_code(status.code().unwrap_or(-1))
                }
                Output::Capture => {
                    let out = cmd.output().await?;
                    let output = CommandOutput {
                        code: out.status.code().unwrap_or(-1),
                        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                    };
                    tracing::debug!(stdout = %output.stdout, "command stdout");
                    tracing::debug!(stderr = %output.stderr, "command stderr");
                    output
                }
            };

            tracing::debug!(code = output.code, "command finished");
            Ok(output)
        })
    }
}
