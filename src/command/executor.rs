//! Command executor for provider side effects.
//!
//! Each call spawns exactly one child process with `kill_on_drop`, so the
//! handle is reclaimed on every exit path, including timeouts and panics in
//! the caller. The command line is passed as argv and never re-parsed.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CommandError;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    /// Program to run, resolved through `PATH`.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Data written to stdin before it is closed.
    pub stdin: Option<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory.
    pub current_dir: Option<PathBuf>,
}

/// How a command's output streams are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Capture stdout; when false it is discarded.
    pub capture_stdout: bool,
    /// Forward stderr to this process instead of capturing it.
    pub forward_stderr: bool,
    /// Kill the child after this long. The remote effect may still be in progress.
    pub timeout: Option<Duration>,
}

/// Outcome of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Runs external commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::ExternalCommandError`] on non-zero exit,
    /// [`CommandError::SpawnFailed`] when the program cannot be started, and
    /// [`CommandError::Timeout`] when `options.timeout` elapses. Stdout that is
    /// not valid UTF-8 is a [`CommandError::MalformedOutputError`].
    async fn execute(
        &self,
        command: &CommandLine,
        options: ExecOptions,
    ) -> Result<CommandResult, CommandError>;
}

/// Process-spawning [`CommandRunner`].
#[derive(Debug, Default, Clone)]
pub struct CommandExecutor {
    /// Environment added to every command.
    base_env: BTreeMap<String, String>,
}

impl CommandLine {
    /// Creates a command line for a program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Creates a `sh -c <script>` command line.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets stdin content.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            capture_stdout: true,
            forward_stderr: false,
            timeout: None,
        }
    }
}

impl ExecOptions {
    /// Discards stdout and captures stderr.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            capture_stdout: false,
            forward_stderr: false,
            timeout: None,
        }
    }

    /// Sets a timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl CommandResult {
    /// Parses stdout as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::MalformedOutputError`] when stdout is not valid JSON for `T`.
    pub fn parse_json<T: DeserializeOwned>(&self, program: &str) -> Result<T, CommandError> {
        serde_json::from_str(self.stdout.trim()).map_err(|e| {
            CommandError::malformed(program, format!("{e} in {:?}", truncate(&self.stdout, 200)))
        })
    }
}

impl CommandExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment variable passed to every command.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }

    /// Builds the tokio command for a command line.
    fn build(&self, command: &CommandLine, options: ExecOptions) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&self.base_env)
            .envs(&command.env)
            .kill_on_drop(true)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if options.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if options.forward_stderr {
                Stdio::inherit()
            } else {
                Stdio::piped()
            });

        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn execute(
        &self,
        command: &CommandLine,
        options: ExecOptions,
    ) -> Result<CommandResult, CommandError> {
        debug!("Running: {command}");

        let mut child = self
            .build(command, options)
            .spawn()
            .map_err(|e| CommandError::SpawnFailed {
                program: command.program.clone(),
                message: e.to_string(),
            })?;

        let writer = match (child.stdin.take(), command.stdin.clone()) {
            (Some(mut stdin), Some(input)) => Some(tokio::spawn(async move {
                let result = stdin.write_all(input.as_bytes()).await;
                drop(stdin);
                result
            })),
            _ => None,
        };

        let output = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| CommandError::Timeout {
                    program: command.program.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| CommandError::SpawnFailed {
            program: command.program.clone(),
            message: format!("failed waiting for process: {e}"),
        })?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to write stdin of {}: {e}", command.program),
                Err(e) => warn!("Stdin writer for {} panicked: {e}", command.program),
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !output.status.success() {
            debug!("{} failed with {:?}", command.program, exit_code);
            return Err(CommandError::ExternalCommandError {
                program: command.program.clone(),
                exit_code,
                captured_stderr: stderr.trim().to_string(),
            });
        }

        // Stdout feeds outputs and JSON parsing, so it is never repaired.
        let stdout = String::from_utf8(output.stdout).map_err(|e| {
            CommandError::malformed(&command.program, format!("stdout is not valid UTF-8: {e}"))
        })?;

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Runs a command and parses its stdout as JSON.
///
/// # Errors
///
/// Propagates execution errors and returns
/// [`CommandError::MalformedOutputError`] when the output does not parse.
pub async fn execute_json<T: DeserializeOwned>(
    runner: &dyn CommandRunner,
    command: &CommandLine,
) -> Result<T, CommandError> {
    let result = runner.execute(command, ExecOptions::default()).await?;
    result.parse_json(&command.program)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
