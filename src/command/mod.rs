//! External command execution.
//!
//! Providers reach the outside world only through [`CommandRunner`], which
//! spawns one process per call, waits for it, and maps failure to a typed
//! [`CommandError`](crate::error::CommandError).

mod executor;

#[cfg(test)]
pub use executor::MockCommandRunner;
pub use executor::{CommandExecutor, CommandLine, CommandResult, CommandRunner, ExecOptions, execute_json};
