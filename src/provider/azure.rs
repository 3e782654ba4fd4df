//! Thin wrapper around the `az` CLI shared by the Azure providers.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::command::{CommandLine, CommandResult, CommandRunner, ExecOptions};
use crate::config::AzureConfig;
use crate::error::CommandError;

/// Extension providing `service-properties update --static-website`.
const STORAGE_EXTENSION: &str = "storage-preview";

/// Runs `az` subcommands through a [`CommandRunner`].
pub(crate) struct AzCli {
    runner: Arc<dyn CommandRunner>,
    config: AzureConfig,
    extension: OnceCell<()>,
}

impl AzCli {
    pub(crate) fn new(config: &AzureConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            config: config.clone(),
            extension: OnceCell::new(),
        }
    }

    fn command<I, S>(&self, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::new(&self.config.cli).args(args)
    }

    /// Installs the storage extension once per process, when enabled.
    pub(crate) async fn ensure_extension(&self) -> Result<(), CommandError> {
        if !self.config.install_extension {
            return Ok(());
        }

        self.extension
            .get_or_try_init(|| async {
                debug!("Installing az extension {STORAGE_EXTENSION}");
                let command = self.command(["extension", "add", "--name", STORAGE_EXTENSION]);
                self.runner.execute(&command, ExecOptions::quiet()).await.map(|_| ())
            })
            .await
            .map(|_| ())
    }

    /// Runs a subcommand, discarding its output.
    pub(crate) async fn run<I, S>(&self, args: I) -> Result<CommandResult, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.command(args);
        self.runner.execute(&command, ExecOptions::quiet()).await
    }

    /// Runs a subcommand with JSON output and parses it.
    pub(crate) async fn json<T, I, S>(&self, args: I) -> Result<T, CommandError>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = self.command(args).args(["--output", "json"]);
        let result = self.runner.execute(&command, ExecOptions::default()).await?;
        result.parse_json(&command.program)
    }
}

/// Extracts the host from a URL such as `https://acct.z6.web.core.windows.net/`.
pub(crate) fn host_name(endpoint: &str) -> Option<String> {
    let rest = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();

    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Storage account names are 3 to 24 lowercase letters and digits.
pub(crate) fn is_valid_account_name(name: &str) -> bool {
    (3..=24).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_name() {
        assert_eq!(
            host_name("https://demo02sa.z6.web.core.windows.net/").as_deref(),
            Some("demo02sa.z6.web.core.windows.net")
        );
        assert_eq!(host_name("http://user@Example.com:8080/x").as_deref(), Some("example.com"));
        assert_eq!(host_name("https:///path"), None);
    }

    #[test]
    fn test_account_name_rules() {
        assert!(is_valid_account_name("demo02sa"));
        assert!(!is_valid_account_name("ab"));
        assert!(!is_valid_account_name("Demo02sa"));
        assert!(!is_valid_account_name("demo-02"));
        assert!(!is_valid_account_name(&"a".repeat(25)));
    }
}
