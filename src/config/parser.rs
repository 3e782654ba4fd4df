//! Stack file loading.
//!
//! Handles reading `provisio.stack.yaml`, loading `.env`, and applying
//! `PROVISIO_*` environment overrides, in that order.

use crate::error::{ConfigError, ProvisioError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Default stack file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["provisio.stack.yaml", "provisio.stack.yml"];

/// Environment variable overriding `project.name`.
pub const ENV_PROJECT: &str = "PROVISIO_PROJECT";
/// Environment variable overriding `project.stack`.
pub const ENV_STACK: &str = "PROVISIO_STACK";
/// Environment variable overriding `state.path`.
pub const ENV_STATE_PATH: &str = "PROVISIO_STATE_PATH";
/// Environment variable overriding `providers.azure.cli`.
pub const ENV_AZ_CLI: &str = "PROVISIO_AZ_CLI";

/// Parser for stack files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is loaded from.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading stack from: {}", path.display());

        if !path.exists() {
            return Err(ProvisioError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisioError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a stack from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing stack YAML");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = match (source, e.location()) {
                (Some(path), Some(loc)) => {
                    Some(format!("{}:{}:{}", path.display(), loc.line(), loc.column()))
                }
                (Some(path), None) => Some(path.display().to_string()),
                (None, Some(loc)) => Some(format!("line {}, column {}", loc.line(), loc.column())),
                (None, None) => None,
            };
            ProvisioError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack {} with {} resources",
            config.qualified_name(),
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads a stack file with `.env` and environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file or the stack file cannot be loaded.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        self.load_dotenv()?;
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies `PROVISIO_*` environment overrides.
    pub fn apply_env_overrides(config: &mut StackConfig) {
        if let Some(name) = non_empty_var(ENV_PROJECT) {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(stack) = non_empty_var(ENV_STACK) {
            debug!("Overriding project.stack from environment");
            config.project.stack = stack;
        }

        if let Some(path) = non_empty_var(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Some(cli) = non_empty_var(ENV_AZ_CLI) {
            debug!("Overriding providers.azure.cli from environment");
            config.providers.azure.cli = cli;
        }
    }

    /// Loads the `.env` file if present.
    ///
    /// Variables already set in the process environment win.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ProvisioError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads a required environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the variable is unset or empty.
    pub fn require_env(name: &str) -> Result<String> {
        non_empty_var(name).ok_or_else(|| {
            ProvisioError::Config(ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Finds the stack file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no stack file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found stack file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ProvisioError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_stack() {
        let yaml = r"
project:
  name: test-project
resources: []
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("minimal stack parses");

        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.stack, "dev");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_stack() {
        let yaml = r#"
project:
  name: demo02
  stack: prod
  prefix: demo02
defaults:
  tags:
    stack: prod
state:
  backend: memory
policy:
  allow_replace: false
  max_parallel: 2
providers:
  azure:
    cli: /usr/bin/az
    install_extension: false
resources:
  - type: azure:storage:StaticWebsite
    name: demo02sw-website
    protect: true
    inputs:
      accountName: demo02sa
  - type: azure:storage:WebsiteContent
    name: demo02sw-content
    depends_on: [demo02sw-website]
    inputs:
      accountName: "${demo02sw-website.accountName}"
      source: ./data/wwwroot
"#;
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("full stack parses");

        assert_eq!(config.qualified_name(), "demo02-prod");
        assert_eq!(config.state.backend, StateBackend::Memory);
        assert!(!config.policy.allow_replace);
        assert_eq!(config.policy.max_parallel, 2);
        assert_eq!(config.providers.azure.cli, "/usr/bin/az");
        assert_eq!(config.resources.len(), 2);
        assert!(config.resources[0].protect);
        assert_eq!(config.resources[1].depends_on, vec!["demo02sw-website"]);
        assert_eq!(
            config.resources[1].inputs.get("accountName"),
            Some(&json!("${demo02sw-website.accountName}"))
        );
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("stack.yaml")))
            .expect_err("invalid yaml");

        match err {
            ProvisioError::Config(ConfigError::ParseError { location, .. }) => {
                assert!(location.is_some_and(|l| l.starts_with("stack.yaml")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().expect("temp dir");
        let err = ConfigParser::new()
            .load_file(dir.path().join("absent.yaml"))
            .expect_err("missing file");

        assert!(matches!(
            err,
            ProvisioError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("nested dirs");
        std::fs::write(dir.path().join("provisio.stack.yaml"), "project:\n  name: p\n")
            .expect("write stack");

        let found = find_config_file(&nested).expect("stack found");
        assert_eq!(found, dir.path().join("provisio.stack.yaml"));
    }
}
