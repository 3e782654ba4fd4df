//! Configuration specification types for provisio stacks.
//!
//! This module defines the structs that map to the `provisio.stack.yaml` file.
//! A stack file declares the desired resources; everything else (ids,
//! outputs, timestamps) lives in the state store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::state::{PropertyMap, STATE_DIR};

/// The root structure of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Stack-wide defaults applied to resources.
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Reconciliation policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Settings for the built-in providers.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Stack name (e.g. "dev", "prod").
    #[serde(default = "default_stack")]
    pub stack: String,
    /// Prefix for generated names, defaults to the project name.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Stack-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultsConfig {
    /// Tags merged into every resource input named `tags`.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// State directory for the local backend, relative to the stack file.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// One JSON file per resource in a local directory.
    #[default]
    Local,
    /// Volatile in-process storage.
    Memory,
}

/// Reconciliation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Whether replacements may run. When false, a replace fails before any side effect.
    #[serde(default = "default_allow_replace")]
    pub allow_replace: bool,
    /// Maximum number of concurrent reconciliations.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

/// Settings for the built-in providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvidersConfig {
    /// Azure CLI providers.
    #[serde(default)]
    pub azure: AzureConfig,
}

/// Settings for the Azure CLI providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureConfig {
    /// Path or name of the `az` executable.
    #[serde(default = "default_az_cli")]
    pub cli: String,
    /// Whether to install the `storage-preview` extension before use.
    #[serde(default = "default_install_extension")]
    pub install_extension: bool,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Registered resource type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Logical name, unique within the stack.
    pub name: String,
    /// Desired inputs. String values may contain `${...}` references.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Explicit dependencies by logical name.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Refuse replacement and deletion.
    #[serde(default)]
    pub protect: bool,
}

/// Resolved, read-only settings shared by the orchestrator and providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSettings {
    /// Project name.
    pub project: String,
    /// Stack name.
    pub stack: String,
    /// Name prefix.
    pub prefix: String,
    /// Stack-wide default tags.
    pub default_tags: BTreeMap<String, String>,
    /// Whether replacements may run.
    pub allow_replace: bool,
    /// Maximum number of concurrent reconciliations.
    pub max_parallel: usize,
    /// Azure CLI settings.
    pub azure: AzureConfig,
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
}

// Default value functions

fn default_stack() -> String {
    String::from("dev")
}

const fn default_allow_replace() -> bool {
    true
}

const fn default_max_parallel() -> usize {
    4
}

fn default_az_cli() -> String {
    String::from("az")
}

const fn default_install_extension() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_replace: default_allow_replace(),
            max_parallel: default_max_parallel(),
        }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            cli: default_az_cli(),
            install_extension: default_install_extension(),
        }
    }
}

impl StackConfig {
    /// Returns the fully qualified stack name.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.stack)
    }

    /// Returns the effective name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.project.prefix.as_deref().unwrap_or(&self.project.name)
    }

    /// Returns resource names in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Finds a resource by logical name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Returns the state directory for the local backend.
    #[must_use]
    pub fn state_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(self.state.path.as_deref().unwrap_or(STATE_DIR))
    }

    /// Builds the settings passed to the orchestrator and providers.
    #[must_use]
    pub fn settings(&self, base_dir: impl Into<PathBuf>) -> StackSettings {
        StackSettings {
            project: self.project.name.clone(),
            stack: self.project.stack.clone(),
            prefix: self.prefix().to_string(),
            default_tags: self.defaults.tags.clone(),
            allow_replace: self.policy.allow_replace,
            max_parallel: self.policy.max_parallel.max(1),
            azure: self.providers.azure.clone(),
            base_dir: base_dir.into(),
        }
    }
}

impl ResourceConfig {
    /// Creates a resource declaration with no inputs.
    #[must_use]
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            inputs: PropertyMap::new(),
            depends_on: Vec::new(),
            protect: false,
        }
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }
}

impl StackSettings {
    /// Creates settings for a project with default policy, rooted at the current directory.
    #[must_use]
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        let project = project.into();
        Self {
            prefix: project.clone(),
            project,
            stack: stack.into(),
            default_tags: BTreeMap::new(),
            allow_replace: default_allow_replace(),
            max_parallel: default_max_parallel(),
            azure: AzureConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Resolves a path declared in the stack file.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Returns the built-in interpolation variables.
    #[must_use]
    pub fn variables(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("project"), self.project.clone()),
            (String::from("stack"), self.stack.clone()),
            (String::from("prefix"), self.prefix.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let yaml = r"
project:
  name: demo02
resources: []
";
        let config: StackConfig = serde_yaml::from_str(yaml).expect("valid yaml");

        assert_eq!(config.project.stack, "dev");
        assert_eq!(config.prefix(), "demo02");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert!(config.policy.allow_replace);
        assert_eq!(config.policy.max_parallel, 4);
        assert_eq!(config.providers.azure.cli, "az");
        assert_eq!(config.qualified_name(), "demo02-dev");
    }

    #[test]
    fn test_settings_clamp_parallelism() {
        let yaml = r"
project:
  name: demo02
  prefix: d2
policy:
  max_parallel: 0
";
        let config: StackConfig = serde_yaml::from_str(yaml).expect("valid yaml");
        let settings = config.settings("/srv/stack");

        assert_eq!(settings.max_parallel, 1);
        assert_eq!(settings.prefix, "d2");
        assert_eq!(settings.resolve_path("site"), PathBuf::from("/srv/stack/site"));
        assert_eq!(settings.resolve_path("/abs"), PathBuf::from("/abs"));
    }

    #[test]
    fn test_state_dir_defaults_to_hidden_directory() {
        let config: StackConfig =
            serde_yaml::from_str("project:\n  name: p\n").expect("valid yaml");
        assert_eq!(config.state_dir(Path::new("/w")), PathBuf::from("/w/.provisio"));
    }
}
