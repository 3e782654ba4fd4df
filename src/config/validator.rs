//! Stack file validation.
//!
//! Validation runs before any provider is called and collects every problem
//! it finds, so a single `provisio validate` run reports all of them.

use crate::error::{ConfigError, ProvisioError, Result};
use std::collections::BTreeSet;
use tracing::debug;

use super::graph::DependencyGraph;
use super::interpolate::{Reference, references};
use super::spec::{ResourceConfig, StackConfig, StateBackend};

/// Stack variables usable as `${name}`.
const BUILTIN_VARIABLES: &[&str] = &["project", "stack", "prefix"];

/// Validator for stack files.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Registered resource types. Empty means types are not checked.
    known_types: BTreeSet<String>,
}

/// Validation result containing every problem found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Errors that prevent reconciliation.
    pub errors: Vec<ConfigError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

impl ConfigValidator {
    /// Creates a validator that does not check resource types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts resource types to the given set.
    #[must_use]
    pub fn with_resource_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Validates a stack, failing on the first error found.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let mut result = self.check(config);

        if result.errors.is_empty() {
            debug!("Stack validation passed");
            Ok(result)
        } else {
            Err(ProvisioError::Config(result.errors.remove(0)))
        }
    }

    /// Validates a stack and collects every error and warning.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_policy(config, &mut result);
        self.validate_resources(&config.resources, &mut result);
        Self::validate_graph(config, &mut result);

        result
    }

    fn validate_project(config: &StackConfig, result: &mut ValidationResult) {
        let project = &config.project;

        if project.name.is_empty() {
            result.push("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.push(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.stack.is_empty() {
            result.push("project.stack", "Stack name cannot be empty");
        } else if !is_valid_name(&project.stack) {
            result.push(
                "project.stack",
                format!("Stack name '{}' is invalid", project.stack),
            );
        }

        if project.prefix.as_ref().is_some_and(String::is_empty) {
            result.push("project.prefix", "Prefix cannot be empty when set");
        }

        for key in config.defaults.tags.keys() {
            if key.trim().is_empty() {
                result.push("defaults.tags", "Tag keys cannot be empty");
            }
        }
    }

    fn validate_state(config: &StackConfig, result: &mut ValidationResult) {
        match config.state.backend {
            StateBackend::Local => {
                if config.state.path.as_ref().is_some_and(|p| p.trim().is_empty()) {
                    result.push("state.path", "State path cannot be empty when set");
                }
            }
            StateBackend::Memory => {
                result
                    .warnings
                    .push(String::from("Memory state backend: nothing is persisted between runs"));
            }
        }
    }

    fn validate_policy(config: &StackConfig, result: &mut ValidationResult) {
        if config.policy.max_parallel == 0 {
            result
                .warnings
                .push(String::from("policy.max_parallel is 0; running one resource at a time"));
        }

        if !config.policy.allow_replace {
            result
                .warnings
                .push(String::from("Replacements are disabled by policy"));
        }
    }

    fn validate_resources(&self, resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources declared"));
        }

        let mut seen = BTreeSet::new();
        let declared: BTreeSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if resource.name.is_empty() {
                result.push(format!("{prefix}.name"), "Resource name cannot be empty");
            } else if !is_valid_resource_name(&resource.name) {
                result.push(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Use letters, digits, '-' and '_'.",
                        resource.name
                    ),
                );
            } else if !seen.insert(resource.name.as_str()) {
                result.errors.push(ConfigError::DuplicateName {
                    name: resource.name.clone(),
                });
            }

            if resource.type_name.is_empty() {
                result.push(format!("{prefix}.type"), "Resource type cannot be empty");
            } else if !self.known_types.is_empty() && !self.known_types.contains(&resource.type_name) {
                result.errors.push(ConfigError::UnknownResourceType {
                    type_name: resource.type_name.clone(),
                    name: resource.name.clone(),
                });
            }

            for dependency in &resource.depends_on {
                if dependency == &resource.name {
                    result.push(
                        format!("{prefix}.depends_on"),
                        format!("Resource '{}' cannot depend on itself", resource.name),
                    );
                } else if !declared.contains(dependency.as_str()) {
                    result.push(
                        format!("{prefix}.depends_on"),
                        format!("Unknown dependency '{dependency}'"),
                    );
                }
            }

            Self::validate_references(resource, &declared, &prefix, result);
        }
    }

    fn validate_references(
        resource: &ResourceConfig,
        declared: &BTreeSet<&str>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let mut reported = BTreeSet::new();

        for (key, value) in &resource.inputs {
            for reference in references(value) {
                match &reference {
                    Reference::Output { resource: target, output } => {
                        if target.is_empty() || output.is_empty() {
                            result.push(
                                format!("{prefix}.inputs.{key}"),
                                format!("Malformed reference '{reference}'"),
                            );
                        } else if !declared.contains(target.as_str())
                            && reported.insert(target.clone())
                        {
                            result.errors.push(ConfigError::UnknownReference {
                                resource: resource.name.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                    Reference::Variable(name) => {
                        if !BUILTIN_VARIABLES.contains(&name.as_str()) {
                            result.push(
                                format!("{prefix}.inputs.{key}"),
                                format!(
                                    "Unknown variable '{reference}'. Expected one of: {}",
                                    BUILTIN_VARIABLES.join(", ")
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    fn validate_graph(config: &StackConfig, result: &mut ValidationResult) {
        if let Some(cycle) = DependencyGraph::from_config(config).find_cycle() {
            result.errors.push(ConfigError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Resource names end up in file names and `${name.output}` references.
fn is_valid_resource_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigError::validation(message, field));
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for error in &self.errors {
            match error {
                ConfigError::ValidationError {
                    message,
                    field: Some(field),
                } => writeln!(f, "error: {field}: {message}")?,
                other => writeln!(f, "error: {other}")?,
            }
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stack(resources: Vec<ResourceConfig>) -> StackConfig {
        let mut config: StackConfig =
            serde_yaml::from_str("project:\n  name: demo02\n").expect("valid yaml");
        config.resources = resources;
        config
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("demo02"));
        assert!(is_valid_name("my-stack-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Demo"));
        assert!(!is_valid_name("123-stack"));
        assert!(!is_valid_name("stack_one"));
        assert!(!is_valid_name("stack-"));
        assert!(!is_valid_name("a--b"));
    }

    #[test]
    fn test_valid_stack_passes() {
        let config = stack(vec![
            ResourceConfig::new("command:Command", "website")
                .with_input("create", json!("echo ${project}")),
            ResourceConfig::new("command:Command", "content")
                .with_input("create", json!("echo ${website.stdout}")),
        ]);

        let result = ConfigValidator::new()
            .with_resource_types(["command:Command"])
            .validate(&config)
            .expect("valid stack");
        assert!(result.is_valid());
    }

    #[test]
    fn test_collects_every_error() {
        let config = stack(vec![
            ResourceConfig::new("command:Command", "a"),
            ResourceConfig::new("command:Command", "a"),
            ResourceConfig::new("nope:Nope", "b").depends_on("ghost"),
            ResourceConfig::new("command:Command", "c")
                .with_input("create", json!("echo ${missing.id} ${region}")),
        ]);

        let result = ConfigValidator::new()
            .with_resource_types(["command:Command"])
            .check(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigError::DuplicateName { name } if name == "a")));
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownResourceType { .. })));
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ConfigError::UnknownReference { target, .. } if target == "missing")));
        assert!(result.to_string().contains("Unknown dependency 'ghost'"));
        assert!(result.to_string().contains("Unknown variable '${region}'"));
    }

    #[test]
    fn test_cycle_through_references_is_rejected() {
        let config = stack(vec![
            ResourceConfig::new("command:Command", "a").with_input("create", json!("${b.stdout}")),
            ResourceConfig::new("command:Command", "b").depends_on("a"),
        ]);

        let err = ConfigValidator::new()
            .validate(&config)
            .expect_err("cycle must be rejected");
        assert!(matches!(
            err,
            ProvisioError::Config(ConfigError::CircularDependency { .. })
        ));
    }
}
