//! Stack configuration.
//!
//! This module handles everything read from the stack file:
//! - Parsing `provisio.stack.yaml`, `.env` loading and environment overrides
//! - Validation, collecting every error
//! - The dependency graph and `${...}` references between resources
//! - Deterministic hashing for change detection

mod spec;
mod parser;
mod validator;
mod hash;
mod graph;
mod interpolate;

pub use spec::{
    AzureConfig, DefaultsConfig, PolicyConfig, ProjectConfig, ProvidersConfig, ResourceConfig,
    StackConfig, StackSettings, StateBackend, StateConfig,
};
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_AZ_CLI, ENV_PROJECT, ENV_STACK, ENV_STATE_PATH,
    find_config_file,
};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
pub use graph::DependencyGraph;
pub use interpolate::{Interpolator, Reference, referenced_resources, references};
