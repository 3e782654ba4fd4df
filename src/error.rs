//! Error types for the provisio reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a resource
//! lifecycle: configuration, state persistence, external commands, provider
//! implementations, and reconciliation.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::state::ResourceIdentity;

/// The main error type for provisio.
#[derive(Debug, Error)]
pub enum ProvisioError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// External command errors.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Provider errors raised outside of a reconciliation.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Two resources share a logical name.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// No provider is registered for a resource type.
    #[error("Unknown resource type '{type_name}' for resource '{name}'")]
    UnknownResourceType {
        /// The unregistered type name.
        type_name: String,
        /// Logical name of the resource declaring it.
        name: String,
    },

    /// A `${name.output}` reference points at an undeclared resource.
    #[error("Resource '{resource}' references unknown resource '{target}'")]
    UnknownReference {
        /// Resource holding the reference.
        resource: String,
        /// Referenced logical name.
        target: String,
    },

    /// Circular dependency detected.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// Description of the cycle.
        cycle: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A state record could not be read back.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Filesystem failure while reading or writing state.
    #[error("State storage failure: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors raised by the command executor.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be started.
    #[error("Failed to spawn '{program}': {message}")]
    SpawnFailed {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        message: String,
    },

    /// The process exited with a non-zero status.
    #[error("'{program}' exited with status {}: {captured_stderr}", display_exit_code(.exit_code))]
    ExternalCommandError {
        /// Program that failed.
        program: String,
        /// Exit code, `None` when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        captured_stderr: String,
    },

    /// The process succeeded but its output could not be parsed.
    #[error("Malformed output from '{program}': {message}")]
    MalformedOutputError {
        /// Program whose output was malformed.
        program: String,
        /// Description of the parse failure.
        message: String,
    },

    /// The caller-supplied timeout elapsed; the external effect may still be in progress.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Timeout that elapsed.
        timeout: std::time::Duration,
    },
}

/// Errors raised by provider implementations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider does not implement the requested lifecycle operation.
    #[error("Operation '{0}' is not supported by this provider")]
    Unsupported(LifecycleOperation),

    /// An external command used by the provider failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Inputs reached a lifecycle method in a shape `check` should have rejected.
    #[error("Invalid input '{property}': {reason}")]
    InvalidInput {
        /// Offending property.
        property: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Any other provider failure.
    #[error("{0}")]
    Failed(String),
}

/// A single per-property failure reported by `check`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckFailure {
    /// Property that failed validation.
    pub property: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Lifecycle operations an engine can attempt on a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleOperation {
    /// Input validation.
    Check,
    /// Change detection.
    Diff,
    /// Creation of a new external object.
    Create,
    /// In-place update.
    Update,
    /// Deletion of an external object.
    Delete,
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// `check` rejected the desired inputs; no side effect occurred.
    #[error("Validation failed for {identity}: {}", format_failures(.failures))]
    Validation {
        /// Resource that failed validation.
        identity: ResourceIdentity,
        /// Every failure reported by the provider.
        failures: Vec<CheckFailure>,
    },

    /// A provider lifecycle method failed; the side effect may be partial.
    #[error("{operation} failed for {identity}: {source}")]
    Provider {
        /// Resource being reconciled.
        identity: ResourceIdentity,
        /// Operation attempted.
        operation: LifecycleOperation,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },

    /// Replacement is required but the resource or policy forbids it.
    #[error("Replacement of {identity} required by [{}] but denied", .properties.join(", "))]
    ReplacementRequiredButDenied {
        /// Resource that would be replaced.
        identity: ResourceIdentity,
        /// Properties triggering the replacement.
        properties: Vec<String>,
    },

    /// Another reconciliation of the same identity is in flight.
    #[error("{identity} is already being reconciled")]
    ConcurrentReconcile {
        /// Contended identity.
        identity: ResourceIdentity,
    },

    /// Skipped because a dependency did not complete.
    #[error("{identity} skipped: dependency '{dependency}' failed")]
    DependencyFailed {
        /// Skipped resource.
        identity: ResourceIdentity,
        /// First failed dependency.
        dependency: String,
    },

    /// Destroy refused on a protected resource.
    #[error("{identity} is protected and cannot be deleted")]
    Protected {
        /// Protected resource.
        identity: ResourceIdentity,
    },

    /// No provider is registered for the type.
    #[error("No provider registered for resource type '{type_name}'")]
    UnknownResourceType {
        /// Unregistered type name.
        type_name: String,
    },
}

/// Result type alias for provisio operations.
pub type Result<T> = std::result::Result<T, ProvisioError>;

impl ProvisioError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::State(StateError::LockFailed { .. }) => Some(2),
            Self::State(StateError::LockedByOther { .. }) => Some(10),
            _ => None,
        }
    }

    /// Returns the reconciliation error, if this is one.
    #[must_use]
    pub const fn as_reconcile(&self) -> Option<&ReconcileError> {
        match self {
            Self::Reconcile(err) => Some(err),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl CommandError {
    /// Creates a malformed-output error.
    #[must_use]
    pub fn malformed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOutputError {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Returns the exit code of a failed command.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExternalCommandError { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

impl ProviderError {
    /// Creates a generic provider failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl ReconcileError {
    /// Returns the identity this error concerns, if any.
    #[must_use]
    pub const fn identity(&self) -> Option<&ResourceIdentity> {
        match self {
            Self::Validation { identity, .. }
            | Self::Provider { identity, .. }
            | Self::ReplacementRequiredButDenied { identity, .. }
            | Self::ConcurrentReconcile { identity }
            | Self::DependencyFailed { identity, .. }
            | Self::Protected { identity } => Some(identity),
            Self::UnknownResourceType { .. } => None,
        }
    }

    /// Returns true if this is a propagated skip rather than a failure of the instance itself.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::DependencyFailed { .. })
    }
}

impl CheckFailure {
    /// Creates a new check failure.
    #[must_use]
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Check => "check",
            Self::Diff => "diff",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{op}")
    }
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| String::from("signal"), |c| c.to_string())
}

fn format_failures(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.property, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
