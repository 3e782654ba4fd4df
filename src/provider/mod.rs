//! Resource providers.
//!
//! A provider implements the lifecycle of one resource type. Only `check`
//! and `create` are mandatory; `diff`, `update` and `delete` are advertised
//! through [`Capabilities`], and the engine consults the flags rather than
//! calling a method to find out whether it exists.

mod registry;
mod command;
mod azure;
mod static_website;
mod website_content;

pub use registry::ProviderRegistry;
pub use command::{CommandProvider, COMMAND_TYPE};
pub use static_website::{StaticWebsiteProvider, STATIC_WEBSITE_TYPE};
pub use website_content::{WebsiteContentProvider, WEBSITE_CONTENT_TYPE};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::error::{CheckFailure, LifecycleOperation, ProviderError};
use crate::state::PropertyMap;

/// Result type for provider methods.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Optional lifecycle operations a provider implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Provider computes its own diff.
    pub diff: bool,
    /// Provider updates in place.
    pub update: bool,
    /// Provider deletes external objects.
    pub delete: bool,
}

/// Outcome of `check`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckResult {
    /// Normalized inputs; these are persisted and diffed.
    pub inputs: PropertyMap,
    /// Every validation failure found.
    pub failures: Vec<CheckFailure>,
}

/// Outcome of `diff`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Whether anything changed.
    pub changes: bool,
    /// Properties whose change forces a replacement.
    pub replaces: BTreeSet<String>,
    /// Every changed property.
    pub changed: BTreeSet<String>,
}

/// Outcome of `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResult {
    /// Provider-assigned id.
    pub id: String,
    /// Observed outputs.
    pub outputs: PropertyMap,
}

/// Outcome of `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Observed outputs after the update.
    pub outputs: PropertyMap,
}

/// The lifecycle of one resource type.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// The resource type name this provider handles.
    fn type_name(&self) -> &str;

    /// Optional operations this provider implements.
    fn capabilities(&self) -> Capabilities;

    /// Validates and normalizes desired inputs. Must not have side effects.
    async fn check(&self, olds: Option<&PropertyMap>, news: &PropertyMap) -> ProviderResult<CheckResult>;

    /// Compares prior outputs with new inputs.
    async fn diff(&self, _id: &str, _olds: &PropertyMap, _news: &PropertyMap) -> ProviderResult<DiffResult> {
        Err(ProviderError::Unsupported(LifecycleOperation::Diff))
    }

    /// Creates the external object.
    async fn create(&self, inputs: &PropertyMap) -> ProviderResult<CreateResult>;

    /// Updates the external object in place. The id never changes.
    async fn update(&self, _id: &str, _olds: &PropertyMap, _news: &PropertyMap) -> ProviderResult<UpdateResult> {
        Err(ProviderError::Unsupported(LifecycleOperation::Update))
    }

    /// Deletes the external object.
    async fn delete(&self, _id: &str, _olds: &PropertyMap) -> ProviderResult<()> {
        Err(ProviderError::Unsupported(LifecycleOperation::Delete))
    }
}

impl CheckResult {
    /// A passing check with the given normalized inputs.
    #[must_use]
    pub const fn ok(inputs: PropertyMap) -> Self {
        Self {
            inputs,
            failures: Vec::new(),
        }
    }

    /// Returns true if no failure was reported.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl DiffResult {
    /// No changes.
    #[must_use]
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Builds a diff from the changed properties and those among them that force replacement.
    #[must_use]
    pub fn from_changes(changed: BTreeSet<String>, replace_on: &[&str]) -> Self {
        let replaces = changed
            .iter()
            .filter(|key| replace_on.contains(&key.as_str()))
            .cloned()
            .collect();
        Self {
            changes: !changed.is_empty(),
            replaces,
            changed,
        }
    }
}

/// Returns the keys whose values differ between two maps, including keys present in only one.
#[must_use]
pub fn changed_keys(olds: &PropertyMap, news: &PropertyMap) -> BTreeSet<String> {
    olds.keys()
        .chain(news.keys())
        .filter(|key| olds.get(*key) != news.get(*key))
        .cloned()
        .collect()
}

/// Reads a required string input.
///
/// # Errors
///
/// Returns [`ProviderError::InvalidInput`] when the input is absent or not a string.
pub fn require_str<'a>(inputs: &'a PropertyMap, key: &str) -> ProviderResult<&'a str> {
    inputs
        .get(key)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProviderError::invalid_input(key, "required string"))
}

/// Reads an optional string input.
#[must_use]
pub fn optional_str<'a>(inputs: &'a PropertyMap, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(serde_json::Value::as_str)
}
