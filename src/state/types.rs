//! State types for tracking reconciled resources.
//!
//! These types represent the recorded state of each resource instance,
//! used to decide between create, update, replace and no-op on the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::ConfigHasher;

/// Current version of the state record format.
pub const STATE_VERSION: &str = "1.0";

/// Mapping of property name to value.
///
/// A `BTreeMap` keeps serialization canonical, so identical inputs always
/// produce identical bytes on disk.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Stable identity of a resource instance: declared type plus logical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Resource type name (e.g. `azure:storage:StaticWebsite`).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Logical name declared in the stack.
    pub name: String,
}

/// The durable unit written to the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// State format version.
    pub version: String,
    /// Identity of the resource.
    pub identity: ResourceIdentity,
    /// Opaque id chosen by the provider at creation.
    pub provider_id: String,
    /// Desired inputs as last accepted by `check`.
    pub inputs: PropertyMap,
    /// Outputs observed from the provider.
    pub outputs: PropertyMap,
    /// Identities this resource depended on when last reconciled.
    #[serde(default)]
    pub dependencies: Vec<ResourceIdentity>,
    /// Whether the resource refuses deletion and replacement.
    #[serde(default)]
    pub protect: bool,
    /// Hash of `inputs`.
    pub inputs_hash: String,
    /// When the external object was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated in place.
    pub updated_at: DateTime<Utc>,
}

impl ResourceIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Returns a filesystem-safe key that is unique per identity.
    ///
    /// The readable part is lossy, so a short digest of the full identity is appended.
    #[must_use]
    pub fn storage_key(&self) -> String {
        let readable: String = self
            .to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();

        let digest = Sha256::digest(self.to_string().as_bytes());
        let short = hex::encode(&digest[..6]);

        format!("{readable}-{short}")
    }
}

impl StateRecord {
    /// Creates a record for a freshly created external object.
    #[must_use]
    pub fn new(
        identity: ResourceIdentity,
        provider_id: impl Into<String>,
        inputs: PropertyMap,
        outputs: PropertyMap,
    ) -> Self {
        let now = Utc::now();
        let inputs_hash = ConfigHasher::new().hash_properties(&inputs);
        Self {
            version: STATE_VERSION.to_string(),
            identity,
            provider_id: provider_id.into(),
            inputs,
            outputs,
            dependencies: Vec::new(),
            protect: false,
            inputs_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the dependencies recorded alongside this resource.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<ResourceIdentity>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the protection flag.
    #[must_use]
    pub const fn with_protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    /// Returns a copy updated in place: same provider id and creation time.
    #[must_use]
    pub fn updated(&self, inputs: PropertyMap, outputs: PropertyMap) -> Self {
        let inputs_hash = ConfigHasher::new().hash_properties(&inputs);
        Self {
            version: STATE_VERSION.to_string(),
            identity: self.identity.clone(),
            provider_id: self.provider_id.clone(),
            inputs,
            outputs,
            dependencies: self.dependencies.clone(),
            protect: self.protect,
            inputs_hash,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Looks up an output value.
    #[must_use]
    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.outputs.get(key)
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.type_name, self.name)
    }
}
