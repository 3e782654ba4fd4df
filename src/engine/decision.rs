//! The outcome of comparing desired inputs with recorded state.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// What a reconciliation does to one resource. Computed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LifecycleDecision {
    /// Desired inputs match recorded state.
    NoChange,
    /// No record exists; the object is created.
    Create,
    /// Updated in place; the provider id is kept.
    Update {
        /// Changed properties.
        changed: BTreeSet<String>,
    },
    /// Deleted (or abandoned) and created again with a new provider id.
    Replace {
        /// Properties forcing the replacement.
        triggering: BTreeSet<String>,
    },
}

impl LifecycleDecision {
    /// Returns true unless this is [`LifecycleDecision::NoChange`].
    #[must_use]
    pub const fn is_change(&self) -> bool {
        !matches!(self, Self::NoChange)
    }

    /// Short action label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoChange => "no-change",
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
        }
    }

    /// Properties involved in the change, if any.
    #[must_use]
    pub fn properties(&self) -> Vec<&str> {
        match self {
            Self::Update { changed } => changed.iter().map(String::as_str).collect(),
            Self::Replace { triggering } => triggering.iter().map(String::as_str).collect(),
            Self::NoChange | Self::Create => Vec::new(),
        }
    }
}

impl fmt::Display for LifecycleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties = self.properties();
        if properties.is_empty() {
            write!(f, "{}", self.label())
        } else {
            write!(f, "{} [{}]", self.label(), properties.join(", "))
        }
    }
}
