//! Results of a stack apply or destroy.

use std::time::Duration;

use serde_json::json;

use crate::engine::LifecycleDecision;
use crate::error::ProvisioError;
use crate::state::ResourceIdentity;

/// What happened to one resource.
#[derive(Debug)]
pub enum OutcomeStatus {
    /// Reconciled with the given decision.
    Applied(LifecycleDecision),
    /// Deleted, together with its record.
    Removed,
    /// Failed or skipped; see [`crate::error::ReconcileError::is_skip`].
    Failed(ProvisioError),
}

/// Outcome of one resource.
#[derive(Debug)]
pub struct ResourceOutcome {
    /// Resource concerned.
    pub identity: ResourceIdentity,
    /// What happened.
    pub status: OutcomeStatus,
    /// Provider id after the operation, if a record exists.
    pub provider_id: Option<String>,
    /// Wall time spent on this resource.
    pub duration: Duration,
}

/// Outcome of a whole apply or destroy.
#[derive(Debug)]
pub struct ApplyReport {
    /// Qualified stack name.
    pub stack: String,
    /// Per-resource outcomes, in execution order.
    pub outcomes: Vec<ResourceOutcome>,
    /// Total wall time.
    pub duration: Duration,
}

impl ResourceOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub const fn applied(
        identity: ResourceIdentity,
        decision: LifecycleDecision,
        provider_id: String,
        duration: Duration,
    ) -> Self {
        Self {
            identity,
            status: OutcomeStatus::Applied(decision),
            provider_id: Some(provider_id),
            duration,
        }
    }

    /// Creates a removal outcome.
    #[must_use]
    pub const fn removed(identity: ResourceIdentity, provider_id: Option<String>, duration: Duration) -> Self {
        Self {
            identity,
            status: OutcomeStatus::Removed,
            provider_id,
            duration,
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(identity: ResourceIdentity, error: impl Into<ProvisioError>, duration: Duration) -> Self {
        Self {
            identity,
            status: OutcomeStatus::Failed(error.into()),
            provider_id: None,
            duration,
        }
    }

    /// Returns true if the resource was applied or removed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed(_))
    }

    /// Returns true if the resource was skipped because of a failed dependency.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.error()
            .and_then(ProvisioError::as_reconcile)
            .is_some_and(crate::error::ReconcileError::is_skip)
    }

    /// Returns the error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&ProvisioError> {
        match &self.status {
            OutcomeStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Short label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match &self.status {
            OutcomeStatus::Applied(decision) => decision.label(),
            OutcomeStatus::Removed => "removed",
            OutcomeStatus::Failed(_) if self.is_skipped() => "skipped",
            OutcomeStatus::Failed(_) => "failed",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let mut value = json!({
            "type": self.identity.type_name,
            "name": self.identity.name,
            "status": self.label(),
            "provider_id": self.provider_id,
            "duration_ms": u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
        });
        if let OutcomeStatus::Applied(decision) = &self.status {
            value["properties"] = json!(decision.properties());
        }
        if let Some(err) = self.error() {
            value["error"] = json!(err.to_string());
        }
        value
    }
}

impl ApplyReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Number of resources applied or removed.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of resources that failed on their own.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success() && !o.is_skipped())
            .count()
    }

    /// Number of resources skipped because a dependency failed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    /// Number of resources whose external object changed.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| match &o.status {
                OutcomeStatus::Applied(decision) => decision.is_change(),
                OutcomeStatus::Removed => true,
                OutcomeStatus::Failed(_) => false,
            })
            .count()
    }

    /// Returns true if nothing failed or was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ResourceOutcome::is_success)
    }

    /// Returns the outcome for a logical name.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| o.identity.name == name)
    }

    /// JSON view for `--output json`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "stack": self.stack,
            "success": self.is_success(),
            "succeeded": self.succeeded(),
            "changed": self.changed(),
            "failed": self.failed(),
            "skipped": self.skipped(),
            "duration_ms": u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            "resources": self.outcomes.iter().map(ResourceOutcome::to_json).collect::<Vec<_>>(),
        })
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} resources: {} succeeded ({} changed), {} failed, {} skipped",
            self.outcomes.len(),
            self.succeeded(),
            self.changed(),
            self.failed(),
            self.skipped()
        )
    }
}
