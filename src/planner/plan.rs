//! Stack plan types.
//!
//! A plan is the side-effect-free preview of an apply: one entry per
//! declared resource in dependency order, followed by the records that
//! would be removed because they are no longer declared.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::LifecycleDecision;
use crate::state::ResourceIdentity;

/// Preview of a stack apply.
#[derive(Debug, Clone, Serialize)]
pub struct StackPlan {
    /// Qualified stack name.
    pub stack: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Hash of the stack file the plan was computed from.
    pub config_hash: String,
    /// Planned changes, in execution order.
    pub changes: Vec<PlannedChange>,
}

/// One planned entry.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedChange {
    /// Resource concerned.
    pub identity: ResourceIdentity,
    /// What would happen.
    pub action: PlannedAction,
}

/// What would happen to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Reconciled with the given decision.
    Reconcile {
        /// Engine decision.
        decision: LifecycleDecision,
    },
    /// No longer declared; deleted.
    Remove {
        /// Protected records are refused at apply time.
        protected: bool,
    },
    /// Inputs depend on outputs not known until a dependency is applied.
    Pending {
        /// The unresolved reference.
        reference: String,
    },
    /// The provider rejected the inputs or failed while previewing.
    Invalid {
        /// Error description.
        message: String,
    },
}

/// Per-action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Creates.
    pub create: usize,
    /// In-place updates.
    pub update: usize,
    /// Replacements.
    pub replace: usize,
    /// Removals.
    pub remove: usize,
    /// Unchanged.
    pub unchanged: usize,
    /// Pending on dependency outputs.
    pub pending: usize,
    /// Invalid.
    pub invalid: usize,
}

impl StackPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new(stack: impl Into<String>, config_hash: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            created_at: Utc::now(),
            config_hash: config_hash.into(),
            changes: Vec::new(),
        }
    }

    /// Appends an entry.
    pub fn push(&mut self, identity: ResourceIdentity, action: PlannedAction) {
        self.changes.push(PlannedChange { identity, action });
    }

    /// Returns true if applying would change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action.is_change())
    }

    /// Returns true if any entry is invalid.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.changes
            .iter()
            .any(|c| matches!(c.action, PlannedAction::Invalid { .. }))
    }

    /// Counts entries per action.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match &change.action {
                PlannedAction::Reconcile { decision } => match decision {
                    LifecycleDecision::NoChange => summary.unchanged += 1,
                    LifecycleDecision::Create => summary.create += 1,
                    LifecycleDecision::Update { .. } => summary.update += 1,
                    LifecycleDecision::Replace { .. } => summary.replace += 1,
                },
                PlannedAction::Remove { .. } => summary.remove += 1,
                PlannedAction::Pending { .. } => summary.pending += 1,
                PlannedAction::Invalid { .. } => summary.invalid += 1,
            }
        }
        summary
    }
}

impl PlannedAction {
    /// Returns true unless the resource is unchanged.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        match self {
            Self::Reconcile { decision } => decision.is_change(),
            Self::Remove { .. } | Self::Pending { .. } => true,
            Self::Invalid { .. } => false,
        }
    }

    /// Short label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reconcile { decision } => decision.label(),
            Self::Remove { .. } => "remove",
            Self::Pending { .. } => "pending",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// Human-readable detail.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Reconcile { decision } => decision.properties().join(", "),
            Self::Remove { protected: true } => String::from("protected, will be refused"),
            Self::Remove { protected: false } => String::from("no longer declared"),
            Self::Pending { reference } => format!("waits for {reference}"),
            Self::Invalid { message } => message.clone(),
        }
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to remove, {} unchanged",
            self.create, self.update, self.replace, self.remove, self.unchanged
        )?;
        if self.pending > 0 {
            write!(f, ", {} pending", self.pending)?;
        }
        if self.invalid > 0 {
            write!(f, ", {} invalid", self.invalid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_each_action() {
        let mut plan = StackPlan::new("demo02-dev", "abc");
        plan.push(
            ResourceIdentity::new("command:Command", "a"),
            PlannedAction::Reconcile {
                decision: LifecycleDecision::Create,
            },
        );
        plan.push(
            ResourceIdentity::new("command:Command", "b"),
            PlannedAction::Reconcile {
                decision: LifecycleDecision::NoChange,
            },
        );
        plan.push(
            ResourceIdentity::new("command:Command", "c"),
            PlannedAction::Remove { protected: false },
        );

        let summary = plan.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.remove, 1);
        assert!(plan.has_changes());
        assert!(!plan.has_errors());
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 0 to replace, 1 to remove, 1 unchanged"
        );
    }

    #[test]
    fn test_unchanged_plan_has_no_changes() {
        let mut plan = StackPlan::new("demo02-dev", "abc");
        plan.push(
            ResourceIdentity::new("command:Command", "a"),
            PlannedAction::Reconcile {
                decision: LifecycleDecision::NoChange,
            },
        );
        assert!(!plan.has_changes());
    }
}
