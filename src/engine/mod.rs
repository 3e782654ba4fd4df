//! Single-resource lifecycle engine.
//!
//! For one resource instance the engine loads recorded state, validates the
//! desired inputs through the provider, decides between create, no-op,
//! update and replace, runs the provider, and commits the new record.

mod decision;
mod guard;
mod lifecycle;

pub use decision::LifecycleDecision;
pub use guard::{IdentityGuard, IdentityLocks};
pub use lifecycle::{LifecycleEngine, ReconcileOptions, ReconcileOutcome};
