// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Provisio
//!
//! A reconciliation engine for dynamic resource providers whose side effects
//! are carried out by external command-line tools.
//!
//! ## Overview
//!
//! A stack file declares resource instances, each handled by a provider for
//! its type. On every run provisio:
//!
//! - Loads the recorded state of each instance
//! - Lets the provider validate and normalize the desired inputs
//! - Decides between create, no-op, in-place update and replacement
//! - Runs the provider and commits the new record atomically
//!
//! A second run with unchanged inputs makes no external call besides
//! validation and leaves state untouched.
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation, references and hashing
//! - [`state`]: State storage backends (local directory, in-memory)
//! - [`command`]: External process execution
//! - [`provider`]: Provider contract, registry and built-in providers
//! - [`engine`]: Single-resource lifecycle engine
//! - [`planner`]: Side-effect-free stack plans
//! - [`orchestrator`]: Dependency-ordered, concurrent stack apply and destroy
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: demo02
//!   stack: dev
//!
//! resources:
//!   - type: azure:storage:StaticWebsite
//!     name: demo02sw-website
//!     inputs:
//!       accountName: demo02sa
//!   - type: azure:storage:WebsiteContent
//!     name: demo02sw-content
//!     inputs:
//!       accountName: "${demo02sw-website.accountName}"
//!       source: ./data/wwwroot
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use command::{CommandExecutor, CommandRunner};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig, StackSettings};
pub use engine::{LifecycleDecision, LifecycleEngine, ReconcileOptions};
pub use error::{ProvisioError, Result};
pub use orchestrator::{ApplyReport, Orchestrator};
pub use planner::StackPlan;
pub use provider::{ProviderRegistry, ResourceProvider};
pub use state::{LocalStateStore, MemoryStateStore, StateRecord, StateStore};
