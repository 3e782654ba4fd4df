//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::orchestrator::{ApplyReport, OutcomeStatus};
use crate::planner::{PlannedAction, StackPlan};
use crate::provider::Capabilities;
use crate::state::{LockInfo, StateRecord};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan entry row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Time")]
    time: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Protected")]
    protected: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Provider row for table display.
#[derive(Tabled)]
struct ProviderRow {
    #[tabled(rename = "Type")]
    type_name: String,
    #[tabled(rename = "Diff")]
    diff: String,
    #[tabled(rename = "Update")]
    update: String,
    #[tabled(rename = "Delete")]
    delete: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Stack file is valid.", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Stack file has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && result.warning_count() > 0 {
                    let _ = writeln!(output, "\n{} Warnings:", "!".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a stack plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &StackPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &StackPlan, detailed: bool) -> String {
        if !plan.has_changes() && !plan.has_errors() {
            return format!(
                "{} No changes required - {} is up to date.\n",
                "✓".green(),
                plan.stack
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan for {}", plan.stack.bold());
        let _ = writeln!(output, "   Stack hash: {}\n", short(&plan.config_hash, 8));

        let rows: Vec<PlanRow> = plan
            .changes
            .iter()
            .filter(|c| detailed || c.action.is_change() || matches!(c.action, PlannedAction::Invalid { .. }))
            .enumerate()
            .map(|(i, c)| PlanRow {
                index: i + 1,
                action: Self::format_action(&c.action),
                resource: c.identity.name.clone(),
                type_name: c.identity.type_name.clone(),
                detail: if detailed {
                    c.action.detail()
                } else {
                    truncate(&c.action.detail(), 40)
                },
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to remove",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.remove.to_string().red()
        );
        if summary.pending > 0 {
            let _ = writeln!(
                output,
                "{} {} resource(s) depend on outputs that are not known yet.",
                "!".yellow(),
                summary.pending
            );
        }
        if summary.invalid > 0 {
            let _ = writeln!(
                output,
                "{} {} resource(s) have invalid inputs.",
                "✗".red(),
                summary.invalid
            );
        }

        output
    }

    /// Formats the report of an apply or destroy.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&report.to_json()),
            OutputFormat::Text => {
                let mut output = String::new();

                if !report.outcomes.is_empty() {
                    let rows: Vec<OutcomeRow> = report
                        .outcomes
                        .iter()
                        .map(|o| OutcomeRow {
                            resource: o.identity.to_string(),
                            result: Self::format_outcome(o.label(), &o.status),
                            id: o.provider_id.as_deref().map_or_else(String::new, |id| truncate(id, 24)),
                            time: format!("{:.1}s", o.duration.as_secs_f64()),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let status = if report.is_success() {
                    format!("{} {report}", "✓".green())
                } else {
                    format!("{} {report}", "✗".red())
                };
                let _ = writeln!(output, "\n{status}");

                let errors: Vec<_> = report
                    .outcomes
                    .iter()
                    .filter_map(|o| o.error().map(|e| (o, e)))
                    .collect();
                if !errors.is_empty() {
                    let _ = writeln!(output, "\n{} Errors:", "!".yellow());
                    for (outcome, error) in errors {
                        let _ = writeln!(output, "   - {}: {error}", outcome.identity.name);
                    }
                }

                output
            }
        }
    }

    /// Formats the list of recorded resources.
    #[must_use]
    pub fn format_records(&self, records: &[StateRecord]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(records).unwrap_or_default(),
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("   No resources recorded.\n");
                }
                let rows: Vec<RecordRow> = records
                    .iter()
                    .map(|r| RecordRow {
                        name: r.identity.name.clone(),
                        type_name: r.identity.type_name.clone(),
                        id: truncate(&r.provider_id, 24),
                        protected: if r.protect { "yes".yellow().to_string() } else { String::new() },
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats one recorded resource.
    #[must_use]
    pub fn format_record(&self, record: &StateRecord) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\n{}\n", record.identity.to_string().bold());
                let _ = writeln!(output, "   ID: {}", record.provider_id);
                let _ = writeln!(output, "   Protected: {}", record.protect);
                let _ = writeln!(output, "   Inputs hash: {}", short(&record.inputs_hash, 12));
                let _ = writeln!(output, "   Created: {}", record.created_at);
                let _ = writeln!(output, "   Updated: {}", record.updated_at);
                if !record.dependencies.is_empty() {
                    let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
                    let _ = writeln!(output, "   Depends on: {}", deps.join(", "));
                }
                let _ = writeln!(output, "\n   Inputs:");
                for (key, value) in &record.inputs {
                    let _ = writeln!(output, "     {key} = {value}");
                }
                let _ = writeln!(output, "\n   Outputs:");
                for (key, value) in &record.outputs {
                    let _ = writeln!(output, "     {key} = {}", truncate(&value.to_string(), 80));
                }
                output
            }
        }
    }

    /// Formats registered providers.
    #[must_use]
    pub fn format_providers(&self, providers: &[(&str, Capabilities)]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&json!(providers
                .iter()
                .map(|(name, caps)| json!({ "type": name, "capabilities": caps }))
                .collect::<Vec<_>>())),
            OutputFormat::Text => {
                let mark = |supported: bool| {
                    if supported {
                        "✓".green().to_string()
                    } else {
                        "-".dimmed().to_string()
                    }
                };
                let rows: Vec<ProviderRow> = providers
                    .iter()
                    .map(|(name, caps)| ProviderRow {
                        type_name: (*name).to_string(),
                        diff: mark(caps.diff),
                        update: mark(caps.update),
                        delete: mark(caps.delete),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the stack lock, if any.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, lock) => serde_json::to_string_pretty(&lock).unwrap_or_default(),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "Locked by {} since {} (lock id {}, {}s remaining)\n",
                lock.holder,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"!".yellow(), message)
    }

    fn message(&self, status: &str, symbol: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }

    fn format_action(action: &PlannedAction) -> String {
        let label = action.label();
        match action {
            PlannedAction::Reconcile { decision } => match decision {
                crate::engine::LifecycleDecision::Create => format!("+{label}").green().to_string(),
                crate::engine::LifecycleDecision::Update { .. } => format!("~{label}").yellow().to_string(),
                crate::engine::LifecycleDecision::Replace { .. } => format!("±{label}").magenta().to_string(),
                crate::engine::LifecycleDecision::NoChange => label.dimmed().to_string(),
            },
            PlannedAction::Remove { .. } => format!("-{label}").red().to_string(),
            PlannedAction::Pending { .. } => label.cyan().to_string(),
            PlannedAction::Invalid { .. } => label.red().bold().to_string(),
        }
    }

    fn format_outcome(label: &str, status: &OutcomeStatus) -> String {
        match status {
            OutcomeStatus::Applied(decision) if decision.is_change() => label.green().to_string(),
            OutcomeStatus::Applied(_) => label.dimmed().to_string(),
            OutcomeStatus::Removed => label.red().to_string(),
            OutcomeStatus::Failed(err) if err.as_reconcile().is_some_and(crate::error::ReconcileError::is_skip) => {
                label.yellow().to_string()
            }
            OutcomeStatus::Failed(_) => label.red().bold().to_string(),
        }
    }
}

fn to_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Returns at most the first `len` characters.
fn short(s: &str, len: usize) -> &str {
    s.char_indices().nth(len).map_or(s, |(i, _)| &s[..i])
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", short(s, max_len.saturating_sub(3)))
    }
}
