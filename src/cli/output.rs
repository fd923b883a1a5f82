//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, Plan, ResourceStatus};
use crate::reconciler::{DriftReport, DriftStatus, ReconciliationResult};
use crate::state::AppliedState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Applied resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Depends on")]
    depends_on: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Drift row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Changed")]
    changed: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid.\n", "✓".green())
                } else {
                    let mut output = format!("{} Configuration is invalid:\n", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats the resource graph in apply order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph, order: &[String]) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<_> = order
                    .iter()
                    .filter_map(|name| graph.node(name))
                    .map(|node| {
                        serde_json::json!({
                            "name": node.name(),
                            "type": node.resource_type(),
                            "depends_on": node.dependencies(),
                            "create_before_destroy": node.lifecycle().create_before_destroy,
                        })
                    })
                    .collect();
                to_json(&nodes)
            }
            OutputFormat::Text => {
                let mut output = format!("\nResource graph ({} resources)\n\n", graph.len());
                for (i, name) in order.iter().enumerate() {
                    let Some(node) = graph.node(name) else {
                        continue;
                    };
                    let _ = write!(output, "   {}. {} {}", i + 1, name.bold(), node.resource_type().dimmed());
                    if !node.dependencies().is_empty() {
                        let deps: Vec<&str> = node.dependencies().iter().map(String::as_str).collect();
                        let _ = write!(output, " <- {}", deps.join(", "));
                    }
                    if node.lifecycle().create_before_destroy {
                        let _ = write!(output, " {}", "[create_before_destroy]".cyan());
                    }
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan\n");
        let _ = write!(output, "   Config hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| a.has_work())
            .map(|a| PlanActionRow {
                index: a.index + 1,
                action: if a.cleanup {
                    "- deposed".red().to_string()
                } else {
                    Self::format_action_type(a.action_type, a.create_before_destroy)
                },
                resource: format!("{}.{}", a.resource_type, a.name),
                after: a
                    .dependencies
                    .iter()
                    .map(|d| (d + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: truncate(&a.reason, 48),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for action in plan.actions.iter().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "   {} {}", action.action_type.symbol(), action.name.bold());
                for change in &action.changes {
                    let old = change.old_value.as_ref().map_or_else(|| String::from("(none)"), ToString::to_string);
                    let new = if change.known {
                        change.new_value.as_ref().map_or_else(|| String::from("(none)"), ToString::to_string)
                    } else {
                        String::from("(known after apply)")
                    };
                    let marker = if change.forces_replace {
                        " # forces replacement".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(output, "       {}: {old} -> {new}{marker}", change.attribute);
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete.\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().magenta(),
            summary.delete.to_string().red()
        );

        output
    }

    /// Formats the result of an apply or destroy.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let report = &result.report;
                let rows: Vec<ResultRow> = report
                    .actions
                    .iter()
                    .filter(|a| a.status != ResourceStatus::Skipped)
                    .map(|a| ResultRow {
                        resource: a.name.clone(),
                        action: if a.cleanup {
                            String::from("delete deposed")
                        } else {
                            a.action_type.to_string()
                        },
                        status: Self::format_status(a.status),
                        id: a.provider_id.as_deref().map_or_else(String::new, |id| truncate(id, 16)),
                        error: a.error.as_deref().map_or_else(String::new, |e| truncate(e, 48)),
                    })
                    .collect();

                let mut output = String::new();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let status = if result.is_success() {
                    format!("{} {} complete", "✓".green(), result.operation)
                } else {
                    format!("{} {} failed", "✗".red(), result.operation)
                };
                let _ = write!(
                    output,
                    "\n{status}: {} applied, {} failed, {} blocked, {} unchanged",
                    report.count(ResourceStatus::Applied),
                    report.count(ResourceStatus::Failed),
                    report.count(ResourceStatus::Blocked),
                    report.count(ResourceStatus::Skipped)
                );
                if report.was_cancelled() {
                    let _ = write!(output, ", {} cancelled", report.count(ResourceStatus::Cancelled));
                }
                output.push_str(".\n");
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = String::new();
                if report.has_drift() {
                    let _ = write!(output, "{} Drift detected:\n\n", "⚠".yellow());
                    let rows: Vec<DriftRow> = report
                        .drifted()
                        .map(|e| DriftRow {
                            resource: format!("{}.{}", e.resource_type, e.name),
                            status: match e.status {
                                DriftStatus::Missing => e.status.to_string().red().to_string(),
                                _ => e.status.to_string().yellow().to_string(),
                            },
                            changed: e.changed.join(", "),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                if !report.pending.is_empty() {
                    let _ = writeln!(output, "\nNot yet applied: {}", report.pending.join(", "));
                }
                if !report.orphaned.is_empty() {
                    let _ = writeln!(output, "No longer declared: {}", report.orphaned.join(", "));
                }
                output
            }
        }
    }

    /// Formats applied state.
    #[must_use]
    pub fn format_state(&self, state: &AppliedState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}/{}\n\n", state.project, state.environment);
                let _ = writeln!(output, "   Format version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());

                let deposed = state.deposed_resources();
                if !deposed.is_empty() {
                    let names: Vec<&str> = deposed.iter().map(|r| r.name.as_str()).collect();
                    let _ = writeln!(output, "   {} Deposed instances pending removal: {}", "⚠".yellow(), names.join(", "));
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} applied, {} failed, {} blocked)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.applied,
                            entry.failed,
                            entry.blocked
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the list of applied resources.
    #[must_use]
    pub fn format_resources(&self, state: &AppliedState) -> String {
        match self.format {
            OutputFormat::Json => to_json(&state.resources),
            OutputFormat::Text => {
                if state.is_empty() {
                    return String::from("No resources in state.\n");
                }
                let rows: Vec<ResourceRow> = state
                    .resources
                    .values()
                    .map(|r| ResourceRow {
                        resource: format!("{}.{}", r.resource_type, r.name),
                        id: r.provider_id.clone(),
                        version: r.version,
                        depends_on: r.dependencies.iter().map(String::as_str).collect::<Vec<_>>().join(", "),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "message": message })),
            OutputFormat::Text => format!("{message}\n"),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType, create_before_destroy: bool) -> String {
        match action_type {
            ActionType::Create => "+ create".green().to_string(),
            ActionType::Update => "~ update".yellow().to_string(),
            ActionType::Replace if create_before_destroy => "+/- replace".magenta().to_string(),
            ActionType::Replace => "-/+ replace".magenta().to_string(),
            ActionType::Delete => "- delete".red().to_string(),
            ActionType::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Formats an action status with color.
    fn format_status(status: ResourceStatus) -> String {
        match status {
            ResourceStatus::Applied => status.to_string().green().to_string(),
            ResourceStatus::Failed => status.to_string().red().to_string(),
            ResourceStatus::Blocked => status.to_string().yellow().to_string(),
            ResourceStatus::Skipped | ResourceStatus::Cancelled => status.to_string().dimmed().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default() + "\n"
}

/// Returns the first eight characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long reason", 10), "a rathe...");
    }

    #[test]
    fn test_empty_plan_text() {
        colored::control::set_override(false);
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&Plan::empty("abc"), false);
        assert!(output.contains("No changes required"));
    }

    #[test]
    fn test_state_json() {
        let state = AppliedState::new("api-gateway", "dev");
        let output = OutputFormatter::new(OutputFormat::Json).format_state(&state);
        let parsed: serde_json::Value = serde_json::from_str(&output).expect("valid json");
        assert_eq!(parsed["project"], "api-gateway");
    }
}
