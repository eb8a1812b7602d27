//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::parser::ParseError;
use crate::runtime::ReconcileResponse;
use crate::state::{CatalogResource, ReconcileStatus, ResourceState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Catalog row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Spec")]
    spec_version: u64,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of parsing a project.
    #[must_use]
    pub fn format_validation(&self, resource_count: usize, errors: &[ParseError]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                resources: resource_count,
                errors,
            }),
            OutputFormat::Text => {
                if errors.is_empty() {
                    return format!(
                        "{} Project is valid ({resource_count} resources)\n",
                        "✓".green()
                    );
                }

                let mut output = format!(
                    "{} {} parse errors ({resource_count} resources)\n\n",
                    "✗".red(),
                    errors.len()
                );
                for err in errors {
                    let _ = writeln!(output, "   - {err}");
                }
                output
            }
        }
    }

    /// Formats a reconcile response and the statements it executed.
    #[must_use]
    pub fn format_reconcile(&self, response: &ReconcileResponse, statements: &[String]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ReconcileJson {
                response,
                statements,
            }),
            OutputFormat::Text => {
                let status = if response.errors.is_empty() {
                    format!("{} Reconcile successful", "✓".green())
                } else {
                    format!("{} Reconcile finished with errors", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Affected files: {}", response.affected_paths.len());
                for path in &response.affected_paths {
                    let _ = writeln!(output, "     {path}");
                }

                if !statements.is_empty() {
                    let _ = writeln!(output, "\n   Statements ({}):", statements.len());
                    for stmt in statements {
                        let _ = writeln!(output, "     {}", truncate(stmt, 100).dimmed());
                    }
                }

                if !response.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for issue in &response.errors {
                        let location = match (&issue.file_path, issue.line) {
                            (Some(path), Some(line)) => format!("{path}:{line}: "),
                            (Some(path), None) => format!("{path}: "),
                            _ => String::new(),
                        };
                        let _ = writeln!(output, "   - {location}{}", issue.message);
                    }
                }

                output
            }
        }
    }

    /// Formats catalog resources.
    #[must_use]
    pub fn format_catalog(&self, instance_id: &str, resources: &[CatalogResource]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&CatalogJson {
                instance_id,
                resources,
            }),
            OutputFormat::Text => {
                let mut output = format!("\nInstance: {instance_id}\n\n");

                if resources.is_empty() {
                    output.push_str("   No resources reconciled.\n");
                    return output;
                }

                let rows: Vec<ResourceRow> = resources
                    .iter()
                    .map(|r| ResourceRow {
                        kind: r.meta.name.kind.to_string(),
                        name: r.meta.name.name.clone(),
                        status: format_status(r),
                        state: truncate(&describe_state(&r.state), 40),
                        spec_version: r.meta.spec_version,
                    })
                    .collect();

                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                let failed = resources
                    .iter()
                    .filter(|r| r.meta.reconcile_error.is_some())
                    .count();
                let _ = write!(
                    output,
                    "\n{} resources, {} failed\n",
                    resources.len(),
                    if failed == 0 {
                        failed.to_string().green()
                    } else {
                        failed.to_string().red()
                    }
                );

                output
            }
        }
    }
}

fn format_status(resource: &CatalogResource) -> String {
    if resource.meta.reconcile_error.is_some() {
        return "error".red().to_string();
    }
    match resource.meta.reconcile_status {
        ReconcileStatus::Running => "running".yellow().to_string(),
        ReconcileStatus::Idle if resource.meta.spec_changed() => "pending".yellow().to_string(),
        ReconcileStatus::Idle => "ok".green().to_string(),
    }
}

fn describe_state(state: &ResourceState) -> String {
    match state {
        ResourceState::Source(s) => s.table.clone().unwrap_or_default(),
        ResourceState::Model(m) => match &m.table {
            Some(table) if m.materialized => format!("table {table}"),
            Some(view) => format!("view {view}"),
            None => String::new(),
        },
        ResourceState::MetricsView(mv) => {
            let label = if mv.valid_spec.is_some() { "valid" } else { "invalid" };
            label.to_string()
        }
        ResourceState::Migration(m) => m
            .version
            .map_or_else(|| "not applied".to_string(), |v| format!("version {v}")),
    }
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct ValidationJson<'a> {
    resources: usize,
    errors: &'a [ParseError],
}

#[derive(Serialize)]
struct ReconcileJson<'a> {
    #[serde(flatten)]
    response: &'a ReconcileResponse,
    statements: &'a [String],
}

#[derive(Serialize)]
struct CatalogJson<'a> {
    instance_id: &'a str,
    resources: &'a [CatalogResource],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ReconcileIssue;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_reconcile_json_flattens_response() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let response = ReconcileResponse {
            errors: vec![ReconcileIssue {
                message: "boom".to_string(),
                file_path: Some("/models/a.sql".to_string()),
                line: Some(2),
                resource: None,
            }],
            affected_paths: vec!["/models/a.sql".to_string()],
        };

        let out = formatter.format_reconcile(&response, &["SELECT 1".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&out).expect("valid json");

        assert_eq!(value["errors"][0]["message"], "boom");
        assert_eq!(value["affected_paths"][0], "/models/a.sql");
        assert_eq!(value["statements"][0], "SELECT 1");
    }

    #[test]
    fn test_validation_text_lists_errors() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let errors = vec![ParseError {
            message: "invalid yaml".to_string(),
            file_path: "/sources/a.yaml".to_string(),
            start_location: None,
        }];

        let out = formatter.format_validation(0, &errors);
        assert!(out.contains("/sources/a.yaml: invalid yaml"));
    }
}
