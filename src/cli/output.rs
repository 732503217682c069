use std::fmt::Write as FmtWrite;

use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;

use crate::models::{BatchOutcome, BatchResult, OutputFormat, ProcessingStats};

pub trait Formatter {
    fn format_run_report(&self, report: &RunReport) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

/// Outcome of one `run` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<BatchResult<serde_json::Value>>,
    pub stats: ProcessingStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Bulk,
    Stream,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Bulk => write!(f, "bulk"),
            RunMode::Stream => write!(f, "stream"),
        }
    }
}

fn describe_outcome(outcome: &BatchOutcome<serde_json::Value>) -> String {
    match outcome {
        BatchOutcome::Success { value } => value.to_string(),
        BatchOutcome::Failed { reason, message } => format!("{}: {}", reason, message),
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        let mut output = String::new();
        writeln!(
            output,
            "Run ({}, {}) finished in {}ms",
            report.mode, report.operation, report.duration_ms
        )
        .unwrap();
        writeln!(output, "---").unwrap();

        for result in &report.results {
            let status = if result.is_success() {
                style("[OK]").green()
            } else {
                style("[FAILED]").red()
            };
            writeln!(
                output,
                "{} batch {:>4}  items={:<4} attempts={}  {}",
                status,
                result.batch_index,
                result.item_count,
                result.attempts_made,
                describe_outcome(&result.outcome)
            )
            .unwrap();
        }
        writeln!(output).unwrap();

        let stats = &report.stats;
        writeln!(output, "Batches:       {}", stats.total_batches).unwrap();
        writeln!(output, "  Succeeded:   {}", stats.succeeded_batches()).unwrap();
        if stats.failed_batches > 0 {
            writeln!(
                output,
                "  Failed:      {}",
                style(stats.failed_batches).red()
            )
            .unwrap();
        }
        writeln!(output, "Items:         {}", stats.total_items_submitted).unwrap();
        writeln!(output, "Errored items: {}", stats.total_errored_items).unwrap();
        writeln!(output, "Attempts:      {}", stats.total_attempts).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("{} {}", style("Error:").red().bold(), error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl Formatter for JsonFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        if self.pretty {
            serde_json::to_string_pretty(report)
                .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        } else {
            serde_json::to_string(report).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
        }
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        let mut output = String::new();
        writeln!(output, "## Batch Run\n").unwrap();
        writeln!(
            output,
            "**Mode:** {} | **Operation:** `{}` | **Duration:** {}ms\n",
            report.mode, report.operation, report.duration_ms
        )
        .unwrap();

        if !report.results.is_empty() {
            writeln!(output, "| Batch | Items | Attempts | Status | Result |").unwrap();
            writeln!(output, "|-------|-------|----------|--------|--------|").unwrap();
            for result in &report.results {
                let status = if result.is_success() { "✅" } else { "❌" };
                writeln!(
                    output,
                    "| {} | {} | {} | {} | `{}` |",
                    result.batch_index,
                    result.item_count,
                    result.attempts_made,
                    status,
                    describe_outcome(&result.outcome)
                )
                .unwrap();
            }
            writeln!(output).unwrap();
        }

        let stats = &report.stats;
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Batches | {} |", stats.total_batches).unwrap();
        writeln!(output, "| Failed batches | {} |", stats.failed_batches).unwrap();
        writeln!(output, "| Items | {} |", stats.total_items_submitted).unwrap();
        writeln!(output, "| Errored items | {} |", stats.total_errored_items).unwrap();
        writeln!(output, "| Attempts | {} |", stats.total_attempts).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn report() -> RunReport {
        RunReport {
            mode: RunMode::Bulk,
            operation: "sum".to_string(),
            started_at: Utc::now(),
            duration_ms: 12,
            results: vec![
                BatchResult::success(0, 2, serde_json::json!(3), 1),
                BatchResult::failed(1, 1, ErrorKind::ProcessingError, "not a number: x", 2),
            ],
            stats: ProcessingStats {
                total_items_submitted: 3,
                total_errored_items: 1,
                total_batches: 2,
                failed_batches: 1,
                total_attempts: 3,
            },
        }
    }

    #[test]
    fn test_json_report_is_parseable() {
        let output = JsonFormatter::new(false).format_run_report(&report());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["mode"], "bulk");
        assert_eq!(value["results"][1]["outcome"]["status"], "failed");
        assert_eq!(value["stats"]["total_errored_items"], 1);
    }

    #[test]
    fn test_text_report_mentions_failure() {
        let output = TextFormatter.format_run_report(&report());
        assert!(output.contains("not a number: x"));
        assert!(output.contains("Errored items: 1"));
    }

    #[test]
    fn test_markdown_report_has_table() {
        let output = MarkdownFormatter.format_run_report(&report());
        assert!(output.contains("| Batch | Items | Attempts | Status | Result |"));
        assert!(output.contains("| Failed batches | 1 |"));
    }

    #[test]
    fn test_error_formatting() {
        let json: serde_json::Value =
            serde_json::from_str(&JsonFormatter::new(false).format_error("config file not found"))
                .unwrap();
        assert_eq!(json["error"], "config file not found");

        assert!(TextFormatter.format_error("boom").ends_with("boom"));
        assert!(MarkdownFormatter.format_error("boom").contains("**Error:** boom"));
    }
}
