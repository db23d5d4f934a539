//! Output formatting for CLI

use autoheal_common::{
    EngineInstallation, ErrorEntry, InstallResult, InstallStatus, RunReport, ScenarioResult, ScenarioStatus,
};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value).unwrap_or_default()),
        OutputFormat::Table => {}
    }
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            table.add_row(item.row());
            println!("{table}");
        }
        _ => print_serialized(item, format),
    }
}

/// Print a run report: summary line, per-scenario table, error log.
pub fn print_report(report: &RunReport, format: OutputFormat) {
    if format != OutputFormat::Table {
        print_serialized(report, format);
        return;
    }

    let summary = &report.summary;
    println!(
        "{} {} against {}",
        "Run".bold(),
        report.run_id.dimmed(),
        report.config.target_url
    );
    println!(
        "  Engine: {}  Installation: {}",
        report.engine,
        report
            .installation_status
            .map(|s| format!("{:?}", s))
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!(
        "  Scenarios: {} total, {} passed, {} failed, {} not run; {} recovery actions",
        summary.total_scenarios,
        summary.passed_scenarios.to_string().green(),
        summary.failed_scenarios.to_string().red(),
        summary.not_run_scenarios.to_string().yellow(),
        summary.recovery_actions_used
    );
    if let Some(critical) = &report.critical_error {
        print_error(&format!("Critical: {}", critical));
    }

    let results: Vec<&ScenarioResult> = report.results.values().collect();
    if !results.is_empty() {
        let mut table = table();
        table.set_header(ScenarioResult::headers());
        for result in results {
            table.add_row(result.row());
        }
        println!("{table}");
    }
    if !report.not_run.is_empty() {
        print_warning(&format!("Not run: {}", report.not_run.join(", ")));
    }
    if !report.errors.is_empty() {
        let mut table = table();
        table.set_header(ErrorEntry::headers());
        for entry in &report.errors {
            table.add_row(entry.row());
        }
        println!("{table}");
    }
}

impl TableDisplay for ScenarioResult {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Status", "Attempts", "Duration", "Last Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.scenario_name.clone(),
            match self.status {
                ScenarioStatus::Passed => "✓ passed".green().to_string(),
                ScenarioStatus::Failed => "✗ failed".red().to_string(),
            },
            self.attempts.to_string(),
            format!("{}ms", self.duration_ms),
            self.last_error.clone().unwrap_or_default(),
        ]
    }
}

impl TableDisplay for ErrorEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Time", "Scenario", "Classification", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.timestamp.format("%H:%M:%S").to_string(),
            self.scenario.clone(),
            self.classification.to_string(),
            self.error.clone(),
        ]
    }
}

impl TableDisplay for EngineInstallation {
    fn headers() -> Vec<&'static str> {
        vec!["Status", "Version", "Path", "Error"]
    }

    fn row(&self) -> Vec<String> {
        let status = format!("{:?}", self.status);
        vec![
            if self.is_usable() {
                status.green().to_string()
            } else {
                status.red().to_string()
            },
            self.version.clone().unwrap_or_else(|| "-".to_string()),
            self.path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

impl TableDisplay for InstallResult {
    fn headers() -> Vec<&'static str> {
        vec!["Status", "Path", "Error", "Hint"]
    }

    fn row(&self) -> Vec<String> {
        let status = format!("{:?}", self.status);
        vec![
            match self.status {
                InstallStatus::Failed => status.red().to_string(),
                _ => status.green().to_string(),
            },
            self.path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.error.clone().unwrap_or_default(),
            self.hint.clone().unwrap_or_default(),
        ]
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scenario_row_carries_last_error() {
        colored::control::set_override(false);
        let result = ScenarioResult::failed("login", 3, Duration::from_millis(1500), "Element not found: #email".into());
        let row = result.row();
        assert_eq!(row.len(), ScenarioResult::headers().len());
        assert_eq!(row[0], "login");
        assert_eq!(row[1], "✗ failed");
        assert_eq!(row[2], "3");
        assert_eq!(row[3], "1500ms");
        assert_eq!(row[4], "Element not found: #email");
    }

    #[test]
    fn test_install_row_shows_hint() {
        colored::control::set_override(false);
        let result = InstallResult::failed("Network unreachable", "Check your internet connection");
        let row = result.row();
        assert_eq!(row[0], "Failed");
        assert_eq!(row[1], "-");
        assert_eq!(row[3], "Check your internet connection");
    }
}
