//! Incremental run report

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use autoheal_common::{
    EngineInstallation, Engine, Error, ErrorEntry, InstallResult, Result, RunConfigEcho, RunReport,
    RunSummary, ScenarioResult,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::classify::classify;
use crate::recovery::RecoveryOutcome;

/// Builds a [`RunReport`] during a run; the summary is only computed by
/// [`ReportBuilder::finalize`].
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: String,
    engine: Engine,
    start_time: DateTime<Utc>,
    config: RunConfigEcho,
    /// Scenario names in requested order
    requested: Vec<String>,
    installation: Option<EngineInstallation>,
    install: Option<InstallResult>,
    results: BTreeMap<String, ScenarioResult>,
    errors: Vec<ErrorEntry>,
    critical_error: Option<String>,
    recovery_actions: usize,
}

impl ReportBuilder {
    pub fn new(engine: Engine, config: RunConfigEcho) -> Self {
        let requested = config.test_scenarios.clone();
        Self {
            run_id: Uuid::new_v4().to_string(),
            engine,
            start_time: Utc::now(),
            config,
            requested,
            installation: None,
            install: None,
            results: BTreeMap::new(),
            errors: Vec::new(),
            critical_error: None,
            recovery_actions: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn set_installation(&mut self, installation: EngineInstallation) {
        self.installation = Some(installation);
    }

    pub fn set_install(&mut self, install: InstallResult) {
        self.install = Some(install);
    }

    /// Record one failed attempt with its classification.
    pub fn record_error(&mut self, scenario: &str, error: &Error) {
        self.errors.push(ErrorEntry {
            scenario: scenario.to_string(),
            error: error.to_string(),
            classification: classify(error),
            timestamp: Utc::now(),
        });
    }

    /// Count a dispatched recovery. `no_recovery_available` is not counted.
    pub fn record_recovery(&mut self, outcome: &RecoveryOutcome) {
        if outcome.was_attempted() {
            self.recovery_actions += 1;
        }
    }

    pub fn record_result(&mut self, result: ScenarioResult) {
        debug!(scenario = %result.scenario_name, status = ?result.status, "Scenario result recorded");
        self.results.insert(result.scenario_name.clone(), result);
    }

    pub fn set_critical_error(&mut self, error: &Error) {
        self.critical_error = Some(error.to_string());
    }

    pub fn finalize(self) -> RunReport {
        let not_run: Vec<String> = self
            .requested
            .iter()
            .filter(|name| !self.results.contains_key(*name))
            .cloned()
            .collect();
        let passed = self.results.values().filter(|r| r.is_passed()).count();
        let summary = RunSummary {
            total_scenarios: self.requested.len(),
            passed_scenarios: passed,
            failed_scenarios: self.results.len() - passed,
            not_run_scenarios: not_run.len(),
            recovery_actions_used: self.recovery_actions,
        };
        info!(
            run_id = %self.run_id,
            passed = summary.passed_scenarios,
            failed = summary.failed_scenarios,
            not_run = summary.not_run_scenarios,
            recoveries = summary.recovery_actions_used,
            "Run finalized"
        );
        RunReport {
            run_id: self.run_id,
            engine: self.engine,
            start_time: self.start_time,
            end_time: Utc::now(),
            config: self.config,
            installation_status: self.installation.as_ref().map(|i| i.status),
            installation: self.installation,
            install: self.install,
            results: self.results,
            not_run,
            errors: self.errors,
            critical_error: self.critical_error,
            summary,
        }
    }
}

/// Write `report` as pretty JSON into `dir`, returning the file path.
pub fn write_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("autoheal-report-{}.json", report.engine));
    std::fs::write(&path, serde_json::to_vec_pretty(report)?)?;
    info!(path = %path.display(), "Report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoheal_common::FailureClassification;
    use std::time::Duration;

    fn echo(scenarios: &[&str]) -> RunConfigEcho {
        RunConfigEcho {
            target_url: "http://localhost:5173".into(),
            test_scenarios: scenarios.iter().map(|s| s.to_string()).collect(),
            browsers: vec![Engine::Chromium],
            max_retries: 3,
            generate_report: true,
        }
    }

    #[test]
    fn test_summary_counts_and_not_run() {
        let mut builder = ReportBuilder::new(Engine::Chromium, echo(&["login", "navigation", "forms"]));
        builder.record_result(ScenarioResult::passed("login", 1, Duration::from_millis(10), vec![]));
        builder.record_result(ScenarioResult::failed(
            "navigation",
            3,
            Duration::from_millis(10),
            "boom".into(),
        ));
        let report = builder.finalize();
        assert_eq!(report.summary.total_scenarios, 3);
        assert_eq!(report.summary.passed_scenarios, 1);
        assert_eq!(report.summary.failed_scenarios, 1);
        assert_eq!(report.not_run, vec!["forms".to_string()]);
        assert!(!report.all_passed());
    }

    #[test]
    fn test_unavailable_recovery_is_not_counted() {
        let mut builder = ReportBuilder::new(Engine::Chromium, echo(&["login"]));
        builder.record_recovery(&RecoveryOutcome::unavailable(FailureClassification::Unknown));
        builder.record_recovery(&RecoveryOutcome::failed(FailureClassification::ElementNotFound, "x"));
        assert_eq!(builder.finalize().summary.recovery_actions_used, 1);
    }

    #[test]
    fn test_errors_carry_classification() {
        let mut builder = ReportBuilder::new(Engine::Chromium, echo(&["login"]));
        builder.record_error(
            "login",
            &Error::NavigationTimeout {
                url: "http://localhost:5173/login".into(),
                timeout_ms: 30000,
            },
        );
        let report = builder.finalize();
        assert_eq!(report.errors[0].classification, FailureClassification::PageNavigationTimeout);
    }

    #[test]
    fn test_write_report_uses_engine_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let report = ReportBuilder::new(Engine::Firefox, echo(&[])).finalize();
        let path = write_report(&report, dir.path()).unwrap();
        assert!(path.ends_with("autoheal-report-firefox.json"));
        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["summary"]["totalScenarios"], 0);
        assert_eq!(json["engine"], "firefox");
    }
}
