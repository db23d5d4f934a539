//! Core types for autoheal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Browser engine driven by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Chromium => "chromium",
            Engine::Firefox => "firefox",
            Engine::Webkit => "webkit",
        }
    }

    /// Known-good revisions, newest first. Directory names inside the
    /// Playwright install cache.
    pub fn known_versions(&self) -> &'static [&'static str] {
        match self {
            Engine::Chromium => &["chromium-1091", "chromium-1084", "chromium-1080", "chromium-1076"],
            Engine::Firefox => &["firefox-1429", "firefox-1424", "firefox-1422"],
            Engine::Webkit => &["webkit-1944", "webkit-1932", "webkit-1921"],
        }
    }

    /// Executable location relative to a revision directory.
    pub fn executable_path(&self) -> PathBuf {
        #[cfg(target_os = "macos")]
        let rel = match self {
            Engine::Chromium => "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            Engine::Firefox => "firefox/Nightly.app/Contents/MacOS/firefox",
            Engine::Webkit => "pw_run.sh",
        };
        #[cfg(not(target_os = "macos"))]
        let rel = match self {
            Engine::Chromium => "chrome-linux/chrome",
            Engine::Firefox => "firefox/firefox",
            Engine::Webkit => "pw_run.sh",
        };
        PathBuf::from(rel)
    }

    /// Pattern matched against command lines when killing stray processes.
    pub fn process_pattern(&self) -> &'static str {
        match self {
            Engine::Chromium => "ms-playwright/chromium",
            Engine::Firefox => "ms-playwright/firefox",
            Engine::Webkit => "ms-playwright/webkit",
        }
    }

    /// Prefix of the throwaway profile directories the engine leaves in the temp dir.
    pub fn temp_profile_prefix(&self) -> &'static str {
        match self {
            Engine::Chromium => "playwright_chromiumdev_profile-",
            Engine::Firefox => "playwright_firefoxdev_profile-",
            Engine::Webkit => "playwright_webkitdev_profile-",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Engine::Chromium),
            "firefox" => Ok(Engine::Firefox),
            "webkit" => Ok(Engine::Webkit),
            other => Err(Error::InvalidConfig(format!("unknown browser engine: {}", other))),
        }
    }
}

/// Status of the engine binary as seen by the last validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    Installed,
    InstalledFixedPermissions,
    NotInstalled,
    FoundButNotExecutable,
    ValidationFailed,
}

impl InstallationStatus {
    /// Both installed variants yield a runnable binary.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Installed | Self::InstalledFixedPermissions)
    }
}

/// Hint attached to a failed validation
pub const FALLBACK_SYSTEM_BROWSER: &str = "proceed_with_system_browser";

/// Point-in-time snapshot of the engine installation. Every validation
/// produces a fresh value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInstallation {
    pub status: InstallationStatus,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub last_checked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub searched_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineInstallation {
    fn snapshot(status: InstallationStatus) -> Self {
        Self {
            status,
            path: None,
            version: None,
            last_checked_at: Utc::now(),
            searched_versions: Vec::new(),
            fallback: None,
            error: None,
        }
    }

    /// Executable binary found at `path`.
    pub fn installed(path: PathBuf, version: &str, fixed_permissions: bool) -> Self {
        let status = if fixed_permissions {
            InstallationStatus::InstalledFixedPermissions
        } else {
            InstallationStatus::Installed
        };
        Self {
            path: Some(path),
            version: Some(version.to_string()),
            ..Self::snapshot(status)
        }
    }

    pub fn not_installed(searched: &[&str]) -> Self {
        Self {
            searched_versions: searched.iter().map(|v| v.to_string()).collect(),
            ..Self::snapshot(InstallationStatus::NotInstalled)
        }
    }

    pub fn not_executable(path: PathBuf, version: &str, error: String) -> Self {
        Self {
            path: Some(path),
            version: Some(version.to_string()),
            error: Some(error),
            ..Self::snapshot(InstallationStatus::FoundButNotExecutable)
        }
    }

    pub fn validation_failed(error: String) -> Self {
        Self {
            error: Some(error),
            fallback: Some(FALLBACK_SYSTEM_BROWSER.to_string()),
            ..Self::snapshot(InstallationStatus::ValidationFailed)
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status.is_usable() && self.path.is_some()
    }
}

/// Terminal state of an install request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// A fresh install ran and validated.
    Installed,
    /// The validator already found a usable binary; nothing ran.
    AlreadyInstalled,
    /// Installation disabled by the skip switch.
    Skipped,
    /// The first install hung and the forced reinstall succeeded.
    Recovered,
    Failed,
}

impl InstallStatus {
    /// Every status except `Failed` is a valid terminal state.
    pub fn is_ok(&self) -> bool {
        !matches!(self, InstallStatus::Failed)
    }
}

/// Result of the Safe Installer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub status: InstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl InstallResult {
    pub fn new(status: InstallStatus) -> Self {
        Self {
            status,
            path: None,
            error: None,
            hint: None,
            output: None,
        }
    }

    pub fn failed(error: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            hint: Some(hint.into()),
            ..Self::new(InstallStatus::Failed)
        }
    }

    pub fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Exponential backoff policy.
///
/// Delay for attempt `n` (1-indexed) is
/// `min(base_delay * backoff_multiplier^(n-1), max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        let policy = Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            backoff_multiplier,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries < 1 {
            return Err(Error::InvalidConfig("max_retries must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff_multiplier must be a finite value > 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::InvalidConfig(
                "max_delay_ms must not be smaller than base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Backoff delay for 1-indexed `attempt`. Attempt 0 is treated as 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Fixed taxonomy of failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClassification {
    BrowserLaunchTimeout,
    BrowserInstallHang,
    BrowserCrash,
    PageNavigationTimeout,
    ElementNotFound,
    ScreenshotFailure,
    Unknown,
}

impl FailureClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrowserLaunchTimeout => "browser_launch_timeout",
            Self::BrowserInstallHang => "browser_install_hang",
            Self::BrowserCrash => "browser_crash",
            Self::PageNavigationTimeout => "page_navigation_timeout",
            Self::ElementNotFound => "element_not_found",
            Self::ScreenshotFailure => "screenshot_failure",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a launched browser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowserHandle {
    pub id: String,
    pub engine: Engine,
    /// Launched through the managed channel rather than the bundled engine.
    #[serde(default)]
    pub managed: bool,
}

/// Opaque handle to a page inside a browser
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageHandle {
    pub id: String,
    pub browser_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

/// Outcome of one scenario run, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub status: ScenarioStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<String>,
}

impl ScenarioResult {
    pub fn passed(name: &str, attempts: u32, duration: Duration, steps: Vec<String>) -> Self {
        Self {
            scenario_name: name.to_string(),
            status: ScenarioStatus::Passed,
            attempts,
            last_error: None,
            duration_ms: duration.as_millis() as u64,
            steps,
        }
    }

    pub fn failed(name: &str, attempts: u32, duration: Duration, last_error: String) -> Self {
        Self {
            scenario_name: name.to_string(),
            status: ScenarioStatus::Failed,
            attempts,
            last_error: Some(last_error),
            duration_ms: duration.as_millis() as u64,
            steps: Vec::new(),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// One failed attempt, as recorded in the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub scenario: String,
    pub error: String,
    pub classification: FailureClassification,
    pub timestamp: DateTime<Utc>,
}

/// Echo of the invocation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfigEcho {
    pub target_url: String,
    pub test_scenarios: Vec<String>,
    pub browsers: Vec<Engine>,
    pub max_retries: u32,
    pub generate_report: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_scenarios: usize,
    pub passed_scenarios: usize,
    pub failed_scenarios: usize,
    pub not_run_scenarios: usize,
    pub recovery_actions_used: usize,
}

/// Finalized record of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub engine: Engine,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub config: RunConfigEcho,
    pub installation_status: Option<InstallationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation: Option<EngineInstallation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallResult>,
    pub results: BTreeMap<String, ScenarioResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_run: Vec<String>,
    pub errors: Vec<ErrorEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_error: Option<String>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn all_passed(&self) -> bool {
        self.critical_error.is_none()
            && self.summary.failed_scenarios == 0
            && self.summary.not_run_scenarios == 0
    }
}
