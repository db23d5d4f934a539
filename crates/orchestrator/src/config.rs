//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use autoheal_common::{Engine, Error, FailureClassification, Result, RetryPolicy, RunConfigEcho};

use crate::host::DEFAULT_PROBE_URL;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base URL of the application under test
    pub target_url: String,

    /// Scenario names, run in this order
    pub test_scenarios: Vec<String>,

    /// Engines to run against; one run per engine
    pub browsers: Vec<Engine>,

    /// Total attempts per scenario
    pub max_retries: u32,

    pub generate_report: bool,

    pub report_dir: PathBuf,

    pub crash_dir: PathBuf,

    /// Override of the Playwright install cache
    pub install_cache_dir: Option<PathBuf>,

    pub network_probe_url: String,

    /// Try the installed-browser channel before the bundled engine
    pub use_managed_channel: bool,

    pub headless: bool,

    /// Overrides `AUTOHEAL_SKIP_INSTALL` when set
    pub skip_install: Option<bool>,

    /// Linear backoff step between scenario attempts
    pub scenario_backoff_step_ms: u64,

    /// Launch-level retry policy
    pub launch_retry: RetryPolicy,

    pub timeouts: Timeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target_url: "http://localhost:5173".to_string(),
            test_scenarios: vec!["login".into(), "navigation".into(), "forms".into()],
            browsers: vec![Engine::Chromium],
            max_retries: 3,
            generate_report: true,
            report_dir: autoheal_common::default_report_dir(),
            crash_dir: autoheal_common::default_crash_dir(),
            install_cache_dir: None,
            network_probe_url: DEFAULT_PROBE_URL.to_string(),
            use_managed_channel: false,
            headless: true,
            skip_install: None,
            scenario_backoff_step_ms: 2000,
            launch_retry: RetryPolicy::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// Per-call timeouts, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub launch_ms: u64,
    pub navigation_ms: u64,
    pub selector_ms: u64,
    pub screenshot_ms: u64,
    /// Hard bound on one scenario attempt
    pub scenario_ms: u64,
    pub network_probe_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            launch_ms: 30_000,
            navigation_ms: 30_000,
            selector_ms: 10_000,
            screenshot_ms: 15_000,
            scenario_ms: 120_000,
            network_probe_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn launch(&self) -> Duration {
        Duration::from_millis(self.launch_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn selector(&self) -> Duration {
        Duration::from_millis(self.selector_ms)
    }

    pub fn screenshot(&self) -> Duration {
        Duration::from_millis(self.screenshot_ms)
    }

    pub fn scenario(&self) -> Duration {
        Duration::from_millis(self.scenario_ms)
    }

    pub fn network_probe(&self) -> Duration {
        Duration::from_millis(self.network_probe_ms)
    }

    /// Budget handed to the recovery handler for `classification`.
    pub fn for_recovery(&self, classification: FailureClassification) -> Duration {
        match classification {
            FailureClassification::BrowserLaunchTimeout | FailureClassification::BrowserCrash => self.launch(),
            FailureClassification::PageNavigationTimeout => self.navigation(),
            FailureClassification::ElementNotFound => self.selector(),
            FailureClassification::ScreenshotFailure => self.screenshot(),
            FailureClassification::BrowserInstallHang | FailureClassification::Unknown => self.navigation(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_url.trim().is_empty() {
            return Err(Error::InvalidConfig("target_url must not be empty".into()));
        }
        if self.test_scenarios.is_empty() {
            return Err(Error::InvalidConfig("test_scenarios must not be empty".into()));
        }
        if self.browsers.is_empty() {
            return Err(Error::InvalidConfig("browsers must not be empty".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries must be at least 1".into()));
        }
        // Results and report files are keyed by name, so repeats would collide.
        let mut seen = HashSet::new();
        if let Some(name) = self.test_scenarios.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(Error::InvalidConfig(format!("scenario listed more than once: {}", name)));
        }
        let mut seen = HashSet::new();
        if let Some(engine) = self.browsers.iter().find(|engine| !seen.insert(**engine)) {
            return Err(Error::InvalidConfig(format!("browser listed more than once: {}", engine)));
        }
        self.launch_retry.validate()
    }

    /// Install cache: explicit override, else `PLAYWRIGHT_BROWSERS_PATH`,
    /// else the platform cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.install_cache_dir
            .clone()
            .unwrap_or_else(autoheal_common::default_install_cache)
    }

    pub fn scenario_backoff_step(&self) -> Duration {
        Duration::from_millis(self.scenario_backoff_step_ms)
    }

    /// Invocation parameters as echoed in the run report.
    pub fn echo(&self) -> RunConfigEcho {
        RunConfigEcho {
            target_url: self.target_url.clone(),
            test_scenarios: self.test_scenarios.clone(),
            browsers: self.browsers.clone(),
            max_retries: self.max_retries,
            generate_report: self.generate_report,
        }
    }
}
