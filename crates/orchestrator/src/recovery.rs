//! Recovery dispatch
//!
//! One handler per [`FailureClassification`]. Handlers never return errors:
//! every internal failure becomes a [`RecoveryOutcome`] with
//! `RecoveryStatus::RecoveryFailed`, so retry loops make a uniform decision
//! whichever handler ran.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use autoheal_common::{BrowserHandle, Engine, Error, FailureClassification, PageHandle, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::crash::{CrashLog, CrashRecord};
use crate::driver::{BrowserDriver, LaunchOptions, LoadState, ReadyState, ScreenshotOptions, Viewport};
use crate::host::{best_effort, HostOps};
use crate::installer::{SafeInstaller, HINT_MANUAL_INSTALL};
use crate::launcher::LaunchController;
use crate::selector;

/// Install timeout used when retrying a hung install
pub const RECOVERY_INSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line pattern of an in-flight engine install
pub const INSTALL_PROCESS_PATTERN: &str = "playwright install";

/// Largest viewport used for a retried screenshot
pub const SAFE_VIEWPORT: Viewport = Viewport {
    width: 1920,
    height: 1080,
};

pub const IMAGE_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor for per-selector probe timeouts
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    RecoverySuccess,
    RecoveryFailed,
    NoRecoveryAvailable,
}

impl RecoveryStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryStatus::RecoverySuccess)
    }
}

/// Strategy-specific result carried by a [`RecoveryOutcome`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPayload {
    None,
    /// A freshly launched browser; the caller takes ownership.
    Browser(BrowserHandle),
    InstallOutput(String),
    Url(String),
    Selector(String),
    AttemptedSelectors(Vec<String>),
    Screenshot(Vec<u8>),
}

/// What a recovery handler achieved
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub classification: FailureClassification,
    pub status: RecoveryStatus,
    pub payload: RecoveryPayload,
    pub error: Option<String>,
    pub hint: Option<String>,
}

impl RecoveryOutcome {
    pub fn success(classification: FailureClassification, payload: RecoveryPayload) -> Self {
        Self {
            classification,
            status: RecoveryStatus::RecoverySuccess,
            payload,
            error: None,
            hint: None,
        }
    }

    pub fn failed(classification: FailureClassification, error: impl Into<String>) -> Self {
        Self {
            classification,
            status: RecoveryStatus::RecoveryFailed,
            payload: RecoveryPayload::None,
            error: Some(error.into()),
            hint: None,
        }
    }

    pub fn unavailable(classification: FailureClassification) -> Self {
        Self {
            classification,
            status: RecoveryStatus::NoRecoveryAvailable,
            payload: RecoveryPayload::None,
            error: None,
            hint: None,
        }
    }

    pub fn with_payload(mut self, payload: RecoveryPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// A handler ran, whatever its result.
    pub fn was_attempted(&self) -> bool {
        self.status != RecoveryStatus::NoRecoveryAvailable
    }

    fn from_result(classification: FailureClassification, result: Result<RecoveryPayload>) -> Self {
        match result {
            Ok(payload) => Self::success(classification, payload),
            Err(e) => Self::failed(classification, e.to_string()),
        }
    }
}

/// Inputs a recovery handler may need
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    pub error: String,
    pub stack: Option<String>,
    pub page: Option<PageHandle>,
    pub target_url: Option<String>,
    pub selector: Option<String>,
    /// Budget of the call that failed; handlers split it between their steps.
    pub timeout: Duration,
    pub launch_options: Option<LaunchOptions>,
}

impl RecoveryContext {
    pub fn from_error(error: &Error, timeout: Duration) -> Self {
        Self {
            error: error.to_string(),
            stack: Some(format!("{:?}", error)),
            selector: error.selector().map(str::to_string),
            target_url: error.url().map(str::to_string),
            timeout,
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: Option<PageHandle>) -> Self {
        self.page = page;
        self
    }

    /// Keeps a URL already taken from the error.
    pub fn with_target_url(mut self, url: &str) -> Self {
        if self.target_url.is_none() {
            self.target_url = Some(url.to_string());
        }
        self
    }

    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch_options = Some(options);
        self
    }
}

/// Kill a hung install, drop partial downloads, then retry once with a
/// shorter timeout and the force flag.
pub async fn recover_install_hang(host: &dyn HostOps, cache_dir: &Path, engine: Engine) -> RecoveryOutcome {
    let class = FailureClassification::BrowserInstallHang;
    best_effort("kill in-flight install", host.kill_processes(INSTALL_PROCESS_PATTERN)).await;
    best_effort(
        "remove partial downloads",
        host.remove_partial_downloads(cache_dir, engine),
    )
    .await;

    match host.run_install(engine, RECOVERY_INSTALL_TIMEOUT, true).await {
        Ok(output) => {
            info!(engine = %engine, "Forced reinstall after hang succeeded");
            RecoveryOutcome::success(class, RecoveryPayload::InstallOutput(output))
        }
        Err(e) => {
            warn!(engine = %engine, "Forced reinstall after hang failed: {}", e);
            RecoveryOutcome::failed(class, e.to_string()).with_hint(HINT_MANUAL_INSTALL)
        }
    }
}

/// Routes a classified failure to its recovery handler
#[derive(Clone)]
pub struct RecoveryDispatcher {
    driver: Arc<dyn BrowserDriver>,
    host: Arc<dyn HostOps>,
    installer: SafeInstaller,
    launcher: LaunchController,
    crash_log: CrashLog,
}

impl RecoveryDispatcher {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        host: Arc<dyn HostOps>,
        installer: SafeInstaller,
        launcher: LaunchController,
        crash_log: CrashLog,
    ) -> Self {
        Self {
            driver,
            host,
            installer,
            launcher,
            crash_log,
        }
    }

    pub async fn recover(&self, classification: FailureClassification, ctx: &RecoveryContext) -> RecoveryOutcome {
        info!(classification = %classification, error = %ctx.error, "Dispatching recovery");
        let outcome = match classification {
            FailureClassification::BrowserLaunchTimeout => self.recover_launch_timeout(ctx).await,
            FailureClassification::BrowserInstallHang => {
                recover_install_hang(self.host.as_ref(), self.installer.cache_dir(), self.installer.engine()).await
            }
            FailureClassification::BrowserCrash => self.recover_crash(ctx).await,
            FailureClassification::PageNavigationTimeout => RecoveryOutcome::from_result(
                classification,
                self.recover_navigation(ctx).await,
            ),
            FailureClassification::ElementNotFound => self.recover_element(ctx).await,
            FailureClassification::ScreenshotFailure => RecoveryOutcome::from_result(
                classification,
                self.recover_screenshot(ctx).await,
            ),
            FailureClassification::Unknown => RecoveryOutcome::unavailable(classification),
        };

        match outcome.status {
            RecoveryStatus::RecoverySuccess => info!(classification = %classification, "Recovery succeeded"),
            RecoveryStatus::RecoveryFailed => warn!(
                classification = %classification,
                error = outcome.error.as_deref().unwrap_or(""),
                "Recovery failed"
            ),
            RecoveryStatus::NoRecoveryAvailable => {
                info!(classification = %classification, "No recovery handler for this failure")
            }
        }
        outcome
    }

    fn relaunch_options(&self, ctx: &RecoveryContext) -> LaunchOptions {
        ctx.launch_options
            .clone()
            .unwrap_or_else(|| self.launcher.default_options())
    }

    /// Kill strays, clean temp profiles, reinstall once, relaunch once. Only
    /// the relaunch decides the outcome.
    ///
    /// The reinstall is forced and skips the validator short-circuit: a binary
    /// that validates but never launches is treated as corrupt.
    async fn recover_launch_timeout(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let class = FailureClassification::BrowserLaunchTimeout;
        let engine = self.launcher.engine();

        best_effort("kill stray engine processes", self.host.kill_processes(engine.process_pattern())).await;
        best_effort(
            "remove temp profiles",
            self.host.remove_temp_dirs(engine.temp_profile_prefix()),
        )
        .await;
        best_effort("reinstall engine", async {
            let result = self.installer.reinstall().await;
            if result.status.is_ok() {
                Ok(result)
            } else {
                Err(Error::Install(result.error.unwrap_or_else(|| "reinstall failed".into())))
            }
        })
        .await;

        match self.launcher.launch_once(&self.relaunch_options(ctx)).await {
            Ok(browser) => RecoveryOutcome::success(class, RecoveryPayload::Browser(browser)),
            Err(e) => RecoveryOutcome::failed(class, e.to_string()),
        }
    }

    /// Record the crash, then launch one fresh browser without nested recovery.
    async fn recover_crash(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let class = FailureClassification::BrowserCrash;
        let record = CrashRecord::new(&ctx.error, ctx.target_url.clone(), ctx.stack.clone());
        best_effort("record crash", async { self.crash_log.record(&record) }).await;

        match self.launcher.launch_once(&self.relaunch_options(ctx)).await {
            Ok(browser) => RecoveryOutcome::success(class, RecoveryPayload::Browser(browser)),
            Err(e) => RecoveryOutcome::failed(class, e.to_string()),
        }
    }

    async fn recover_navigation(&self, ctx: &RecoveryContext) -> Result<RecoveryPayload> {
        let page = require_page(ctx)?;
        let half = ctx.timeout / 2;
        let rest = ctx.timeout.saturating_sub(half);

        let state = self.driver.ready_state(page).await?;
        if state != ReadyState::Complete {
            info!(state = ?state, "Page not settled; reloading");
            self.driver.reload(page, half).await?;
            self.driver.wait_for_load_state(page, LoadState::NetworkIdle, rest).await?;
        }
        let url = self.driver.current_url(page).await?;
        Ok(RecoveryPayload::Url(url))
    }

    async fn recover_element(&self, ctx: &RecoveryContext) -> RecoveryOutcome {
        let class = FailureClassification::ElementNotFound;
        let page = match require_page(ctx) {
            Ok(page) => page,
            Err(e) => return RecoveryOutcome::failed(class, e.to_string()),
        };
        let Some(original) = ctx.selector.as_deref() else {
            return RecoveryOutcome::failed(class, "no selector recorded for the failure");
        };
        let started = Instant::now();

        match self.driver.ready_state(page).await {
            Ok(ReadyState::Loading) => {
                best_effort(
                    "wait for DOMContentLoaded",
                    self.driver
                        .wait_for_load_state(page, LoadState::DomContentLoaded, ctx.timeout),
                )
                .await;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read document readiness: {}", e),
        }

        let alternatives = selector::alternatives(original);
        if alternatives.is_empty() {
            return RecoveryOutcome::failed(class, format!("no alternate selectors derivable from {}", original))
                .with_payload(RecoveryPayload::AttemptedSelectors(Vec::new()));
        }

        // Each probe gets an equal share with a floor; the floor never
        // stretches the total past the remaining budget.
        let remaining = ctx.timeout.saturating_sub(started.elapsed());
        let deadline = Instant::now() + remaining;
        let share = (remaining / alternatives.len() as u32).max(MIN_PROBE_TIMEOUT);
        let mut attempted = Vec::with_capacity(alternatives.len());
        for alternative in alternatives {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                debug!(selector = %alternative, "Recovery budget spent; skipping alternate selector");
                break;
            }
            let per_probe = share.min(left);
            match self.driver.wait_for_selector(page, &alternative, per_probe).await {
                Ok(()) => {
                    info!(original, matched = %alternative, "Alternate selector matched");
                    return RecoveryOutcome::success(class, RecoveryPayload::Selector(alternative));
                }
                Err(e) => {
                    warn!(selector = %alternative, "Alternate selector failed: {}", e);
                    attempted.push(alternative);
                }
            }
        }

        RecoveryOutcome::failed(class, format!("no alternate selector matched for {}", original))
            .with_payload(RecoveryPayload::AttemptedSelectors(attempted))
    }

    async fn recover_screenshot(&self, ctx: &RecoveryContext) -> Result<RecoveryPayload> {
        let page = require_page(ctx)?;

        if let Some(dims) = best_effort("measure page", self.driver.page_dimensions(page)).await {
            let viewport = clamp_viewport(dims.viewport_width, dims.viewport_height);
            info!(
                page_width = dims.page_width,
                page_height = dims.page_height,
                width = viewport.width,
                height = viewport.height,
                "Clamping viewport before retrying screenshot"
            );
            best_effort("set viewport", self.driver.set_viewport(page, viewport)).await;
        }
        best_effort(
            "wait for images",
            self.driver.wait_for_images(page, IMAGE_SETTLE_TIMEOUT),
        )
        .await;

        let bytes = self
            .driver
            .screenshot(page, &ScreenshotOptions::viewport(ctx.timeout))
            .await?;
        Ok(RecoveryPayload::Screenshot(bytes))
    }
}

fn require_page(ctx: &RecoveryContext) -> Result<&PageHandle> {
    ctx.page
        .as_ref()
        .ok_or_else(|| Error::Internal("recovery needs a page but none is open".into()))
}

/// Clamp to [`SAFE_VIEWPORT`]; a zero dimension takes the safe maximum.
pub fn clamp_viewport(width: u32, height: u32) -> Viewport {
    let clamp = |value: u32, max: u32| if value == 0 { max } else { value.min(max) };
    Viewport {
        width: clamp(width, SAFE_VIEWPORT.width),
        height: clamp(height, SAFE_VIEWPORT.height),
    }
}
