//! Scenario execution engine
//!
//! An [`OrchestratorRun`] is built per invocation and per engine, consumed by
//! [`OrchestratorRun::execute`]. Flow: resolve scenarios, validate the
//! environment (installing if needed), launch one browser, run each scenario
//! under its own attempt loop, then close the browser and finalize the report.

use std::sync::Arc;
use std::time::Instant;

use autoheal_common::{Engine, Error, PageHandle, Result, RunReport, ScenarioResult};
use tracing::{error, info, warn};

use crate::classify::classify;
use crate::config::OrchestratorConfig;
use crate::crash::CrashLog;
use crate::driver::{BrowserDriver, LaunchOptions};
use crate::host::HostOps;
use crate::installer::SafeInstaller;
use crate::launcher::LaunchController;
use crate::recovery::{RecoveryContext, RecoveryDispatcher, RecoveryPayload};
use crate::report::ReportBuilder;
use crate::retry::{Attempts, Backoff};
use crate::scenario::{Scenario, ScenarioContext, ScenarioOutcome, ScenarioRegistry};
use crate::session::BrowserSession;
use crate::validator::EnvironmentValidator;

/// One orchestrator invocation against a single engine
pub struct OrchestratorRun {
    config: OrchestratorConfig,
    engine: Engine,
    driver: Arc<dyn BrowserDriver>,
    registry: ScenarioRegistry,
    validator: EnvironmentValidator,
    installer: SafeInstaller,
    launcher: LaunchController,
    dispatcher: RecoveryDispatcher,
    report: ReportBuilder,
}

impl OrchestratorRun {
    pub fn new(
        config: OrchestratorConfig,
        engine: Engine,
        driver: Arc<dyn BrowserDriver>,
        host: Arc<dyn HostOps>,
        registry: ScenarioRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let validator = EnvironmentValidator::new(config.cache_dir(), engine);
        let installer = SafeInstaller::new(host.clone(), validator.clone())
            .with_skip(config.skip_install)
            .with_network_timeout(config.timeouts.network_probe());

        let mut defaults = LaunchOptions::defaults(engine, config.timeouts.launch());
        defaults.headless = config.headless;
        let launcher = LaunchController::new(driver.clone(), config.launch_retry, defaults)
            .with_managed_channel(config.use_managed_channel);

        let dispatcher = RecoveryDispatcher::new(
            driver.clone(),
            host,
            installer.clone(),
            launcher.clone(),
            CrashLog::new(&config.crash_dir),
        );
        let report = ReportBuilder::new(engine, config.echo());

        Ok(Self {
            config,
            engine,
            driver,
            registry,
            validator,
            installer,
            launcher,
            dispatcher,
            report,
        })
    }

    pub fn run_id(&self) -> &str {
        self.report.run_id()
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Execute the run. Only configuration errors are returned as `Err`, and
    /// they are raised before any browser work; everything else ends up in
    /// the report.
    pub async fn execute(mut self) -> Result<RunReport> {
        let scenarios = self.registry.resolve(&self.config.test_scenarios)?;
        info!(
            run_id = %self.report.run_id(),
            engine = %self.engine,
            target = %self.config.target_url,
            scenarios = scenarios.len(),
            "Starting orchestrator run"
        );

        self.prepare_environment().await;

        let mut session = BrowserSession::new(self.driver.clone());
        self.drive(&mut session, &scenarios).await;
        session.close().await;

        Ok(self.report.finalize())
    }

    /// Validate, then install when the engine is unusable. A failed install
    /// is recorded but does not stop the run.
    async fn prepare_environment(&mut self) {
        let snapshot = self.validator.validate();
        if snapshot.is_usable() {
            self.report.set_installation(snapshot);
            return;
        }

        info!(status = ?snapshot.status, "Engine not usable; running safe install");
        let install = self.installer.install_safely().await;
        if install.status.is_ok() {
            info!(status = ?install.status, "Engine install finished");
        } else {
            warn!(
                error = install.error.as_deref().unwrap_or(""),
                hint = install.hint.as_deref().unwrap_or(""),
                "Engine install failed; trying to launch anyway"
            );
        }
        self.report.set_install(install);
        self.report.set_installation(self.validator.validate());
    }

    async fn drive(&mut self, session: &mut BrowserSession, scenarios: &[(String, Arc<dyn Scenario>)]) {
        let options = self.launcher.default_options();
        match self.launcher.launch(&options, &self.dispatcher).await {
            Ok(launched) => {
                if let Some(outcome) = &launched.recovery {
                    self.report.record_recovery(outcome);
                }
                session.attach(launched.browser);
            }
            Err(failure) => {
                error!("Browser could not be launched; aborting run: {}", failure.error);
                self.report.record_recovery(&failure.recovery);
                self.report.set_critical_error(&failure.error);
                return;
            }
        }

        for (name, scenario) in scenarios {
            let result = self.run_scenario(session, name, scenario.as_ref()).await;
            if result.is_passed() {
                info!(scenario = %name, attempts = result.attempts, "Scenario passed");
            } else {
                warn!(scenario = %name, attempts = result.attempts, "Scenario failed");
            }
            self.report.record_result(result);
        }
    }

    async fn run_scenario(&mut self, session: &mut BrowserSession, name: &str, scenario: &dyn Scenario) -> ScenarioResult {
        let started = Instant::now();
        let attempts = Attempts::new(
            self.config.max_retries,
            Backoff::Linear {
                step: self.config.scenario_backoff_step(),
            },
        );
        let mut page: Option<PageHandle> = None;
        let mut last_error: Option<Error> = None;
        let mut used = 0;

        for attempt in attempts {
            used = attempt.number;
            info!(scenario = %name, attempt = attempt.number, max = attempt.max, "Running scenario");
            match self.attempt_scenario(session, &mut page, name, scenario).await {
                Ok(outcome) => {
                    return ScenarioResult::passed(name, attempt.number, started.elapsed(), outcome.steps);
                }
                Err(e) => {
                    warn!(scenario = %name, attempt = attempt.number, "Scenario attempt failed: {}", e);
                    self.report.record_error(name, &e);
                    if !attempt.is_last() {
                        self.recover(session, &mut page, &e).await;
                        attempt.backoff().await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let message = last_error.map(|e| e.to_string()).unwrap_or_default();
        ScenarioResult::failed(name, used, started.elapsed(), message)
    }

    /// One attempt: reuse the scenario's page, opening it on first use or
    /// after the browser was replaced.
    async fn attempt_scenario(
        &self,
        session: &BrowserSession,
        page: &mut Option<PageHandle>,
        name: &str,
        scenario: &dyn Scenario,
    ) -> Result<ScenarioOutcome> {
        if page.is_none() {
            *page = Some(session.new_page().await?);
        }
        let page = page
            .as_ref()
            .ok_or_else(|| Error::Internal("scenario page missing".into()))?;
        let ctx = ScenarioContext {
            driver: self.driver.as_ref(),
            page,
            target_url: &self.config.target_url,
            timeouts: &self.config.timeouts,
        };
        let limit = self.config.timeouts.scenario();
        match tokio::time::timeout(limit, scenario.run(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "scenario {} exceeded {} ms",
                name,
                limit.as_millis()
            ))),
        }
    }

    async fn recover(&mut self, session: &mut BrowserSession, page: &mut Option<PageHandle>, error: &Error) {
        let classification = classify(error);
        let ctx = RecoveryContext::from_error(error, self.config.timeouts.for_recovery(classification))
            .with_page(page.clone())
            .with_target_url(&self.config.target_url)
            .with_launch_options(self.launcher.default_options());
        let outcome = self.dispatcher.recover(classification, &ctx).await;
        self.report.record_recovery(&outcome);

        if let RecoveryPayload::Browser(browser) = &outcome.payload {
            session.replace(browser.clone()).await;
            *page = None;
        }
    }
}
