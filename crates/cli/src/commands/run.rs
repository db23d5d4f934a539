//! Run Command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use autoheal_common::Engine;
use autoheal_orchestrator::{
    write_report, OrchestratorConfig, OrchestratorRun, PlaywrightDriver, ScenarioRegistry, SystemHost,
};
use clap::Args;
use tracing::{info, warn};

use super::DriverArgs;
use crate::output::{print_info, print_report, print_success, print_warning, OutputFormat};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Base URL of the application under test
    #[arg(long, env = "AUTOHEAL_TARGET_URL")]
    pub target_url: Option<String>,

    /// Scenario to run (repeatable, runs in the given order)
    #[arg(short, long = "scenario")]
    pub scenarios: Vec<String>,

    /// Engine to run against (repeatable)
    #[arg(short, long = "browser")]
    pub browsers: Vec<Engine>,

    /// Total attempts per scenario
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Skip the engine install step entirely
    #[arg(long)]
    pub skip_install: bool,

    /// Directory for run reports
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Do not write report files
    #[arg(long)]
    pub no_report: bool,

    /// Try the installed Chrome channel before the bundled engine
    #[arg(long)]
    pub managed_channel: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

impl RunArgs {
    /// Fold command-line overrides into the file configuration.
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(url) = &self.target_url {
            config.target_url = url.clone();
        }
        if !self.scenarios.is_empty() {
            config.test_scenarios = self.scenarios.clone();
        }
        if !self.browsers.is_empty() {
            config.browsers = self.browsers.clone();
        }
        if let Some(max) = self.max_retries {
            config.max_retries = max;
        }
        if self.skip_install {
            config.skip_install = Some(true);
        }
        if let Some(dir) = &self.report_dir {
            config.crash_dir = dir.join("crashes");
            config.report_dir = dir.clone();
        }
        if self.no_report {
            config.generate_report = false;
        }
        if self.managed_channel {
            config.use_managed_channel = true;
        }
        if self.headed {
            config.headless = false;
        }
    }
}

/// One independent orchestrator run per engine. Returns whether every run
/// passed completely.
pub async fn execute(
    args: RunArgs,
    mut config: OrchestratorConfig,
    driver_args: &DriverArgs,
    format: OutputFormat,
) -> Result<bool> {
    args.apply(&mut config);
    config.validate()?;

    let mut all_passed = true;
    for engine in config.browsers.clone() {
        let driver = Arc::new(PlaywrightDriver::new(
            driver_args.playwright_config(config.use_managed_channel),
        ));
        let host = Arc::new(SystemHost::new(config.network_probe_url.clone()));

        let run = OrchestratorRun::new(
            config.clone(),
            engine,
            driver.clone(),
            host,
            ScenarioRegistry::with_builtins(),
        )?;
        info!(run_id = %run.run_id(), engine = %engine, "Starting run");

        let result = run.execute().await;
        driver.shutdown().await;
        let report = result?;

        print_report(&report, format);
        if config.generate_report {
            match write_report(&report, &config.report_dir)
                .with_context(|| format!("writing report to {}", config.report_dir.display()))
            {
                Ok(path) if format == OutputFormat::Table => {
                    print_info(&format!("Report written to {}", path.display()))
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Report not written");
                    print_warning(&format!("{:#}", e));
                }
            }
        }
        if report.all_passed() && format == OutputFormat::Table {
            print_success(&format!("{}: all scenarios passed", engine));
        }
        all_passed &= report.all_passed();
    }
    Ok(all_passed)
}
