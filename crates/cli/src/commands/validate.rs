//! Validate Command

use anyhow::Result;
use autoheal_orchestrator::{EnvironmentValidator, OrchestratorConfig, PlaywrightDriver};
use clap::Args;

use super::{DriverArgs, EngineArgs};
use crate::output::{print_info, print_item, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub engines: EngineArgs,

    /// Also ask Playwright for its version
    #[arg(long)]
    pub probe: bool,
}

/// Print the installation snapshot for each engine. Returns whether every
/// engine is usable.
pub async fn execute(
    args: ValidateArgs,
    mut config: OrchestratorConfig,
    driver: &DriverArgs,
    format: OutputFormat,
) -> Result<bool> {
    args.engines.apply(&mut config);
    let cache = config.cache_dir();
    if format == OutputFormat::Table {
        print_info(&format!("Install cache: {}", cache.display()));
    }

    let mut usable = true;
    for engine in &config.browsers {
        let snapshot = EnvironmentValidator::new(&cache, *engine).validate();
        if format == OutputFormat::Table {
            println!("{}", engine);
        }
        usable &= snapshot.is_usable();
        print_item(&snapshot, format);
    }

    if args.probe {
        let driver = PlaywrightDriver::new(driver.playwright_config(false));
        match driver.probe_version().await {
            Ok(version) => print_info(&format!("Playwright {}", version)),
            Err(e) => print_warning(&e.to_string()),
        }
    }
    Ok(usable)
}
