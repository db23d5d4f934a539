//! Install Command

use std::sync::Arc;

use anyhow::Result;
use autoheal_orchestrator::{EnvironmentValidator, OrchestratorConfig, SafeInstaller, SystemHost};
use clap::Args;

use super::EngineArgs;
use crate::output::{print_item, OutputFormat};

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub engines: EngineArgs,

    /// Reinstall even when a usable engine is present
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: InstallArgs, mut config: OrchestratorConfig, format: OutputFormat) -> Result<bool> {
    args.engines.apply(&mut config);
    let cache = config.cache_dir();
    let host = Arc::new(SystemHost::new(config.network_probe_url.clone()));

    let mut ok = true;
    for engine in &config.browsers {
        // An explicit install never honours the skip switch.
        let installer = SafeInstaller::new(host.clone(), EnvironmentValidator::new(&cache, *engine))
            .with_skip(Some(false))
            .with_network_timeout(config.timeouts.network_probe());
        let result = if args.force {
            installer.reinstall().await
        } else {
            installer.install_safely().await
        };
        if format == OutputFormat::Table {
            println!("{}", engine);
        }
        ok &= result.status.is_ok();
        print_item(&result, format);
    }
    Ok(ok)
}
