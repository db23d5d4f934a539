//! CLI subcommands

pub mod install;
pub mod run;
pub mod validate;

use std::path::PathBuf;

use autoheal_common::Engine;
use autoheal_orchestrator::{OrchestratorConfig, PlaywrightConfig};
use clap::Args;

/// Playwright channel used for the managed launch path
pub const MANAGED_CHANNEL: &str = "chrome";

/// Where the Node.js side of the driver lives
#[derive(Args, Debug, Clone)]
pub struct DriverArgs {
    /// Node.js executable used for the Playwright bridge
    #[arg(long, env = "AUTOHEAL_NODE", default_value = "node", global = true)]
    pub node: PathBuf,

    /// Directory whose node_modules contains playwright
    #[arg(long, env = "AUTOHEAL_PROJECT_DIR", default_value = ".", global = true)]
    pub project_dir: PathBuf,
}

impl DriverArgs {
    pub fn playwright_config(&self, managed: bool) -> PlaywrightConfig {
        PlaywrightConfig {
            node_binary: self.node.clone(),
            project_dir: self.project_dir.clone(),
            managed_channel: managed.then(|| MANAGED_CHANNEL.to_string()),
        }
    }
}

/// Engine selection shared by `validate` and `install`
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Engines to check (repeatable); defaults to the configured browsers
    #[arg(short, long = "browser")]
    pub browsers: Vec<Engine>,

    /// Override of the Playwright install cache
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

impl EngineArgs {
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if !self.browsers.is_empty() {
            config.browsers = self.browsers.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.install_cache_dir = Some(dir.clone());
        }
    }
}
