//! autoheal common library
//!
//! Shared data model and error types for the autoheal orchestrator.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// autoheal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the Playwright install cache
pub const BROWSERS_PATH_ENV: &str = "PLAYWRIGHT_BROWSERS_PATH";

/// Deterministic install-cache location used by the engine installer
pub fn default_install_cache() -> std::path::PathBuf {
    if let Some(path) = std::env::var_os(BROWSERS_PATH_ENV).filter(|p| !p.is_empty()) {
        return std::path::PathBuf::from(path);
    }
    let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    if cfg!(target_os = "macos") {
        home.join("Library").join("Caches").join("ms-playwright")
    } else {
        home.join(".cache").join("ms-playwright")
    }
}

/// Default directory for run reports
pub fn default_report_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("test-results")
}

/// Default directory for crash records
pub fn default_crash_dir() -> std::path::PathBuf {
    default_report_dir().join("crashes")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
