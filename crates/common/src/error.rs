//! Error types for autoheal
//!
//! The Display text of the transient variants is load-bearing: the failure
//! classifier works on rendered messages, so each variant renders the
//! keywords of the classification it belongs to.

use thiserror::Error;

/// Result type alias using the autoheal Error
pub type Result<T> = std::result::Result<T, Error>;

/// autoheal error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Automation engine not installed (searched: {})", searched.join(", "))]
    EngineNotInstalled { searched: Vec<String> },

    #[error("Install error: {0}")]
    Install(String),

    #[error("Engine install did not finish within {seconds}s")]
    InstallTimeout { seconds: u64 },

    #[error("Insufficient disk space: {available_mb} MB available")]
    DiskSpace { available_mb: u64 },

    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Browser launch timeout after {timeout_ms} ms")]
    LaunchTimeout { timeout_ms: u64 },

    #[error("Navigation timeout of {timeout_ms} ms exceeded loading {url}")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("Element not found: {selector} (waited {waited_ms} ms)")]
    ElementNotFound { selector: String, waited_ms: u64 },

    #[error("Screenshot capture failed: {0}")]
    Screenshot(String),

    #[error("Browser crash: {0}")]
    BrowserCrashed(String),

    #[error("Operation exceeded its deadline: {0}")]
    Timeout(String),

    #[error("Browser launch failed: {original}; recovery failed: {recovery}")]
    LaunchFailed { original: String, recovery: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration errors are fatal and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownScenario(_) | Error::InvalidConfig(_) | Error::ConfigParse(_)
        )
    }

    /// Selector the failure refers to, if any.
    pub fn selector(&self) -> Option<&str> {
        match self {
            Error::ElementNotFound { selector, .. } => Some(selector),
            _ => None,
        }
    }

    /// URL the failure refers to, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            Error::NavigationTimeout { url, .. } => Some(url),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(Error::UnknownScenario("checkout".into()).is_configuration());
        assert!(Error::InvalidConfig("empty".into()).is_configuration());
        assert!(!Error::LaunchTimeout { timeout_ms: 1 }.is_configuration());
    }

    #[test]
    fn test_launch_failed_keeps_both_errors() {
        let err = Error::LaunchFailed {
            original: "Browser launch timeout after 30000 ms".into(),
            recovery: "relaunch refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("30000 ms"));
        assert!(msg.contains("relaunch refused"));
    }

    #[test]
    fn test_not_installed_lists_versions() {
        let err = Error::EngineNotInstalled {
            searched: vec!["chromium-1091".into(), "chromium-1084".into()],
        };
        assert_eq!(
            err.to_string(),
            "Automation engine not installed (searched: chromium-1091, chromium-1084)"
        );
    }
}
