//! Browser driver boundary
//!
//! The orchestrator never talks to a browser directly; everything goes
//! through [`BrowserDriver`]. Every call that can block carries an explicit
//! timeout.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use autoheal_common::{BrowserHandle, Engine, Error, PageHandle, Result};
use serde::{Deserialize, Serialize};

/// Chromium switches applied to every launch. Sandboxing off, background
/// throttling off.
pub const DEFAULT_LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
];

/// Options for a single browser launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub engine: Engine,
    pub headless: bool,
    pub args: Vec<String>,
    /// `None` means a fresh throwaway profile.
    pub user_data_dir: Option<PathBuf>,
    /// Playwright channel for the managed path, e.g. `chrome`.
    pub channel: Option<String>,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl LaunchOptions {
    /// Fixed defaults for `engine`.
    pub fn defaults(engine: Engine, timeout: Duration) -> Self {
        let args = match engine {
            Engine::Chromium => DEFAULT_LAUNCH_ARGS.iter().map(|a| a.to_string()).collect(),
            Engine::Firefox | Engine::Webkit => Vec::new(),
        };
        Self {
            engine,
            headless: true,
            args,
            user_data_dir: None,
            channel: None,
            timeout,
        }
    }

    /// Merge caller overrides on top of `self`. Extra args are appended and
    /// de-duplicated.
    pub fn merged(mut self, overrides: &LaunchOverrides) -> Self {
        if let Some(headless) = overrides.headless {
            self.headless = headless;
        }
        for arg in &overrides.extra_args {
            if !self.args.contains(arg) {
                self.args.push(arg.clone());
            }
        }
        if let Some(dir) = &overrides.user_data_dir {
            self.user_data_dir = Some(dir.clone());
        }
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        self
    }
}

/// Caller-supplied launch overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
    pub extra_args: Vec<String>,
    pub user_data_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Measured page and viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDimensions {
    pub page_width: u32,
    pub page_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub clip: Option<Clip>,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl ScreenshotOptions {
    pub fn viewport(timeout: Duration) -> Self {
        Self {
            full_page: false,
            clip: None,
            timeout,
        }
    }
}

/// Capabilities consumed from the external browser engine.
///
/// `launch`, `new_page`, `navigate` and `screenshot` are the core boundary.
/// The remaining methods are the page-level calls recovery handlers and
/// scenario bodies need.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Whether a managed automation channel can be tried before a direct launch.
    fn supports_managed_channel(&self) -> bool {
        false
    }

    async fn launch_managed(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        let _ = options;
        Err(Error::Driver("managed channel not available".into()))
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<BrowserHandle>;

    async fn close(&self, browser: &BrowserHandle) -> Result<()>;

    async fn new_page(&self, browser: &BrowserHandle) -> Result<PageHandle>;

    async fn navigate(&self, page: &PageHandle, url: &str, timeout: Duration) -> Result<()>;

    async fn screenshot(&self, page: &PageHandle, options: &ScreenshotOptions) -> Result<Vec<u8>>;

    async fn ready_state(&self, page: &PageHandle) -> Result<ReadyState>;

    async fn current_url(&self, page: &PageHandle) -> Result<String>;

    async fn reload(&self, page: &PageHandle, timeout: Duration) -> Result<()>;

    async fn wait_for_load_state(
        &self,
        page: &PageHandle,
        state: LoadState,
        timeout: Duration,
    ) -> Result<()>;

    async fn wait_for_selector(&self, page: &PageHandle, selector: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, page: &PageHandle, selector: &str, timeout: Duration) -> Result<()>;

    async fn fill(&self, page: &PageHandle, selector: &str, value: &str, timeout: Duration) -> Result<()>;

    async fn count(&self, page: &PageHandle, selector: &str) -> Result<usize>;

    async fn page_dimensions(&self, page: &PageHandle) -> Result<PageDimensions>;

    async fn set_viewport(&self, page: &PageHandle, viewport: Viewport) -> Result<()>;

    /// Resolve once every `<img>` on the page finished loading or `timeout` passed.
    async fn wait_for_images(&self, page: &PageHandle, timeout: Duration) -> Result<()>;
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chromium_defaults_disable_sandbox_and_throttling() {
        let options = LaunchOptions::defaults(Engine::Chromium, Duration::from_secs(30));
        assert!(options.args.iter().any(|a| a == "--no-sandbox"));
        assert!(options.args.iter().any(|a| a == "--disable-background-timer-throttling"));
        assert!(options.user_data_dir.is_none());
        assert!(options.headless);
    }

    #[test]
    fn test_overrides_merge_without_duplicates() {
        let overrides = LaunchOverrides {
            headless: Some(false),
            extra_args: vec!["--no-sandbox".into(), "--lang=en-US".into()],
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let options = LaunchOptions::defaults(Engine::Chromium, Duration::from_secs(30)).merged(&overrides);
        assert!(!options.headless);
        assert_eq!(options.args.iter().filter(|a| *a == "--no-sandbox").count(), 1);
        assert_eq!(options.args.last().map(String::as_str), Some("--lang=en-US"));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_state_wire_names() {
        assert_eq!(serde_json::to_string(&LoadState::NetworkIdle).unwrap(), "\"networkidle\"");
        assert_eq!(
            serde_json::to_string(&LoadState::DomContentLoaded).unwrap(),
            "\"domcontentloaded\""
        );
    }
}
