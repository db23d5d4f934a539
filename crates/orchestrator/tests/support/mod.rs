//! Scripted fakes of the browser driver and the host for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoheal_common::{BrowserHandle, Engine, Error, PageHandle, Result};
use autoheal_orchestrator::driver::{
    BrowserDriver, LaunchOptions, LoadState, PageDimensions, ReadyState, ScreenshotOptions, Viewport,
};
use autoheal_orchestrator::host::HostOps;
use autoheal_orchestrator::OrchestratorConfig;
use parking_lot::Mutex;

pub const TARGET: &str = "http://localhost:5173";

/// What the scripted driver does. Counters are decremented as failures fire.
#[derive(Debug, Clone)]
pub struct DriverScript {
    /// Direct launches that fail before one succeeds; `u32::MAX` fails forever.
    pub launch_failures: u32,
    pub managed_channel: bool,
    pub managed_fails: bool,
    pub navigation_failures: u32,
    pub navigation_crashes: u32,
    pub screenshot_failures: u32,
    pub ready_state: ReadyState,
    /// Selectors that never match
    pub missing_selectors: Vec<String>,
    /// How long a missing selector takes to fail, capped by the call timeout
    pub selector_delay: Option<Duration>,
    pub dimensions: PageDimensions,
    pub nav_links: usize,
}

impl Default for DriverScript {
    fn default() -> Self {
        Self {
            launch_failures: 0,
            managed_channel: false,
            managed_fails: false,
            navigation_failures: 0,
            navigation_crashes: 0,
            screenshot_failures: 0,
            ready_state: ReadyState::Complete,
            missing_selectors: Vec::new(),
            selector_delay: None,
            dimensions: PageDimensions {
                page_width: 1280,
                page_height: 4000,
                viewport_width: 1280,
                viewport_height: 720,
            },
            nav_links: 3,
        }
    }
}

/// Everything the scripted driver observed
#[derive(Debug, Default, Clone)]
pub struct DriverLog {
    pub launches: u32,
    pub managed_launches: u32,
    pub launched: Vec<BrowserHandle>,
    pub closed: Vec<String>,
    pub pages: Vec<PageHandle>,
    pub navigations: Vec<String>,
    pub reloads: u32,
    pub probed_selectors: Vec<String>,
    /// Timeout passed with each `wait_for_selector` call
    pub probe_timeouts: Vec<Duration>,
    pub viewports: Vec<Viewport>,
    pub screenshots: Vec<ScreenshotOptions>,
}

#[derive(Default)]
pub struct ScriptedDriver {
    script: Mutex<DriverScript>,
    log: Mutex<DriverLog>,
    next_id: Mutex<u32>,
}

impl ScriptedDriver {
    pub fn new(script: DriverScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn log(&self) -> DriverLog {
        self.log.lock().clone()
    }

    pub fn script(&self) -> parking_lot::MutexGuard<'_, DriverScript> {
        self.script.lock()
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut id = self.next_id.lock();
        *id += 1;
        format!("{}{}", prefix, *id)
    }

    fn check_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.log.lock().probed_selectors.push(selector.to_string());
        if self.script.lock().missing_selectors.iter().any(|s| s == selector) {
            return Err(Error::ElementNotFound {
                selector: selector.to_string(),
                waited_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn handle(&self, options: &LaunchOptions, managed: bool) -> BrowserHandle {
        let browser = BrowserHandle {
            id: self.next_id("b"),
            engine: options.engine,
            managed,
        };
        self.log.lock().launched.push(browser.clone());
        browser
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    fn supports_managed_channel(&self) -> bool {
        self.script.lock().managed_channel
    }

    async fn launch_managed(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        self.log.lock().managed_launches += 1;
        if self.script.lock().managed_fails {
            return Err(Error::Driver("chrome channel is not installed".into()));
        }
        Ok(self.handle(options, true))
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        self.log.lock().launches += 1;
        {
            let mut script = self.script.lock();
            if script.launch_failures > 0 {
                if script.launch_failures != u32::MAX {
                    script.launch_failures -= 1;
                }
                return Err(Error::LaunchTimeout {
                    timeout_ms: options.timeout.as_millis() as u64,
                });
            }
        }
        Ok(self.handle(options, false))
    }

    async fn close(&self, browser: &BrowserHandle) -> Result<()> {
        self.log.lock().closed.push(browser.id.clone());
        Ok(())
    }

    async fn new_page(&self, browser: &BrowserHandle) -> Result<PageHandle> {
        let page = PageHandle {
            id: self.next_id("p"),
            browser_id: browser.id.clone(),
        };
        self.log.lock().pages.push(page.clone());
        Ok(page)
    }

    async fn navigate(&self, _page: &PageHandle, url: &str, timeout: Duration) -> Result<()> {
        self.log.lock().navigations.push(url.to_string());
        let mut script = self.script.lock();
        if script.navigation_crashes > 0 {
            script.navigation_crashes -= 1;
            return Err(Error::BrowserCrashed("Target closed".into()));
        }
        if script.navigation_failures > 0 {
            script.navigation_failures -= 1;
            return Err(Error::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn screenshot(&self, _page: &PageHandle, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        self.log.lock().screenshots.push(options.clone());
        let mut script = self.script.lock();
        if script.screenshot_failures > 0 {
            script.screenshot_failures -= 1;
            return Err(Error::Screenshot("Cannot take screenshot larger than 32767 pixels".into()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn ready_state(&self, _page: &PageHandle) -> Result<ReadyState> {
        Ok(self.script.lock().ready_state)
    }

    async fn current_url(&self, _page: &PageHandle) -> Result<String> {
        Ok(self
            .log
            .lock()
            .navigations
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn reload(&self, _page: &PageHandle, _timeout: Duration) -> Result<()> {
        self.log.lock().reloads += 1;
        self.script.lock().ready_state = ReadyState::Complete;
        Ok(())
    }

    async fn wait_for_load_state(&self, _page: &PageHandle, _state: LoadState, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn wait_for_selector(&self, _page: &PageHandle, selector: &str, timeout: Duration) -> Result<()> {
        self.log.lock().probe_timeouts.push(timeout);
        let delay = {
            let script = self.script.lock();
            let missing = script.missing_selectors.iter().any(|s| s == selector);
            script.selector_delay.filter(|_| missing)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay.min(timeout)).await;
        }
        self.check_selector(selector, timeout)
    }

    async fn click(&self, _page: &PageHandle, selector: &str, timeout: Duration) -> Result<()> {
        self.check_selector(selector, timeout)
    }

    async fn fill(&self, _page: &PageHandle, selector: &str, _value: &str, timeout: Duration) -> Result<()> {
        self.check_selector(selector, timeout)
    }

    async fn count(&self, _page: &PageHandle, selector: &str) -> Result<usize> {
        if self.script.lock().missing_selectors.iter().any(|s| s == selector) {
            return Ok(0);
        }
        Ok(self.script.lock().nav_links)
    }

    async fn page_dimensions(&self, _page: &PageHandle) -> Result<PageDimensions> {
        Ok(self.script.lock().dimensions)
    }

    async fn set_viewport(&self, _page: &PageHandle, viewport: Viewport) -> Result<()> {
        self.log.lock().viewports.push(viewport);
        Ok(())
    }

    async fn wait_for_images(&self, _page: &PageHandle, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallBehavior {
    /// Install succeeds and leaves an executable engine in the cache.
    PlaceBinary,
    /// Install command exits non-zero.
    Fail,
    /// First install hangs; the forced retry succeeds.
    HangThenRecover,
    /// Every install hangs.
    Hang,
}

#[derive(Debug, Default, Clone)]
pub struct HostLog {
    /// One entry per install command, holding its force flag
    pub installs: Vec<bool>,
    pub killed: Vec<String>,
    pub temp_cleanups: Vec<String>,
    pub partial_cleanups: u32,
    pub network_probes: u32,
}

pub struct FakeHost {
    cache: PathBuf,
    engine: Engine,
    network: bool,
    free_mb: u64,
    behavior: InstallBehavior,
    log: Mutex<HostLog>,
}

impl FakeHost {
    pub fn new(cache: &Path, behavior: InstallBehavior) -> Arc<Self> {
        Arc::new(Self {
            cache: cache.to_path_buf(),
            engine: Engine::Chromium,
            network: true,
            free_mb: 10_000,
            behavior,
            log: Mutex::new(HostLog::default()),
        })
    }

    pub fn offline(cache: &Path) -> Arc<Self> {
        Arc::new(Self {
            cache: cache.to_path_buf(),
            engine: Engine::Chromium,
            network: false,
            free_mb: 10_000,
            behavior: InstallBehavior::PlaceBinary,
            log: Mutex::new(HostLog::default()),
        })
    }

    pub fn log(&self) -> HostLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl HostOps for FakeHost {
    async fn free_disk_mb(&self, _path: &Path) -> Result<u64> {
        Ok(self.free_mb)
    }

    async fn network_reachable(&self, _timeout: Duration) -> bool {
        self.log.lock().network_probes += 1;
        self.network
    }

    async fn run_install(&self, engine: Engine, timeout: Duration, force: bool) -> Result<String> {
        let call = {
            let mut log = self.log.lock();
            log.installs.push(force);
            log.installs.len()
        };
        match self.behavior {
            InstallBehavior::PlaceBinary => {
                place_engine(&self.cache, engine);
                Ok(format!("{} downloaded", engine))
            }
            InstallBehavior::Fail => Err(Error::Install("install exited with exit status: 1".into())),
            InstallBehavior::HangThenRecover if call > 1 => {
                place_engine(&self.cache, self.engine);
                Ok(format!("{} downloaded after retry", engine))
            }
            InstallBehavior::HangThenRecover | InstallBehavior::Hang => Err(Error::InstallTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn kill_processes(&self, pattern: &str) -> Result<()> {
        self.log.lock().killed.push(pattern.to_string());
        Ok(())
    }

    async fn remove_temp_dirs(&self, prefix: &str) -> Result<usize> {
        self.log.lock().temp_cleanups.push(prefix.to_string());
        Ok(0)
    }

    async fn remove_partial_downloads(&self, _cache_dir: &Path, _engine: Engine) -> Result<usize> {
        self.log.lock().partial_cleanups += 1;
        Ok(0)
    }
}

/// Put an executable engine binary at the newest known revision.
pub fn place_engine(cache: &Path, engine: Engine) -> PathBuf {
    let path = cache
        .join(engine.known_versions()[0])
        .join(engine.executable_path());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "#!/bin/sh\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Config pointing every directory at `root`, install switch forced off.
pub fn config(root: &Path, scenarios: &[&str]) -> OrchestratorConfig {
    OrchestratorConfig {
        target_url: TARGET.to_string(),
        test_scenarios: scenarios.iter().map(|s| s.to_string()).collect(),
        install_cache_dir: Some(root.join("cache")),
        report_dir: root.join("reports"),
        crash_dir: root.join("crashes"),
        skip_install: Some(false),
        ..Default::default()
    }
}
