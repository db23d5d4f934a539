//! Playwright browser automation
//!
//! [`PlaywrightDriver`] implements [`BrowserDriver`] by running a small Node.js
//! bridge next to a Playwright install. The bridge reads one JSON request per
//! line on stdin and answers one JSON response per line on stdout:
//!
//! ```text
//! -> {"id": 7, "op": "navigate", "args": {"page": "p2", "url": "...", "timeout": 30000}}
//! <- {"id": 7, "ok": true, "result": null}
//! <- {"id": 8, "ok": false, "error": "Timeout 30000ms exceeded."}
//! ```
//!
//! Every request is also bounded on the Rust side. A response arriving after
//! its request timed out is skipped by id.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use autoheal_common::{BrowserHandle, Engine, Error, PageHandle, Result};
use base64::Engine as _;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{
    BrowserDriver, LaunchOptions, LoadState, PageDimensions, ReadyState, ScreenshotOptions, Viewport,
};

/// Extra time the Rust side waits beyond the timeout passed to Playwright
const BRIDGE_SLACK: Duration = Duration::from_secs(2);

/// Budget for calls that carry no timeout of their own
const QUICK_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');

let playwright;
function loadPlaywright() {
  if (!playwright) {
    const resolved = require.resolve('playwright', { paths: [process.cwd(), __dirname] });
    playwright = require(resolved);
  }
  return playwright;
}

const browsers = new Map();
const pages = new Map();
let seq = 0;
const nextId = (prefix) => `${prefix}${++seq}`;

function pageOf(id) {
  const entry = pages.get(id);
  if (!entry) throw new Error(`page ${id} has been closed`);
  return entry.page;
}

async function closeEntry(entry) {
  if (entry.browser) await entry.browser.close();
  else await entry.context.close();
}

const ops = {
  async launch(a) {
    const type = loadPlaywright()[a.engine];
    if (!type) throw new Error(`unsupported engine ${a.engine}`);
    const opts = { headless: a.headless, args: a.args, timeout: a.timeout };
    if (a.channel) opts.channel = a.channel;
    let browser = null;
    let context;
    if (a.userDataDir) {
      context = await type.launchPersistentContext(a.userDataDir, opts);
    } else {
      browser = await type.launch(opts);
      context = await browser.newContext();
    }
    const id = nextId('b');
    browsers.set(id, { browser, context });
    return { id };
  },
  async close(a) {
    const entry = browsers.get(a.browser);
    if (!entry) return null;
    browsers.delete(a.browser);
    for (const [pid, p] of pages) if (p.browser === a.browser) pages.delete(pid);
    await closeEntry(entry);
    return null;
  },
  async newPage(a) {
    const entry = browsers.get(a.browser);
    if (!entry) throw new Error(`browser ${a.browser} has been closed`);
    const page = await entry.context.newPage();
    const id = nextId('p');
    pages.set(id, { page, browser: a.browser });
    return { id };
  },
  async navigate(a) {
    await pageOf(a.page).goto(a.url, { timeout: a.timeout, waitUntil: 'load' });
    return null;
  },
  async screenshot(a) {
    const opts = { fullPage: a.fullPage, timeout: a.timeout };
    if (a.clip) opts.clip = a.clip;
    const buf = await pageOf(a.page).screenshot(opts);
    return buf.toString('base64');
  },
  async readyState(a) {
    return pageOf(a.page).evaluate(() => document.readyState);
  },
  async currentUrl(a) {
    return pageOf(a.page).url();
  },
  async reload(a) {
    await pageOf(a.page).reload({ timeout: a.timeout });
    return null;
  },
  async waitForLoadState(a) {
    await pageOf(a.page).waitForLoadState(a.state, { timeout: a.timeout });
    return null;
  },
  async waitForSelector(a) {
    await pageOf(a.page).waitForSelector(a.selector, { timeout: a.timeout });
    return null;
  },
  async click(a) {
    await pageOf(a.page).click(a.selector, { timeout: a.timeout });
    return null;
  },
  async fill(a) {
    await pageOf(a.page).fill(a.selector, a.value, { timeout: a.timeout });
    return null;
  },
  async count(a) {
    return pageOf(a.page).locator(a.selector).count();
  },
  async pageDimensions(a) {
    return pageOf(a.page).evaluate(() => ({
      pageWidth: document.documentElement.scrollWidth,
      pageHeight: document.documentElement.scrollHeight,
      viewportWidth: window.innerWidth,
      viewportHeight: window.innerHeight,
    }));
  },
  async setViewport(a) {
    await pageOf(a.page).setViewportSize({ width: a.width, height: a.height });
    return null;
  },
  async waitForImages(a) {
    await pageOf(a.page).waitForFunction(
      () => Array.from(document.images).every((img) => img.complete),
      null,
      { timeout: a.timeout },
    );
    return null;
  },
};

async function closeAll() {
  for (const entry of browsers.values()) {
    try { await closeEntry(entry); } catch (_) {}
  }
  browsers.clear();
  pages.clear();
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let req;
  try { req = JSON.parse(line); } catch (_) { return; }
  if (req.op === 'shutdown') {
    await closeAll();
    process.exit(0);
  }
  let reply;
  try {
    const handler = ops[req.op];
    if (!handler) throw new Error(`unknown op ${req.op}`);
    const result = await handler(req.args || {});
    reply = { id: req.id, ok: true, result: result === undefined ? null : result };
  } catch (e) {
    reply = { id: req.id, ok: false, error: String((e && e.message) || e) };
  }
  process.stdout.write(JSON.stringify(reply) + '\n');
});
rl.on('close', async () => {
  await closeAll();
  process.exit(0);
});
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,
    /// Directory whose `node_modules` holds `playwright`
    pub project_dir: PathBuf,
    /// Channel for the managed launch path; `None` disables it.
    pub managed_channel: Option<String>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            managed_channel: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdReply {
    id: String,
}

/// A running bridge process
struct Bridge {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    _script_dir: tempfile::TempDir,
}

impl Bridge {
    async fn spawn(config: &PlaywrightConfig) -> Result<Self> {
        let script_dir = tempfile::tempdir()?;
        let script = script_dir.path().join("autoheal-bridge.js");
        std::fs::write(&script, BRIDGE_SCRIPT)?;

        let mut child = Command::new(&config.node_binary)
            .arg(&script)
            .current_dir(&config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Driver(format!(
                    "Failed to spawn {}: {}",
                    config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Driver("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Driver("bridge stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "autoheal::bridge", "{}", line);
                }
            });
        }

        info!(pid = ?child.id(), "Playwright bridge started");
        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            _script_dir: script_dir,
        })
    }

    async fn send(&mut self, request: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read until the response for `id`; `None` on EOF.
    async fn recv(&mut self, id: u64) -> Result<Option<BridgeResponse>> {
        while let Some(line) = self.lines.next_line().await? {
            let response: BridgeResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    debug!(line = %line, "Ignoring non-protocol bridge output");
                    continue;
                }
            };
            if response.id == Some(id) {
                return Ok(Some(response));
            }
            debug!(expected = id, got = ?response.id, "Skipping stale bridge response");
        }
        Ok(None)
    }

    /// Ask the bridge to exit, then SIGTERM, then kill.
    async fn stop(mut self) {
        let pid = self.child.id();
        info!(pid = ?pid, "Stopping Playwright bridge");
        if self.send(&json!({ "id": 0, "op": "shutdown" })).await.is_ok() {
            let _ = self.stdin.shutdown().await;
            if tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await.is_ok() {
                return;
            }
        }

        #[cfg(unix)]
        if let Some(pid) = pid {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_millis(500), self.child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill Playwright bridge: {}", e);
        }
    }
}

/// [`BrowserDriver`] backed by a Playwright bridge process
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
    bridge: Mutex<Option<Bridge>>,
    next_id: AtomicU64,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self {
            config,
            bridge: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Installed Playwright version, from `npx playwright --version`.
    pub async fn probe_version(&self) -> Result<String> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(&self.config.project_dir)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Driver(
                "Playwright not found. Install with: npx playwright install".into(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_version(&stdout)
            .ok_or_else(|| Error::Driver(format!("unrecognized playwright version output: {}", stdout.trim())))
    }

    /// Stop the bridge process if one is running.
    pub async fn shutdown(&self) {
        let bridge = self.bridge.lock().await.take();
        if let Some(bridge) = bridge {
            bridge.stop().await;
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        op: &str,
        args: Value,
        timeout: Duration,
        target: Option<&str>,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.bridge.lock().await;
        if guard.is_none() {
            *guard = Some(Bridge::spawn(&self.config).await?);
        }
        let Some(bridge) = guard.as_mut() else {
            return Err(Error::Internal("bridge missing after spawn".into()));
        };

        debug!(id, op, "Bridge request");
        if let Err(e) = bridge.send(&json!({ "id": id, "op": op, "args": args })).await {
            *guard = None;
            return Err(Error::BrowserCrashed(format!("automation bridge closed its input: {}", e)));
        }

        let received = tokio::time::timeout(timeout + BRIDGE_SLACK, bridge.recv(id)).await;
        let response = match received {
            Ok(Ok(Some(response))) => response,
            Ok(Ok(None)) => {
                *guard = None;
                return Err(Error::BrowserCrashed("automation bridge exited".into()));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let message = format!("Timeout {}ms exceeded", timeout.as_millis());
                return Err(map_bridge_error(op, &message, timeout, target));
            }
        };
        drop(guard);

        if response.ok {
            Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
        } else {
            let message = response.error.unwrap_or_else(|| "unknown bridge error".to_string());
            Err(map_bridge_error(op, &message, timeout, target))
        }
    }

    fn launch_args(options: &LaunchOptions, channel: Option<&str>) -> Value {
        json!({
            "engine": options.engine.as_str(),
            "headless": options.headless,
            "args": options.args,
            "userDataDir": options.user_data_dir,
            "channel": channel.or(options.channel.as_deref()),
            "timeout": options.timeout.as_millis() as u64,
        })
    }

    async fn launch_with(&self, options: &LaunchOptions, channel: Option<&str>) -> Result<BrowserHandle> {
        let reply: IdReply = self
            .call("launch", Self::launch_args(options, channel), options.timeout, None)
            .await?;
        Ok(BrowserHandle {
            id: reply.id,
            engine: options.engine,
            managed: channel.is_some(),
        })
    }
}

/// Turn a bridge error message into the typed error for `op`.
pub fn map_bridge_error(op: &str, message: &str, timeout: Duration, target: Option<&str>) -> Error {
    let lower = message.to_lowercase();
    let timeout_ms = timeout.as_millis() as u64;
    let target = target.unwrap_or("current page").to_string();

    let crashed = ["crash", "target closed", "has been closed", "has disconnected"]
        .iter()
        .any(|k| lower.contains(k));
    if crashed {
        return Error::BrowserCrashed(message.to_string());
    }

    if lower.contains("timeout") {
        return match op {
            "launch" => Error::LaunchTimeout { timeout_ms },
            "navigate" | "reload" | "waitForLoadState" => Error::NavigationTimeout {
                url: target,
                timeout_ms,
            },
            "waitForSelector" | "click" | "fill" => Error::ElementNotFound {
                selector: target,
                waited_ms: timeout_ms,
            },
            "screenshot" => Error::Screenshot(message.to_string()),
            _ => Error::Timeout(format!("{}: {}", op, message)),
        };
    }

    if op == "screenshot" {
        return Error::Screenshot(message.to_string());
    }
    Error::Driver(format!("{}: {}", op, message))
}

fn parse_version(output: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+\.\d+\.\d+)").expect("static regex"));
    re.captures(output).map(|caps| caps[1].to_string())
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    fn supports_managed_channel(&self) -> bool {
        self.config.managed_channel.is_some()
    }

    async fn launch_managed(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        let Some(channel) = self.config.managed_channel.as_deref() else {
            return Err(Error::Driver("managed channel not configured".into()));
        };
        if options.engine != Engine::Chromium {
            return Err(Error::Driver(format!(
                "managed channel {} is only available for chromium",
                channel
            )));
        }
        self.launch_with(options, Some(channel)).await
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        self.launch_with(options, None).await
    }

    async fn close(&self, browser: &BrowserHandle) -> Result<()> {
        self.call("close", json!({ "browser": browser.id }), QUICK_CALL_TIMEOUT, None)
            .await
    }

    async fn new_page(&self, browser: &BrowserHandle) -> Result<PageHandle> {
        let reply: IdReply = self
            .call("newPage", json!({ "browser": browser.id }), QUICK_CALL_TIMEOUT, None)
            .await?;
        Ok(PageHandle {
            id: reply.id,
            browser_id: browser.id.clone(),
        })
    }

    async fn navigate(&self, page: &PageHandle, url: &str, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "url": url, "timeout": timeout.as_millis() as u64 });
        self.call("navigate", args, timeout, Some(url)).await
    }

    async fn screenshot(&self, page: &PageHandle, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let args = json!({
            "page": page.id,
            "fullPage": options.full_page,
            "clip": options.clip,
            "timeout": options.timeout.as_millis() as u64,
        });
        let encoded: String = self.call("screenshot", args, options.timeout, None).await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Screenshot(format!("invalid image payload: {}", e)))
    }

    async fn ready_state(&self, page: &PageHandle) -> Result<ReadyState> {
        self.call("readyState", json!({ "page": page.id }), QUICK_CALL_TIMEOUT, None)
            .await
    }

    async fn current_url(&self, page: &PageHandle) -> Result<String> {
        self.call("currentUrl", json!({ "page": page.id }), QUICK_CALL_TIMEOUT, None)
            .await
    }

    async fn reload(&self, page: &PageHandle, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "timeout": timeout.as_millis() as u64 });
        self.call("reload", args, timeout, None).await
    }

    async fn wait_for_load_state(&self, page: &PageHandle, state: LoadState, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "state": state, "timeout": timeout.as_millis() as u64 });
        self.call("waitForLoadState", args, timeout, None).await
    }

    async fn wait_for_selector(&self, page: &PageHandle, selector: &str, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "selector": selector, "timeout": timeout.as_millis() as u64 });
        self.call("waitForSelector", args, timeout, Some(selector)).await
    }

    async fn click(&self, page: &PageHandle, selector: &str, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "selector": selector, "timeout": timeout.as_millis() as u64 });
        self.call("click", args, timeout, Some(selector)).await
    }

    async fn fill(&self, page: &PageHandle, selector: &str, value: &str, timeout: Duration) -> Result<()> {
        let args = json!({
            "page": page.id,
            "selector": selector,
            "value": value,
            "timeout": timeout.as_millis() as u64,
        });
        self.call("fill", args, timeout, Some(selector)).await
    }

    async fn count(&self, page: &PageHandle, selector: &str) -> Result<usize> {
        let args = json!({ "page": page.id, "selector": selector });
        self.call("count", args, QUICK_CALL_TIMEOUT, Some(selector)).await
    }

    async fn page_dimensions(&self, page: &PageHandle) -> Result<PageDimensions> {
        self.call("pageDimensions", json!({ "page": page.id }), QUICK_CALL_TIMEOUT, None)
            .await
    }

    async fn set_viewport(&self, page: &PageHandle, viewport: Viewport) -> Result<()> {
        let args = json!({ "page": page.id, "width": viewport.width, "height": viewport.height });
        self.call("setViewport", args, QUICK_CALL_TIMEOUT, None).await
    }

    async fn wait_for_images(&self, page: &PageHandle, timeout: Duration) -> Result<()> {
        let args = json!({ "page": page.id, "timeout": timeout.as_millis() as u64 });
        self.call("waitForImages", args, timeout, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use autoheal_common::FailureClassification;
    use test_case::test_case;

    const T: Duration = Duration::from_millis(30_000);

    #[test_case("launch", "Timeout 30000ms exceeded.", None, FailureClassification::BrowserLaunchTimeout)]
    #[test_case("navigate", "Timeout 30000ms exceeded.", Some("http://localhost:5173/login"), FailureClassification::PageNavigationTimeout)]
    #[test_case("waitForLoadState", "Timeout 30000ms exceeded.", None, FailureClassification::PageNavigationTimeout)]
    #[test_case("click", "Timeout 30000ms exceeded.", Some("#submit"), FailureClassification::ElementNotFound)]
    #[test_case("screenshot", "Cannot take screenshot larger than 32767 pixels", None, FailureClassification::ScreenshotFailure)]
    #[test_case("navigate", "Target closed", None, FailureClassification::BrowserCrash)]
    #[test_case("newPage", "browser b1 has been closed", None, FailureClassification::BrowserCrash)]
    #[test_case("count", "Unexpected token in selector", None, FailureClassification::Unknown)]
    fn test_bridge_errors_classify(op: &str, message: &str, target: Option<&str>, expected: FailureClassification) {
        assert_eq!(classify(&map_bridge_error(op, message, T, target)), expected);
    }

    #[test]
    fn test_navigation_timeout_keeps_url() {
        let err = map_bridge_error("navigate", "Timeout 100ms exceeded", T, Some("http://x/login"));
        assert_eq!(err.url(), Some("http://x/login"));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("Version 1.40.1\n").as_deref(), Some("1.40.1"));
        assert_eq!(parse_version("command not found"), None);
    }

    #[test]
    fn test_script_implements_every_op() {
        for op in [
            "launch",
            "close",
            "newPage",
            "navigate",
            "screenshot",
            "readyState",
            "currentUrl",
            "reload",
            "waitForLoadState",
            "waitForSelector",
            "click",
            "fill",
            "count",
            "pageDimensions",
            "setViewport",
            "waitForImages",
        ] {
            assert!(BRIDGE_SCRIPT.contains(&format!("async {}(a)", op)), "missing op {}", op);
        }
    }

    #[test]
    fn test_launch_args_prefer_explicit_channel() {
        let options = LaunchOptions::defaults(Engine::Chromium, T);
        let args = PlaywrightDriver::launch_args(&options, Some("chrome"));
        assert_eq!(args["channel"], "chrome");
        assert_eq!(args["engine"], "chromium");
        assert_eq!(args["timeout"], 30_000);
        assert!(args["userDataDir"].is_null());
    }
}
