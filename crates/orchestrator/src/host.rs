//! Host-level side effects: disk and network probes, the engine install
//! command, process cleanup and temp-file cleanup.
//!
//! Everything here is idempotent; running a cleanup twice is not an error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use autoheal_common::{Engine, Error, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Marker Playwright writes into a revision directory once its download completed
pub const INSTALLATION_COMPLETE_MARKER: &str = "INSTALLATION_COMPLETE";

/// Side-effecting host capabilities used by the installer and recovery handlers
#[async_trait]
pub trait HostOps: Send + Sync {
    /// Free space in megabytes on the filesystem holding `path`.
    async fn free_disk_mb(&self, path: &Path) -> Result<u64>;

    /// Whether the engine download host answers within `timeout`.
    async fn network_reachable(&self, timeout: Duration) -> bool;

    /// Run the engine install command, returning its captured output.
    async fn run_install(&self, engine: Engine, timeout: Duration, force: bool) -> Result<String>;

    /// Kill every process whose command line matches `pattern`.
    async fn kill_processes(&self, pattern: &str) -> Result<()>;

    /// Remove temp-dir entries starting with `prefix`; returns how many went away.
    async fn remove_temp_dirs(&self, prefix: &str) -> Result<usize>;

    /// Remove partially downloaded revisions of `engine` from `cache_dir`.
    async fn remove_partial_downloads(&self, cache_dir: &Path, engine: Engine) -> Result<usize>;
}

/// Run a step whose failure is tolerated: errors are logged, never propagated.
pub async fn best_effort<T, F>(step: &str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => {
            debug!(step, "Best-effort step completed");
            Some(value)
        }
        Err(e) => {
            warn!(step, error = %e, "Best-effort step failed; continuing");
            None
        }
    }
}

/// [`HostOps`] backed by the local machine
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// URL probed for network reachability
    probe_url: String,
    /// Directory scanned for leftover engine profiles
    temp_dir: PathBuf,
}

impl SystemHost {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            probe_url: probe_url.into(),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = dir;
        self
    }

    fn install_command(engine: Engine, force: bool) -> Command {
        let mut cmd = Command::new("npx");
        cmd.args(["--yes", "playwright", "install", engine.as_str()]);
        if force {
            cmd.arg("--force");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_URL)
    }
}

/// Playwright's download CDN
pub const DEFAULT_PROBE_URL: &str = "https://playwright.azureedge.net";

#[async_trait]
impl HostOps for SystemHost {
    async fn free_disk_mb(&self, path: &Path) -> Result<u64> {
        // The cache dir may not exist yet; measure its closest existing ancestor.
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .unwrap_or_else(|| Path::new("/"))
            .to_path_buf();
        let stat = nix::sys::statvfs::statvfs(&existing)
            .map_err(|e| Error::Io(std::io::Error::from(e)))?;
        let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(bytes / (1024 * 1024))
    }

    async fn network_reachable(&self, timeout: Duration) -> bool {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build probe client: {}", e);
                return false;
            }
        };
        // Any HTTP answer, even an error status, proves DNS and routing work.
        match client.head(&self.probe_url).send().await {
            Ok(resp) => {
                debug!(url = %self.probe_url, status = %resp.status(), "Network probe answered");
                true
            }
            Err(e) => {
                warn!(url = %self.probe_url, "Network probe failed: {}", e);
                false
            }
        }
    }

    async fn run_install(&self, engine: Engine, timeout: Duration, force: bool) -> Result<String> {
        info!(engine = %engine, force, timeout_s = timeout.as_secs(), "Running engine install");
        let child = Self::install_command(engine, force).spawn()?;

        // Dropping the future on timeout kills the child (kill_on_drop).
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::InstallTimeout {
                    seconds: timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Error::Install(format!(
                "install exited with {}:\nstdout: {}\nstderr: {}",
                output.status, stdout, stderr
            )));
        }
        Ok(format!("{}{}", stdout, stderr))
    }

    async fn kill_processes(&self, pattern: &str) -> Result<()> {
        let status = Command::new("pkill")
            .args(["-f", pattern])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        // pkill exits 1 when nothing matched.
        match status.code() {
            Some(0) => {
                info!(pattern, "Killed stray processes");
                Ok(())
            }
            Some(1) => Ok(()),
            _ => Err(Error::Internal(format!("pkill -f {} exited with {}", pattern, status))),
        }
    }

    async fn remove_temp_dirs(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(&self.temp_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        {
            if remove_path(entry.path())? {
                removed += 1;
            }
        }
        debug!(prefix, removed, "Temp profile cleanup finished");
        Ok(removed)
    }

    async fn remove_partial_downloads(&self, cache_dir: &Path, engine: Engine) -> Result<usize> {
        if !cache_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(cache_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let partial = if entry.file_type().is_dir() {
                name.starts_with(engine.as_str())
                    && !entry.path().join(INSTALLATION_COMPLETE_MARKER).exists()
            } else {
                name.ends_with(".zip") || name.ends_with(".tmp")
            };
            if partial && remove_path(entry.path())? {
                info!(path = %entry.path().display(), "Removed partial download");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Remove a file or directory; an already-missing path is not an error.
fn remove_path(path: &Path) -> Result<bool> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_best_effort_swallows_errors() {
        let ok = best_effort("ok", async { Ok::<_, Error>(7) }).await;
        assert_eq!(ok, Some(7));
        let failed: Option<()> = best_effort("fails", async { Err(Error::Internal("nope".into())) }).await;
        assert!(failed.is_none());
    }

    #[tokio::test]
    async fn test_remove_temp_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("playwright_chromiumdev_profile-abc")).unwrap();
        std::fs::create_dir(tmp.path().join("playwright_chromiumdev_profile-def")).unwrap();
        std::fs::create_dir(tmp.path().join("unrelated")).unwrap();

        let host = SystemHost::default().with_temp_dir(tmp.path().to_path_buf());
        let prefix = Engine::Chromium.temp_profile_prefix();
        assert_eq!(host.remove_temp_dirs(prefix).await.unwrap(), 2);
        assert_eq!(host.remove_temp_dirs(prefix).await.unwrap(), 0);
        assert!(tmp.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn test_remove_partial_downloads_keeps_complete_revisions() {
        let cache = tempfile::tempdir().unwrap();
        let complete = cache.path().join("chromium-1091");
        std::fs::create_dir(&complete).unwrap();
        std::fs::write(complete.join(INSTALLATION_COMPLETE_MARKER), "").unwrap();
        std::fs::create_dir(cache.path().join("chromium-1084")).unwrap();
        std::fs::write(cache.path().join("chromium-1091.zip"), "partial").unwrap();
        std::fs::create_dir(cache.path().join("firefox-1429")).unwrap();

        let host = SystemHost::default();
        let removed = host
            .remove_partial_downloads(cache.path(), Engine::Chromium)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(complete.exists());
        assert!(cache.path().join("firefox-1429").exists());
        assert_eq!(
            host.remove_partial_downloads(cache.path(), Engine::Chromium).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_free_disk_for_missing_path_uses_ancestor() {
        let tmp = tempfile::tempdir().unwrap();
        let host = SystemHost::default();
        let free = host.free_disk_mb(&tmp.path().join("not/yet/created")).await;
        assert!(free.is_ok());
    }
}
