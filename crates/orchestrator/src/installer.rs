//! Safe, time-bounded engine installation
//!
//! Preflight (disk, network), a hard-timeout install with captured output,
//! and confirmation through the [`EnvironmentValidator`]. A hung install is
//! handed to the install-hang recovery handler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use autoheal_common::{Engine, Error, InstallResult, InstallStatus};
use tracing::{debug, info, warn};

use crate::host::HostOps;
use crate::recovery::{recover_install_hang, RecoveryPayload};
use crate::validator::EnvironmentValidator;

/// Environment switch disabling installation entirely
pub const SKIP_INSTALL_ENV: &str = "AUTOHEAL_SKIP_INSTALL";

/// Below this much free space a warning is logged; the install still runs.
pub const MIN_FREE_DISK_MB: u64 = 500;

pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

pub const HINT_TRY_SYSTEM_BROWSER: &str = "try_system_browser";
pub const HINT_FREE_DISK_SPACE: &str = "free_disk_space";
pub const HINT_CHECK_NETWORK: &str = "check_network_or_proxy";
pub const HINT_MANUAL_INSTALL: &str = "manual_installation_required";

pub const ERR_NETWORK: &str = "network_error";
pub const ERR_DISK_SPACE: &str = "insufficient_disk_space";
pub const ERR_INSTALL_TIMEOUT: &str = "install_timeout";
pub const ERR_VALIDATION: &str = "validation_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallMode {
    /// Short-circuit when the validator already finds a usable binary.
    IfMissing,
    /// Reinstall unconditionally, passing the force flag.
    Force,
}

/// Cause of a failed install command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallFailure {
    Timeout,
    OutOfSpace,
    Network,
    Other,
}

/// Map an install error onto its failure cause.
pub fn classify_install_error(error: &Error) -> InstallFailure {
    match error {
        Error::InstallTimeout { .. } => return InstallFailure::Timeout,
        Error::DiskSpace { .. } => return InstallFailure::OutOfSpace,
        Error::Network(_) => return InstallFailure::Network,
        _ => {}
    }
    let message = error.to_string().to_lowercase();
    if ["enospc", "no space left"].iter().any(|k| message.contains(k)) {
        InstallFailure::OutOfSpace
    } else if ["enotfound", "getaddrinfo", "eai_again", "econnrefused", "econnreset", "dns", "network"]
        .iter()
        .any(|k| message.contains(k))
    {
        InstallFailure::Network
    } else {
        InstallFailure::Other
    }
}

/// Installs the automation engine without ever hanging the caller
#[derive(Clone)]
pub struct SafeInstaller {
    host: Arc<dyn HostOps>,
    validator: EnvironmentValidator,
    skip_override: Option<bool>,
    network_timeout: Duration,
}

impl SafeInstaller {
    pub fn new(host: Arc<dyn HostOps>, validator: EnvironmentValidator) -> Self {
        Self {
            host,
            validator,
            skip_override: None,
            network_timeout: Duration::from_secs(5),
        }
    }

    /// Force the skip switch instead of reading [`SKIP_INSTALL_ENV`].
    pub fn with_skip(mut self, skip: Option<bool>) -> Self {
        self.skip_override = skip;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn engine(&self) -> Engine {
        self.validator.engine()
    }

    pub fn cache_dir(&self) -> &Path {
        self.validator.cache_dir()
    }

    fn skip_requested(&self) -> bool {
        self.skip_override.unwrap_or_else(|| {
            std::env::var(SKIP_INSTALL_ENV)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        })
    }

    /// Install the engine unless it is already present.
    pub async fn install_safely(&self) -> InstallResult {
        self.install(InstallMode::IfMissing).await
    }

    /// Unconditional reinstall with the force flag.
    pub async fn reinstall(&self) -> InstallResult {
        self.install(InstallMode::Force).await
    }

    async fn install(&self, mode: InstallMode) -> InstallResult {
        if self.skip_requested() {
            info!("Engine install skipped ({} set)", SKIP_INSTALL_ENV);
            return InstallResult::new(InstallStatus::Skipped);
        }

        if mode == InstallMode::IfMissing {
            let snapshot = self.validator.validate();
            if snapshot.is_usable() {
                debug!(path = ?snapshot.path, "Engine already installed; nothing to do");
                return InstallResult::new(InstallStatus::AlreadyInstalled).with_path(snapshot.path);
            }
        }

        match self.host.free_disk_mb(self.cache_dir()).await {
            Ok(free) if free < MIN_FREE_DISK_MB => {
                warn!(free_mb = free, "Low disk space for engine install (< {} MB)", MIN_FREE_DISK_MB)
            }
            Ok(free) => debug!(free_mb = free, "Disk space check passed"),
            Err(e) => warn!("Could not determine free disk space: {}", e),
        }

        if !self.host.network_reachable(self.network_timeout).await {
            warn!("Engine download host unreachable; not attempting install");
            return InstallResult::failed(ERR_NETWORK, HINT_CHECK_NETWORK);
        }

        let force = mode == InstallMode::Force;
        match self.host.run_install(self.engine(), INSTALL_TIMEOUT, force).await {
            Ok(output) => self.confirm(InstallStatus::Installed, output),
            Err(e) => self.handle_install_error(e).await,
        }
    }

    /// Re-run validation after an install command reported success.
    fn confirm(&self, status: InstallStatus, output: String) -> InstallResult {
        let snapshot = self.validator.validate();
        if snapshot.is_usable() {
            info!(path = ?snapshot.path, "Engine install confirmed");
            InstallResult::new(status).with_path(snapshot.path).with_output(output)
        } else {
            warn!(status = ?snapshot.status, "Install finished but the engine does not validate");
            InstallResult::failed(ERR_VALIDATION, HINT_TRY_SYSTEM_BROWSER).with_output(output)
        }
    }

    async fn handle_install_error(&self, error: Error) -> InstallResult {
        match classify_install_error(&error) {
            InstallFailure::Timeout => {
                warn!("Engine install hung: {}", error);
                let outcome = recover_install_hang(self.host.as_ref(), self.cache_dir(), self.engine()).await;
                match outcome.payload {
                    RecoveryPayload::InstallOutput(output) if outcome.status.is_success() => {
                        self.confirm(InstallStatus::Recovered, output)
                    }
                    _ => {
                        let mut result = InstallResult::failed(ERR_INSTALL_TIMEOUT, HINT_MANUAL_INSTALL);
                        if let Some(err) = outcome.error {
                            result = result.with_output(err);
                        }
                        result
                    }
                }
            }
            InstallFailure::OutOfSpace => {
                warn!("Engine install ran out of disk space: {}", error);
                InstallResult::failed(ERR_DISK_SPACE, HINT_FREE_DISK_SPACE)
            }
            InstallFailure::Network => {
                warn!("Engine install hit a network error: {}", error);
                InstallResult::failed(ERR_NETWORK, HINT_CHECK_NETWORK)
            }
            InstallFailure::Other => {
                warn!("Engine install failed: {}", error);
                InstallResult::failed(error.to_string(), HINT_TRY_SYSTEM_BROWSER)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_install_errors() {
        assert_eq!(
            classify_install_error(&Error::InstallTimeout { seconds: 180 }),
            InstallFailure::Timeout
        );
        assert_eq!(
            classify_install_error(&Error::Install("write failed: ENOSPC".into())),
            InstallFailure::OutOfSpace
        );
        assert_eq!(
            classify_install_error(&Error::Install("getaddrinfo ENOTFOUND playwright.azureedge.net".into())),
            InstallFailure::Network
        );
        assert_eq!(
            classify_install_error(&Error::Install("exit status 1".into())),
            InstallFailure::Other
        );
    }
}
