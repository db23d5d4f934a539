//! Environment validation for the automation engine binary

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use autoheal_common::{Engine, EngineInstallation};
use tracing::{debug, info, warn};

/// Scans the install cache for a known-good engine revision.
#[derive(Debug, Clone)]
pub struct EnvironmentValidator {
    cache_dir: PathBuf,
    engine: Engine,
}

impl EnvironmentValidator {
    pub fn new(cache_dir: impl Into<PathBuf>, engine: Engine) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            engine,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Produce a fresh installation snapshot. Never fails: unexpected I/O
    /// errors become `validation_failed` with a fallback hint.
    pub fn validate(&self) -> EngineInstallation {
        match self.probe() {
            Ok(snapshot) => {
                debug!(status = ?snapshot.status, "Engine validation finished");
                snapshot
            }
            Err(e) => {
                warn!(cache = %self.cache_dir.display(), "Engine validation failed: {}", e);
                EngineInstallation::validation_failed(e.to_string())
            }
        }
    }

    fn probe(&self) -> io::Result<EngineInstallation> {
        let versions = self.engine.known_versions();
        for version in versions {
            let candidate = self.cache_dir.join(version).join(self.engine.executable_path());
            let meta = match std::fs::metadata(&candidate) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !meta.is_file() {
                continue;
            }

            if is_executable(&meta) {
                info!(version, path = %candidate.display(), "Engine binary found");
                return Ok(EngineInstallation::installed(candidate, version, false));
            }

            // Single permission fix attempt, then re-validate.
            warn!(path = %candidate.display(), "Engine binary is not executable; fixing permissions");
            if let Err(e) = make_executable(&candidate, &meta) {
                return Ok(EngineInstallation::not_executable(
                    candidate,
                    version,
                    format!("permission fix failed: {}", e),
                ));
            }
            let meta = std::fs::metadata(&candidate)?;
            if meta.is_file() && is_executable(&meta) {
                info!(version, "Engine binary permissions fixed");
                return Ok(EngineInstallation::installed(candidate, version, true));
            }
            return Ok(EngineInstallation::not_executable(
                candidate,
                version,
                "binary still not executable after permission fix".to_string(),
            ));
        }

        info!(engine = %self.engine, "No known engine revision installed");
        Ok(EngineInstallation::not_installed(versions))
    }
}

#[cfg(unix)]
fn is_executable(meta: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &Metadata) -> bool {
    true
}

#[cfg(unix)]
fn make_executable(path: &Path, meta: &Metadata) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = meta.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path, _meta: &Metadata) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoheal_common::InstallationStatus;

    fn place_binary(cache: &Path, version: &str, mode: u32) -> PathBuf {
        let path = cache.join(version).join(Engine::Chromium.executable_path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        }
        #[cfg(not(unix))]
        let _ = mode;
        path
    }

    #[test]
    fn test_not_installed_lists_searched_versions() {
        let cache = tempfile::tempdir().unwrap();
        let snapshot = EnvironmentValidator::new(cache.path(), Engine::Chromium).validate();
        assert_eq!(snapshot.status, InstallationStatus::NotInstalled);
        assert_eq!(snapshot.searched_versions.len(), Engine::Chromium.known_versions().len());
        assert!(snapshot.path.is_none());
    }

    #[test]
    fn test_installed_binary() {
        let cache = tempfile::tempdir().unwrap();
        let path = place_binary(cache.path(), "chromium-1084", 0o755);
        let snapshot = EnvironmentValidator::new(cache.path(), Engine::Chromium).validate();
        assert_eq!(snapshot.status, InstallationStatus::Installed);
        assert_eq!(snapshot.path, Some(path));
        assert_eq!(snapshot.version.as_deref(), Some("chromium-1084"));
    }

    #[test]
    fn test_first_known_version_wins() {
        let cache = tempfile::tempdir().unwrap();
        place_binary(cache.path(), "chromium-1080", 0o755);
        place_binary(cache.path(), "chromium-1091", 0o755);
        let snapshot = EnvironmentValidator::new(cache.path(), Engine::Chromium).validate();
        assert_eq!(snapshot.version.as_deref(), Some("chromium-1091"));
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_fixed_once() {
        let cache = tempfile::tempdir().unwrap();
        place_binary(cache.path(), "chromium-1091", 0o644);
        let validator = EnvironmentValidator::new(cache.path(), Engine::Chromium);

        let first = validator.validate();
        assert_eq!(first.status, InstallationStatus::InstalledFixedPermissions);
        assert!(first.is_usable());

        let second = validator.validate();
        assert_eq!(second.status, InstallationStatus::Installed);
    }

    #[test]
    fn test_directory_named_like_binary_is_skipped() {
        let cache = tempfile::tempdir().unwrap();
        let bogus = cache.path().join("chromium-1091").join(Engine::Chromium.executable_path());
        std::fs::create_dir_all(&bogus).unwrap();
        let snapshot = EnvironmentValidator::new(cache.path(), Engine::Chromium).validate();
        assert_eq!(snapshot.status, InstallationStatus::NotInstalled);
    }

    #[cfg(unix)]
    #[test]
    fn test_io_error_becomes_validation_failed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be: ENOTDIR on probe.
        let cache = dir.path().join("cache");
        std::fs::write(&cache, "not a directory").unwrap();
        let snapshot = EnvironmentValidator::new(&cache, Engine::Chromium).validate();
        assert_eq!(snapshot.status, InstallationStatus::ValidationFailed);
        assert_eq!(
            snapshot.fallback.as_deref(),
            Some(autoheal_common::FALLBACK_SYSTEM_BROWSER)
        );
    }
}
