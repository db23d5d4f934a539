//! Crash records written by the browser-crash recovery handler

use std::path::{Path, PathBuf};

use autoheal_common::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl CrashRecord {
    pub fn new(error: &str, target_url: Option<String>, stack: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            error: error.to_string(),
            target_url,
            stack,
        }
    }

    fn file_name(&self) -> String {
        format!("crash-{}-{}.json", self.timestamp.format("%Y%m%dT%H%M%S"), self.id)
    }
}

/// Directory of crash records. Without a directory, records are only logged.
#[derive(Debug, Clone, Default)]
pub struct CrashLog {
    dir: Option<PathBuf>,
}

impl CrashLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Persist `record`, returning the file written.
    pub fn record(&self, record: &CrashRecord) -> Result<Option<PathBuf>> {
        info!(id = %record.id, error = %record.error, "Browser crash recorded");
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(record.file_name());
        std::fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        debug!(path = %path.display(), "Crash record written");
        Ok(Some(path))
    }

    /// All records in the directory, oldest first.
    pub fn list(&self) -> Result<Vec<CrashRecord>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("crash-"))
        {
            let bytes = std::fs::read(entry.path())?;
            records.push(serde_json::from_slice::<CrashRecord>(&bytes)?);
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
