//! Solution run cache
//!
//! Solution records are kept in memory per test and on disk beside the
//! solution executables, one JSON file per test. A disk entry is used only if
//! it was made by the same command and is newer than every file in the
//! solution directory. The submission directory is never consulted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::RunError;
use crate::config::GraderConfig;
use crate::harness::ExecutionRecord;
use crate::lock::LockedFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSolution {
    fingerprint: String,
    record: ExecutionRecord,
}

pub struct SolutionCache {
    solution_dir: PathBuf,
    cache_dir: PathBuf,
    writable: bool,
    entries: HashMap<String, CachedSolution>,
}

impl SolutionCache {
    pub fn new(solution_dir: &Path, config: &GraderConfig) -> Self {
        Self {
            solution_dir: solution_dir.to_path_buf(),
            cache_dir: solution_dir.join(&config.solution_cache_dir),
            writable: config.write_solution_cache,
            entries: HashMap::new(),
        }
    }

    /// Identifies the command that produced a record
    pub fn fingerprint(command: &str) -> String {
        let digest = Sha256::digest(command.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn entry_path(&self, test_name: &str) -> PathBuf {
        self.cache_dir.join(entry_file_name(test_name))
    }

    /// Cached record for `test_name` if it was made by `command` and is
    /// still fresh
    pub async fn lookup(&mut self, test_name: &str, command: &str) -> Option<ExecutionRecord> {
        let fingerprint = Self::fingerprint(command);
        if let Some(entry) = self.entries.get(test_name) {
            if entry.fingerprint == fingerprint {
                return Some(entry.record.clone());
            }
        }

        let path = self.entry_path(test_name);
        let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
        if let Some(newer) = self.newest_input_after(modified).await {
            debug!("Cached solution for {} is older than {:?}", test_name, newer);
            return None;
        }
        let content = tokio::fs::read_to_string(&path).await.ok()?;
        let entry: CachedSolution = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cached solution {:?}: {}", path, e);
                return None;
            }
        };
        if entry.fingerprint != fingerprint {
            debug!("Cached solution for {} was made by another command", test_name);
            return None;
        }

        let record = entry.record.clone();
        self.entries.insert(test_name.to_string(), entry);
        Some(record)
    }

    /// Remember a fresh solution record, writing it to disk when allowed
    pub async fn store(
        &mut self,
        test_name: &str,
        command: &str,
        record: &ExecutionRecord,
        config: &GraderConfig,
    ) -> Result<(), RunError> {
        let entry = CachedSolution {
            fingerprint: Self::fingerprint(command),
            record: record.clone(),
        };

        if self.writable {
            tokio::fs::create_dir_all(&self.cache_dir).await?;
            let path = self.entry_path(test_name);
            let _lock = LockedFile::acquire(&path, config).await?;
            let tmp = self.cache_dir.join(format!("{}.tmp", entry_file_name(test_name)));
            let json = serde_json::to_string(&entry)
                .map_err(|e| RunError::Manifest(format!("cannot encode solution record: {}", e)))?;
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await?;
            info!("Cached solution output for {} in {:?}", test_name, path);
        }

        self.entries.insert(test_name.to_string(), entry);
        Ok(())
    }

    /// A file in the solution directory changed after `time`, if any
    async fn newest_input_after(&self, time: SystemTime) -> Option<PathBuf> {
        let mut dir = tokio::fs::read_dir(&self.solution_dir).await.ok()?;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path == self.cache_dir {
                continue;
            }
            // metadata() follows symlinks to shared solution files
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if meta.modified().map(|m| m > time).unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }
}

/// File name for a test's entry; anything outside `[A-Za-z0-9_-]` becomes
/// `_`, so names cannot leave the cache directory
fn entry_file_name(test_name: &str) -> String {
    let name: String = test_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}
