//! Advisory lock files
//!
//! A lock on `<file>` is the file `<file>.lock`, created exclusively. Holders
//! in other processes are waited out by retrying on a fixed delay. The lock
//! is released when the guard is dropped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::fs::OpenOptions;
use tracing::{debug, warn};

use crate::config::GraderConfig;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gave up on lock {path} after {attempts} attempts")]
    Contended { path: String, attempts: u32 },
}

/// Guard for `<file>.lock`
#[derive(Debug)]
pub struct LockedFile {
    target: PathBuf,
    lock_path: PathBuf,
}

impl LockedFile {
    pub async fn acquire(target: &Path, config: &GraderConfig) -> Result<Self, LockError> {
        let lock_path = lock_path_for(target);
        let attempts = config.lock_max_attempts.max(1);

        for attempt in 1..=attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(_) => {
                    debug!("Locked {:?} on attempt {}", target, attempt);
                    return Ok(Self {
                        target: target.to_path_buf(),
                        lock_path,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if attempt == 1 {
                        debug!("{:?} is locked, waiting", target);
                    }
                    tokio::time::sleep(Duration::from_millis(config.lock_retry_ms)).await;
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path.display().to_string(),
                        source,
                    })
                }
            }
        }

        Err(LockError::Contended {
            path: lock_path.display().to_string(),
            attempts,
        })
    }

    /// The file this guard protects
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!("Failed to release lock {:?}: {}", self.lock_path, e);
        }
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> GraderConfig {
        GraderConfig {
            lock_retry_ms: 10,
            lock_max_attempts: 3,
            ..GraderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lock_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reverse");
        let config = quick_config();

        let guard = LockedFile::acquire(&target, &config).await.unwrap();
        assert_eq!(guard.target(), target.as_path());
        assert!(dir.path().join("reverse.lock").exists());

        match LockedFile::acquire(&target, &config).await {
            Err(LockError::Contended { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected contention, got {:?}", other),
        }

        drop(guard);
        assert!(!dir.path().join("reverse.lock").exists());
        assert!(LockedFile::acquire(&target, &config).await.is_ok());
    }

    #[tokio::test]
    async fn test_waits_for_holder() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("words");
        let config = GraderConfig {
            lock_retry_ms: 10,
            lock_max_attempts: 100,
            ..GraderConfig::default()
        };

        let guard = LockedFile::acquire(&target, &config).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });
        assert!(LockedFile::acquire(&target, &config).await.is_ok());
        release.await.unwrap();
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let config = quick_config();
        let result = tokio_test::block_on(LockedFile::acquire(
            Path::new("/nonexistent-dir/reverse"),
            &config,
        ));
        assert!(matches!(result, Err(LockError::Io { .. })));
    }
}
