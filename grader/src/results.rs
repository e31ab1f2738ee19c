//! Per-submission result store
//!
//! One JSON file in the submission directory holds every test's result plus
//! submission facts. Each change is written to `<file>~` and renamed into
//! place, so a crash never leaves a half-written store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::outcome::{Outcome, TestIdentity, TestResult};

pub const FORMAT_VERSION: u32 = 1;

/// Name of the manual point adjustment entry
pub const ADJUSTMENT_KEY: &str = "Adjustment";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode results: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("result format version {0} is not supported")]
    UnsupportedVersion(u32),

    #[error("refusing to write through symlink {0}")]
    Symlink(String),

    #[error("cannot release results that are not finished")]
    NotFinished,
}

/// Results of grading one submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResults {
    #[serde(skip)]
    path: PathBuf,
    pub version: u32,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub submitted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub late_count: u32,
    #[serde(default)]
    pub grader: Option<String>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub results: BTreeMap<String, TestResult>,
}

impl SubmissionResults {
    /// Empty results that will be written to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: FORMAT_VERSION,
            revision: None,
            submitted: None,
            late_count: 0,
            grader: None,
            finished: None,
            released: false,
            results: BTreeMap::new(),
        }
    }

    /// Load the store at `path`, or start an empty one
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No results at {:?}, starting fresh", path);
                return Ok(Self::new(path));
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let mut results: Self = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        if results.version > FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion(results.version));
        }
        results.path = path;
        Ok(results)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&TestResult> {
        self.results.get(name)
    }

    /// Store a result, or delete it with `None`, and commit
    ///
    /// Any change to a finished store reopens it, withdrawing a release.
    pub async fn set(&mut self, name: &str, result: Option<TestResult>) -> Result<(), StoreError> {
        if self.results.get(name) == result.as_ref() {
            return self.commit().await;
        }
        match result {
            Some(result) => {
                self.results.insert(name.to_string(), result);
            }
            None => {
                self.results.remove(name);
            }
        }
        self.reopen();
        self.commit().await
    }

    fn reopen(&mut self) {
        if self.finished.is_some() || self.released {
            info!("Results {:?} changed after grading finished; reopening", self.path);
        }
        self.finished = None;
        self.grader = None;
        self.released = false;
    }

    /// Names of stored test results, without the adjustment entry
    pub fn test_keys(&self) -> Vec<&str> {
        self.results
            .keys()
            .map(String::as_str)
            .filter(|k| *k != ADJUSTMENT_KEY)
            .collect()
    }

    pub fn adjustment(&self) -> Option<&TestResult> {
        self.results.get(ADJUSTMENT_KEY)
    }

    /// Record a manual adjustment; zero points removes it
    pub async fn set_adjustment(&mut self, points: i32, reason: &str) -> Result<(), StoreError> {
        if points == 0 {
            return self.set(ADJUSTMENT_KEY, None).await;
        }
        let identity = TestIdentity {
            name: ADJUSTMENT_KEY.to_string(),
            description: "Manual adjustment".to_string(),
            total_pts: 0,
        };
        let outcome = Outcome::points(points, 0).with_short(reason);
        self.set(ADJUSTMENT_KEY, Some(TestResult::new(identity, outcome)))
            .await
    }

    pub fn has_deferred(&self) -> bool {
        self.results.values().any(TestResult::is_deferred)
    }

    /// (earned, possible) over all stored results
    pub fn points(&self) -> (i32, i32) {
        self.results
            .values()
            .map(TestResult::points_tuple)
            .fold((0, 0), |(earned, possible), (e, p)| (earned + e, possible + p))
    }

    /// e.g. `17/20` or `12/15 (2 deferred)`
    pub fn summary(&self) -> String {
        let (earned, possible) = self.points();
        let deferred = self.results.values().filter(|r| r.is_deferred()).count();
        if deferred > 0 {
            format!("{}/{} ({} deferred)", earned, possible, deferred)
        } else {
            format!("{}/{}", earned, possible)
        }
    }

    /// Mark grading finished; refused while any result is deferred
    pub async fn mark_finished(&mut self, grader: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.has_deferred() {
            return Ok(false);
        }
        self.grader = Some(grader.to_string());
        self.finished = Some(at);
        self.commit().await?;
        info!("Marked {:?} finished by {}", self.path, grader);
        Ok(true)
    }

    pub async fn set_released(&mut self, released: bool) -> Result<(), StoreError> {
        if released && self.finished.is_none() {
            return Err(StoreError::NotFinished);
        }
        self.released = released;
        self.commit().await
    }

    /// Drop results for tests no longer in the suite; returns their names
    pub async fn remove_stale(&mut self, current: &[&str]) -> Result<Vec<String>, StoreError> {
        let stale: Vec<String> = self
            .test_keys()
            .into_iter()
            .filter(|k| !current.contains(k))
            .map(str::to_string)
            .collect();
        if stale.is_empty() {
            return Ok(stale);
        }
        for name in &stale {
            self.results.remove(name);
        }
        self.reopen();
        self.commit().await?;
        Ok(stale)
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let io_error = |path: &Path, source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Ok(meta) = tokio::fs::symlink_metadata(&self.path).await {
            if meta.file_type().is_symlink() {
                return Err(StoreError::Symlink(self.path.display().to_string()));
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = self.path.as_os_str().to_os_string();
        tmp.push("~");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(name: &str, total: i32, outcome: Outcome) -> TestResult {
        TestResult::new(
            TestIdentity {
                name: name.to_string(),
                description: format!("{} test", name),
                total_pts: total,
            },
            outcome,
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grade-results.json");

        let mut results = SubmissionResults::open(&path).await.unwrap();
        results.revision = Some("a1b2c3".to_string());
        results.submitted = Some(Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap());
        results.set("basic", Some(result("basic", 5, Outcome::correct(5)))).await.unwrap();
        results
            .set("valgrind", Some(result("valgrind", 6, Outcome::memory_leak(4, "definitely lost"))))
            .await
            .unwrap();

        let loaded = SubmissionResults::open(&path).await.unwrap();
        assert_eq!(loaded.revision.as_deref(), Some("a1b2c3"));
        assert_eq!(loaded.submitted, results.submitted);
        assert_eq!(loaded.get("basic"), results.get("basic"));
        let leak = loaded.get("valgrind").unwrap();
        assert_eq!(leak.outcome.kind.name(), "MemoryLeak");
        assert_eq!(leak.outcome.detail(), Some("definitely lost"));
        assert_eq!(loaded.points(), (9, 11));
        assert!(!dir.path().join("grade-results.json~").exists());
    }

    #[tokio::test]
    async fn test_delete_and_adjustment() {
        let dir = tempfile::tempdir().unwrap();
        let mut results = SubmissionResults::open(dir.path().join("r.json")).await.unwrap();
        results.set("basic", Some(result("basic", 5, Outcome::correct(5)))).await.unwrap();
        results.set_adjustment(-2, "late penalty").await.unwrap();

        assert_eq!(results.test_keys(), vec!["basic"]);
        assert_eq!(results.points(), (3, 5));
        assert_eq!(results.adjustment().unwrap().score_string(), "-2");

        results.set("basic", None).await.unwrap();
        assert!(results.get("basic").is_none());
        results.set_adjustment(0, "").await.unwrap();
        assert!(results.adjustment().is_none());
    }

    #[tokio::test]
    async fn test_finish_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut results = SubmissionResults::open(dir.path().join("r.json")).await.unwrap();
        assert!(matches!(results.set_released(true).await, Err(StoreError::NotFinished)));

        results.set("review", Some(result("review", 3, Outcome::deferred()))).await.unwrap();
        assert_eq!(results.summary(), "0/0 (1 deferred)");
        assert!(!results.mark_finished("ta", Utc::now()).await.unwrap());
        assert!(results.finished.is_none());

        results
            .set("review", Some(result("review", 3, Outcome::reviewed(3, true, "clear code"))))
            .await
            .unwrap();
        assert!(results.mark_finished("ta", Utc::now()).await.unwrap());
        results.set_released(true).await.unwrap();

        let loaded = SubmissionResults::open(results.path()).await.unwrap();
        assert!(loaded.released);
        assert_eq!(loaded.grader.as_deref(), Some("ta"));
        assert_eq!(loaded.summary(), "3/3");
    }

    #[tokio::test]
    async fn test_deferred_write_reopens_finished_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut results = SubmissionResults::open(dir.path().join("r.json")).await.unwrap();
        results.set("basic", Some(result("basic", 5, Outcome::correct(5)))).await.unwrap();
        assert!(results.mark_finished("ta", Utc::now()).await.unwrap());
        results.set_released(true).await.unwrap();

        // rewriting the same result leaves the store finished
        results.set("basic", Some(result("basic", 5, Outcome::correct(5)))).await.unwrap();
        assert!(results.released);

        results.set("review", Some(result("review", 3, Outcome::deferred()))).await.unwrap();
        let loaded = SubmissionResults::open(results.path()).await.unwrap();
        assert!(loaded.has_deferred());
        assert!(loaded.finished.is_none());
        assert!(loaded.grader.is_none());
        assert!(!loaded.released);
    }

    #[tokio::test]
    async fn test_remove_stale() {
        let dir = tempfile::tempdir().unwrap();
        let mut results = SubmissionResults::open(dir.path().join("r.json")).await.unwrap();
        results.set("basic", Some(result("basic", 5, Outcome::correct(5)))).await.unwrap();
        results.set("old", Some(result("old", 2, Outcome::correct(2)))).await.unwrap();
        results.set_adjustment(1, "bonus").await.unwrap();

        let removed = results.remove_stale(&["basic"]).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(results.adjustment().is_some());
    }

    #[tokio::test]
    async fn test_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("elsewhere.json");
        std::fs::write(&target, "{\"version\": 1}").unwrap();
        let link = dir.path().join("r.json");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut results = SubmissionResults::open(&link).await.unwrap();
        assert!(matches!(
            results.set("basic", Some(result("basic", 1, Outcome::correct(1)))).await,
            Err(StoreError::Symlink(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_store_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SubmissionResults::open(&path).await,
            Err(StoreError::Parse { .. })
        ));
    }
}
