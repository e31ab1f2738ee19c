//! Grader configuration
//!
//! Course-wide settings for execution and scoring, assembled once at startup
//! from an optional TOML file and `GRADER_*` environment overrides.

use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },
    #[error("grader configuration already initialized")]
    AlreadyInitialized,
}

/// Immutable grader configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Timeout applied when a test names none (seconds)
    pub default_timeout_secs: u64,
    /// Extra CPU seconds between the soft and hard CPU rlimit
    pub cpu_grace_secs: u64,
    /// Smallest output cap for a submission run (bytes)
    pub min_output_cap: usize,
    /// Output cap for solution runs (bytes)
    pub solution_output_cap: usize,
    /// Path of the memory-checking tool
    pub memcheck_path: String,
    /// `--version` strings whose report format the scraper understands
    pub memcheck_versions: Vec<String>,
    /// Exit code the memory checker uses when it found errors
    pub memcheck_error_exitcode: i32,
    /// Path of the POSIX timing tool
    pub timing_path: String,
    /// Resource-use multiplier accepted by efficiency tests
    pub efficiency_multiplier: f64,
    /// Smallest solution CPU time a timed test compares against (seconds)
    pub time_use_floor_secs: f64,
    /// Fuzzy-match acceptance ratio for output comparison (1.0 = exact)
    pub accept_ratio: f64,
    /// Fuzzy-match acceptance ratio for error-message comparison
    pub handling_accept_ratio: f64,
    /// Delay between lock attempts (ms)
    pub lock_retry_ms: u64,
    /// Lock attempts before giving up
    pub lock_max_attempts: u32,
    /// Directory (inside the solution dir) holding cached solution runs
    pub solution_cache_dir: String,
    /// Whether this process may refresh the solution cache
    pub write_solution_cache: bool,
    /// File name of the per-submission result store
    pub results_filename: String,
    /// Name recorded as grader when a submission is finished
    pub grader_name: String,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 45,
            cpu_grace_secs: 15,
            min_output_cap: 100_000,
            solution_output_cap: 1_000_000_000,
            memcheck_path: "/usr/bin/valgrind".to_string(),
            memcheck_versions: vec![
                "valgrind-3.15.0".to_string(),
                "valgrind-3.18.1".to_string(),
                "valgrind-3.19.0".to_string(),
                "valgrind-3.22.0".to_string(),
            ],
            memcheck_error_exitcode: 88,
            timing_path: "/usr/bin/time".to_string(),
            efficiency_multiplier: 3.0,
            time_use_floor_secs: 0.1,
            accept_ratio: 1.0,
            handling_accept_ratio: 0.95,
            lock_retry_ms: 100,
            lock_max_attempts: 600,
            solution_cache_dir: "soln_output".to_string(),
            write_solution_cache: false,
            results_filename: "grade-results.json".to_string(),
            grader_name: "autograder".to_string(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from an optional TOML file, then apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `GRADER_*` environment variable overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
            match std::env::var(key) {
                Ok(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Env {
                        key: key.to_string(),
                        value,
                    }),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parsed("GRADER_DEFAULT_TIMEOUT_SECS")? {
            self.default_timeout_secs = v;
        }
        if let Some(v) = parsed("GRADER_CPU_GRACE_SECS")? {
            self.cpu_grace_secs = v;
        }
        if let Some(v) = parsed("GRADER_MIN_OUTPUT_CAP")? {
            self.min_output_cap = v;
        }
        if let Some(v) = parsed("GRADER_EFFICIENCY_MULTIPLIER")? {
            self.efficiency_multiplier = v;
        }
        if let Ok(v) = std::env::var("GRADER_MEMCHECK_PATH") {
            self.memcheck_path = v;
        }
        if let Ok(v) = std::env::var("GRADER_TIMING_PATH") {
            self.timing_path = v;
        }
        if let Some(v) = parsed::<String>("GRADER_WRITE_SOLUTION_CACHE")? {
            self.write_solution_cache = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("GRADER_NAME") {
            self.grader_name = v;
        }
        Ok(())
    }

    /// Hard CPU limit for a run with the given soft limit
    pub fn cpu_hard_limit(&self, soft_secs: u64) -> u64 {
        soft_secs + self.cpu_grace_secs
    }
}

/// Global grader configuration
static GRADER_CONFIG: OnceLock<GraderConfig> = OnceLock::new();

/// Install the process-wide configuration
pub fn init_config(config: GraderConfig) -> Result<&'static GraderConfig, ConfigError> {
    GRADER_CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    let config = get_config();
    info!(
        "Grader configured: default timeout {}s, output cap {} bytes, multiplier {}x",
        config.default_timeout_secs, config.min_output_cap, config.efficiency_multiplier
    );
    Ok(config)
}

/// Get the process-wide configuration
pub fn get_config() -> &'static GraderConfig {
    GRADER_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<GraderConfig> = OnceLock::new();

        warn!("Grader configuration not initialized, using default");
        DEFAULT.get_or_init(GraderConfig::default)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GraderConfig::default();
        assert_eq!(config.default_timeout_secs, 45);
        assert_eq!(config.min_output_cap, 100_000);
        assert_eq!(config.memcheck_error_exitcode, 88);
        assert_eq!(config.time_use_floor_secs, 0.1);
        assert_eq!(config.cpu_hard_limit(10), 25);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_timeout_secs = 5\nefficiency_multiplier = 2.5").unwrap();

        let config = GraderConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.default_timeout_secs, 5);
        assert_eq!(config.efficiency_multiplier, 2.5);
        assert_eq!(config.results_filename, "grade-results.json");
    }

    #[test]
    fn test_load_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_timeout_secs = \"soon\"").unwrap();

        assert!(matches!(
            GraderConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }
}
