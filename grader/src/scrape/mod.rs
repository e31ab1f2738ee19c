//! Report scrapers
//!
//! Extract pass/fail facts from the text reports of the external memory
//! checker, instruction counter and timing tool. A report that cannot be read is a
//! [`ToolAnomaly`], never a zero or a pass.

pub mod callgrind;
pub mod memcheck;
pub mod timing;

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::GraderConfig;

pub use callgrind::{scrape_callgrind_report, InstructionReport};
pub use memcheck::{scrape_memcheck_report, MemoryReport};
pub use timing::{scrape_timing_report, TimingReport};

/// A tool report that cannot be evaluated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolAnomaly {
    #[error("submission crashed Valgrind")]
    ToolCrashed,
    #[error("submission exhausted Valgrind address space")]
    ToolOutOfMemory,
    #[error("fatal error on Valgrind startup")]
    ToolStartup,
    #[error("malformed Valgrind log (could not scrape {0})")]
    MalformedMemoryReport(&'static str),
    #[error("malformed Callgrind log (could not scrape instruction count)")]
    MalformedInstructionReport,
    #[error("malformed time result")]
    MalformedTimingReport,
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },
    #[error("{tool} version {found} is not supported (expected one of {expected})")]
    UnsupportedVersion {
        tool: String,
        found: String,
        expected: String,
    },
}

/// Check that the installed memory checker produces reports we can scrape
pub async fn verify_memcheck_version(config: &GraderConfig) -> Result<String, ToolAnomaly> {
    let output = Command::new(&config.memcheck_path)
        .arg("--version")
        .output()
        .await
        .map_err(|e| ToolAnomaly::Unavailable {
            tool: config.memcheck_path.clone(),
            reason: e.to_string(),
        })?;

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !config.memcheck_versions.iter().any(|v| v == &version) {
        return Err(ToolAnomaly::UnsupportedVersion {
            tool: config.memcheck_path.clone(),
            found: version,
            expected: config.memcheck_versions.join(", "),
        });
    }
    info!("Memory checker {} is {}", config.memcheck_path, version);
    Ok(version)
}

/// Check that the timing tool exists and is executable
pub fn verify_timing_tool(config: &GraderConfig) -> Result<(), ToolAnomaly> {
    use std::os::unix::fs::PermissionsExt;

    let path = Path::new(&config.timing_path);
    let meta = std::fs::metadata(path).map_err(|e| ToolAnomaly::Unavailable {
        tool: config.timing_path.clone(),
        reason: e.to_string(),
    })?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(ToolAnomaly::Unavailable {
            tool: config.timing_path.clone(),
            reason: "not an executable file".to_string(),
        });
    }
    Ok(())
}
