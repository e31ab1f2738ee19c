//! Callgrind report scraper

use lazy_regex::regex_captures;

use super::ToolAnomaly;
use crate::text::parse_with_commas;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstructionReport {
    /// Instructions executed (`I refs`)
    pub instructions: u64,
}

pub fn scrape_callgrind_report(log: &str) -> Result<InstructionReport, ToolAnomaly> {
    if log.contains("report this bug to: www.valgrind.org") {
        return Err(ToolAnomaly::ToolCrashed);
    }
    if log.contains("Valgrind's memory management: out of memory") {
        return Err(ToolAnomaly::ToolOutOfMemory);
    }
    if log.contains("Fatal error at startup") {
        return Err(ToolAnomaly::ToolStartup);
    }

    let instructions = regex_captures!(r"I\s+refs:\s+((?:\d|,)+)", log)
        .and_then(|(_, n)| parse_with_commas(n))
        .or_else(|| regex_captures!(r"Collected\s*:\s*(\d+)", log).and_then(|(_, n)| n.parse().ok()))
        .ok_or(ToolAnomaly::MalformedInstructionReport)?;
    Ok(InstructionReport { instructions })
}
