//! Memcheck report scraper
//!
//! Matched to the text report of memcheck 3.x. Only pass/fail facts and the
//! heap totals are extracted.

use lazy_regex::{regex, regex_captures};

use super::ToolAnomaly;
use crate::text::{grep_lines, parse_with_commas};

/// Facts scraped from one memcheck report
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryReport {
    /// Error summary and offending lines, `None` when error free
    pub errors: Option<String>,
    /// Leak summary, `None` when nothing leaked
    pub leaks: Option<String>,
    pub alloc_count: u64,
    pub byte_count: u64,
    /// The `total heap usage` figures as printed
    pub heap_summary: String,
}

impl MemoryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_none() && self.leaks.is_none()
    }
}

/// Scrape a memcheck log.
///
/// `exit_code` is the run's exit code; the checker exits with
/// `error_exitcode` when it found errors.
pub fn scrape_memcheck_report(
    log: &str,
    exit_code: i32,
    error_exitcode: i32,
) -> Result<MemoryReport, ToolAnomaly> {
    if log.contains("report this bug to: www.valgrind.org") {
        return Err(ToolAnomaly::ToolCrashed);
    }
    if log.contains("Valgrind's memory management: out of memory") {
        return Err(ToolAnomaly::ToolOutOfMemory);
    }
    if log.contains("Fatal error at startup") {
        return Err(ToolAnomaly::ToolStartup);
    }

    let error_free = exit_code != error_exitcode && log.contains(" 0 errors from 0 contexts");
    let errors = if error_free {
        None
    } else {
        let summary = regex_captures!(r"(==\d+==\s+ERROR SUMMARY.*)", log)
            .map(|(_, line)| line)
            .ok_or(ToolAnomaly::MalformedMemoryReport("ERROR SUMMARY"))?;
        let offending = grep_lines(
            regex!(r"Conditional|Invalid|uninitialised|Address|destination overlap"),
            log,
        );
        Some(format!("{}\n{}", summary, offending.join("\n")))
    };

    let leak_free = log.contains("All heap blocks were freed -- no leaks are possible");
    let leaks = if leak_free {
        None
    } else {
        let section = regex_captures!(r"(?s)(==\d+==\s+LEAK SUMMARY.*)==\d+==\s+\n", log)
            .map(|(_, section)| section)
            .ok_or(ToolAnomaly::MalformedMemoryReport("LEAK SUMMARY"))?;
        let category = regex!(r"\s+([\w\s]+): ([\d,]+) bytes");
        let real_leaks = section.lines().any(|line| {
            category
                .captures(line)
                .map(|caps| caps[1].trim() != "suppressed" && &caps[2] != "0")
                .unwrap_or(false)
        });
        real_leaks.then(|| section.to_string())
    };

    let heap_summary = regex_captures!(r"total heap usage(.*bytes allocated)", log)
        .map(|(_, s)| s.to_string())
        .ok_or(ToolAnomaly::MalformedMemoryReport("total heap usage"))?;
    let alloc_count = regex_captures!(r"((?:\d|,)+) allocs,", &heap_summary)
        .and_then(|(_, n)| parse_with_commas(n))
        .ok_or(ToolAnomaly::MalformedMemoryReport("total heap usage"))?;
    let byte_count = regex_captures!(r"((?:\d|,)+) bytes allocated", &heap_summary)
        .and_then(|(_, n)| parse_with_commas(n))
        .ok_or(ToolAnomaly::MalformedMemoryReport("total heap usage"))?;

    Ok(MemoryReport {
        errors,
        leaks,
        alloc_count,
        byte_count,
        heap_summary,
    })
}
