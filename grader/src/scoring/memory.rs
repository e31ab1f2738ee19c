//! Memory-correctness policy
//!
//! Scores a memcheck report. Leaks and errors are worth separate portions of
//! the test's points. A report from a run that looks incomplete is only
//! trusted according to the [`Context`].

use regex::Regex;

use super::{doubtful, rejected, summarize_execution, summarize_mismatch, unevaluable, Context, Judgment, Review};
use crate::harness::ExecutionRecord;
use crate::outcome::Outcome;
use crate::scrape::{scrape_memcheck_report, MemoryReport};

/// Inputs to [`score_memcheck`]
#[derive(Debug, Clone)]
pub struct MemcheckRun<'a> {
    pub record: &'a ExecutionRecord,
    /// Output the run should have produced. `None` when output is scored
    /// by other tests and only the exit status can cast doubt.
    pub solution_output: Option<&'a str>,
    pub reject: Option<&'a Regex>,
    pub leak_pts: i32,
    pub total_pts: i32,
    /// Exit code the checker uses to flag errors
    pub error_exitcode: i32,
}

impl MemcheckRun<'_> {
    pub fn error_pts(&self) -> i32 {
        self.total_pts - self.leak_pts
    }
}

/// Verdict for a report taken at face value
pub fn verdict(report: &MemoryReport, leak_pts: i32, error_pts: i32) -> Outcome {
    match (&report.errors, &report.leaks) {
        (Some(errors), Some(leaks)) => Outcome::memory_both(format!("{}\n{}\n", errors, leaks)),
        (Some(errors), None) => Outcome::memory_error(leak_pts, format!("{}\n", errors)),
        (None, Some(leaks)) => Outcome::memory_leak(error_pts, format!("{}\n", leaks)),
        (None, None) => Outcome::correct(leak_pts + error_pts).with_short("Valgrind report was clean"),
    }
}

pub fn score_memcheck(run: &MemcheckRun<'_>, context: Context) -> Judgment {
    let log = run.record.aux_log.as_deref().unwrap_or_default();
    let report = match scrape_memcheck_report(log, run.record.exit_code, run.error_exitcode) {
        Ok(report) => report,
        Err(anomaly) => return unevaluable(context, "memory correctness", &anomaly).into(),
    };

    let output = &run.record.output;
    if rejected(run.reject, output) {
        return Outcome::inconclusive().into();
    }

    let trusted = verdict(&report, run.leak_pts, run.error_pts());
    let expected = run.solution_output.unwrap_or(output);
    let findings = summarize_execution(output, expected, run.record.exit_code, Some(run.error_exitcode));

    match findings {
        // a report with problems in it is believable however the run went
        Some(findings) if report.errors.is_none() || report.leaks.is_none() => {
            let mut evidence = format!(
                "We got a Valgrind report, but execution errors cast doubt on its reliability.\nErrors: {}\n",
                findings
            );
            if findings.contains("incorrect output") {
                evidence.push_str(&summarize_mismatch(output, expected, None));
            }
            evidence.push('\n');
            evidence.push_str(log);
            doubtful(context, findings, trusted, |trusted| {
                Review::trust(
                    "Should we trust the Valgrind report for this run?",
                    evidence,
                    trusted,
                    "Valgrind report",
                )
            })
        }
        _ => trusted.into(),
    }
}
