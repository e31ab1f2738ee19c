//! Efficiency policies
//!
//! Compare a submission's heap use, instruction count or CPU time with the
//! solution's. A submission passes while it stays within `multiplier` times
//! the solution's figure. More usage never earns more points.

use regex::Regex;

use super::{doubtful, rejected, summarize_execution, unevaluable, Context, Judgment, Review};
use crate::harness::ExecutionRecord;
use crate::outcome::Outcome;
use crate::scrape::{
    scrape_callgrind_report, scrape_memcheck_report, scrape_timing_report, MemoryReport, ToolAnomaly,
};
use crate::text::with_commas;

/// Ratio above which dry runs point out heavy but passing memory use
const DRYRUN_NOTICE_RATIO: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct EfficiencyRun<'a> {
    pub record: &'a ExecutionRecord,
    pub solution_output: &'a str,
    pub reject: Option<&'a Regex>,
    pub total_pts: i32,
    pub multiplier: f64,
}

impl EfficiencyRun<'_> {
    /// `tool_error_code` is the exit the measuring tool uses for its own
    /// findings, if it has one
    fn findings(&self, tool_error_code: Option<i32>) -> Option<String> {
        summarize_execution(
            &self.record.output,
            self.solution_output,
            self.record.exit_code,
            tool_error_code,
        )
    }

    fn log(&self) -> &str {
        self.record.aux_log.as_deref().unwrap_or_default()
    }
}

/// Score heap use against the solution's memcheck report.
///
/// A malformed solution report cannot be blamed on the submission and is
/// returned as an error.
pub fn score_memory_use(
    run: &EfficiencyRun<'_>,
    solution_log: &str,
    error_exitcode: i32,
    context: Context,
) -> Result<Judgment, ToolAnomaly> {
    let soln = scrape_memcheck_report(solution_log, 0, error_exitcode)?;
    let usage = match scrape_memcheck_report(run.log(), run.record.exit_code, error_exitcode) {
        Ok(report) => report,
        Err(anomaly) => return Ok(unevaluable(context, "memory use", &anomaly).into()),
    };
    if rejected(run.reject, &run.record.output) {
        return Ok(Outcome::inconclusive().into());
    }
    Ok(judge_memory_use(run, &usage, &soln, Some(error_exitcode), context))
}

fn judge_memory_use(
    run: &EfficiencyRun<'_>,
    usage: &MemoryReport,
    soln: &MemoryReport,
    error_exitcode: Option<i32>,
    context: Context,
) -> Judgment {
    let bytes = usage.byte_count;
    let allocs = usage.alloc_count;
    let ratio = bytes as f64 / soln.byte_count.max(1) as f64;
    let ratio2 = allocs as f64 / soln.alloc_count.max(1) as f64;

    let over = if ratio > run.multiplier {
        Some(format!(
            "Memory use {} bytes is {:.1}x soln ",
            with_commas(bytes),
            ratio
        ))
    } else if ratio2 > run.multiplier {
        Some(format!(
            "Memory use {} allocs is {:.1}x soln ",
            with_commas(allocs),
            ratio2
        ))
    } else {
        None
    };
    let findings = run.findings(error_exitcode);

    let Some(over) = over else {
        let passed = Outcome::correct(run.total_pts);
        let passed = if context == Context::Dryrun
            && (ratio > DRYRUN_NOTICE_RATIO || ratio2 > DRYRUN_NOTICE_RATIO)
        {
            passed.with_short(format!(
                "Memory use {} bytes is {:.1}x soln, {} allocs is {:.1}x solution",
                with_commas(bytes),
                ratio,
                with_commas(allocs),
                ratio2
            ))
        } else {
            passed.with_short("Passed, memory use on par with expectation")
        };
        return match findings {
            Some(findings) => {
                let short = format!(
                    "Memory use ({} bytes is {:.1}x soln) {}",
                    with_commas(bytes),
                    ratio,
                    findings
                );
                let evidence = format!("{}\n{}", short, run.log());
                doubtful(context, short, passed, |trusted| {
                    Review::trust(
                        "Should we trust the memory usage reported for this run?",
                        evidence,
                        trusted,
                        "memory usage",
                    )
                })
            }
            None => passed.into(),
        };
    };

    let short = format!("{}{}", over, findings.unwrap_or_default());
    Outcome::resource_exceeded(0)
        .with_short(short.trim_end())
        .into()
}

/// Score instructions executed against the solution's Callgrind report
pub fn score_instruction_use(
    run: &EfficiencyRun<'_>,
    solution_log: &str,
    error_exitcode: i32,
    context: Context,
) -> Result<Judgment, ToolAnomaly> {
    let soln = scrape_callgrind_report(solution_log)?;
    let usage = match scrape_callgrind_report(run.log()) {
        Ok(report) => report,
        Err(anomaly) => return Ok(unevaluable(context, "instruction count", &anomaly).into()),
    };
    if rejected(run.reject, &run.record.output) {
        return Ok(Outcome::inconclusive().into());
    }

    let ratio = usage.instructions as f64 / soln.instructions.max(1) as f64;
    let findings = run.findings(Some(error_exitcode));
    if ratio <= run.multiplier {
        let passed =
            Outcome::correct(run.total_pts).with_short("Passed, instruction count on par with expectation");
        return Ok(match findings {
            Some(findings) => {
                let short = format!(
                    "Instruction count ({} is {:.1}x soln) {}",
                    with_commas(usage.instructions),
                    ratio,
                    findings
                );
                let evidence = format!("{}\n{}", short, run.log());
                doubtful(context, short, passed, |trusted| {
                    Review::trust(
                        "Should we trust the instruction count reported for this run?",
                        evidence,
                        trusted,
                        "instruction count",
                    )
                })
            }
            None => passed.into(),
        });
    }

    let short = format!(
        "Instruction count {} is {:.1}x soln {}",
        with_commas(usage.instructions),
        ratio,
        findings.unwrap_or_default()
    );
    Ok(Outcome::resource_exceeded(0).with_short(short.trim_end()).into())
}

/// Score user CPU time against the solution's
///
/// Solution times below `floor_secs` count as `floor_secs`, so runs too
/// short to measure are not judged on timer noise.
pub fn score_time_use(
    run: &EfficiencyRun<'_>,
    solution_secs: f64,
    floor_secs: f64,
    context: Context,
) -> Judgment {
    let usage = match scrape_timing_report(run.log()) {
        Ok(report) => report,
        Err(anomaly) => return unevaluable(context, "time use", &anomaly).into(),
    };
    if rejected(run.reject, &run.record.output) {
        return Outcome::inconclusive().into();
    }

    // `time -p` reports hundredths
    let ratio = usage.user_secs / solution_secs.max(floor_secs).max(0.01);
    let findings = run.findings(None);

    if ratio <= run.multiplier {
        let passed = Outcome::correct(run.total_pts).with_short("Passed, time on par with expectation");
        return match findings {
            Some(findings) => {
                let short = format!(
                    "Time use ({} secs is {:.1}x soln) {}",
                    usage.user_secs, ratio, findings
                );
                let evidence = format!("{}\n{}", short, run.log());
                doubtful(context, short, passed, |trusted| {
                    Review::trust(
                        "Should we trust the time usage reported for this run?",
                        evidence,
                        trusted,
                        "time usage",
                    )
                })
            }
            None => passed.into(),
        };
    }

    let short = format!(
        "Time use {} secs is {:.1}x soln {}",
        usage.user_secs,
        ratio,
        findings.unwrap_or_default()
    );
    Outcome::resource_exceeded(0)
        .with_short(short.trim_end())
        .into()
}

/// Wall-clock timeout for a timed run, from the solution's elapsed time:
/// enough for the slowest passing submission plus slack for startup
pub fn time_use_timeout(solution_elapsed_secs: f64, multiplier: f64) -> u64 {
    ((multiplier + 2.0) * solution_elapsed_secs).ceil().max(1.0) as u64
}
