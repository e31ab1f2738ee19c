//! Test variant dispatch
//!
//! A [`TestCase`] is a command template plus a [`TestKind`]. The kind decides
//! how the command is wrapped, whether the run writes a tool log, which
//! exits the simple-failure triage claims, and which scoring policy judges
//! the run. Kinds that compare against the reference solution run it first,
//! through the [`SolutionCache`].
//!
//! The cases module does NOT:
//! - Ask review questions (the caller resolves [`Judgment::NeedsReview`])
//! - Store results

pub mod custom;
pub mod review;
pub mod solution;

use std::collections::HashMap;
use std::path::Path;

use lazy_regex::regex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::GraderConfig;
use crate::harness::template::{core_cmd_count, display_form, expand_vars, make_wrapper_explicit, CORE_CMD};
use crate::harness::{execute, ExecutionError, ExecutionRecord, ExecutionSpec, OutputLimit};
use crate::lock::LockError;
use crate::outcome::{Outcome, TestIdentity};
use crate::scoring::diff::score_output_match;
use crate::scoring::efficiency::{
    score_instruction_use, score_memory_use, score_time_use, time_use_timeout, EfficiencyRun,
};
use crate::scoring::filters::{apply_filter, PostFilter};
use crate::scoring::handling::{score_handling, HandlingCheck, DEFAULT_EXPECTED_BEHAVIOR};
use crate::scoring::memory::{score_memcheck, MemcheckRun};
use crate::scoring::requirement::{score_requirement, RequirementCheck};
use crate::scoring::triage::{memcheck_abort, simple_failure, FailOn, TimeoutFacts};
use crate::scoring::{compile_reject, match_ok, rejected, Context, Judgment};
use crate::scrape::scrape_timing_report;
use crate::text::{abbreviate_default, grep_lines, strip_ansi};

pub use custom::CustomTemplate;
pub use review::{JsonReviews, NoReviews, ReviewLookup, ReviewRecord};
pub use solution::SolutionCache;

/// Build command used when a build test names none
pub const DEFAULT_BUILD_COMMAND: &str = "make clean && make";

pub const DEFAULT_STYLE_COMMAND: &str = "make tidy";

const STYLE_CHECK_ADVICE: &str = ">> Some automated style checks failed. You aren't guaranteed to lose \
points for this, but you should probably try fixing these issues.";

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The reference solution misbehaved; the operator must fix it
    #[error("{0}")]
    Solution(String),

    #[error("invalid test definition: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("review lookup failed: {0}")]
    Review(String),
}

fn default_true() -> bool {
    true
}

/// What a test checks and how it is scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestKind {
    /// Output and/or exit code known in advance
    ExpectedOutput {
        #[serde(default)]
        expected_output: Option<String>,
        #[serde(default)]
        required_exit_code: Option<i32>,
        #[serde(default)]
        incorrect_message: Option<String>,
    },
    /// Output must match the solution's
    OutputDiffSoln {
        #[serde(default)]
        accept_ratio: Option<f64>,
        /// Derive the timeout as this multiple of the solution's run time
        #[serde(default)]
        solution_timeout_multiplier: Option<f64>,
        /// Show matched output back in sanity reports
        #[serde(default)]
        show_match: bool,
        /// `<exe>_soln` sits beside the submission instead of in the
        /// solution directory
        #[serde(default)]
        local_solution: bool,
    },
    /// Error must be detected and reported usefully
    GracefullyHandled {
        attempted_action: String,
        #[serde(default)]
        expected_behavior: Option<String>,
        #[serde(default)]
        msg_regex: Option<String>,
        #[serde(default)]
        accept_ratio: Option<f64>,
    },
    MemoryCheck {
        /// Points for no leaks; the rest of the test's points are for no errors
        #[serde(default)]
        leak_pts: i32,
        /// Mismatched output makes a clean report doubtful
        #[serde(default = "default_true")]
        check_output: bool,
    },
    MemoryUse {
        #[serde(default)]
        multiplier: Option<f64>,
    },
    TimeUse {
        #[serde(default)]
        multiplier: Option<f64>,
        /// Solution CPU seconds; measured from a timed solution run when unset
        #[serde(default)]
        solution_secs: Option<f64>,
    },
    /// Instructions executed, counted by Callgrind
    InstructionCount {
        #[serde(default)]
        multiplier: Option<f64>,
    },
    BuildClean,
    /// Automated style checks (`make tidy`); issues are reported, not halting
    StyleCheck,
    Requirement {
        #[serde(default)]
        failure_msg: Option<String>,
        #[serde(default)]
        deduction: i32,
    },
    /// Scored from a human code review
    GraderReview,
}

impl TestKind {
    pub fn name(&self) -> &'static str {
        match self {
            TestKind::ExpectedOutput { .. } => "expected_output",
            TestKind::OutputDiffSoln { .. } => "output_diff_soln",
            TestKind::GracefullyHandled { .. } => "gracefully_handled",
            TestKind::MemoryCheck { .. } => "memory_check",
            TestKind::MemoryUse { .. } => "memory_use",
            TestKind::TimeUse { .. } => "time_use",
            TestKind::InstructionCount { .. } => "instruction_count",
            TestKind::BuildClean => "build_clean",
            TestKind::StyleCheck => "style_check",
            TestKind::Requirement { .. } => "requirement",
            TestKind::GraderReview => "grader_review",
        }
    }

    /// Expansion of `$core_cmd` for this kind
    pub fn wrapper(&self, config: &GraderConfig) -> String {
        let memcheck = |extra: &str| {
            format!(
                "{} {} --trace-children=yes --tool=memcheck --leak-check=summary {}--error-exitcode={} --log-file=$logpath",
                CORE_CMD, config.memcheck_path, extra, config.memcheck_error_exitcode
            )
        };
        match self {
            TestKind::MemoryCheck { .. } => memcheck("--show-reachable=yes "),
            TestKind::MemoryUse { .. } => memcheck(""),
            TestKind::TimeUse { .. } => format!("{} {} -p -o $logpath", CORE_CMD, config.timing_path),
            TestKind::InstructionCount { .. } => format!(
                "{} {} --tool=callgrind --callgrind-out-file=/dev/null --error-exitcode={} --log-file=$logpath",
                CORE_CMD, config.memcheck_path, config.memcheck_error_exitcode
            ),
            _ => CORE_CMD.to_string(),
        }
    }

    pub fn needs_aux_log(&self) -> bool {
        matches!(
            self,
            TestKind::MemoryCheck { .. }
                | TestKind::MemoryUse { .. }
                | TestKind::TimeUse { .. }
                | TestKind::InstructionCount { .. }
        )
    }

    /// Exits the simple-failure triage claims before scoring
    pub fn fail_on(&self) -> FailOn {
        match self {
            TestKind::ExpectedOutput { .. } | TestKind::OutputDiffSoln { .. } => FailOn::SignalsAndTimeout,
            TestKind::GracefullyHandled { .. }
            | TestKind::MemoryCheck { .. }
            | TestKind::MemoryUse { .. }
            | TestKind::TimeUse { .. }
            | TestKind::InstructionCount { .. }
            | TestKind::Requirement { .. } => FailOn::Timeout,
            TestKind::BuildClean | TestKind::StyleCheck | TestKind::GraderReview => FailOn::NoExecOnly,
        }
    }

    pub fn needs_solution(&self) -> bool {
        match self {
            TestKind::OutputDiffSoln { .. }
            | TestKind::GracefullyHandled { .. }
            | TestKind::MemoryUse { .. }
            | TestKind::TimeUse { .. }
            | TestKind::InstructionCount { .. } => true,
            TestKind::MemoryCheck { check_output, .. } => *check_output,
            _ => false,
        }
    }

    /// The solution runs under the same tool as the submission
    fn solution_uses_tool(&self) -> bool {
        matches!(
            self,
            TestKind::MemoryUse { .. } | TestKind::TimeUse { .. } | TestKind::InstructionCount { .. }
        )
    }

    /// Where the solution executables for this kind live
    fn solution_dir<'a>(&self, env: &TestEnv<'a>) -> &'a Path {
        match self {
            TestKind::OutputDiffSoln {
                local_solution: true,
                ..
            } => env.grading_dir,
            _ => env.solution_dir,
        }
    }

    /// Results only a person can produce; pregrade leaves these alone
    pub fn is_interactive_only(&self) -> bool {
        matches!(self, TestKind::GraderReview)
    }
}

/// One test from a suite file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Shell template; `$exe` names an executable, `$core_cmd` marks the
    /// wrapped invocation
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub executables: Vec<String>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub total_pts: i32,
    #[serde(default)]
    pub postfilter: Option<PostFilter>,
    /// Known-bad output. A prefix regex for most kinds; for graceful
    /// handling, output that shows the error went undetected.
    #[serde(default)]
    pub reject: Option<String>,
    #[serde(flatten)]
    pub kind: TestKind,
}

impl TestCase {
    pub fn identity(&self) -> TestIdentity {
        TestIdentity {
            name: self.name.clone(),
            description: self.description.clone(),
            total_pts: self.total_pts,
        }
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let invalid = |msg: String| Err(RunError::Manifest(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(RunError::Manifest("test without a name".to_string()));
        }
        if self.timeout == Some(0) {
            return invalid("timeout must be positive".to_string());
        }
        if core_cmd_count(&self.command) > 1 {
            return invalid("at most one $core_cmd is allowed".to_string());
        }
        let runs_command = !matches!(
            self.kind,
            TestKind::BuildClean | TestKind::StyleCheck | TestKind::GraderReview
        );
        if runs_command && self.command.trim().is_empty() {
            return invalid("command is required".to_string());
        }
        if let Some(reject) = &self.reject {
            if !matches!(self.kind, TestKind::GracefullyHandled { .. }) {
                if let Err(e) = compile_reject(reject) {
                    return invalid(format!("bad reject pattern: {}", e));
                }
            }
        }

        match &self.kind {
            TestKind::ExpectedOutput {
                expected_output,
                required_exit_code,
                ..
            } if expected_output.is_none() && required_exit_code.is_none() => {
                invalid("expected_output or required_exit_code is required".to_string())
            }
            TestKind::GracefullyHandled {
                attempted_action,
                msg_regex,
                ..
            } => {
                if attempted_action.trim().is_empty() {
                    return invalid("attempted_action is required".to_string());
                }
                if let Some(Err(e)) = msg_regex.as_deref().map(Regex::new) {
                    return invalid(format!("bad msg_regex: {}", e));
                }
                Ok(())
            }
            TestKind::MemoryCheck { leak_pts, .. } if *leak_pts < 0 || *leak_pts > self.total_pts => {
                invalid(format!("leak_pts {} is outside 0..={}", leak_pts, self.total_pts))
            }
            TestKind::MemoryUse { multiplier }
            | TestKind::TimeUse { multiplier, .. }
            | TestKind::InstructionCount { multiplier }
                if multiplier.map(|m| m <= 0.0).unwrap_or(false) =>
            {
                invalid("multiplier must be positive".to_string())
            }
            TestKind::Requirement { deduction, .. } if *deduction < 0 => {
                invalid("deduction must not be negative".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Command with `$core_cmd` and executable references expanded
    pub fn expand_command(&self, wrapper: &str, exe_path: impl Fn(&str) -> String) -> String {
        let template = make_wrapper_explicit(&self.command, &self.executables);
        let mut vars: HashMap<String, String> = self
            .executables
            .iter()
            .map(|exe| (exe.clone(), exe_path(exe)))
            .collect();
        vars.insert(CORE_CMD.to_string(), wrapper.to_string());
        expand_vars(&template, &vars)
    }

    fn reject_regex(&self) -> Result<Option<Regex>, RunError> {
        self.reject
            .as_deref()
            .map(compile_reject)
            .transpose()
            .map_err(|e| RunError::Manifest(format!("{}: bad reject pattern: {}", self.name, e)))
    }
}

/// Where and why a test runs
#[derive(Debug, Clone, Copy)]
pub struct TestEnv<'a> {
    pub config: &'a GraderConfig,
    /// Directory holding the submission; commands run here
    pub grading_dir: &'a Path,
    /// Directory holding `<exe>_soln` reference executables
    pub solution_dir: &'a Path,
    pub context: Context,
}

/// Lifecycle of one test in a grading pass
#[derive(Debug, Clone, PartialEq)]
pub enum TestState {
    NotRun,
    Executing,
    Scored(Outcome),
    Deferred,
    ExecutionFailed(String),
}

impl TestState {
    /// State reached once a test's result is known
    pub fn settle(result: &Result<Outcome, RunError>) -> Self {
        match result {
            Ok(outcome) if outcome.is_deferred() => TestState::Deferred,
            Ok(outcome) => TestState::Scored(outcome.clone()),
            Err(e) => TestState::ExecutionFailed(e.to_string()),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, TestState::NotRun | TestState::Executing)
    }
}

/// A judged test, plus whether grading should stop after it
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub judgment: Judgment,
    pub halt: bool,
}

impl From<Outcome> for Scored {
    fn from(outcome: Outcome) -> Self {
        Self {
            judgment: Judgment::Final(outcome),
            halt: false,
        }
    }
}

impl From<Judgment> for Scored {
    fn from(judgment: Judgment) -> Self {
        Self {
            judgment,
            halt: false,
        }
    }
}

/// Run one test and judge it
pub async fn run_test(
    case: &TestCase,
    env: &TestEnv<'_>,
    cache: &mut SolutionCache,
    reviews: &dyn ReviewLookup,
) -> Result<Scored, RunError> {
    case.validate()?;
    info!("Running test {} ({})", case.name, case.kind.name());

    match &case.kind {
        TestKind::GraderReview => return recorded_review(case, reviews).await.map(Scored::from),
        TestKind::BuildClean | TestKind::StyleCheck => return run_build(case, env).await,
        _ => {}
    }

    let solution = if case.kind.needs_solution() {
        Some(run_solution(case, env, cache).await?)
    } else {
        None
    };
    let solution_secs = match (&case.kind, &solution) {
        (TestKind::TimeUse { solution_secs: Some(secs), .. }, _) => Some(*secs),
        (TestKind::TimeUse { .. }, Some(soln)) => Some(solution_user_secs(soln)?),
        (_, Some(soln)) => Some(soln.elapsed_secs),
        (_, None) => None,
    };

    let timeout = student_timeout(case, env.config, solution.as_ref().map(|s| s.elapsed_secs));
    let command = case.expand_command(&case.kind.wrapper(env.config), |exe| format!("./{}", exe));
    let mut spec = ExecutionSpec::new(env.grading_dir, &command)
        .with_timeout(timeout)
        .with_output_limit(OutputLimit::Submission {
            expected_len: solution.as_ref().map(|s| s.output.len()),
        });
    if case.kind.needs_aux_log() {
        spec = spec.with_aux_log();
    }
    let record = execute(&spec, env.config).await?;
    debug!(
        "Test {} exited {} after {:.2}s",
        case.name, record.exit_code, record.elapsed_secs
    );

    if matches!(case.kind, TestKind::MemoryCheck { .. }) {
        if let Some(aborted) = memcheck_abort(&record) {
            return Ok(aborted.into());
        }
    }
    let facts = TimeoutFacts {
        limit_secs: Some(timeout),
        solution_secs: solution_secs.filter(|_| matches!(case.kind, TestKind::OutputDiffSoln { .. })),
    };
    if let Some(failed) = simple_failure(&record, case.kind.fail_on(), facts) {
        return Ok(failed.into());
    }
    if case.kind.needs_aux_log() && record.aux_log.is_none() {
        return Ok(Outcome::not_executed("(no log file created)").into());
    }

    let record = record.with_output(apply_filter(case.postfilter, &record.output));
    let solution = solution.map(|s| s.with_output(apply_filter(case.postfilter, &s.output)));
    score(case, env, &record, solution.as_ref(), solution_secs).map(Scored::from)
}

/// Wall-clock limit for the submission, scaled from the solution's elapsed
/// time where the kind asks for it
fn student_timeout(case: &TestCase, config: &GraderConfig, solution_elapsed: Option<f64>) -> u64 {
    let configured = case.timeout.unwrap_or(config.default_timeout_secs);
    match (&case.kind, solution_elapsed) {
        (TestKind::TimeUse { multiplier, .. }, Some(secs)) => {
            time_use_timeout(secs, multiplier.unwrap_or(config.efficiency_multiplier))
        }
        (
            TestKind::OutputDiffSoln {
                solution_timeout_multiplier: Some(m),
                ..
            },
            Some(secs),
        ) => (m * secs).ceil().max(1.0) as u64,
        _ => configured,
    }
}

fn solution_failure(command: &str, why: impl std::fmt::Display) -> RunError {
    RunError::Solution(format!("Unable to run {}\n[{}]", display_form(command), why))
}

/// Solution record for a test, from the cache or a fresh run
async fn run_solution(
    case: &TestCase,
    env: &TestEnv<'_>,
    cache: &mut SolutionCache,
) -> Result<ExecutionRecord, RunError> {
    let uses_tool = case.kind.solution_uses_tool();
    let wrapper = if uses_tool {
        case.kind.wrapper(env.config)
    } else {
        CORE_CMD.to_string()
    };
    let solution_dir = case.kind.solution_dir(env);
    let command = case.expand_command(&wrapper, |exe| {
        solution_dir.join(format!("{}_soln", exe)).display().to_string()
    });
    // a solution from the submission directory is never cached
    let cacheable = solution_dir == env.solution_dir;

    if cacheable {
        if let Some(record) = cache.lookup(&case.name, &command).await {
            debug!("Using cached solution run for {}", case.name);
            return Ok(record);
        }
    }

    let mut spec = ExecutionSpec::new(env.grading_dir, &command)
        .with_timeout(case.timeout.unwrap_or(env.config.default_timeout_secs))
        .with_output_limit(OutputLimit::Solution);
    if uses_tool {
        spec = spec.with_aux_log();
    }
    let record = execute(&spec, env.config)
        .await
        .map_err(|e| solution_failure(&command, e))?;
    if let Some(failed) = simple_failure(&record, FailOn::SignalsAndTimeout, TimeoutFacts::default()) {
        return Err(solution_failure(&command, failed.summary()));
    }
    if uses_tool && record.aux_log.is_none() {
        return Err(solution_failure(&command, "no log file created"));
    }

    if cacheable {
        cache.store(&case.name, &command, &record, env.config).await?;
    }
    Ok(record)
}

fn solution_user_secs(solution: &ExecutionRecord) -> Result<f64, RunError> {
    let log = solution.aux_log.as_deref().unwrap_or_default();
    scrape_timing_report(log)
        .map(|report| report.user_secs)
        .map_err(|e| RunError::Solution(format!("Unable to evaluate solution time use ({})", e)))
}

fn score(
    case: &TestCase,
    env: &TestEnv<'_>,
    record: &ExecutionRecord,
    solution: Option<&ExecutionRecord>,
    solution_secs: Option<f64>,
) -> Result<Judgment, RunError> {
    let config = env.config;
    let context = env.context;
    let reject = case.reject_regex()?;
    let missing_solution = || RunError::Solution(format!("{}: no solution run", case.name));

    let judgment: Judgment = match &case.kind {
        TestKind::ExpectedOutput {
            expected_output,
            required_exit_code,
            incorrect_message,
        } => {
            if rejected(reject.as_ref(), &record.output) {
                return Ok(Outcome::inconclusive().into());
            }
            let exit_ok = required_exit_code.map_or(true, |code| code == record.exit_code);
            let output_ok = expected_output.as_deref().map_or(true, |expected| {
                !record.truncated
                    && match_ok(
                        &record.output,
                        &apply_filter(case.postfilter, expected),
                        config.accept_ratio,
                    )
            });
            if exit_ok && output_ok {
                Outcome::correct(case.total_pts).with_short("Correct").into()
            } else {
                Outcome::incorrect(0)
                    .with_short(incorrect_message.as_deref().unwrap_or("Incorrect"))
                    .into()
            }
        }
        TestKind::OutputDiffSoln {
            accept_ratio,
            show_match,
            ..
        } => {
            let soln = solution.ok_or_else(missing_solution)?;
            if rejected(reject.as_ref(), &record.output) {
                return Ok(Outcome::inconclusive().into());
            }
            score_output_match(
                &record.output,
                &soln.output,
                case.total_pts,
                accept_ratio.unwrap_or(config.accept_ratio),
                record.truncated,
                None,
                *show_match && context == Context::Sanity,
            )
            .into()
        }
        TestKind::GracefullyHandled {
            attempted_action,
            expected_behavior,
            msg_regex,
            accept_ratio,
        } => {
            let soln = solution.ok_or_else(missing_solution)?;
            let msg_regex = msg_regex
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| RunError::Manifest(format!("{}: bad msg_regex: {}", case.name, e)))?;
            let check = HandlingCheck {
                attempted_action,
                expected_behavior: expected_behavior.as_deref().unwrap_or(DEFAULT_EXPECTED_BEHAVIOR),
                reject: case.reject.as_deref(),
                msg_regex: msg_regex.as_ref(),
                accept_ratio: accept_ratio.unwrap_or(config.handling_accept_ratio),
                total_pts: case.total_pts,
            };
            score_handling(&check, record, soln, context)
        }
        TestKind::MemoryCheck { leak_pts, .. } => {
            let run = MemcheckRun {
                record,
                solution_output: solution.map(|s| s.output.as_str()),
                reject: reject.as_ref(),
                leak_pts: *leak_pts,
                total_pts: case.total_pts,
                error_exitcode: config.memcheck_error_exitcode,
            };
            score_memcheck(&run, context)
        }
        TestKind::MemoryUse { multiplier } => {
            let soln = solution.ok_or_else(missing_solution)?;
            let run = EfficiencyRun {
                record,
                solution_output: &soln.output,
                reject: reject.as_ref(),
                total_pts: case.total_pts,
                multiplier: multiplier.unwrap_or(config.efficiency_multiplier),
            };
            let soln_log = soln.aux_log.as_deref().unwrap_or_default();
            score_memory_use(&run, soln_log, config.memcheck_error_exitcode, context).map_err(|e| {
                RunError::Solution(format!("Unable to evaluate solution memory use ({})", e))
            })?
        }
        TestKind::TimeUse { multiplier, .. } => {
            let soln = solution.ok_or_else(missing_solution)?;
            let secs = solution_secs.ok_or_else(missing_solution)?;
            let run = EfficiencyRun {
                record,
                solution_output: &soln.output,
                reject: reject.as_ref(),
                total_pts: case.total_pts,
                multiplier: multiplier.unwrap_or(config.efficiency_multiplier),
            };
            score_time_use(&run, secs, config.time_use_floor_secs, context)
        }
        TestKind::InstructionCount { multiplier } => {
            let soln = solution.ok_or_else(missing_solution)?;
            let run = EfficiencyRun {
                record,
                solution_output: &soln.output,
                reject: reject.as_ref(),
                total_pts: case.total_pts,
                multiplier: multiplier.unwrap_or(config.efficiency_multiplier),
            };
            let soln_log = soln.aux_log.as_deref().unwrap_or_default();
            score_instruction_use(&run, soln_log, config.memcheck_error_exitcode, context).map_err(|e| {
                RunError::Solution(format!("Unable to evaluate solution instruction count ({})", e))
            })?
        }
        TestKind::Requirement {
            failure_msg,
            deduction,
        } => {
            let check = RequirementCheck {
                description: if case.description.is_empty() {
                    &case.name
                } else {
                    &case.description
                },
                failure_msg: failure_msg.as_deref(),
                total_pts: case.total_pts,
                deduction: *deduction,
            };
            score_requirement(&check, record, context)
        }
        TestKind::BuildClean | TestKind::StyleCheck | TestKind::GraderReview => {
            return Err(RunError::Manifest(format!(
                "{}: {} tests are not scored from a program run",
                case.name,
                case.kind.name()
            )))
        }
    };
    Ok(judgment)
}

/// Build the submission, or run its style checks
async fn run_build(case: &TestCase, env: &TestEnv<'_>) -> Result<Scored, RunError> {
    let style = matches!(case.kind, TestKind::StyleCheck);
    let command = match case.command.trim() {
        "" if style => DEFAULT_STYLE_COMMAND,
        "" => DEFAULT_BUILD_COMMAND,
        _ => case.command.as_str(),
    };
    let halts = !style && halts_on_build_error(env.context);
    let spec = ExecutionSpec::new(env.grading_dir, command)
        .with_timeout(case.timeout.unwrap_or(env.config.default_timeout_secs));
    let record = execute(&spec, env.config).await?;

    if let Some(failed) = simple_failure(&record, FailOn::SignalsAndTimeout, TimeoutFacts::default()) {
        return Ok(Scored {
            judgment: failed.into(),
            halt: halts,
        });
    }
    if !style {
        make_executable(env.grading_dir, &case.executables).await?;
    }

    let output = strip_ansi(&record.output);
    let issues = grep_lines(regex!(r"error:|warning:|note:"), &output);
    if record.exit_code == 0 && issues.is_empty() {
        let short = if style { "Clean run" } else { "Clean build" };
        return Ok(Outcome::correct(case.total_pts).with_short(short).into());
    }

    let is_error = record.exit_code != 0;
    let detail = if style {
        format!(
            "{}\n\n{} output:\n{}",
            STYLE_CHECK_ADVICE,
            command,
            abbreviate_default(&output)
        )
    } else if issues.is_empty() {
        abbreviate_default(&output)
    } else {
        issues.join("\n")
    };
    if is_error && !style {
        info!("Build failed for {}", env.grading_dir.display());
    }
    Ok(Scored {
        judgment: Outcome::build_issue(is_error, detail).into(),
        halt: is_error && halts,
    })
}

fn halts_on_build_error(context: Context) -> bool {
    matches!(context, Context::Sanity | Context::TestSuite)
}

/// `chmod a+x` each executable that exists
async fn make_executable(dir: &Path, executables: &[String]) -> Result<(), RunError> {
    use std::os::unix::fs::PermissionsExt;

    for exe in executables {
        let path = dir.join(exe);
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            debug!("Executable {:?} was not built", path);
            continue;
        };
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o111);
        tokio::fs::set_permissions(&path, perms).await?;
    }
    Ok(())
}

async fn recorded_review(case: &TestCase, reviews: &dyn ReviewLookup) -> Result<Outcome, RunError> {
    let review = reviews
        .review(&case.name)
        .await
        .map_err(|e| RunError::Review(format!("{:#}", e)))?;
    Ok(match review {
        Some(review) => Outcome::reviewed(review.points, review.complete, review.overview),
        None => Outcome::deferred(),
    })
}

/// A suite file: `[[tests]]` tables in run order, plus an optional
/// `[custom]` template for student-written tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub custom: Option<CustomTemplate>,
}

impl Suite {
    pub fn parse(text: &str) -> Result<Self, RunError> {
        let suite: Suite = toml::from_str(text).map_err(|e| RunError::Manifest(e.to_string()))?;
        let mut seen = std::collections::HashSet::new();
        for case in &suite.tests {
            case.validate()?;
            if !seen.insert(case.name.as_str()) {
                return Err(RunError::Manifest(format!("duplicate test name {}", case.name)));
            }
        }
        if let Some(custom) = &suite.custom {
            custom.validate()?;
        }
        Ok(suite)
    }

    pub async fn load(path: &Path) -> Result<Self, RunError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text).map_err(|e| match e {
            RunError::Manifest(msg) => RunError::Manifest(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn get(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|case| case.name == name)
    }
}
