//! Grading driver
//!
//! Runs a suite against one submission, one test at a time, and resolves
//! review questions through a [`Reviewer`]. `pregrade` and `autograde` keep
//! the submission's [`SubmissionResults`] up to date; `run_suite` only
//! reports.
//!
//! An interrupt during pregrade or autograde defers the running test and
//! stops the pass with the store consistent. In other contexts it is
//! returned as an error.

use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cases::{run_test, ReviewLookup, RunError, Scored, SolutionCache, TestCase, TestEnv, TestState};
use crate::config::GraderConfig;
use crate::outcome::{Outcome, TestIdentity, TestResult};
use crate::results::SubmissionResults;
use crate::scoring::{Context, Judgment, Review, ReviewAnswer};

/// Invalid answers accepted before a question is deferred
const MAX_REVIEW_ATTEMPTS: usize = 5;

/// Answers review questions
#[async_trait]
pub trait Reviewer: Send {
    /// Answer for `review`, or `None` to defer the test
    async fn ask(&mut self, test: &TestIdentity, review: &Review) -> Result<Option<ReviewAnswer>>;
}

/// Reviewer that defers every question
pub struct DeferAll;

#[async_trait]
impl Reviewer for DeferAll {
    async fn ask(&mut self, _test: &TestIdentity, _review: &Review) -> Result<Option<ReviewAnswer>> {
        Ok(None)
    }
}

/// Everything a pass needs besides the suite
pub struct Grading<'a> {
    pub config: &'a GraderConfig,
    pub grading_dir: &'a Path,
    pub solution_dir: &'a Path,
    pub reviews: &'a dyn ReviewLookup,
}

/// What a pass did
#[derive(Debug, Default)]
pub struct PassReport {
    pub states: Vec<(String, TestState)>,
    /// Lines for the operator, e.g. changed results
    pub notes: Vec<String>,
    /// Stopped early after a failed build
    pub halted: bool,
    pub interrupted: bool,
}

enum Step {
    Done(Outcome, bool),
    Interrupted,
}

impl<'a> Grading<'a> {
    fn env(&self, context: Context) -> TestEnv<'a> {
        TestEnv {
            config: self.config,
            grading_dir: self.grading_dir,
            solution_dir: self.solution_dir,
            context,
        }
    }

    /// Run and judge one test, answering any question through `reviewer`
    async fn grade_one(
        &self,
        case: &TestCase,
        context: Context,
        cache: &mut SolutionCache,
        reviewer: &mut dyn Reviewer,
    ) -> Result<(Outcome, bool)> {
        let env = self.env(context);
        let scored = match run_test(case, &env, cache, self.reviews).await {
            Ok(scored) => scored,
            Err(RunError::Execution(e)) => {
                error!("Supervisor failure on {}: {}", case.name, e);
                Scored::from(Outcome::not_executed(format!("({})", e)))
            }
            Err(RunError::Review(e)) => {
                warn!("Review lookup for {} failed: {}", case.name, e);
                Scored::from(Outcome::deferred())
            }
            Err(e) => return Err(e).with_context(|| format!("Test {} could not be run", case.name)),
        };

        let outcome = match scored.judgment {
            Judgment::Final(outcome) => outcome,
            Judgment::NeedsReview(review) => resolve(&case.identity(), &review, reviewer).await?,
        };
        Ok((outcome, scored.halt))
    }

    async fn step(
        &self,
        case: &TestCase,
        context: Context,
        cache: &mut SolutionCache,
        reviewer: &mut dyn Reviewer,
    ) -> Result<Step> {
        tokio::select! {
            result = self.grade_one(case, context, cache, reviewer) => {
                let (outcome, halt) = result?;
                Ok(Step::Done(outcome, halt))
            }
            Ok(()) = tokio::signal::ctrl_c() => Ok(Step::Interrupted),
        }
    }

    /// Run every test without storing results
    pub async fn run_suite(
        &self,
        suite: &[TestCase],
        context: Context,
        reviewer: &mut dyn Reviewer,
    ) -> Result<(Vec<TestResult>, PassReport)> {
        let mut cache = SolutionCache::new(self.solution_dir, self.config);
        let mut report = PassReport::default();
        let mut results = Vec::new();

        for case in suite {
            match self.step(case, context, &mut cache, reviewer).await? {
                Step::Done(outcome, halt) => {
                    report
                        .states
                        .push((case.name.clone(), TestState::settle(&Ok(outcome.clone()))));
                    results.push(TestResult::new(case.identity(), outcome));
                    if halt {
                        warn!("Build failed, skipping remaining tests");
                        report.halted = true;
                        break;
                    }
                }
                Step::Interrupted => return Err(anyhow!("Interrupted while running {}", case.name)),
            }
        }
        Ok((results, report))
    }

    /// Unattended pass: everything that needs a person is deferred
    pub async fn pregrade(
        &self,
        suite: &[TestCase],
        results: &mut SubmissionResults,
        update: bool,
    ) -> Result<PassReport> {
        let mut cache = SolutionCache::new(self.solution_dir, self.config);
        let mut report = PassReport::default();

        for case in suite {
            if case.kind.is_interactive_only() {
                report.states.push((case.name.clone(), TestState::NotRun));
                continue;
            }
            if !update && results.get(&case.name).is_some() {
                info!("Keeping previous result for {}", case.name);
                continue;
            }
            let done = self
                .record_step(case, Context::Pregrade, &mut cache, &mut DeferAll, results, &mut report)
                .await?;
            if !done {
                break;
            }
        }

        self.drop_stale(suite, results, &mut report).await?;
        Ok(report)
    }

    /// Interactive pass. Reuses every previous result that is not deferred
    /// unless `update` is set, then marks the submission finished when
    /// nothing is left deferred.
    pub async fn autograde(
        &self,
        suite: &[TestCase],
        results: &mut SubmissionResults,
        reviewer: &mut dyn Reviewer,
        update: bool,
    ) -> Result<PassReport> {
        let mut cache = SolutionCache::new(self.solution_dir, self.config);
        let mut report = PassReport::default();

        for case in suite {
            if let Some(previous) = results.get(&case.name) {
                if !update && !previous.is_deferred() {
                    report
                        .states
                        .push((case.name.clone(), TestState::settle(&Ok(previous.outcome.clone()))));
                    continue;
                }
            }
            let done = self
                .record_step(case, Context::Autograder, &mut cache, reviewer, results, &mut report)
                .await?;
            if !done {
                break;
            }
        }

        self.drop_stale(suite, results, &mut report).await?;
        if !report.interrupted && !report.halted {
            let finished = results
                .mark_finished(&self.config.grader_name, Utc::now())
                .await
                .context("Failed to mark results finished")?;
            if !finished {
                report.notes.push("Some tests are still deferred".to_string());
            }
        }
        Ok(report)
    }

    /// Run one test and store its result. `false` means stop the pass.
    async fn record_step(
        &self,
        case: &TestCase,
        context: Context,
        cache: &mut SolutionCache,
        reviewer: &mut dyn Reviewer,
        results: &mut SubmissionResults,
        report: &mut PassReport,
    ) -> Result<bool> {
        let (outcome, halt, interrupted) = match self.step(case, context, cache, reviewer).await? {
            Step::Done(outcome, halt) => (outcome, halt, false),
            Step::Interrupted => {
                warn!("Interrupted, deferring {}", case.name);
                (Outcome::deferred(), false, true)
            }
        };

        if let Some(previous) = results.get(&case.name) {
            if previous.outcome != outcome {
                let note = format!("{}: Updated (previously {})", case.name, previous.score_string());
                info!("{}", note);
                report.notes.push(note);
            }
        }
        report
            .states
            .push((case.name.clone(), TestState::settle(&Ok(outcome.clone()))));
        results
            .set(&case.name, Some(TestResult::new(case.identity(), outcome)))
            .await
            .with_context(|| format!("Failed to store result for {}", case.name))?;

        report.halted = halt;
        report.interrupted = interrupted;
        Ok(!halt && !interrupted)
    }

    async fn drop_stale(
        &self,
        suite: &[TestCase],
        results: &mut SubmissionResults,
        report: &mut PassReport,
    ) -> Result<()> {
        let names: Vec<&str> = suite.iter().map(|c| c.name.as_str()).collect();
        for name in results.remove_stale(&names).await? {
            report.notes.push(format!("Removed result for retired test {}", name));
        }
        Ok(())
    }
}

/// Ask until the reviewer gives a usable answer or defers
async fn resolve(test: &TestIdentity, review: &Review, reviewer: &mut dyn Reviewer) -> Result<Outcome> {
    for _ in 0..MAX_REVIEW_ATTEMPTS {
        let Some(answer) = reviewer.ask(test, review).await? else {
            return Ok(Outcome::deferred());
        };
        match review.resolve(&answer) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => warn!("Answer for {} not accepted: {}", test.name, e),
        }
    }
    warn!("No usable answer for {}, deferring", test.name);
    Ok(Outcome::deferred())
}
