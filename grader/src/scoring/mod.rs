//! Scoring policies
//!
//! Policies are pure and synchronous. Each turns execution records and
//! scraped facts into a [`Judgment`]: either a final [`Outcome`] or a
//! [`Review`] that a human must answer. Asking the question is left to the
//! caller.
//!
//! When a run looks suspicious but the measurement would still earn points,
//! the result depends only on the [`Context`]: batch contexts get
//! Inconclusive with the findings, Pregrade defers, and interactive contexts
//! ask a human whether to trust the run.

pub mod diff;
pub mod efficiency;
pub mod filters;
pub mod handling;
pub mod memory;
pub mod requirement;
pub mod triage;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::harness::status::{summarize_exit_status, TIMED_OUT_CODE};
use crate::outcome::{Audience, Outcome};
use crate::scrape::ToolAnomaly;

pub use diff::{match_ok, summarize_mismatch};

/// Why a test is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    /// Student self-check
    Sanity,
    /// Staff dry run over many submissions
    Dryrun,
    /// Grader running tests by hand
    RunTests,
    /// Unattended grading ahead of the human pass
    Pregrade,
    /// Interactive grading pass
    Autograder,
    /// Staff validating the test suite itself
    TestSuite,
}

impl Context {
    /// Nobody is there to answer a question
    pub fn is_batch(&self) -> bool {
        matches!(self, Context::Sanity | Context::Dryrun | Context::TestSuite)
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, Context::RunTests | Context::Autograder)
    }

    pub fn audience(&self) -> Audience {
        match self {
            Context::Sanity => Audience::Sanity,
            Context::Dryrun => Audience::Dryrun,
            _ => Audience::Grader,
        }
    }
}

/// Result of a scoring policy
#[derive(Debug, Clone, PartialEq)]
pub enum Judgment {
    Final(Outcome),
    NeedsReview(Review),
}

impl Judgment {
    pub fn into_final(self) -> Option<Outcome> {
        match self {
            Judgment::Final(outcome) => Some(outcome),
            Judgment::NeedsReview(_) => None,
        }
    }
}

impl From<Outcome> for Judgment {
    fn from(outcome: Outcome) -> Self {
        Judgment::Final(outcome)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOption {
    pub score: i32,
    pub text: String,
    pub explanation: String,
    /// Reason this option may not apply; choosing it should be confirmed
    pub concern: Option<String>,
    /// The grader's comment replaces the option text
    pub asks_comment: bool,
}

impl ReviewOption {
    pub fn new(score: i32, text: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            score,
            text: text.into(),
            explanation: explanation.into(),
            concern: None,
            asks_comment: false,
        }
    }

    pub fn with_concern(mut self, concern: Option<String>) -> Self {
        self.concern = concern;
        self
    }
}

/// How an answer becomes an outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Score the chosen option; full points is Correct
    Handling {
        total_pts: i32,
        /// Appended to the reason when the run did not exit cleanly
        exit_suffix: Option<String>,
    },
    /// First option accepts `trusted`, any other is Inconclusive
    Trust { trusted: Box<Outcome> },
    /// First option accepts the submission, second applies a deduction
    Requirement { total_pts: i32, deduction: i32 },
}

/// A question for a human grader
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub question: String,
    /// What the grader should look at before answering
    pub evidence: String,
    pub options: Vec<ReviewOption>,
    pub resolution: Resolution,
}

/// A grader's answer to a [`Review`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewAnswer {
    pub choice: usize,
    pub comment: Option<String>,
    /// Deduction entered for a requirement review
    pub deduction: Option<i32>,
}

impl ReviewAnswer {
    pub fn choose(choice: usize) -> Self {
        Self {
            choice,
            ..Self::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_deduction(mut self, deduction: i32) -> Self {
        self.deduction = Some(deduction);
        self
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReviewError {
    #[error("no option {0}")]
    InvalidChoice(usize),
    #[error("deduction {given} is outside 0..={max}")]
    DeductionOutOfRange { given: i32, max: i32 },
    #[error("a comment is required when changing the standard deduction")]
    CommentRequired,
}

impl Review {
    /// Ask whether a suspicious run's measurement can be trusted
    pub fn trust(question: impl Into<String>, evidence: impl Into<String>, trusted: Outcome, subject: &str) -> Self {
        Self {
            question: question.into(),
            evidence: evidence.into(),
            options: vec![
                ReviewOption::new(
                    1,
                    "code seems complete and program executed in full",
                    format!("{} should be reliable", subject),
                ),
                ReviewOption::new(
                    0,
                    "incomplete code and/or incomplete execution",
                    format!("{} is inconclusive", subject),
                ),
            ],
            resolution: Resolution::Trust {
                trusted: Box::new(trusted),
            },
        }
    }

    pub fn resolve(&self, answer: &ReviewAnswer) -> Result<Outcome, ReviewError> {
        let chosen = self
            .options
            .get(answer.choice)
            .ok_or(ReviewError::InvalidChoice(answer.choice))?;

        match &self.resolution {
            Resolution::Handling {
                total_pts,
                exit_suffix,
            } => {
                let mut reason = match answer.comment() {
                    Some(comment) if chosen.asks_comment => comment.to_string(),
                    Some(comment) => format!("{} ({})", chosen.text, comment),
                    None => chosen.text.clone(),
                };
                if chosen.score == *total_pts {
                    return Ok(Outcome::correct(*total_pts).with_short(reason));
                }
                if let Some(suffix) = exit_suffix {
                    reason.push_str("; ");
                    reason.push_str(suffix);
                }
                Ok(Outcome::incorrect(chosen.score).with_short(reason))
            }
            Resolution::Trust { trusted } => {
                if answer.choice == 0 {
                    Ok(trusted.as_ref().clone())
                } else {
                    Ok(Outcome::inconclusive())
                }
            }
            Resolution::Requirement {
                total_pts,
                deduction,
            } => {
                if answer.choice == 0 {
                    return Ok(Outcome::correct(*total_pts).with_short("Accepted by grader as valid"));
                }
                let deduct = answer.deduction.unwrap_or(*deduction);
                if deduct < 0 || deduct > *deduction {
                    return Err(ReviewError::DeductionOutOfRange {
                        given: deduct,
                        max: *deduction,
                    });
                }
                let comment = answer.comment();
                if deduct != *deduction && comment.is_none() {
                    return Err(ReviewError::CommentRequired);
                }
                let mut short = "Does not meet required specification".to_string();
                if let Some(comment) = comment {
                    short.push_str(&format!(" ({})", comment));
                }
                let outcome = if deduct != 0 {
                    Outcome::incorrect(-deduct)
                } else {
                    Outcome::correct(0)
                };
                Ok(outcome.with_short(short))
            }
        }
    }
}

/// Describe what looked wrong about a run, or `None` when output matched
/// and the program was not killed. An exit of `tool_error_code` is the
/// measuring tool's own verdict and is not reported.
pub fn summarize_execution(
    output: &str,
    solution_output: &str,
    exit_code: i32,
    tool_error_code: Option<i32>,
) -> Option<String> {
    let mut summary = if match_ok(output, solution_output, 1.0) {
        if exit_code >= 0 && exit_code != TIMED_OUT_CODE {
            return None;
        }
        String::new()
    } else {
        "Submission produced incorrect output".to_string()
    };
    if exit_code != 0 && Some(exit_code) != tool_error_code {
        if !summary.is_empty() {
            summary.push(' ');
        }
        summary.push_str(&format!("({})", summarize_exit_status(exit_code)));
    }
    Some(summary)
}

/// Output starts with a known-bad pattern
pub fn rejected(reject: Option<&Regex>, output: &str) -> bool {
    reject.map(|re| re.is_match(output)).unwrap_or(false)
}

/// Compile a reject pattern so it only matches at the start of output
pub fn compile_reject(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// Resolve a suspicious-but-passing measurement according to the context
pub(crate) fn doubtful(
    context: Context,
    findings: String,
    trusted: Outcome,
    review: impl FnOnce(Outcome) -> Review,
) -> Judgment {
    if context == Context::Pregrade {
        return Judgment::Final(Outcome::deferred());
    }
    if context.is_interactive() {
        return Judgment::NeedsReview(review(trusted));
    }
    Judgment::Final(Outcome::inconclusive().with_short(findings))
}

/// Outcome for a tool report that cannot be evaluated
pub(crate) fn unevaluable(context: Context, what: &str, anomaly: &ToolAnomaly) -> Outcome {
    if context == Context::Pregrade {
        Outcome::deferred()
    } else {
        Outcome::inconclusive().with_short(format!("Unable to evaluate {} ({})", what, anomaly))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;

    #[test]
    fn test_context_classes() {
        assert!(Context::Sanity.is_batch());
        assert!(Context::TestSuite.is_batch());
        assert!(!Context::Pregrade.is_batch());
        assert!(!Context::Pregrade.is_interactive());
        assert!(Context::Autograder.is_interactive());
        assert_eq!(Context::Dryrun.audience(), Audience::Dryrun);
    }

    #[test]
    fn test_summarize_execution() {
        assert_eq!(summarize_execution("ok", "ok", 0, Some(88)), None);
        assert_eq!(summarize_execution("ok", "ok", 3, Some(88)), None);
        assert_eq!(
            summarize_execution("ok", "ok", -11, Some(88)).unwrap(),
            "(terminated with signal 11 (SIGSEGV))"
        );
        assert_eq!(
            summarize_execution("bad", "ok", 0, Some(88)).unwrap(),
            "Submission produced incorrect output"
        );
        assert_eq!(
            summarize_execution("bad", "ok", 88, Some(88)).unwrap(),
            "Submission produced incorrect output"
        );
        assert_eq!(
            summarize_execution("bad", "ok", 2, Some(88)).unwrap(),
            "Submission produced incorrect output (exited with non-zero code 2)"
        );
        assert_eq!(
            summarize_execution("bad", "ok", 88, None).unwrap(),
            "Submission produced incorrect output (exited with non-zero code 88)"
        );
    }

    #[test]
    fn test_reject_is_anchored() {
        let re = compile_reject("Not yet implemented").unwrap();
        assert!(rejected(Some(&re), "Not yet implemented: reverse"));
        assert!(!rejected(Some(&re), "reverse: Not yet implemented"));
        assert!(!rejected(None, "anything"));
    }

    #[test]
    fn test_doubtful_by_context() {
        let trusted = Outcome::correct(4);
        let review = |t: Outcome| Review::trust("Trust?", "", t, "report");
        assert!(matches!(
            doubtful(Context::Dryrun, "odd".into(), trusted.clone(), review),
            Judgment::Final(ref o) if matches!(o.kind, OutcomeKind::Inconclusive) && o.summary() == "odd"
        ));
        assert!(matches!(
            doubtful(Context::Pregrade, "odd".into(), trusted.clone(), review),
            Judgment::Final(ref o) if o.is_deferred()
        ));
        assert!(matches!(
            doubtful(Context::Autograder, "odd".into(), trusted, review),
            Judgment::NeedsReview(_)
        ));
    }

    #[test]
    fn test_trust_review_resolution() {
        let review = Review::trust("Trust?", "", Outcome::correct(4), "report");
        assert_eq!(review.resolve(&ReviewAnswer::choose(0)).unwrap(), Outcome::correct(4));
        assert!(matches!(
            review.resolve(&ReviewAnswer::choose(1)).unwrap().kind,
            OutcomeKind::Inconclusive
        ));
        assert_eq!(
            review.resolve(&ReviewAnswer::choose(5)),
            Err(ReviewError::InvalidChoice(5))
        );
    }

    #[test]
    fn test_unevaluable() {
        let anomaly = ToolAnomaly::ToolCrashed;
        let outcome = unevaluable(Context::Autograder, "memory correctness", &anomaly);
        assert_eq!(
            outcome.summary(),
            "Unable to evaluate memory correctness (submission crashed Valgrind)"
        );
        assert!(unevaluable(Context::Pregrade, "memory use", &anomaly).is_deferred());
    }
}
