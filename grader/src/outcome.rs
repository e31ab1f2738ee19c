//! Outcome taxonomy
//!
//! Every scored test ends in exactly one [`Outcome`]: a variant with its
//! variant-specific facts, a score, an optional one-line override of the
//! variant's summary template and optional detail for the student report.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::harness::capture::TRUNCATION_MARKER;
use crate::scoring::diff::{line_diff, summarize_mismatch};
use crate::text::{abbreviate, block};

/// Points earned, or a symbolic marker such as `---` for a deferred test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Points(i32),
    Symbolic(String),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Points(n) => write!(f, "{}", n),
            Score::Symbolic(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeKind {
    Correct {
        /// Output shown back in sanity reports
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matched_output: Option<String>,
    },
    Incorrect,
    MismatchOutput {
        output: String,
        expected: String,
        #[serde(default)]
        truncated: bool,
    },
    TimedOut {
        limit_secs: u64,
        #[serde(default)]
        solution_secs: Option<u64>,
        #[serde(default)]
        error_logged: Option<String>,
    },
    SignalRaised {
        signal_string: String,
    },
    MemoryBoth,
    MemoryLeak,
    MemoryError,
    ResourceExceeded,
    BuildIssue {
        is_error: bool,
    },
    Inconclusive,
    Deferred,
    NotExecuted {
        msg: String,
    },
    /// Manual point adjustment
    Points {
        possible: i32,
    },
    /// Result backed by a grader's review
    Reviewed {
        complete: bool,
        overview: String,
    },
}

impl OutcomeKind {
    fn template(&self) -> String {
        match self {
            OutcomeKind::Correct { .. } => "Correct".to_string(),
            OutcomeKind::Incorrect => "Submission behavior was incorrect".to_string(),
            OutcomeKind::MismatchOutput { .. } => {
                "Submission output does not match sample".to_string()
            }
            OutcomeKind::TimedOut {
                solution_secs,
                error_logged,
                ..
            } => {
                let mut s = "Waited {limit} seconds, program did not complete".to_string();
                if solution_secs.is_some() {
                    s.push_str(" (soln completes in under {solntime} seconds)");
                }
                if error_logged.is_some() {
                    s.push_str(" (error logged: {errmsg})");
                }
                s
            }
            OutcomeKind::SignalRaised { .. } => {
                "Program terminated due to signal {signal_string}".to_string()
            }
            OutcomeKind::MemoryBoth => {
                "Valgrind report shows memory errors and leaks".to_string()
            }
            OutcomeKind::MemoryLeak => {
                "Valgrind report shows leaks but no memory errors".to_string()
            }
            OutcomeKind::MemoryError => {
                "Valgrind report shows memory errors but no leaks".to_string()
            }
            OutcomeKind::ResourceExceeded => "Resource use beyond limit".to_string(),
            OutcomeKind::BuildIssue { is_error: false } => {
                "Warnings produced during build".to_string()
            }
            OutcomeKind::BuildIssue { is_error: true } => "Build failed due to error".to_string(),
            OutcomeKind::Inconclusive => {
                "Unable to judge due to buggy/incomplete execution".to_string()
            }
            OutcomeKind::Deferred => "Deferred".to_string(),
            OutcomeKind::NotExecuted { .. } => "Did not execute {msg}".to_string(),
            OutcomeKind::Points { .. } => String::new(),
            OutcomeKind::Reviewed { .. } => "Overview comment: {overview}".to_string(),
        }
    }

    fn placeholders(&self) -> Vec<(&'static str, String)> {
        match self {
            OutcomeKind::TimedOut {
                limit_secs,
                solution_secs,
                error_logged,
            } => {
                let mut fields = vec![("limit", limit_secs.to_string())];
                if let Some(secs) = solution_secs {
                    fields.push(("solntime", secs.to_string()));
                }
                if let Some(msg) = error_logged {
                    fields.push(("errmsg", msg.clone()));
                }
                fields
            }
            OutcomeKind::SignalRaised { signal_string } => {
                vec![("signal_string", signal_string.clone())]
            }
            OutcomeKind::NotExecuted { msg } => vec![("msg", msg.clone())],
            OutcomeKind::Reviewed { overview, .. } => vec![("overview", overview.clone())],
            _ => Vec::new(),
        }
    }

    /// Variant name as stored
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeKind::Correct { .. } => "Correct",
            OutcomeKind::Incorrect => "Incorrect",
            OutcomeKind::MismatchOutput { .. } => "MismatchOutput",
            OutcomeKind::TimedOut { .. } => "TimedOut",
            OutcomeKind::SignalRaised { .. } => "SignalRaised",
            OutcomeKind::MemoryBoth => "MemoryBoth",
            OutcomeKind::MemoryLeak => "MemoryLeak",
            OutcomeKind::MemoryError => "MemoryError",
            OutcomeKind::ResourceExceeded => "ResourceExceeded",
            OutcomeKind::BuildIssue { .. } => "BuildIssue",
            OutcomeKind::Inconclusive => "Inconclusive",
            OutcomeKind::Deferred => "Deferred",
            OutcomeKind::NotExecuted { .. } => "NotExecuted",
            OutcomeKind::Points { .. } => "Points",
            OutcomeKind::Reviewed { .. } => "Reviewed",
        }
    }
}

/// Who an outcome is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Grader-facing line with score
    Grader,
    /// Student self-check before submitting
    Sanity,
    /// Staff dry run across many submissions
    Dryrun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub score: Score,
    /// Replaces the variant's summary template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    pub fn new(kind: OutcomeKind, score: Score) -> Self {
        Self {
            kind,
            score,
            short: None,
            detail: None,
        }
    }

    pub fn correct(points: i32) -> Self {
        Self::new(
            OutcomeKind::Correct {
                matched_output: None,
            },
            Score::Points(points),
        )
    }

    pub fn incorrect(points: i32) -> Self {
        Self::new(OutcomeKind::Incorrect, Score::Points(points))
    }

    /// Output mismatch; the report is built from both outputs unless
    /// `detail` is given. A truncated output keeps its marker in the report.
    pub fn mismatch(output: &str, expected: &str, truncated: bool, detail: Option<&str>) -> Self {
        let mut report = match detail {
            Some(d) => format!("{}\n{}", d, summarize_mismatch(output, expected, Some(d))),
            None => summarize_mismatch(output, expected, None),
        };
        if truncated && !report.contains(TRUNCATION_MARKER) {
            report.push_str(TRUNCATION_MARKER);
            report.push('\n');
        }
        Self::new(
            OutcomeKind::MismatchOutput {
                output: output.to_string(),
                expected: expected.to_string(),
                truncated,
            },
            Score::Points(0),
        )
        .with_detail(report)
    }

    pub fn timed_out(
        limit_secs: u64,
        solution_secs: Option<u64>,
        error_logged: Option<String>,
    ) -> Self {
        Self::new(
            OutcomeKind::TimedOut {
                limit_secs,
                solution_secs,
                error_logged,
            },
            Score::Points(0),
        )
    }

    pub fn signal_raised(signal_string: impl Into<String>) -> Self {
        Self::new(
            OutcomeKind::SignalRaised {
                signal_string: signal_string.into(),
            },
            Score::Points(0),
        )
    }

    pub fn memory_both(detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::MemoryBoth, Score::Points(0)).with_detail(detail)
    }

    pub fn memory_error(points: i32, detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::MemoryError, Score::Points(points)).with_detail(detail)
    }

    pub fn memory_leak(points: i32, detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::MemoryLeak, Score::Points(points)).with_detail(detail)
    }

    pub fn resource_exceeded(points: i32) -> Self {
        Self::new(OutcomeKind::ResourceExceeded, Score::Points(points))
    }

    pub fn build_issue(is_error: bool, detail: impl Into<String>) -> Self {
        Self::new(OutcomeKind::BuildIssue { is_error }, Score::Points(0)).with_detail(detail)
    }

    pub fn inconclusive() -> Self {
        Self::new(OutcomeKind::Inconclusive, Score::Points(0))
    }

    pub fn deferred() -> Self {
        Self::new(OutcomeKind::Deferred, Score::Symbolic("---".to_string()))
    }

    pub fn not_executed(msg: impl Into<String>) -> Self {
        Self::new(
            OutcomeKind::NotExecuted { msg: msg.into() },
            Score::Points(0),
        )
    }

    /// Manual adjustment of `points` (may be negative)
    pub fn points(points: i32, possible: i32) -> Self {
        Self::new(OutcomeKind::Points { possible }, Score::Points(points))
    }

    pub fn reviewed(points: i32, complete: bool, overview: impl Into<String>) -> Self {
        Self::new(
            OutcomeKind::Reviewed {
                complete,
                overview: overview.into(),
            },
            Score::Points(points),
        )
    }

    pub fn with_short(mut self, short: impl Into<String>) -> Self {
        self.short = Some(short.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_score(mut self, points: i32) -> Self {
        self.score = Score::Points(points);
        self
    }

    pub fn with_matched_output(mut self, output: impl Into<String>) -> Self {
        if let OutcomeKind::Correct { matched_output } = &mut self.kind {
            *matched_output = Some(output.into());
        }
        self
    }

    pub fn passed(&self) -> bool {
        match &self.kind {
            OutcomeKind::Correct { .. } | OutcomeKind::Reviewed { .. } => true,
            OutcomeKind::Points { possible } => {
                matches!(self.score, Score::Points(n) if n >= *possible)
            }
            _ => false,
        }
    }

    /// Deferred outcomes are never a final grade
    pub fn is_deferred(&self) -> bool {
        match &self.kind {
            OutcomeKind::Deferred => true,
            OutcomeKind::Reviewed { complete, .. } => !complete,
            _ => false,
        }
    }

    pub fn score_as_points(&self) -> Option<i32> {
        match self.score {
            Score::Points(n) => Some(n),
            Score::Symbolic(_) => None,
        }
    }

    /// One-line summary with the variant's placeholders filled in
    pub fn summary(&self) -> String {
        let template = match (&self.kind, &self.short) {
            (OutcomeKind::TimedOut { .. }, _) | (_, None) => self.kind.template(),
            (_, Some(short)) => short.clone(),
        };
        let mut summary = template;
        for (name, value) in self.kind.placeholders() {
            summary = summary.replace(&format!("{{{}}}", name), &value);
        }
        summary
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref().filter(|d| !d.is_empty())
    }

    /// Single character used in dry-run tables
    pub fn onechar(&self) -> char {
        match &self.kind {
            OutcomeKind::Correct { .. } | OutcomeKind::Reviewed { .. } => ' ',
            OutcomeKind::Incorrect => 'X',
            OutcomeKind::MismatchOutput { .. } => 'o',
            OutcomeKind::TimedOut { .. } => 't',
            OutcomeKind::SignalRaised { .. } => '*',
            OutcomeKind::Inconclusive => '?',
            OutcomeKind::MemoryBoth => 'b',
            OutcomeKind::MemoryLeak => 'l',
            OutcomeKind::MemoryError => 'e',
            OutcomeKind::ResourceExceeded => '>',
            OutcomeKind::BuildIssue { is_error: false } => 'w',
            OutcomeKind::BuildIssue { is_error: true } | OutcomeKind::NotExecuted { .. } => '#',
            OutcomeKind::Deferred => 'D',
            OutcomeKind::Points { .. } => {
                if self.passed() {
                    ' '
                } else {
                    '<'
                }
            }
        }
    }

    /// `3/5` against a nonzero total, `+2` without one, symbolic otherwise
    pub fn score_string(&self, total_pts: i32) -> String {
        match &self.score {
            Score::Points(n) if total_pts != 0 => format!("{}/{}", n, total_pts),
            Score::Points(n) => format!("{:+}", n),
            Score::Symbolic(s) => s.clone(),
        }
    }

    pub fn render(&self, audience: Audience, total_pts: i32) -> String {
        match audience {
            Audience::Grader => format!("{} {}", self.score_string(total_pts), self.summary()),
            Audience::Sanity => self.render_for_sanity(),
            Audience::Dryrun => self.render_for_dryrun(),
        }
    }

    fn render_for_sanity(&self) -> String {
        if let OutcomeKind::MismatchOutput {
            output, expected, ..
        } = &self.kind
        {
            return format!(
                "MISMATCH:  {}\nSample output:  {} \nYour output:    {}",
                self.summary(),
                block(expected),
                block(&escape_control(output))
            );
        }
        let word = if self.passed() { "OK" } else { "NOT OK" };
        let mut s = format!("{}:  {}", word, self.summary());
        if let Some(detail) = self.detail() {
            s.push('\n');
            s.push_str(detail);
        }
        if let OutcomeKind::Correct {
            matched_output: Some(matched),
        } = &self.kind
        {
            s.push_str("\nMatched output: ");
            s.push_str(&block(&abbreviate(matched, 5, 500)));
        }
        s
    }

    fn render_for_dryrun(&self) -> String {
        match &self.kind {
            OutcomeKind::MismatchOutput {
                output, expected, ..
            } => {
                let output = if output.is_empty() { "<empty>" } else { output };
                let diff = line_diff(expected, output);
                let picked: Vec<&str> = diff.lines().filter(|l| l.starts_with('>')).collect();
                let shown = if picked.is_empty() {
                    diff.clone()
                } else {
                    picked.join("\n")
                };
                abbreviate(&shown, 6, 500)
            }
            OutcomeKind::Inconclusive | OutcomeKind::BuildIssue { .. } => match self.detail() {
                Some(detail) => abbreviate(detail, 3, 500),
                None => self.summary(),
            },
            _ => self.summary(),
        }
    }
}

/// Equality is equality of grader-facing text
impl PartialEq for Outcome {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.summary() == other.summary()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.score)?;
        if !self.passed() {
            write!(f, " ({})", self.kind.name())?;
        }
        Ok(())
    }
}

fn escape_control(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                format!("^{}", ((c as u8) ^ 0x40) as char)
            } else {
                c.to_string()
            }
        })
        .collect()
}

/// The fields of a test copied into its stored result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestIdentity {
    pub name: String,
    pub description: String,
    pub total_pts: i32,
}

/// A test's outcome together with the test that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test: TestIdentity,
    pub outcome: Outcome,
}

impl TestResult {
    pub fn new(test: TestIdentity, outcome: Outcome) -> Self {
        Self { test, outcome }
    }

    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }

    pub fn is_deferred(&self) -> bool {
        self.outcome.is_deferred()
    }

    pub fn score_string(&self) -> String {
        self.outcome.score_string(self.test.total_pts)
    }

    /// (earned, possible); symbolic scores count for nothing
    pub fn points_tuple(&self) -> (i32, i32) {
        match self.outcome.score_as_points() {
            Some(n) => (n, self.test.total_pts),
            None => (0, 0),
        }
    }

    pub fn render(&self, audience: Audience) -> String {
        self.outcome.render(audience, self.test.total_pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(total: i32) -> TestIdentity {
        TestIdentity {
            name: "1".to_string(),
            description: "reverse a short file".to_string(),
            total_pts: total,
        }
    }

    #[test]
    fn test_timed_out_summary() {
        let outcome = Outcome::timed_out(3, None, None);
        assert_eq!(outcome.summary(), "Waited 3 seconds, program did not complete");
        let outcome = Outcome::timed_out(10, Some(2), Some("*** stack smashing detected ***".into()));
        assert_eq!(
            outcome.summary(),
            "Waited 10 seconds, program did not complete (soln completes in under 2 seconds) (error logged: *** stack smashing detected ***)"
        );
        assert_eq!(outcome.onechar(), 't');
    }

    #[test]
    fn test_short_override_uses_placeholders() {
        let outcome = Outcome::not_executed("(no log file created)");
        assert_eq!(outcome.summary(), "Did not execute (no log file created)");
        let outcome = Outcome::signal_raised("11 (SIGSEGV)").with_short("Crashed: {signal_string}");
        assert_eq!(outcome.summary(), "Crashed: 11 (SIGSEGV)");
    }

    #[test]
    fn test_score_strings() {
        let result = TestResult::new(identity(5), Outcome::correct(5));
        assert_eq!(result.score_string(), "5/5");
        assert_eq!(result.points_tuple(), (5, 5));
        let adj = TestResult::new(identity(0), Outcome::points(2, 0));
        assert_eq!(adj.score_string(), "+2");
        let deferred = TestResult::new(identity(5), Outcome::deferred());
        assert_eq!(deferred.score_string(), "---");
        assert_eq!(deferred.points_tuple(), (0, 0));
        assert!(deferred.is_deferred());
    }

    #[test]
    fn test_points_adjustment_pass_and_onechar() {
        assert!(Outcome::points(0, 0).passed());
        let under = Outcome::points(-3, 0);
        assert!(!under.passed());
        assert_eq!(under.onechar(), '<');
    }

    #[test]
    fn test_build_issue_variants() {
        let warn = Outcome::build_issue(false, "warning: unused variable");
        assert_eq!(warn.summary(), "Warnings produced during build");
        assert_eq!(warn.onechar(), 'w');
        let err = Outcome::build_issue(true, "error: expected ';'");
        assert_eq!(err.summary(), "Build failed due to error");
        assert_eq!(err.onechar(), '#');
    }

    #[test]
    fn test_equality_is_grader_text() {
        let a = Outcome::incorrect(0).with_short("Bad exit").with_detail("one");
        let b = Outcome::incorrect(0).with_short("Bad exit").with_detail("two");
        assert_eq!(a, b);
        assert_ne!(a, Outcome::incorrect(1).with_short("Bad exit"));
    }

    #[test]
    fn test_truncated_mismatch_keeps_marker_in_detail() {
        let output = format!("yyyyy\n{}", TRUNCATION_MARKER);
        let outcome = Outcome::mismatch(&output, "hello", true, None);
        assert!(outcome.detail().unwrap().contains(TRUNCATION_MARKER));
        assert_eq!(outcome.onechar(), 'o');
    }

    #[test]
    fn test_renderings() {
        let outcome = Outcome::mismatch("olleh", "hello", false, None);
        let sanity = outcome.render(Audience::Sanity, 1);
        assert!(sanity.starts_with("MISMATCH:  Submission output does not match sample"));
        assert!(sanity.contains("Your output:    olleh"));
        assert_eq!(outcome.render(Audience::Dryrun, 1), "> olleh");
        assert_eq!(
            outcome.render(Audience::Grader, 1),
            "0/1 Submission output does not match sample"
        );

        let ok = Outcome::correct(1)
            .with_short("Submission output matches sample")
            .with_matched_output("hello");
        assert_eq!(
            ok.render(Audience::Sanity, 1),
            "OK:  Submission output matches sample\nMatched output: hello"
        );
    }

    #[test]
    fn test_serde_round_trip_keeps_variant_and_score() {
        let outcomes = vec![
            Outcome::timed_out(3, Some(1), None),
            Outcome::deferred(),
            Outcome::memory_error(2, "Invalid read of size 4"),
            Outcome::points(-2, 0).with_short("late penalty"),
        ];
        for outcome in outcomes {
            let json = serde_json::to_string(&outcome).unwrap();
            let back: Outcome = serde_json::from_str(&json).unwrap();
            assert_eq!(back, outcome);
            assert_eq!(back.kind.name(), outcome.kind.name());
            assert_eq!(back.detail, outcome.detail);
        }
    }
}
