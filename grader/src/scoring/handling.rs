//! Graceful-handling policy
//!
//! Used when the expected behavior is to detect an error condition and
//! report it usefully rather than to produce exact output. Runs are placed in
//! one of four quadrants (feedback good or bad, handling good or bad), plus a
//! fallback for no feedback at all.

use regex::Regex;

use super::diff::match_ok;
use super::triage::{simple_failure, FailOn, TimeoutFacts};
use super::{Context, Judgment, Resolution, Review, ReviewAnswer, ReviewOption};
use crate::harness::status::{is_no_exec, summarize_exit_status, TIMED_OUT_CODE};
use crate::harness::ExecutionRecord;
use crate::outcome::Outcome;
use crate::text::abbreviate;

pub const DEFAULT_EXPECTED_BEHAVIOR: &str =
    "Feedback to user should be clear, specific, and actionable";

/// What a graceful-handling test checks
#[derive(Debug, Clone)]
pub struct HandlingCheck<'a> {
    /// e.g. "running with a missing file"
    pub attempted_action: &'a str,
    pub expected_behavior: &'a str,
    /// Known-wrong output meaning the error went undetected
    pub reject: Option<&'a str>,
    /// Wording accepted automatically in batch contexts
    pub msg_regex: Option<&'a Regex>,
    pub accept_ratio: f64,
    pub total_pts: i32,
}

/// Program exited on its own terms
pub fn is_clean_exit(exit_code: i32) -> bool {
    exit_code >= 0 && exit_code != TIMED_OUT_CODE && !is_no_exec(exit_code)
}

/// Review options for a handling test worth `pts`
pub fn handling_options(pts: i32, concern: Option<String>) -> Vec<ReviewOption> {
    let half = pts.div_euclid(2);
    vec![
        ReviewOption::new(
            pts,
            "Gives feedback that is correct/clear/actionable and handles appropriately",
            "print err msg, clean exit",
        )
        .with_concern(concern.clone()),
        ReviewOption::new(
            half,
            "Gives feedback that is correct/clear/actionable but handles incorrectly",
            "blunders on, extraneous actions/printing, crash/abort",
        ),
        ReviewOption::new(
            half,
            "Gives feedback that is misleading/vague/unhelpful but handles appropriately",
            "print err msg, clean exit",
        )
        .with_concern(concern),
        ReviewOption::new(
            0,
            "Gives feedback that is misleading/vague/unhelpful and handles incorrectly",
            "blunders on, extraneous actions/printing, crash/abort",
        ),
        ReviewOption::new(
            0,
            "Gives no feedback on error; no handling demonstrated",
            "error not detected at all?",
        ),
    ]
}

pub fn score_handling(
    check: &HandlingCheck<'_>,
    student: &ExecutionRecord,
    solution: &ExecutionRecord,
    context: Context,
) -> Judgment {
    if let Some(timed_out) = simple_failure(student, FailOn::Timeout, TimeoutFacts::default()) {
        return timed_out.into();
    }
    if let Some(reject) = check.reject {
        if match_ok(&student.output, reject, check.accept_ratio) {
            return Outcome::incorrect(0)
                .with_short("Error undetected; no handling demonstrated")
                .into();
        }
    }

    let message_ok = match_ok(&student.output, &solution.output, check.accept_ratio);
    let clean_exit = is_clean_exit(student.exit_code);

    if message_ok && clean_exit {
        return Outcome::correct(check.total_pts)
            .with_short("Submission feedback and handling matches sample")
            .into();
    }

    if context.is_batch() {
        if let Some(failed) = simple_failure(student, FailOn::SignalsAndTimeout, TimeoutFacts::default()) {
            return failed.into();
        }
        if check
            .msg_regex
            .map(|re| re.is_match(&student.output))
            .unwrap_or(false)
        {
            return Outcome::correct(check.total_pts)
                .with_short("Matched dryrun regex")
                .into();
        }
        if !clean_exit {
            return Outcome::incorrect(0)
                .with_short(summarize_exit_status(student.exit_code))
                .into();
        }
        let shown = if student.output.is_empty() {
            "<empty>".to_string()
        } else {
            abbreviate(&student.output, 3, 500)
        };
        return Outcome::inconclusive().with_detail(shown).into();
    }

    if context == Context::Pregrade {
        return Outcome::deferred().into();
    }

    let concern = (!clean_exit).then(|| {
        format!(
            "This submission {}.",
            summarize_exit_status(student.exit_code)
        )
    });
    let soln_output = abbreviate(&solution.output, usize::MAX, 1000);
    let review = Review {
        question: format!(
            "Above is the output from {}. {}.\n(soln uses '{}')",
            check.attempted_action, check.expected_behavior, soln_output
        ),
        evidence: summarize_output(&student.output, student.exit_code),
        options: handling_options(check.total_pts, concern),
        resolution: Resolution::Handling {
            total_pts: check.total_pts,
            exit_suffix: (!clean_exit).then(|| summarize_exit_status(student.exit_code)),
        },
    };

    // close to our wording, or nothing printed at all: no need to ask
    let automatic = if message_ok {
        Some(1)
    } else if student.output.is_empty() {
        Some(4)
    } else {
        None
    };
    match automatic {
        Some(choice) => review
            .resolve(&ReviewAnswer::choose(choice))
            .unwrap_or_else(|_| Outcome::inconclusive())
            .into(),
        None => Judgment::NeedsReview(review),
    }
}

/// Submission output followed by how the program exited
pub fn summarize_output(output: &str, exit_code: i32) -> String {
    format!(
        "----- Submission output:\n{}\n----- Program {}.",
        output,
        summarize_exit_status(exit_code)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;
    use crate::scoring::ReviewAnswer;

    fn record(output: &str, exit_code: i32) -> ExecutionRecord {
        ExecutionRecord {
            output: output.to_string(),
            exit_code,
            elapsed_secs: 0.01,
            aux_log: None,
            truncated: false,
        }
    }

    fn check() -> HandlingCheck<'static> {
        HandlingCheck {
            attempted_action: "running with a missing file",
            expected_behavior: DEFAULT_EXPECTED_BEHAVIOR,
            reject: None,
            msg_regex: None,
            accept_ratio: 0.95,
            total_pts: 4,
        }
    }

    const SOLN: &str = "reverse: cannot open 'missing.txt'";

    #[test]
    fn test_matching_message_and_clean_exit_is_correct() {
        let judgment = score_handling(&check(), &record(SOLN, 1), &record(SOLN, 1), Context::Autograder);
        let outcome = judgment.into_final().unwrap();
        assert!(outcome.passed());
        assert_eq!(outcome.score_as_points(), Some(4));
    }

    #[test]
    fn test_reject_pattern() {
        let mut c = check();
        c.reject = Some("0 lines reversed");
        let judgment = score_handling(&c, &record("0 lines reversed", 0), &record(SOLN, 1), Context::Dryrun);
        assert_eq!(
            judgment.into_final().unwrap().summary(),
            "Error undetected; no handling demonstrated"
        );
    }

    #[test]
    fn test_batch_crash_is_signal() {
        let judgment = score_handling(&check(), &record("", -11), &record(SOLN, 1), Context::TestSuite);
        assert!(matches!(
            judgment.into_final().unwrap().kind,
            OutcomeKind::SignalRaised { .. }
        ));
    }

    #[test]
    fn test_batch_regex_and_inconclusive() {
        let re = Regex::new("(?i)cannot open").unwrap();
        let mut c = check();
        c.msg_regex = Some(&re);
        let outcome = score_handling(&c, &record("Cannot open that file!", 0), &record(SOLN, 1), Context::Dryrun)
            .into_final()
            .unwrap();
        assert_eq!(outcome.summary(), "Matched dryrun regex");

        let outcome = score_handling(&check(), &record("oops", 0), &record(SOLN, 1), Context::Dryrun)
            .into_final()
            .unwrap();
        assert!(matches!(outcome.kind, OutcomeKind::Inconclusive));
        assert_eq!(outcome.detail(), Some("oops"));

        let outcome = score_handling(&check(), &record("oops", 3), &record(SOLN, 1), Context::Sanity)
            .into_final()
            .unwrap();
        assert!(matches!(outcome.kind, OutcomeKind::Inconclusive));
    }

    #[test]
    fn test_pregrade_defers() {
        let outcome = score_handling(&check(), &record("oops", 0), &record(SOLN, 1), Context::Pregrade)
            .into_final()
            .unwrap();
        assert!(outcome.is_deferred());
    }

    #[test]
    fn test_interactive_auto_scores_empty_output() {
        let outcome = score_handling(&check(), &record("", 0), &record(SOLN, 1), Context::Autograder)
            .into_final()
            .unwrap();
        assert_eq!(outcome.score_as_points(), Some(0));
        assert_eq!(outcome.summary(), "Gives no feedback on error; no handling demonstrated");
    }

    #[test]
    fn test_interactive_message_ok_but_crash_gets_half() {
        let outcome = score_handling(&check(), &record(SOLN, -6), &record(SOLN, 1), Context::Autograder)
            .into_final()
            .unwrap();
        assert_eq!(outcome.score_as_points(), Some(2));
        assert!(outcome.summary().ends_with("; terminated with signal 6 (SIGABRT)"));
    }

    #[test]
    fn test_interactive_review_resolution() {
        let judgment = score_handling(&check(), &record("bad things happened", 0), &record(SOLN, 1), Context::RunTests);
        let review = match judgment {
            Judgment::NeedsReview(review) => review,
            other => panic!("expected review, got {:?}", other),
        };
        assert_eq!(review.options.len(), 5);
        assert!(review.evidence.contains("bad things happened"));

        let full = review.resolve(&ReviewAnswer::choose(0)).unwrap();
        assert!(full.passed());
        assert_eq!(full.score_as_points(), Some(4));

        let vague = review
            .resolve(&ReviewAnswer::choose(2).with_comment("message names no file"))
            .unwrap();
        assert_eq!(vague.score_as_points(), Some(2));
        assert!(vague.summary().ends_with("(message names no file)"));
    }

    #[test]
    fn test_timeout_is_never_reviewed() {
        let student = record("reverse: cannot open 'missing.txt'", TIMED_OUT_CODE);
        for context in [Context::Autograder, Context::RunTests, Context::Pregrade, Context::Dryrun] {
            let outcome = score_handling(&check(), &student, &record(SOLN, 1), context)
                .into_final()
                .unwrap();
            assert!(matches!(outcome.kind, OutcomeKind::TimedOut { .. }), "{:?}", context);
            assert_eq!(outcome.score_as_points(), Some(0));
        }
    }

    #[test]
    fn test_options_use_half_floor() {
        let options = handling_options(5, None);
        let scores: Vec<i32> = options.iter().map(|o| o.score).collect();
        assert_eq!(scores, vec![5, 2, 2, 0, 0]);
    }
}
