//! Requirement checks
//!
//! An automated check for a stated requirement ("must not use strlen",
//! "must free every node"). A passing check earns the test's points. A
//! failing check can be mistaken, so it is confirmed by a human before the
//! standard deduction applies.

use super::{Context, Judgment, Resolution, Review, ReviewOption};
use crate::harness::ExecutionRecord;
use crate::outcome::Outcome;

#[derive(Debug, Clone)]
pub struct RequirementCheck<'a> {
    /// What the check verifies, e.g. "confirm no use of strlen"
    pub description: &'a str,
    /// Shown to the grader in place of the check's output
    pub failure_msg: Option<&'a str>,
    pub total_pts: i32,
    /// Standard deduction for an unmet requirement
    pub deduction: i32,
}

/// The check command exits zero when the requirement is met
pub fn score_requirement(check: &RequirementCheck<'_>, record: &ExecutionRecord, context: Context) -> Judgment {
    if record.exit_code == 0 {
        return Outcome::correct(check.total_pts)
            .with_short("Requirement met")
            .into();
    }
    if context == Context::Pregrade {
        return Outcome::deferred().into();
    }
    let evidence = check.failure_msg.unwrap_or(&record.output).to_string();
    if context.is_batch() {
        return Outcome::inconclusive()
            .with_short(format!("Failed automated test to {}", check.description))
            .with_detail(evidence)
            .into();
    }
    Judgment::NeedsReview(requirement_review(check, evidence))
}

pub fn requirement_review(check: &RequirementCheck<'_>, evidence: String) -> Review {
    let deduct = ReviewOption::new(
        -check.deduction,
        "Does not meet required specification",
        format!("standard deduction of {} points, or enter another with a comment", check.deduction),
    );
    Review {
        question: format!(
            "This submission has failed the automated test to {}.",
            check.description
        ),
        evidence,
        options: vec![
            ReviewOption::new(
                check.total_pts,
                "Accept as valid",
                "automated test was mistaken",
            ),
            deduct,
        ],
        resolution: Resolution::Requirement {
            total_pts: check.total_pts,
            deduction: check.deduction,
        },
    }
}
