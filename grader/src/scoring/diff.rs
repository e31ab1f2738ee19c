//! Output comparison
//!
//! Outputs are compared line by line after normalization: runs of
//! whitespace collapse to one space, line ends are trimmed and blank lines
//! are ignored. A fuzzy match by edit-distance similarity is available for
//! ratios strictly between 0 and 1.

use crate::outcome::Outcome;
use crate::text::{abbreviate, is_single_line};

/// Longest line diff computed in full; bigger inputs get a coarse diff
const MAX_DIFF_CELLS: usize = 4_000_000;

/// Lines kept in each side of a mismatch report
const MISMATCH_LINES: usize = 50;

/// Normalize output for whitespace-insensitive comparison
pub fn normalize_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Exact match modulo whitespace
pub fn same_ignoring_whitespace(actual: &str, expected: &str) -> bool {
    normalize_lines(actual) == normalize_lines(expected)
}

/// Edit-distance similarity in `[0, 1]`, ignoring spaces and tabs
pub fn similarity(actual: &str, expected: &str) -> f64 {
    let strip = |s: &str| -> Vec<u8> {
        s.bytes().filter(|b| *b != b' ' && *b != b'\t').collect()
    };
    let a = strip(actual);
    let b = strip(expected);
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let distance = triple_accel::levenshtein::levenshtein_exp(&a, &b) as f64;
    1.0 - distance / longest as f64
}

/// Does the output match the expected output?
///
/// `accept_ratio` of 1.0 (or anything outside `(0, 1)`) requires an exact
/// match modulo whitespace.
pub fn match_ok(actual: &str, expected: &str, accept_ratio: f64) -> bool {
    if same_ignoring_whitespace(actual, expected) {
        return true;
    }
    if accept_ratio >= 1.0 || accept_ratio <= 0.0 {
        return false;
    }
    similarity(actual, expected) >= accept_ratio
}

/// Line diff of normalized outputs: `< ` lines only in `expected`, `> ` lines
/// only in `actual`. Empty when they match.
pub fn line_diff(expected: &str, actual: &str) -> String {
    let old = normalize_lines(expected);
    let new = normalize_lines(actual);

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut out = Vec::new();
    if old_mid.len().saturating_mul(new_mid.len()) > MAX_DIFF_CELLS {
        out.extend(old_mid.iter().map(|l| format!("< {}", l)));
        out.extend(new_mid.iter().map(|l| format!("> {}", l)));
    } else {
        lcs_diff(old_mid, new_mid, &mut out);
    }
    out.join("\n")
}

fn lcs_diff(old: &[String], new: &[String], out: &mut Vec<String>) {
    let (n, m) = (old.len(), new.len());
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            out.push(format!("< {}", old[i]));
            i += 1;
        } else {
            out.push(format!("> {}", new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| format!("< {}", l)));
    out.extend(new[j..].iter().map(|l| format!("> {}", l)));
}

/// Human-readable account of how `actual` differs from `expected`.
///
/// Prints both outputs when their abbreviated prefixes already differ,
/// otherwise an abbreviated line diff. A caller-supplied `detail` always
/// selects the diff form.
pub fn summarize_mismatch(actual: &str, expected: &str, detail: Option<&str>) -> String {
    if detail.is_none() {
        let abbr_actual = abbreviate(actual.trim(), MISMATCH_LINES, 500);
        let abbr_expected = abbreviate(expected.trim(), MISMATCH_LINES, 500);
        if !match_ok(&abbr_actual, &abbr_expected, 1.0) {
            let sep = if is_single_line(&abbr_actual) && is_single_line(&abbr_expected) {
                ' '
            } else {
                '\n'
            };
            return format!(
                "Correct output:    {sep}{}{sep}\nSubmission output: {sep}{}\n",
                abbr_expected,
                abbr_actual,
                sep = sep
            );
        }
    }
    let diffed = abbreviate(&line_diff(expected, actual), MISMATCH_LINES, 1000);
    format!("Diff of correct output and submission output: \n{}\n", diffed)
}

/// Output-diff policy: full credit on a match, a mismatch report otherwise.
///
/// `show_match` keeps the matched output for sanity reports.
pub fn score_output_match(
    output: &str,
    expected: &str,
    total_pts: i32,
    accept_ratio: f64,
    truncated: bool,
    detail: Option<&str>,
    show_match: bool,
) -> Outcome {
    if !truncated && match_ok(output, expected, accept_ratio) {
        let outcome = Outcome::correct(total_pts).with_short("Submission output matches sample");
        return if show_match {
            outcome.with_matched_output(output)
        } else {
            outcome
        };
    }
    Outcome::mismatch(output, expected, truncated, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_is_reflexive_and_whitespace_insensitive() {
        let text = "alpha beta\n\ngamma\n";
        assert!(match_ok(text, text, 1.0));
        assert!(match_ok("alpha   beta  \n gamma", text, 1.0));
        assert!(match_ok("alpha\tbeta\n\n\n\ngamma\n\n", text, 1.0));
    }

    #[test]
    fn test_intra_token_spacing_still_matters() {
        assert!(!match_ok("alphabeta\ngamma", "alpha beta\ngamma", 1.0));
    }

    #[test]
    fn test_exact_ratio_rejects_near_miss() {
        assert!(!match_ok("Usage: rev FILE", "usage: rev FILE", 1.0));
    }

    #[test]
    fn test_fuzzy_ratio_accepts_near_miss() {
        let soln = "Error: could not open file 'missing.txt'";
        let student = "error: could not open file 'missing.txt'";
        assert!(match_ok(student, soln, 0.95));
        assert!(!match_ok("segfault", soln, 0.95));
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("a b c", "abc"), 1.0);
    }

    #[test]
    fn test_line_diff() {
        let diff = line_diff("one\ntwo\nthree", "one\n2\nthree\nfour");
        assert_eq!(diff, "< two\n> 2\n> four");
        assert_eq!(line_diff("same", " same "), "");
    }

    #[test]
    fn test_score_output_match() {
        let outcome = score_output_match("hello\n", "hello", 3, 1.0, false, None, false);
        assert!(outcome.passed());
        assert_eq!(outcome.score_as_points(), Some(3));

        let outcome = score_output_match("olleh", "hello", 3, 1.0, false, None, false);
        assert!(!outcome.passed());
        assert_eq!(outcome.score_as_points(), Some(0));
        assert!(outcome.detail().unwrap().contains("olleh"));
    }

    #[test]
    fn test_truncated_output_never_matches() {
        let outcome = score_output_match("y\ny", "y\ny", 3, 1.0, true, None, false);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_summarize_mismatch_side_by_side() {
        let summary = summarize_mismatch("olleh", "hello", None);
        assert_eq!(summary, "Correct output:     hello \nSubmission output:  olleh\n");
    }

    #[test]
    fn test_summarize_mismatch_uses_diff_when_prefix_agrees() {
        let expected: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let actual = expected.replace("line 90", "line ninety");
        let summary = summarize_mismatch(&actual, &expected, None);
        assert!(summary.starts_with("Diff of correct output and submission output:"));
        assert!(summary.contains("< line 90"));
        assert!(summary.contains("> line ninety"));
    }
}
