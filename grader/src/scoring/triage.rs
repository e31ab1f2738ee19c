//! Simple-failure triage
//!
//! Picks off runs that never need a scoring policy: commands that could not
//! execute, timeouts and fatal signals. Any other exit falls through.

use lazy_regex::{regex, regex_find};
use nix::sys::signal::Signal;

use crate::harness::status::{is_no_exec, signal_string, TIMED_OUT_CODE};
use crate::harness::ExecutionRecord;
use crate::outcome::Outcome;

/// Which exit codes the triage treats as failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    /// Every signal and the timeout
    SignalsAndTimeout,
    /// The timeout but not signals, for tools that report on crashes
    Timeout,
    /// Only "could not execute" codes
    NoExecOnly,
}

impl FailOn {
    fn fails(&self, exit_code: i32) -> bool {
        match self {
            FailOn::SignalsAndTimeout => exit_code < 0 || exit_code == TIMED_OUT_CODE,
            FailOn::Timeout => exit_code == TIMED_OUT_CODE,
            FailOn::NoExecOnly => false,
        }
    }
}

/// Limits to report on a timeout
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeoutFacts {
    pub limit_secs: Option<u64>,
    pub solution_secs: Option<f64>,
}

fn libc_message(output: &str) -> Option<String> {
    regex_find!(r"\*\*\* Error in `.* \*\*\*|\*\*\* .* \*\*\*: .* terminated", output)
        .map(str::to_string)
}

pub fn simple_failure(record: &ExecutionRecord, fail_on: FailOn, facts: TimeoutFacts) -> Option<Outcome> {
    if is_no_exec(record.exit_code) {
        return Some(Outcome::not_executed(format!(
            "({}) {}",
            record.exit_code, record.output
        )));
    }
    if !fail_on.fails(record.exit_code) {
        return None;
    }

    if record.timed_out() {
        // some allocator aborts deadlock and end up here
        let limit = facts
            .limit_secs
            .unwrap_or_else(|| record.elapsed_secs.round() as u64);
        let solution = facts.solution_secs.map(|s| s.ceil().max(1.0) as u64);
        return Some(Outcome::timed_out(limit, solution, libc_message(&record.output)));
    }

    let signo = -record.exit_code;
    let mut description = signal_string(signo);
    if signo == Signal::SIGABRT as i32 {
        if let Some(assertion) = regex!(r".*Assertion.*failed\.").find(&record.output) {
            description.push(' ');
            description.push_str(assertion.as_str());
        }
        if let Some(msg) = libc_message(&record.output) {
            description.push(' ');
            description.push_str(&msg);
        }
    }
    Some(Outcome::signal_raised(description))
}

/// Memcheck special case: a libc buffer-overflow abort inside the checker
/// surfaces as exit 127 with a `**pid**` line in the log
pub fn memcheck_abort(record: &ExecutionRecord) -> Option<Outcome> {
    if record.exit_code != 127 {
        return None;
    }
    let log = record.aux_log.as_deref()?;
    regex!(r"\*\*\d+\*\*\s+(.*)")
        .captures(log)
        .map(|caps| Outcome::signal_raised(caps[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;

    fn record(exit_code: i32, output: &str) -> ExecutionRecord {
        ExecutionRecord {
            output: output.to_string(),
            exit_code,
            elapsed_secs: 5.02,
            aux_log: None,
            truncated: false,
        }
    }

    #[test]
    fn test_no_exec_always_fails() {
        let outcome = simple_failure(
            &record(127, "bash: ./reverse: No such file or directory"),
            FailOn::NoExecOnly,
            TimeoutFacts::default(),
        )
        .unwrap();
        assert_eq!(
            outcome.summary(),
            "Did not execute (127) bash: ./reverse: No such file or directory"
        );
    }

    #[test]
    fn test_timeout() {
        let facts = TimeoutFacts {
            limit_secs: Some(5),
            solution_secs: Some(0.3),
        };
        let outcome = simple_failure(&record(TIMED_OUT_CODE, ""), FailOn::SignalsAndTimeout, facts).unwrap();
        assert_eq!(
            outcome.summary(),
            "Waited 5 seconds, program did not complete (soln completes in under 1 seconds)"
        );
        assert_eq!(outcome.score_as_points(), Some(0));
    }

    #[test]
    fn test_timeout_with_libc_message() {
        let out = "*** Error in `./reverse': double free or corruption (fasttop): 0x0804b008 ***";
        let outcome = simple_failure(&record(TIMED_OUT_CODE, out), FailOn::SignalsAndTimeout, TimeoutFacts::default()).unwrap();
        match outcome.kind {
            OutcomeKind::TimedOut { limit_secs, error_logged, .. } => {
                assert_eq!(limit_secs, 5);
                assert!(error_logged.unwrap().starts_with("*** Error in `./reverse'"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_segfault_names_signal() {
        let outcome = simple_failure(&record(-11, ""), FailOn::SignalsAndTimeout, TimeoutFacts::default()).unwrap();
        assert_eq!(
            outcome.summary(),
            "Program terminated due to signal 11 (SIGSEGV)"
        );
    }

    #[test]
    fn test_abort_appends_assertion() {
        let out = "reverse: reverse.c:12: main: Assertion `n > 0' failed.";
        let outcome = simple_failure(&record(-6, out), FailOn::SignalsAndTimeout, TimeoutFacts::default()).unwrap();
        assert_eq!(
            outcome.summary(),
            "Program terminated due to signal 6 (SIGABRT) reverse: reverse.c:12: main: Assertion `n > 0' failed."
        );
    }

    #[test]
    fn test_fall_through() {
        assert!(simple_failure(&record(0, "ok"), FailOn::SignalsAndTimeout, TimeoutFacts::default()).is_none());
        assert!(simple_failure(&record(1, "ok"), FailOn::SignalsAndTimeout, TimeoutFacts::default()).is_none());
        assert!(simple_failure(&record(-11, ""), FailOn::NoExecOnly, TimeoutFacts::default()).is_none());
        assert!(simple_failure(&record(-11, ""), FailOn::Timeout, TimeoutFacts::default()).is_none());
        assert!(simple_failure(&record(TIMED_OUT_CODE, ""), FailOn::Timeout, TimeoutFacts::default()).is_some());
    }

    #[test]
    fn test_memcheck_abort() {
        let mut rec = record(127, "");
        rec.aux_log = Some("==12== \n**12** *** memcpy_chk: buffer overflow detected ***: program terminated\n".into());
        let outcome = memcheck_abort(&rec).unwrap();
        assert_eq!(
            outcome.summary(),
            "Program terminated due to signal *** memcpy_chk: buffer overflow detected ***: program terminated"
        );
        assert!(memcheck_abort(&record(127, "")).is_none());
    }
}
