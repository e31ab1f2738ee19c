//! Exit status normalization
//!
//! Shell status, POSIX signals and timeout expiry are folded into one signed
//! exit code: 0 clean, `-N` for signal N, positive for the program's own
//! nonzero exit, and [`TIMED_OUT_CODE`] for a run stopped by the watchdog.

use nix::sys::signal::Signal;

/// Exit code recorded for a run killed on timeout.
///
/// Sits just past the 0-255 range, so no program can exit with it.
pub const TIMED_OUT_CODE: i32 = 256;

/// Shell codes meaning the command could not be launched at all
/// (125 supervisor failed before start, 126 not executable, 127 not found)
pub const NO_EXEC_CODES: [i32; 3] = [125, 126, 127];

/// Bash status for a pipeline member killed by SIGPIPE (e.g. `yes | head`)
pub const SIGPIPE_SHELL_CODE: i32 = 141;

/// Number of signal slots on Linux (SIGRTMAX + 1)
const NSIG: i32 = 65;

/// Map a shell-reported status onto the signed exit code model
pub fn normalize_shell_code(code: i32) -> i32 {
    let code = if (128..128 + NSIG).contains(&code) {
        128 - code
    } else {
        code
    };
    if code == -(Signal::SIGXCPU as i32) {
        // CPU rlimit expiry is a timeout, not a crash
        TIMED_OUT_CODE
    } else {
        code
    }
}

/// True for codes that mean the command never ran
pub fn is_no_exec(code: i32) -> bool {
    NO_EXEC_CODES.contains(&code)
}

/// Symbolic name of a signal number, e.g. `SIGSEGV`
pub fn signal_name(signo: i32) -> Option<&'static str> {
    Signal::try_from(signo).ok().map(|s| s.as_str())
}

/// Signal number with its name, e.g. `11 (SIGSEGV)`
pub fn signal_string(signo: i32) -> String {
    match signal_name(signo) {
        Some(name) => format!("{} ({})", signo, name),
        None => format!("{} (unknown signal)", signo),
    }
}

/// Describe how a program terminated
pub fn summarize_exit_status(exit_code: i32) -> String {
    if exit_code == 0 {
        "exited cleanly".to_string()
    } else if exit_code == TIMED_OUT_CODE {
        "timed out and was forcibly killed".to_string()
    } else if exit_code < 0 {
        format!("terminated with signal {}", signal_string(-exit_code))
    } else {
        format!("exited with non-zero code {}", exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_range_maps_to_negative_signal() {
        assert_eq!(normalize_shell_code(139), -11);
        assert_eq!(normalize_shell_code(134), -6);
        assert_eq!(normalize_shell_code(137), -9);
        for signo in 1..NSIG {
            if signo == Signal::SIGXCPU as i32 {
                continue;
            }
            assert_eq!(normalize_shell_code(128 + signo), -signo);
        }
    }

    #[test]
    fn test_cpu_limit_maps_to_timeout() {
        assert_eq!(normalize_shell_code(128 + 24), TIMED_OUT_CODE);
        assert_eq!(normalize_shell_code(-24), TIMED_OUT_CODE);
    }

    #[test]
    fn test_plain_codes_pass_through() {
        assert_eq!(normalize_shell_code(0), 0);
        assert_eq!(normalize_shell_code(1), 1);
        assert_eq!(normalize_shell_code(124), 124);
        assert_eq!(normalize_shell_code(127), 127);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(11), Some("SIGSEGV"));
        assert_eq!(signal_string(6), "6 (SIGABRT)");
        assert_eq!(signal_name(0), None);
    }

    #[test]
    fn test_summarize_exit_status() {
        assert_eq!(summarize_exit_status(0), "exited cleanly");
        assert_eq!(
            summarize_exit_status(-11),
            "terminated with signal 11 (SIGSEGV)"
        );
        assert_eq!(
            summarize_exit_status(TIMED_OUT_CODE),
            "timed out and was forcibly killed"
        );
        assert_eq!(summarize_exit_status(3), "exited with non-zero code 3");
        assert!(is_no_exec(127));
        assert!(!is_no_exec(1));
    }
}
