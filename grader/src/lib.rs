//! Sandboxed test execution and scoring for course autograding
//!
//! A suite of tests is run against a submission directory. Each test runs a
//! shell command under resource limits ([`harness`]), optionally under a
//! memory checker or timing tool whose reports are scraped ([`scrape`]), and
//! is judged by a scoring policy ([`scoring`]) into an [`outcome::Outcome`].
//! Results are kept per submission in [`results::SubmissionResults`].

pub mod cases;
pub mod config;
pub mod console;
pub mod grading;
pub mod harness;
pub mod lock;
pub mod outcome;
pub mod results;
pub mod scoring;
pub mod scrape;
pub mod text;
