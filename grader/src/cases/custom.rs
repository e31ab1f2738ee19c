//! Student-written tests
//!
//! A suite may carry a `[custom]` template. Each line of a student's custom
//! test file becomes an output-vs-solution test named `Custom-<line>`, with a
//! timeout scaled from the solution's own run. Blank lines and `#` comments
//! are skipped.

use std::path::Path;

use lazy_regex::regex_is_match;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{default_true, RunError, TestCase, TestKind};
use crate::harness::template::referenced_vars;
use crate::scoring::filters::PostFilter;

fn default_timeout_multiplier() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTemplate {
    /// Executables a custom test may run
    #[serde(default)]
    pub executables: Vec<String>,
    /// Refuse executables not listed; otherwise an unlisted program is
    /// compared with the `<exe>_soln` the student built beside it
    #[serde(default = "default_true")]
    pub restrict_executables: bool,
    #[serde(default)]
    pub total_pts: i32,
    #[serde(default)]
    pub postfilter: Option<PostFilter>,
    #[serde(default)]
    pub accept_ratio: Option<f64>,
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
}

impl CustomTemplate {
    pub fn validate(&self) -> Result<(), RunError> {
        if self.restrict_executables && self.executables.is_empty() {
            return Err(RunError::Manifest(
                "custom template restricts executables but lists none".to_string(),
            ));
        }
        if self.timeout_multiplier <= 0.0 {
            return Err(RunError::Manifest(
                "custom template timeout_multiplier must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Test for one line of a custom test file
    ///
    /// The line is a command such as `reverse words.txt` or
    /// `cat words.txt | $reverse`; a leading `./` is dropped.
    pub fn test_from_line(&self, line: &str, num: usize) -> Result<TestCase, RunError> {
        let line = line.trim();
        let line = line.strip_prefix("./").unwrap_or(line);

        let (exe, command) = match referenced_vars(line).into_iter().next() {
            Some(exe) => (exe, line.to_string()),
            None => {
                let exe = line.split_whitespace().next().unwrap_or_default().to_string();
                (exe, format!("${}", line))
            }
        };

        if !regex_is_match!(r"^[A-Za-z0-9_]+$", &exe) {
            return Err(RunError::Manifest(format!(
                "line {}: {:?} is not a valid executable name",
                num, exe
            )));
        }
        let listed = self.executables.contains(&exe);
        if !listed && self.restrict_executables {
            return Err(RunError::Manifest(format!(
                "line {}: {} is not a valid executable choice, instead use one of {}",
                num,
                exe,
                self.executables.join(", ")
            )));
        }
        let executables = if listed {
            self.executables.clone()
        } else {
            vec![exe]
        };

        let case = TestCase {
            name: format!("Custom-{}", num),
            description: format!("Custom test: {}", line),
            command,
            executables,
            timeout: None,
            total_pts: self.total_pts,
            postfilter: self.postfilter,
            reject: None,
            kind: TestKind::OutputDiffSoln {
                accept_ratio: self.accept_ratio,
                solution_timeout_multiplier: Some(self.timeout_multiplier),
                show_match: false,
                local_solution: !listed,
            },
        };
        case.validate()?;
        Ok(case)
    }

    /// Tests for every command in a custom test file, numbered by line
    pub fn tests_from_text(&self, text: &str) -> Result<Vec<TestCase>, RunError> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(i, line)| self.test_from_line(line, i + 1))
            .collect()
    }

    pub async fn load_tests(&self, path: &Path) -> Result<Vec<TestCase>, RunError> {
        let text = tokio::fs::read_to_string(path).await?;
        let tests = self.tests_from_text(&text).map_err(|e| match e {
            RunError::Manifest(msg) => RunError::Manifest(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        info!("Read {} custom tests from {:?}", tests.len(), path);
        Ok(tests)
    }
}
