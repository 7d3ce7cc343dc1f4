//! Result model: per-test outcomes, result columns and the run summary
//!
//! A test ends in exactly one of three terminal states. CRASHED is kept
//! distinct from FAILED: a crash is the isolation layer reporting abnormal
//! child termination, not a comparison that came out false.

use std::fmt;

/// Terminal state of one executed test definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    Crashed,
}

impl Outcome {
    pub fn parse(text: &str) -> Option<Outcome> {
        match text {
            "PASSED" => Some(Outcome::Passed),
            "FAILED" => Some(Outcome::Failed),
            "CRASHED" => Some(Outcome::Crashed),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Passed => "PASSED",
            Outcome::Failed => "FAILED",
            Outcome::Crashed => "CRASHED",
        };
        write!(f, "{}", s)
    }
}

/// Everything collected about one executed test definition
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    /// Resolved path of the owning group (`parent:child`)
    pub group: String,
    /// Generated test name, e.g. `test_sum_0`
    pub name: String,
    /// C signature of the function under test
    pub signature: String,
    pub outcome: Outcome,
    /// Return value of the function under test, formatted per its type
    pub actual: String,
    /// Rendered expected result, e.g. `== 5` (empty when none was given)
    pub expected: String,
    /// Generation-time warnings attached to this test
    pub warnings: Vec<String>,
    /// Everything the test wrote to stdout/stderr while running
    pub output: String,
    /// Source renderings of the expected expressions that came out false
    pub failed_expressions: Vec<String>,
}

impl TestResult {
    /// Record synthesized by the parent when the child terminated
    /// abnormally; no partial child data is carried over.
    pub fn crashed(group: &str, name: &str, signature: &str) -> Self {
        TestResult {
            group: group.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
            outcome: Outcome::Crashed,
            actual: String::new(),
            expected: String::new(),
            warnings: Vec::new(),
            output: String::new(),
            failed_expressions: Vec::new(),
        }
    }
}

/// Ordered results of a whole run
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub results: Vec<TestResult>,
}

impl Summary {
    pub fn push(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn passed(&self) -> usize {
        self.count(Outcome::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    pub fn crashed(&self) -> usize {
        self.count(Outcome::Crashed)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == outcome)
            .count()
    }

    /// Process exit code for an embedding driver: the number of tests that
    /// did not pass. A crashed test must not read as success, while staying
    /// a distinct reported outcome.
    pub fn exit_code(&self) -> i32 {
        (self.failed() + self.crashed()) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(outcome: Outcome) -> TestResult {
        TestResult {
            group: "group_0".to_string(),
            name: "test_sum_0".to_string(),
            signature: "int sum(int, int)".to_string(),
            outcome,
            actual: "5".to_string(),
            expected: "== 5".to_string(),
            warnings: Vec::new(),
            output: String::new(),
            failed_expressions: Vec::new(),
        }
    }

    #[test]
    fn test_outcome_roundtrip() {
        for outcome in [Outcome::Passed, Outcome::Failed, Outcome::Crashed] {
            assert_eq!(Outcome::parse(&outcome.to_string()), Some(outcome));
        }
        assert_eq!(Outcome::parse("passed"), None);
    }

    #[test]
    fn test_exit_code_counts_failed_and_crashed() {
        let mut summary = Summary::default();
        summary.push(result_with(Outcome::Passed));
        summary.push(result_with(Outcome::Failed));
        summary.push(result_with(Outcome::Crashed));
        summary.push(result_with(Outcome::Passed));

        assert_eq!(summary.len(), 4);
        assert_eq!(summary.passed(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.crashed(), 1);
        assert_eq!(summary.exit_code(), 2);
    }

    #[test]
    fn test_all_passed_exits_zero() {
        let mut summary = Summary::default();
        summary.push(result_with(Outcome::Passed));
        assert_eq!(summary.exit_code(), 0);
    }
}
