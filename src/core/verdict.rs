use serde::{Deserialize, Serialize};

use super::error_kind::ErrorKind;

pub const NO_AUTOMATED_CHECK: &str =
    "Code executed successfully (no automated check for this exercise).";
pub const TEST_PASSED: &str = "Test passed.";
pub const TEST_FAILED_SILENTLY: &str = "Test failed without a specific error message.";
pub const LEARNER_CODE_FAILED: &str = "Syntax or runtime error in your code.";
pub const SYNTAX_ERROR_IN_CODE: &str = "Syntax error in code.";
pub const EXECUTION_ERROR: &str = "Error while executing code.";

/// Which program of a check produced the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Learner,
    Test,
}

/// Failure classification kept alongside a verdict (not part of the wire format)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub stage: Stage,
    pub kind: Option<ErrorKind>,
}

/// Result of one execute/check request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub success: bool,
    pub output: String,
    pub details: String,
    #[serde(skip)]
    pub failure: Option<Failure>,
}

impl Verdict {
    pub fn passed(output: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            details: details.into(),
            failure: None,
        }
    }

    pub fn failed(
        stage: Stage,
        kind: Option<ErrorKind>,
        output: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            output: output.into(),
            details: details.into(),
            failure: Some(Failure { stage, kind }),
        }
    }

    /// Error kind of the failing stage, if any
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        self.failure.as_ref().and_then(|f| f.kind.as_ref())
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(|f| f.stage)
    }
}
