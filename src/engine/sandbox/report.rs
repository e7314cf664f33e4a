//! Harness report parser
//!
//! The in-sandbox harness writes a JSON report describing how the submitted
//! program ended. This module turns it into an `ExecutionResult`.

use serde::Deserialize;

use crate::core::ErrorKind;
use crate::runner::ExecutionResult;

/// How the program ended, as seen from inside the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Ok,
    Error,
}

/// Parsed harness report
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessReport {
    pub status: ReportStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub error_kind: Option<String>,
    pub message: Option<String>,
}

/// Parse report file content
pub fn parse_report(content: &str) -> anyhow::Result<HarnessReport> {
    let report: HarnessReport = serde_json::from_str(content)?;
    if report.status == ReportStatus::Error && report.error_kind.is_none() {
        anyhow::bail!("Harness reported an error without a kind");
    }
    Ok(report)
}

impl HarnessReport {
    pub fn into_result(self) -> ExecutionResult {
        match self.status {
            ReportStatus::Ok => ExecutionResult::success(self.stdout, self.stderr),
            ReportStatus::Error => {
                let kind = ErrorKind::from_name(self.error_kind.as_deref().unwrap_or("Exception"));
                let message = self.message.unwrap_or_default();
                ExecutionResult::failure(kind, self.stdout, &message)
            }
        }
    }
}
