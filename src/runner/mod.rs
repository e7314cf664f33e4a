//! Runner module - Execution Engine contract
//!
//! `CodeRunner::run` executes one source string inside a fresh, request-scoped
//! context and reduces it to an `ExecutionResult`:
//! - `SandboxedRunner`: child interpreter per call, rlimits, watchdog
//!
//! The runner module does NOT:
//! - Look up exercises or courses
//! - Chain learner and test programs (that's the verifier's job)
//! - Decide verdicts

pub mod sandboxed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::ErrorKind;

/// Binding that makes a freestanding program see itself as the main script
pub const MODULE_NAME_BINDING: &str = "__name__";

/// Named values injected into the program's global scope before it starts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    bindings: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// Fill in the module name unless the caller already set one
    pub fn with_entry_point(mut self, module_name: &str) -> Self {
        self.bindings
            .entry(MODULE_NAME_BINDING)
            .or_insert_with(|| Value::String(module_name.to_string()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

/// Observable behavior of one run; never mutated once produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Ok,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error_kind: None,
        }
    }

    /// Failed run; stderr becomes the one-line `"{kind}: {message}"` rendering
    pub fn failure(kind: ErrorKind, stdout: impl Into<String>, message: &str) -> Self {
        Self {
            status: RunStatus::Error,
            stdout: stdout.into(),
            stderr: format!("{}: {}", kind, message),
            error_kind: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    /// Cap stdout and stderr at `max_bytes` each
    pub fn truncated(mut self, max_bytes: usize) -> Self {
        truncate_output(&mut self.stdout, max_bytes);
        truncate_output(&mut self.stderr, max_bytes);
        self
    }
}

pub const TRUNCATION_MARKER: &str = "\n... [output truncated]\n";

/// Truncate on a char boundary and append a marker
pub fn truncate_output(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
}

/// Host-side failures: the program could not be run at all.
/// Failures of the program itself are reported inside `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to prepare execution workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("failed to launch sandboxed interpreter: {0:#}")]
    Launch(anyhow::Error),
    #[error("execution limiter is closed")]
    LimiterClosed,
    #[error("sandbox self-test failed: {0}")]
    SelfTest(String),
}

/// Execution Engine
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(
        &self,
        source: &str,
        context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError>;
}

pub use sandboxed::SandboxedRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_only_fills_missing_name() {
        let context = ExecutionContext::new().with_entry_point("__main__");
        assert_eq!(context.get("__name__"), Some(&Value::from("__main__")));

        let context = ExecutionContext::new()
            .with_binding("__name__", "solution")
            .with_entry_point("__main__");
        assert_eq!(context.get("__name__"), Some(&Value::from("solution")));
    }

    #[test]
    fn test_failure_renders_one_line_stderr() {
        let result = ExecutionResult::failure(ErrorKind::NameError, "partial\n", "name 'x' is not defined");

        assert!(!result.is_ok());
        assert_eq!(result.stdout, "partial\n");
        assert_eq!(result.stderr, "NameError: name 'x' is not defined");
        assert_eq!(result.error_kind, Some(ErrorKind::NameError));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut text = "ééééé".to_string();
        truncate_output(&mut text, 3);
        assert_eq!(text, format!("é{}", TRUNCATION_MARKER));

        let mut short = "abc".to_string();
        truncate_output(&mut short, 10);
        assert_eq!(short, "abc");
    }

    #[test]
    fn test_result_serializes_status_lowercase() {
        let value = serde_json::to_value(ExecutionResult::success("a", "")).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["error_kind"], Value::Null);
    }
}
