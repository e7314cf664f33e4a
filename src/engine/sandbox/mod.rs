//! Sandbox module - configuration and harness plumbing
//!
//! This module handles:
//! - Runtime configuration (interpreter, limits, harness names)
//! - The harness script executed inside every child interpreter
//! - Parsing the harness report into an `ExecutionResult`
//!
//! The sandbox module does NOT:
//! - Spawn processes (that's the executer's job)
//! - Know about courses, exercises or verdicts

pub mod config;
pub mod report;

pub use config::{IsolationConfig, IsolationMode, SandboxConfig};
pub use report::{parse_report, HarnessReport, ReportStatus};

/// Harness script written into each run's working directory
pub const HARNESS_SOURCE: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/harness.py"));
pub const HARNESS_FILE: &str = "harness.py";
pub const REPORT_FILE: &str = "report.json";
