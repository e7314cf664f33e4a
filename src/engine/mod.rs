//! Engine module - isolated process execution
//!
//! - `executer`: spawns one child under rlimits with a watchdog and cancellation
//! - `isolation`: per-run namespaces and private root
//! - `sandbox`: interpreter configuration, harness script and report parsing

pub mod executer;
pub mod isolation;
pub mod sandbox;

pub use executer::{
    execute_sandboxed, ExecutionLimits, ExecutionOutcome, ExecutionSpec, ExecutionStatus,
    Identity,
};
pub use isolation::{BindMount, IsolationPlan, BOX_DIR};
pub use sandbox::{IsolationConfig, IsolationMode, SandboxConfig};
