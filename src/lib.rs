//! Course judge: execution and verification of learner-submitted Python code
//!
//! - `engine`: isolated child-process execution under resource limits
//! - `runner`: the Execution Engine contract and its sandboxed implementation
//! - `content`: courses, lessons and exercises, with the level filter
//! - `verify`: the verification orchestrator and the solution audit
//! - `api`: HTTP routes

pub mod api;
pub mod config;
pub mod content;
pub mod core;
pub mod engine;
pub mod runner;
pub mod verify;

pub use config::AppConfig;
pub use crate::core::{ErrorKind, Verdict};
pub use runner::{CodeRunner, ExecutionContext, ExecutionResult, SandboxedRunner};
pub use verify::Verifier;
