//! Sandbox configuration
//!
//! Interpreter command and resource limits for running submissions, loaded from a
//! TOML file. The default file is compiled into the binary.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_RUNTIME_TOML: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/runtime.toml"));

/// Sandbox configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Interpreter command (program + args), the harness script is appended
    pub interpreter: Vec<String>,
    /// Wall-clock limit in milliseconds, also used to derive the CPU rlimit
    pub time_limit_ms: u32,
    /// Address space limit in MB
    pub memory_limit_mb: u32,
    /// Maximum open file descriptors
    pub open_files: u64,
    /// Maximum size of any file the program writes, in KB
    pub file_size_kb: u64,
    /// Maximum number of processes a run may have at once
    pub max_processes: u64,
    /// Captured stdout/stderr are truncated past this many bytes
    pub max_output_bytes: usize,
    /// Name under which the learner's stdout is shown to test programs
    pub output_variable: String,
    /// Default `__name__` of the executed module
    pub entry_point: String,
    pub isolation: IsolationConfig,
}

/// How far a run is separated from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Private PID, mount, network, IPC and UTS namespaces with a minimal root
    Namespaces,
    /// Host filesystem and network; rlimits and process-group kill only
    None,
}

impl FromStr for IsolationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "namespaces" => Ok(Self::Namespaces),
            "none" => Ok(Self::None),
            other => anyhow::bail!("Unknown isolation mode {:?} (expected namespaces or none)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsolationConfig {
    pub mode: IsolationMode,
    /// Host trees bound read-only into the private root (missing ones are skipped)
    pub readonly_paths: Vec<PathBuf>,
    /// Device nodes bound writable into the private root
    pub device_paths: Vec<PathBuf>,
    /// First uid of the per-slot sandbox users, used when the host runs as root
    pub sandbox_uid: u32,
    pub tmp_size_mb: u32,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::Namespaces,
            readonly_paths: ["/usr", "/bin", "/lib", "/lib64", "/etc/ld.so.cache"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            device_paths: ["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            sandbox_uid: 60_000,
            tmp_size_mb: 16,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: into_command("python3 -I -S -B"),
            time_limit_ms: 5_000,
            memory_limit_mb: 256,
            open_files: 64,
            file_size_kb: 16_384,
            max_processes: 64,
            max_output_bytes: 64 * 1024,
            output_variable: "output".to_string(),
            entry_point: "__main__".to_string(),
            isolation: IsolationConfig::default(),
        }
    }
}

/// Raw TOML configuration
#[derive(Debug, Deserialize)]
struct RawRuntimeConfig {
    interpreter: RawInterpreter,
    #[serde(default)]
    limits: RawLimits,
    #[serde(default)]
    harness: RawHarness,
    #[serde(default)]
    isolation: RawIsolation,
}

#[derive(Debug, Deserialize)]
struct RawInterpreter {
    command: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawLimits {
    time_limit_ms: Option<u32>,
    memory_limit_mb: Option<u32>,
    open_files: Option<u64>,
    file_size_kb: Option<u64>,
    max_processes: Option<u64>,
    max_output_kb: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHarness {
    output_variable: Option<String>,
    entry_point: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIsolation {
    mode: Option<IsolationMode>,
    readonly_paths: Option<Vec<PathBuf>>,
    device_paths: Option<Vec<PathBuf>>,
    sandbox_uid: Option<u32>,
    tmp_size_mb: Option<u32>,
}

impl SandboxConfig {
    /// Parse a runtime TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: RawRuntimeConfig =
            toml::from_str(content).context("Invalid runtime configuration")?;
        let defaults = Self::default();

        let interpreter = into_command(&raw.interpreter.command);
        if interpreter.is_empty() {
            anyhow::bail!("Runtime configuration has an empty interpreter command");
        }

        let time_limit_ms = raw.limits.time_limit_ms.unwrap_or(defaults.time_limit_ms);
        let memory_limit_mb = raw
            .limits
            .memory_limit_mb
            .unwrap_or(defaults.memory_limit_mb);
        if time_limit_ms == 0 || memory_limit_mb == 0 {
            anyhow::bail!("Time and memory limits must be positive");
        }

        let output_variable = raw
            .harness
            .output_variable
            .unwrap_or(defaults.output_variable);
        if !is_identifier(&output_variable) {
            anyhow::bail!("Invalid output variable name: {:?}", output_variable);
        }

        let isolation_defaults = defaults.isolation;
        let max_processes = raw.limits.max_processes.unwrap_or(defaults.max_processes);
        if max_processes == 0 {
            anyhow::bail!("Process limit must be positive");
        }

        Ok(Self {
            interpreter,
            time_limit_ms,
            memory_limit_mb,
            open_files: raw.limits.open_files.unwrap_or(defaults.open_files),
            file_size_kb: raw.limits.file_size_kb.unwrap_or(defaults.file_size_kb),
            max_processes,
            max_output_bytes: raw
                .limits
                .max_output_kb
                .map(|kb| kb * 1024)
                .unwrap_or(defaults.max_output_bytes),
            output_variable,
            entry_point: raw.harness.entry_point.unwrap_or(defaults.entry_point),
            isolation: IsolationConfig {
                mode: raw.isolation.mode.unwrap_or(isolation_defaults.mode),
                readonly_paths: raw
                    .isolation
                    .readonly_paths
                    .unwrap_or(isolation_defaults.readonly_paths),
                device_paths: raw
                    .isolation
                    .device_paths
                    .unwrap_or(isolation_defaults.device_paths),
                sandbox_uid: raw
                    .isolation
                    .sandbox_uid
                    .unwrap_or(isolation_defaults.sandbox_uid),
                tmp_size_mb: raw
                    .isolation
                    .tmp_size_mb
                    .unwrap_or(isolation_defaults.tmp_size_mb),
            },
        })
    }

    /// Embedded default configuration
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml(DEFAULT_RUNTIME_TOML)
    }

    /// Load from a file on disk
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime configuration {:?}", path))?;
        Self::from_toml(&content)
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
