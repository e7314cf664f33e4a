//! Sandboxed runner implementation
//!
//! Executes untrusted source in a fresh interpreter process: one temporary
//! working directory, one harness, one context per call, discarded afterwards.

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::{chown, geteuid, Gid, Uid};
use serde_json::json;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CodeRunner, EngineError, ExecutionContext, ExecutionResult};
use crate::core::ErrorKind;
use crate::engine::sandbox::{parse_report, SandboxConfig, HARNESS_FILE, HARNESS_SOURCE, REPORT_FILE};
use crate::engine::{
    execute_sandboxed, BindMount, ExecutionLimits, ExecutionSpec, ExecutionStatus, Identity,
    IsolationMode, IsolationPlan, BOX_DIR,
};

/// Bytes of raw interpreter stderr kept when the harness could not report
const CRASH_STDERR_TAIL: usize = 2048;

/// Delivered when the CPU rlimit is hit
const SIGXCPU: i32 = Signal::SIGXCPU as i32;

/// Runner that executes code in a child interpreter
pub struct SandboxedRunner {
    config: SandboxConfig,
    permits: Arc<Semaphore>,
    slots: SlotPool,
}

impl SandboxedRunner {
    /// Create a runner allowing at most `max_concurrent` simultaneous interpreters
    pub fn new(config: SandboxConfig, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            config,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            slots: SlotPool::new(max_concurrent),
        }
    }

    fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_ms: self.config.time_limit_ms,
            memory_mb: self.config.memory_limit_mb,
            open_files: self.config.open_files,
            file_size_kb: self.config.file_size_kb,
            processes: self.config.max_processes,
            output_bytes: self.config.max_output_bytes,
        }
    }

    /// Sandbox user for a slot; only a root host can switch users
    fn identity(&self, slot: u32) -> Option<Identity> {
        if !geteuid().is_root() {
            return None;
        }
        let id = self.config.isolation.sandbox_uid + slot;
        Some(Identity { uid: id, gid: id })
    }

    fn binds(&self, interpreter: &Path) -> Vec<BindMount> {
        let isolation = &self.config.isolation;
        isolation
            .readonly_paths
            .iter()
            .map(BindMount::read_only)
            .chain(install_prefix(interpreter).map(BindMount::read_only))
            .chain(isolation.device_paths.iter().map(BindMount::writable))
            .collect()
    }

    /// Run a source string in the sandbox
    pub async fn execute(
        &self,
        source: &str,
        context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::LimiterClosed)?;
        let slot = self.slots.take().ok_or(EngineError::LimiterClosed)?;

        let context = context.with_entry_point(&self.config.entry_point);

        let mut command = self.config.interpreter.clone();
        let interpreter = locate_program(&command[0]).ok_or_else(|| {
            EngineError::Launch(anyhow::anyhow!(
                "interpreter {:?} not found",
                self.config.interpreter[0]
            ))
        })?;
        command[0] = interpreter.to_string_lossy().into_owned();
        command.push(HARNESS_FILE.to_string());
        command.push(REPORT_FILE.to_string());

        let work_dir = tempfile::Builder::new()
            .prefix("course-judge-")
            .tempdir()
            .map_err(EngineError::Workspace)?;
        fs::set_permissions(work_dir.path(), Permissions::from_mode(0o711))
            .await
            .map_err(EngineError::Workspace)?;

        let (box_dir, home, isolation) = match self.config.isolation.mode {
            IsolationMode::Namespaces => {
                let root = work_dir.path().join("root");
                let plan = IsolationPlan {
                    root: root.clone(),
                    binds: self.binds(&interpreter),
                    tmp_size_mb: self.config.isolation.tmp_size_mb,
                };
                (root.join("box"), PathBuf::from(BOX_DIR), Some(plan))
            }
            IsolationMode::None => {
                let box_dir = work_dir.path().join("box");
                (box_dir.clone(), box_dir, None)
            }
        };

        fs::create_dir_all(&box_dir)
            .await
            .map_err(EngineError::Workspace)?;
        fs::write(box_dir.join(HARNESS_FILE), HARNESS_SOURCE)
            .await
            .map_err(EngineError::Workspace)?;

        let identity = self.identity(slot.id);
        if let Some(identity) = identity {
            chown(
                &box_dir,
                Some(Uid::from_raw(identity.uid)),
                Some(Gid::from_raw(identity.gid)),
            )
            .map_err(|e| EngineError::Workspace(e.into()))?;
        }

        let job = json!({
            "source": source,
            "bindings": context.bindings(),
        });

        let spec = ExecutionSpec::new(&box_dir)
            .with_command(command)
            .with_limits(self.limits())
            .with_stdin(job.to_string())
            .with_env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .with_env("HOME", home.to_string_lossy())
            .with_env("LANG", "C.UTF-8")
            .with_identity(identity)
            .with_isolation(isolation);

        let outcome = execute_sandboxed(&spec, cancel)
            .await
            .map_err(EngineError::Launch)?;

        debug!(
            "Sandboxed run finished: slot={}, status={:?}, wall_time_ms={}",
            slot.id, outcome.status, outcome.wall_time_ms
        );

        let result = match outcome.status {
            ExecutionStatus::TimeLimitExceeded | ExecutionStatus::Signaled(SIGXCPU) => {
                self.timeout_result()
            }
            ExecutionStatus::Cancelled => {
                ExecutionResult::failure(ErrorKind::Cancelled, "", "execution was cancelled")
            }
            _ => match fs::read_to_string(box_dir.join(REPORT_FILE)).await {
                Ok(content) => match parse_report(&content) {
                    Ok(report) => report.into_result(),
                    Err(e) => {
                        warn!("Unreadable harness report: {:#}", e);
                        ExecutionResult::failure(
                            ErrorKind::Crashed,
                            "",
                            "the program corrupted its execution report",
                        )
                    }
                },
                Err(_) => crash_result(&outcome.status, &outcome.stderr),
            },
        };

        Ok(result.truncated(self.config.max_output_bytes))
    }

    /// One trivial program through the full sandbox.
    ///
    /// Fails when the host cannot provide the configured isolation (no namespace
    /// support, missing privileges, interpreter not visible inside the root).
    pub async fn self_test(&self) -> Result<(), EngineError> {
        let result = self
            .execute("print('ok')", ExecutionContext::new(), &CancellationToken::new())
            .await?;
        if result.is_ok() && result.stdout == "ok\n" {
            info!(
                "Sandbox self-test passed (isolation: {:?})",
                self.config.isolation.mode
            );
            Ok(())
        } else {
            Err(EngineError::SelfTest(result.stderr))
        }
    }

    fn timeout_result(&self) -> ExecutionResult {
        ExecutionResult::failure(
            ErrorKind::Timeout,
            "",
            &format!(
                "execution exceeded the time limit of {} ms",
                self.config.time_limit_ms
            ),
        )
    }
}

/// Slot ids for concurrent runs, each mapped to its own sandbox user
struct SlotPool {
    free: Arc<Mutex<Vec<u32>>>,
}

struct Slot {
    id: u32,
    free: Arc<Mutex<Vec<u32>>>,
}

impl SlotPool {
    fn new(size: usize) -> Self {
        let ids = (0..size as u32).rev().collect();
        Self {
            free: Arc::new(Mutex::new(ids)),
        }
    }

    fn take(&self) -> Option<Slot> {
        let id = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()?;
        Some(Slot {
            id,
            free: Arc::clone(&self.free),
        })
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);
    }
}

/// Absolute, symlink-free path of a program, searching the host `PATH` for bare names
fn locate_program(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        return std::fs::canonicalize(name).ok();
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
        .and_then(|found| std::fs::canonicalize(found).ok())
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// `/opt/python` for `/opt/python/bin/python3`; the runtime tree to expose
fn install_prefix(program: &Path) -> Option<PathBuf> {
    let bin = program.parent()?;
    if bin.file_name()? != "bin" {
        return Some(bin.to_path_buf());
    }
    bin.parent().map(Path::to_path_buf)
}

fn crash_result(status: &ExecutionStatus, raw_stderr: &str) -> ExecutionResult {
    let reason = match status {
        ExecutionStatus::Signaled(sig) => format!("interpreter killed by signal {}", sig),
        ExecutionStatus::Exited(code) => format!("interpreter exited with code {}", code),
        other => format!("interpreter stopped unexpectedly ({:?})", other),
    };
    let tail = stderr_tail(raw_stderr);
    let message = if tail.is_empty() {
        reason
    } else {
        format!("{} ({})", reason, tail)
    };
    ExecutionResult::failure(ErrorKind::Crashed, "", &message)
}

/// Last line-ish chunk of the raw stderr, flattened to one line
fn stderr_tail(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut start = trimmed.len().saturating_sub(CRASH_STDERR_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[async_trait]
impl CodeRunner for SandboxedRunner {
    async fn run(
        &self,
        source: &str,
        context: ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        self.execute(source, context, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::IsolationConfig;

    fn host_config(interpreter: &[&str]) -> SandboxConfig {
        SandboxConfig {
            interpreter: interpreter.iter().map(|s| s.to_string()).collect(),
            isolation: IsolationConfig {
                mode: IsolationMode::None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_crash_result_includes_signal_and_stderr_tail() {
        let result = crash_result(
            &ExecutionStatus::Signaled(9),
            "Fatal Python error: Segmentation fault\n\nCurrent thread\n",
        );

        assert_eq!(result.error_kind, Some(ErrorKind::Crashed));
        assert!(result.stderr.starts_with("Crashed: interpreter killed by signal 9"));
        assert!(result
            .stderr
            .contains("Fatal Python error: Segmentation fault | Current thread"));
    }

    #[test]
    fn test_crash_result_without_stderr() {
        let result = crash_result(&ExecutionStatus::Exited(7), "");
        assert_eq!(result.stderr, "Crashed: interpreter exited with code 7");
    }

    #[test]
    fn test_install_prefix() {
        assert_eq!(
            install_prefix(Path::new("/opt/python/bin/python3.12")),
            Some(PathBuf::from("/opt/python"))
        );
        assert_eq!(
            install_prefix(Path::new("/usr/bin/python3")),
            Some(PathBuf::from("/usr"))
        );
        assert_eq!(
            install_prefix(Path::new("/srv/python3")),
            Some(PathBuf::from("/srv"))
        );
    }

    #[test]
    fn test_locate_program() {
        let sh = locate_program("sh").unwrap();
        assert!(sh.is_absolute());
        assert!(is_executable(&sh));
        assert!(locate_program("/nonexistent/python-for-tests").is_none());
        assert!(locate_program("no-such-interpreter-for-tests").is_none());
    }

    #[test]
    fn test_slots_are_recycled() {
        let pool = SlotPool::new(2);
        let first = pool.take().unwrap();
        let second = pool.take().unwrap();
        assert_eq!((first.id, second.id), (0, 1));
        assert!(pool.take().is_none());

        drop(first);
        assert_eq!(pool.take().unwrap().id, 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_an_engine_error() {
        let runner = SandboxedRunner::new(host_config(&["/nonexistent/python-for-tests"]), 1);
        let cancel = CancellationToken::new();

        let err = runner
            .run("print(1)", ExecutionContext::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Launch(_)));
    }

    #[tokio::test]
    async fn test_interpreter_without_report_is_a_crash() {
        // harness and report names end up as positional args to `sh -c`
        let runner = SandboxedRunner::new(host_config(&["/bin/sh", "-c", "exit 5"]), 1);
        let cancel = CancellationToken::new();

        let result = runner
            .run("print(1)", ExecutionContext::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(ErrorKind::Crashed));
        assert!(result.stderr.contains("exited with code 5"));
    }

    #[tokio::test]
    async fn test_failed_self_test_reports_why() {
        let runner = SandboxedRunner::new(host_config(&["/bin/sh", "-c", "exit 5"]), 1);

        let err = runner.self_test().await.unwrap_err();
        assert!(matches!(err, EngineError::SelfTest(ref reason) if reason.contains("code 5")));
    }
}
