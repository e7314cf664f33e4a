//! Process execution under resource limits
//!
//! Every run is a fresh child process in its own session, with rlimits applied
//! between fork and exec, a scrubbed environment and a wall-clock watchdog.
//! Standard streams are anonymous temporary files rather than pipes, so the
//! file-size rlimit bounds what the program can write and the host reads back at
//! most `output_bytes` of each. With an [`IsolationPlan`] the program also gets its
//! own namespaces and root (see `isolation`).

use anyhow::{Context, Result};
use nix::sys::prctl;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setgroups, setresgid, setresuid, setsid, Gid, Pid, Uid};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::isolation::{self, IsolationPlan};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Wall-clock limit exceeded, process group killed
    TimeLimitExceeded,
    /// Killed by signal
    Signaled(i32),
    /// Cancellation requested by the caller, process group killed
    Cancelled,
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Execution status
    pub status: ExecutionStatus,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u32,
    /// Raw stdout of the process (lossy UTF-8, at most `output_bytes`)
    pub stdout: String,
    /// Raw stderr of the process (lossy UTF-8, at most `output_bytes`)
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Wall-clock limit in milliseconds
    pub time_ms: u32,
    /// Address space limit in MB
    pub memory_mb: u32,
    /// Maximum open file descriptors
    pub open_files: u64,
    /// Maximum written file size in KB
    pub file_size_kb: u64,
    /// Maximum number of processes of the sandbox user (needs an `Identity`)
    pub processes: u64,
    /// Bytes of raw stdout/stderr read back from the program
    pub output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_ms: 5_000,
            memory_mb: 256,
            open_files: 64,
            file_size_kb: 16_384,
            processes: 64,
            output_bytes: 64 * 1024,
        }
    }
}

impl ExecutionLimits {
    pub fn wall_time(&self) -> Duration {
        Duration::from_millis(u64::from(self.time_ms))
    }

    /// CPU rlimit in whole seconds, never below the wall limit
    pub fn cpu_seconds(&self) -> u64 {
        u64::from(self.time_ms).div_ceil(1000) + 1
    }
}

/// Unprivileged user the program runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub work_dir: PathBuf,
    pub command: Vec<String>,
    pub limits: ExecutionLimits,
    pub stdin: Option<String>,
    /// The only environment the child sees
    pub env: Vec<(String, String)>,
    /// Switch to this user before exec; requires a root host
    pub identity: Option<Identity>,
    /// Private namespaces and root; `None` runs on the host filesystem
    pub isolation: Option<IsolationPlan>,
}

impl ExecutionSpec {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            command: vec![],
            limits: ExecutionLimits::default(),
            stdin: None,
            env: vec![],
            identity: None,
            isolation: None,
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_isolation(mut self, isolation: Option<IsolationPlan>) -> Self {
        self.isolation = isolation;
        self
    }
}

pub async fn execute_sandboxed(
    spec: &ExecutionSpec,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome> {
    let (program, args) = spec
        .command
        .split_first()
        .context("No command specified for execution")?;

    let stdin = input_file(spec.stdin.as_deref().unwrap_or_default())?;
    let stdout = tempfile::tempfile().context("Failed to create stdout file")?;
    let stderr = tempfile::tempfile().context("Failed to create stderr file")?;

    let prepared = spec
        .isolation
        .as_ref()
        .map(IsolationPlan::prepare)
        .transpose()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&spec.work_dir)
        .env_clear()
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout.try_clone()?))
        .stderr(Stdio::from(stderr.try_clone()?))
        .kill_on_drop(true);

    let limits = spec.limits.clone();
    let identity = spec.identity;
    // SAFETY: the closure only issues syscalls on data prepared before the fork
    // and allocates nothing.
    unsafe {
        cmd.pre_exec(move || {
            setsid()?;
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            if let Some(root) = &prepared {
                isolation::enter(root)?;
            }
            apply_limits(&limits, identity.as_ref())
        });
    }

    debug!(
        "Spawning sandboxed command: {:?} (isolated: {})",
        spec.command,
        spec.isolation.is_some()
    );

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn sandboxed program {}", program))?;
    let group = child.id().map(|id| Pid::from_raw(id as i32));

    let status = tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for sandboxed program")?;
            match status.code() {
                Some(code) => ExecutionStatus::Exited(code),
                None => ExecutionStatus::Signaled(status.signal().unwrap_or(0)),
            }
        }
        _ = tokio::time::sleep(spec.limits.wall_time()) => {
            warn!("Sandboxed program exceeded {} ms, killing it", spec.limits.time_ms);
            ExecutionStatus::TimeLimitExceeded
        }
        _ = cancel.cancelled() => {
            debug!("Sandboxed run cancelled by caller");
            ExecutionStatus::Cancelled
        }
    };

    // An isolated run's namespace is gone once its relay has exited
    let finished = matches!(
        status,
        ExecutionStatus::Exited(_) | ExecutionStatus::Signaled(_)
    );
    if !finished || spec.isolation.is_none() {
        if let Some(group) = group {
            kill_group(group);
        }
    }

    let wall_time_ms = elapsed_ms(started);
    if !finished {
        return Ok(ExecutionOutcome {
            status,
            wall_time_ms,
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    Ok(ExecutionOutcome {
        status,
        wall_time_ms,
        stdout: read_back(stdout, spec.limits.output_bytes).await?,
        stderr: read_back(stderr, spec.limits.output_bytes).await?,
    })
}

fn input_file(content: &str) -> Result<File> {
    let mut file = tempfile::tempfile().context("Failed to create stdin file")?;
    file.write_all(content.as_bytes())?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

/// Read at most `limit` bytes from the start of an output file
async fn read_back(file: File, limit: usize) -> Result<String> {
    let mut file = tokio::fs::File::from_std(file);
    file.seek(SeekFrom::Start(0)).await?;
    let mut buf = Vec::new();
    file.take(limit as u64)
        .read_to_end(&mut buf)
        .await
        .context("Failed to read sandboxed program output")?;
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn elapsed_ms(started: Instant) -> u32 {
    u32::try_from(started.elapsed().as_millis()).unwrap_or(u32::MAX)
}

/// Kill every process left in the run's session (grandchildren included)
fn kill_group(group: Pid) {
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", group, e),
    }
}

fn apply_limits(limits: &ExecutionLimits, identity: Option<&Identity>) -> std::io::Result<()> {
    let cpu = limits.cpu_seconds();
    setrlimit(Resource::RLIMIT_CPU, cpu, cpu + 1)?;

    let memory = u64::from(limits.memory_mb) * 1024 * 1024;
    setrlimit(Resource::RLIMIT_AS, memory, memory)?;

    setrlimit(Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files)?;

    let file_size = limits.file_size_kb * 1024;
    setrlimit(Resource::RLIMIT_FSIZE, file_size, file_size)?;

    if let Some(identity) = identity {
        // counted per real uid, so only meaningful for a dedicated sandbox user
        setrlimit(Resource::RLIMIT_NPROC, limits.processes, limits.processes)?;

        setgroups(&[])?;
        let gid = Gid::from_raw(identity.gid);
        setresgid(gid, gid, gid)?;
        let uid = Uid::from_raw(identity.uid);
        setresuid(uid, uid, uid)?;
    }

    prctl::set_no_new_privs()?;
    Ok(())
}
