//! Namespace isolation for sandboxed runs
//!
//! The process spawned by the executer unshares fresh PID, mount, network, IPC and
//! UTS namespaces and then only relays an exit status. Its child is PID 1 of the new
//! PID namespace: it builds the private root, forks the interpreter and reaps. When
//! PID 1 leaves, the kernel kills everything else in the namespace, so nothing the
//! program started can outlive the run.
//!
//! Everything that runs between fork and exec lives here and only issues raw
//! syscalls on data prepared beforehand by [`IsolationPlan::prepare`].

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::prctl;
use nix::sys::resource::{getrlimit, Resource};
use nix::sys::signal::{raise, signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{chdir, close, fork, pivot_root, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Program working directory inside the private root
pub const BOX_DIR: &str = "/box";

/// Exit code offset PID 1 uses to report that the interpreter died from a signal
const SIGNAL_EXIT_BASE: i32 = 128;

/// A host path made visible at the same path inside the private root
#[derive(Debug, Clone, PartialEq)]
pub struct BindMount {
    pub source: PathBuf,
    pub writable: bool,
}

impl BindMount {
    pub fn read_only(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            writable: false,
        }
    }

    pub fn writable(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            writable: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationPlan {
    /// Host directory that becomes `/`; its `box/` subdirectory is the program's cwd
    pub root: PathBuf,
    pub binds: Vec<BindMount>,
    /// Size of the private `/tmp` tmpfs
    pub tmp_size_mb: u32,
}

/// Plan turned into C strings, ready to be used after fork
#[derive(Debug)]
pub struct PreparedRoot {
    root: CString,
    binds: Vec<PreparedBind>,
    tmp_options: CString,
}

#[derive(Debug)]
struct PreparedBind {
    source: CString,
    target: CString,
    writable: bool,
}

impl IsolationPlan {
    /// Create the mount points under `root` and resolve every bind.
    ///
    /// Sources that do not exist on this host are skipped, as are sources already
    /// covered by another bind.
    pub fn prepare(&self) -> Result<PreparedRoot> {
        let mut binds: Vec<&BindMount> = self.binds.iter().collect();
        binds.sort_by(|a, b| a.source.cmp(&b.source));

        let mut accepted: Vec<&Path> = Vec::new();
        let mut prepared = Vec::new();
        for bind in binds {
            let source = bind.source.as_path();
            if !source.is_absolute() || source.parent().is_none() {
                debug!("Skipping bind of {:?}: not an absolute non-root path", source);
                continue;
            }
            if accepted.iter().any(|done| source.starts_with(done)) {
                continue;
            }
            let Ok(metadata) = std::fs::metadata(source) else {
                debug!("Skipping bind of {:?}: not present on this host", source);
                continue;
            };

            let target = self.root.join(source.strip_prefix("/").unwrap_or(source));
            if metadata.is_dir() {
                std::fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create mount point {:?}", target))?;
            } else {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {:?}", parent))?;
                }
                std::fs::File::create(&target)
                    .with_context(|| format!("Failed to create mount point {:?}", target))?;
            }

            accepted.push(source);
            prepared.push(PreparedBind {
                source: c_path(source)?,
                target: c_path(&target)?,
                writable: bind.writable,
            });
        }

        for dir in ["proc", "tmp", "box"] {
            let path = self.root.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {:?}", path))?;
        }

        Ok(PreparedRoot {
            root: c_path(&self.root)?,
            binds: prepared,
            tmp_options: CString::new(format!("size={}m,mode=1777", self.tmp_size_mb))?,
        })
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Path contains a NUL byte: {:?}", path))
}

/// Enter the namespaces and the private root.
///
/// Runs in the spawned child between fork and exec. It returns only in the
/// process that goes on to exec the interpreter (PID 2 of the namespace); the two
/// processes above it wait and exit with its status.
pub fn enter(root: &PreparedRoot) -> std::io::Result<()> {
    unshare(
        CloneFlags::CLONE_NEWPID
            | CloneFlags::CLONE_NEWNS
            | CloneFlags::CLONE_NEWNET
            | CloneFlags::CLONE_NEWIPC
            | CloneFlags::CLONE_NEWUTS,
    )?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;

    // SAFETY: the child of a fork is single-threaded; both branches below only
    // issue syscalls on memory allocated before the first fork.
    if let ForkResult::Parent { child } = unsafe { fork() }? {
        relay(child, false);
    }

    // PID 1 of the new namespace
    prctl::set_pdeathsig(Signal::SIGKILL)?;
    build_root(root)?;

    // SAFETY: as above
    if let ForkResult::Parent { child } = unsafe { fork() }? {
        relay(child, true);
    }

    chdir(BOX_DIR)?;
    Ok(())
}

fn build_root(root: &PreparedRoot) -> nix::Result<()> {
    let root_dir = root.root.as_c_str();
    mount(
        Some(root_dir),
        root_dir,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )?;

    for bind in &root.binds {
        mount(
            Some(bind.source.as_c_str()),
            bind.target.as_c_str(),
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )?;
        if !bind.writable {
            mount(
                None::<&str>,
                bind.target.as_c_str(),
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID,
                None::<&str>,
            )?;
        }
    }

    chdir(root_dir)?;
    pivot_root(".", ".")?;
    umount2(".", MntFlags::MNT_DETACH)?;
    chdir("/")?;

    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )?;
    mount(
        Some("tmpfs"),
        "/tmp",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        Some(root.tmp_options.as_c_str()),
    )?;
    Ok(())
}

/// Wait for `child`, reaping anything else along the way, and exit with its status.
///
/// PID 1 cannot kill itself with a signal, so it reports a fatal signal as
/// `SIGNAL_EXIT_BASE + signo`; the relay outside the namespace turns that back
/// into the same signal so the host sees what happened to the interpreter.
fn relay(child: Pid, inside: bool) -> ! {
    close_inherited_fds();

    let code = loop {
        match waitpid(Pid::from_raw(-1), None) {
            Ok(WaitStatus::Exited(pid, code)) if pid == child => break code,
            Ok(WaitStatus::Signaled(pid, sig, _)) if pid == child => {
                break SIGNAL_EXIT_BASE + sig as i32
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(_) => break 1,
        }
    };

    if !inside && code > SIGNAL_EXIT_BASE {
        if let Ok(sig) = Signal::try_from(code - SIGNAL_EXIT_BASE) {
            // SAFETY: restores the default disposition, no handler is installed
            let _ = unsafe { signal(sig, SigHandler::SigDfl) };
            let _ = raise(sig);
        }
    }

    // SAFETY: `_exit` skips atexit handlers and destructors of the forked image
    unsafe { nix::libc::_exit(code) }
}

/// Drop every descriptor but stdio. The spawner's exec-status pipe is among them;
/// a process that never execs must not hold it open.
fn close_inherited_fds() {
    // SAFETY: plain syscall on integer arguments
    let closed = unsafe {
        nix::libc::syscall(
            nix::libc::SYS_close_range,
            3 as nix::libc::c_uint,
            nix::libc::c_uint::MAX,
            0 as nix::libc::c_uint,
        )
    };
    if closed == 0 {
        return;
    }

    let max = getrlimit(Resource::RLIMIT_NOFILE)
        .map(|(soft, _)| soft)
        .unwrap_or(1024)
        .min(i32::MAX as u64) as i32;
    for fd in 3..max {
        let _ = close(fd);
    }
}
