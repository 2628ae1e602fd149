//! # Sandboxed Dispatcher
//!
//! Spawns a program under the external confinement launcher with a fixed
//! descriptor plan and a writable-path allow-list. Both the transformation
//! stage and the object store dispatch through here.
//!
//! ## Child Contract
//!
//! ```text
//! argv   <launcher> <flags...> <program> <args...>
//! env    <WRITE_ENV>=<default;...;writable...>     (nothing else)
//!
//! fd 0   caller stdin, or /dev/null
//! fd 1   output stream
//! fd 2   log stream
//! fd 3+i input stream i
//! fd 3+N+ held descriptors (lock files), inherited without close-on-exec
//! ```
//!
//! ## Ownership
//!
//! [`Dispatcher::dispatch`] returns as soon as the child exists. The
//! returned [`ChildHandle`] belongs to the caller, who decides when to wait,
//! whether to kill, and what timeout applies. Descriptor duplicates made
//! for the plan are owned values and are closed on every exit path.
//!
//! A held descriptor stays open in the child, so an advisory lock on it
//! outlives the parent's copy and is released only when the child exits.

use crate::config::Confinement;
use crate::constants::{FIRST_INPUT_FD, MAX_INPUTS, WRITE_DELIMITER};
use crate::error::{Error, Result};
use crate::scratch::IdentifierLock;
use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, info};

#[cfg(target_os = "linux")]
const MAX_SIGNAL: libc::c_int = 64;

#[cfg(not(target_os = "linux"))]
const MAX_SIGNAL: libc::c_int = 31;

/// One program invocation, described before it is spawned.
#[derive(Debug)]
pub struct DispatchRequest<'fd> {
    program: PathBuf,
    args: Vec<OsString>,
    writable: Vec<PathBuf>,
    stdin: Option<BorrowedFd<'fd>>,
    stdout: BorrowedFd<'fd>,
    stderr: BorrowedFd<'fd>,
    inputs: Vec<BorrowedFd<'fd>>,
    held: Vec<BorrowedFd<'fd>>,
    reset_signals: bool,
}

impl<'fd> DispatchRequest<'fd> {
    /// Runs `program` with `out` on descriptor 1 and `log` on descriptor 2.
    pub fn new(program: impl Into<PathBuf>, out: BorrowedFd<'fd>, log: BorrowedFd<'fd>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            writable: Vec::new(),
            stdin: None,
            stdout: out,
            stderr: log,
            inputs: Vec::new(),
            held: Vec::new(),
            reset_signals: false,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Adds a directory the child may write to.
    #[must_use]
    pub fn writable(mut self, path: impl Into<PathBuf>) -> Self {
        self.writable.push(path.into());
        self
    }

    /// Binds descriptor 0 instead of `/dev/null`.
    #[must_use]
    pub fn stdin(mut self, fd: BorrowedFd<'fd>) -> Self {
        self.stdin = Some(fd);
        self
    }

    /// Binds `inputs` to descriptors 3, 4, ... in order.
    #[must_use]
    pub fn inputs(mut self, inputs: &[BorrowedFd<'fd>]) -> Self {
        self.inputs.extend_from_slice(inputs);
        self
    }

    /// Keeps `fd` open in the child for its whole lifetime.
    #[must_use]
    pub fn hold(mut self, fd: BorrowedFd<'fd>) -> Self {
        self.held.push(fd);
        self
    }

    /// Restores an empty signal mask and default dispositions before exec.
    #[must_use]
    pub fn reset_signals(mut self) -> Self {
        self.reset_signals = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Spawns programs under one confinement launcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    confinement: Confinement,
}

impl Dispatcher {
    pub fn new(confinement: Confinement) -> Self {
        Self { confinement }
    }

    /// Renders the allow-list: defaults first, then `extra` in order.
    pub fn write_list(&self, extra: &[PathBuf]) -> OsString {
        let mut list = OsString::new();
        for path in self.confinement.default_writable.iter().chain(extra) {
            if !list.is_empty() {
                list.push(WRITE_DELIMITER.to_string());
            }
            list.push(path.as_os_str());
        }
        list
    }

    /// Spawns the confined child and returns without waiting on it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFormat`] if more than [`MAX_INPUTS`] inputs are given
    /// - [`Error::SpawnFailure`] if the descriptor plan or process creation fails
    pub fn dispatch(&self, request: DispatchRequest<'_>) -> Result<ChildHandle> {
        let plan = DescriptorPlan::build(&request)?;
        let write_list = self.write_list(&request.writable);

        debug!(
            "Dispatching {} ({} inputs, writable: {:?})",
            request.program.display(),
            plan.inputs.len(),
            write_list
        );

        let remap: Vec<(RawFd, RawFd)> = plan
            .inputs
            .iter()
            .zip(FIRST_INPUT_FD..)
            .map(|(fd, slot)| (fd.as_raw_fd(), slot))
            .collect();
        let held: Vec<RawFd> = plan.held.iter().map(|fd| fd.as_raw_fd()).collect();
        let reset_signals = request.reset_signals;

        let mut cmd = Command::new(&self.confinement.launcher);
        cmd.args(&self.confinement.flags)
            .arg(&request.program)
            .args(&request.args)
            .env_clear()
            .env(&self.confinement.write_env, &write_list)
            .stdin(plan.stdin)
            .stdout(plan.stdout)
            .stderr(plan.stderr);

        // SAFETY: the closure only calls dup2, fcntl, pthread_sigmask, and signal,
        // all async-signal-safe, and touches no allocator state.
        unsafe {
            cmd.pre_exec(move || child_setup(&remap, &held, reset_signals));
        }

        let child = cmd.spawn().map_err(|source| Error::SpawnFailure {
            program: request.program.clone(),
            source,
        })?;

        // The plan's duplicates drop here; the child holds its own.
        drop(plan.inputs);
        drop(plan.held);

        info!(
            "Dispatched {} as pid {}",
            request.program.display(),
            child.id()
        );

        Ok(ChildHandle {
            child,
            program: request.program,
            lock: None,
        })
    }
}

/// Owned duplicates of every descriptor the child receives.
struct DescriptorPlan {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    /// Close-on-exec duplicates placed above the target slot range, so no
    /// `dup2` onto a slot can clobber a source still to be moved.
    inputs: Vec<OwnedFd>,
    /// Also above the slot range; close-on-exec is cleared in the child.
    held: Vec<OwnedFd>,
}

impl DescriptorPlan {
    fn build(request: &DispatchRequest<'_>) -> Result<Self> {
        if request.inputs.len() > MAX_INPUTS {
            return Err(Error::InvalidFormat(format!(
                "{} input streams exceed the limit of {}",
                request.inputs.len(),
                MAX_INPUTS
            )));
        }

        let spawn_error = |source: io::Error| Error::SpawnFailure {
            program: request.program.clone(),
            source,
        };

        let stdin = match request.stdin {
            Some(fd) => Stdio::from(fd.try_clone_to_owned().map_err(spawn_error)?),
            None => Stdio::null(),
        };
        let stdout = Stdio::from(request.stdout.try_clone_to_owned().map_err(spawn_error)?);
        let stderr = Stdio::from(request.stderr.try_clone_to_owned().map_err(spawn_error)?);

        let floor = FIRST_INPUT_FD + request.inputs.len() as RawFd;
        let inputs = request
            .inputs
            .iter()
            .map(|fd| dup_above(*fd, floor))
            .collect::<io::Result<Vec<_>>>()
            .map_err(spawn_error)?;
        let held = request
            .held
            .iter()
            .map(|fd| dup_above(*fd, floor))
            .collect::<io::Result<Vec<_>>>()
            .map_err(spawn_error)?;

        Ok(Self {
            stdin,
            stdout,
            stderr,
            inputs,
            held,
        })
    }
}

fn dup_above(fd: BorrowedFd<'_>, floor: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: fd is a live borrowed descriptor for the duration of the call.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, floor) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Runs in the forked child after stdio is wired and before exec.
fn child_setup(remap: &[(RawFd, RawFd)], held: &[RawFd], reset_signals: bool) -> io::Result<()> {
    for &(from, to) in remap {
        // SAFETY: `from` is open in the child; dup2 clears close-on-exec on `to`.
        if unsafe { libc::dup2(from, to) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    for &fd in held {
        // SAFETY: `fd` sits above every dup2 target and is open in the child.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    if reset_signals {
        // SAFETY: sigset_t is plain data; all calls are async-signal-safe.
        unsafe {
            let mut empty: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut empty);
            let rc = libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
            for signal in 1..=MAX_SIGNAL {
                if signal != libc::SIGKILL && signal != libc::SIGSTOP {
                    // Invalid numbers return SIG_ERR, which is harmless here.
                    libc::signal(signal, libc::SIG_DFL);
                }
            }
        }
    }

    Ok(())
}

// =============================================================================
// ChildHandle
// =============================================================================

/// A dispatched child process, owned by the caller until reaped.
///
/// Dropping the handle neither kills nor reaps the child; call
/// [`ChildHandle::wait`] to avoid leaving a zombie. A per-identifier lock
/// attached by the pipeline is shared with the child and stays held until
/// the child exits, even if the handle is dropped first.
#[derive(Debug)]
#[must_use = "a dispatched child must be waited on or killed"]
pub struct ChildHandle {
    child: Child,
    program: PathBuf,
    lock: Option<IdentifierLock>,
}

impl ChildHandle {
    /// OS process id of the launcher process.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn with_lock(mut self, lock: IdentifierLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Returns `true` while this handle holds a per-identifier lock.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Polls for exit without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Sends `SIGKILL`. A child that already exited is not an error.
    pub fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => {
                info!("Killed {} (pid {})", self.program.display(), self.child.id());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Blocks until the child exits, then drops the parent's lock copy.
    pub fn wait(mut self) -> Result<ExitStatus> {
        let status = self.child.wait()?;
        debug!(
            "{} (pid {}) exited with {}",
            self.program.display(),
            self.child.id(),
            status
        );
        Ok(status)
    }
}
