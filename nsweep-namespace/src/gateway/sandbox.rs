//! Auxiliary processes pinned to a mount namespace
//!
//! This module uses `unsafe` for fork() and raw syscalls in the child,
//! which must stay async-signal-safe in a multi-threaded parent.

#![allow(unsafe_code)]

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, getpid};
use nsweep_core::{Error, ProcessId, Result};
use tracing::{debug, trace, warn};

const ATTACHED: &[u8] = b"OK\n";

/// A forked process attached to a mount namespace, idling until released.
///
/// Dropping the sandbox kills and reaps the process.
#[derive(Debug)]
pub struct Sandbox {
    pid: Pid,
    control: Option<OwnedFd>,
    reaped: bool,
}

fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: pipe2 fills in two fresh descriptors on success.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: both descriptors are open and owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

impl Sandbox {
    /// Fork a process that joins `user` (if given), then `mnt`, and waits.
    ///
    /// Returns once the child confirmed attachment. On failure or timeout
    /// the child is killed and reaped before returning.
    ///
    /// # Errors
    /// [`Error::Sandbox`] if the child cannot attach, [`Error::SandboxTimeout`]
    /// if it does not report back within `timeout`.
    pub fn spawn(mnt: &File, user: Option<&File>, timeout: Duration) -> Result<Self> {
        let (status_read, status_write) = pipe()?;
        let (control_read, control_write) = pipe()?;
        let parent = getpid().as_raw();
        let user_fd = user.map(AsRawFd::as_raw_fd);
        let mnt_fd = mnt.as_raw_fd();
        let unused = [status_read.as_raw_fd(), control_write.as_raw_fd()];

        debug!(user = user.is_some(), "Forking sandbox");
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = attach_and_wait(
                    parent,
                    user_fd,
                    mnt_fd,
                    status_write.as_raw_fd(),
                    control_read.as_raw_fd(),
                    &unused,
                );
                // SAFETY: leave without running destructors or atexit handlers.
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                drop(status_write);
                drop(control_read);
                let mut sandbox = Self {
                    pid: child,
                    control: Some(control_write),
                    reaped: false,
                };
                match wait_for_attach(status_read, timeout) {
                    Ok(()) => {
                        debug!(pid = %child, "Sandbox attached");
                        Ok(sandbox)
                    }
                    Err(e) => {
                        sandbox.terminate();
                        Err(e)
                    }
                }
            }
            Err(e) => Err(Error::Sandbox {
                message: format!("fork failed: {e}"),
            }),
        }
    }

    /// PID of the sandbox process
    #[must_use]
    pub fn pid(&self) -> ProcessId {
        ProcessId::from(self.pid)
    }

    /// Root directory of the sandbox, showing its mount namespace
    #[must_use]
    pub fn root(&self) -> PathBuf {
        PathBuf::from(format!("/proc/{}/root", self.pid))
    }

    /// Kill and reap the sandbox process
    pub fn close(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        self.control.take();
        if let Err(e) = kill(self.pid, Signal::SIGKILL) {
            trace!(pid = %self.pid, error = %e, "Sandbox already gone");
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => break,
                Ok(status) => {
                    trace!(?status, "Sandbox status");
                }
                Err(nix::errno::Errno::EINTR) => {}
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    warn!(pid = %self.pid, error = %e, "Cannot reap sandbox");
                    break;
                }
            }
        }
        self.reaped = true;
        debug!(pid = %self.pid, "Sandbox released");
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Wait for the child's status message, bounded by `timeout`.
fn wait_for_attach(status: OwnedFd, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut pollfd = libc::pollfd {
        fd: status.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::SandboxTimeout { timeout });
        }
        let millis = libc::c_int::try_from(remaining.as_millis())
            .unwrap_or(libc::c_int::MAX)
            .max(1);
        // SAFETY: a single valid pollfd.
        let ready = unsafe { libc::poll(&raw mut pollfd, 1, millis) };
        if ready > 0 {
            break;
        }
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }

    let mut buf = [0_u8; 8];
    let n = File::from(status).read(&mut buf)?;
    match &buf[..n] {
        reply if reply == ATTACHED => Ok(()),
        [b'E', a, b, c, d, ..] => Err(Error::Sandbox {
            message: format!(
                "cannot attach: {}",
                io::Error::from_raw_os_error(i32::from_ne_bytes([*a, *b, *c, *d]))
            ),
        }),
        _ => Err(Error::Sandbox {
            message: "exited without attaching".to_string(),
        }),
    }
}

/// Runs in the forked child: raw syscalls only.
fn attach_and_wait(
    parent: libc::pid_t,
    user: Option<RawFd>,
    mnt: RawFd,
    status: RawFd,
    control: RawFd,
    unused: &[RawFd],
) -> libc::c_int {
    let report = |errno: i32| {
        let mut msg = [b'E', 0, 0, 0, 0];
        msg[1..].copy_from_slice(&errno.to_ne_bytes());
        // SAFETY: writing a stack buffer to an open pipe.
        unsafe { libc::write(status, msg.as_ptr().cast(), msg.len()) };
    };
    let errno = || io::Error::last_os_error().raw_os_error().unwrap_or(0);

    // SAFETY: plain syscalls on descriptors inherited from the parent.
    unsafe {
        for fd in unused {
            libc::close(*fd);
        }
        if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 || libc::getppid() != parent {
            return 1;
        }
        if let Some(user) = user {
            if libc::setns(user, libc::CLONE_NEWUSER) != 0 {
                report(errno());
                return 2;
            }
        }
        if libc::setns(mnt, libc::CLONE_NEWNS) != 0 {
            report(errno());
            return 3;
        }
        libc::write(status, ATTACHED.as_ptr().cast(), ATTACHED.len());
        libc::close(status);

        let mut byte = 0_u8;
        loop {
            let n = libc::read(control, (&raw mut byte).cast(), 1);
            if n == 0 || (n < 0 && errno() != libc::EINTR) {
                break;
            }
        }
    }
    0
}
