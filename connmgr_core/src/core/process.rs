//! Minimal process-existence and termination helpers over raw PIDs.
//!
//! The supervisor tracks tunnels it did not necessarily spawn in this
//! invocation, so it works with plain PIDs rather than child handles.

use std::io;

/// Outcome of a termination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminate {
    Signalled,
    /// The process vanished between the liveness check and the signal.
    AlreadyGone,
}

/// Signal-0 probe: reports whether a process with this PID exists.
///
/// EPERM means the process exists but belongs to another user, which still
/// counts as alive. A recycled PID is indistinguishable from the original
/// process; that is an accepted limitation.
#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill(pid, 0) probes process existence without sending a signal.
    unsafe {
        if libc::kill(pid as libc::pid_t, 0) == 0 {
            return true;
        }
    }
    matches!(
        io::Error::last_os_error().raw_os_error(),
        Some(code) if code == libc::EPERM
    )
}

/// Nearest process-existence query on platforms without POSIX signals.
#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

/// Sends SIGTERM. ESRCH is not an error: the process is simply gone.
#[cfg(unix)]
pub fn terminate(pid: i32) -> io::Result<Terminate> {
    // SAFETY: plain kill(2) with a valid signal number.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(Terminate::Signalled);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::ESRCH => Ok(Terminate::AlreadyGone),
        _ => Err(err),
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: i32) -> io::Result<Terminate> {
    Ok(Terminate::AlreadyGone)
}
