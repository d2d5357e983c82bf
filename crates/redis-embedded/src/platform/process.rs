//! Platform-specific process management.
//!
//! Liveness checks and termination for the supervised child. Termination always
//! reaps the child so no zombie is left behind.

use crate::config::ServerDefaults;
use crate::error::{RedisServerError, Result};
use std::process::{Child, ExitStatus};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: Uses `kill(pid, 0)` signal check
/// - **Windows**: Uses `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 performs the permission and existence checks only
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(windows)]
    {
        is_process_alive_windows(pid)
    }

    #[cfg(not(any(unix, windows)))]
    {
        warn!("Process alive check not implemented for this platform");
        let _ = pid;
        true
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
fn is_process_alive_windows(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    // SAFETY: the handle returned by OpenProcess is checked for null, only
    // passed to GetExitCodeProcess, and closed exactly once.
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut code: u32 = 0;
        let ok = GetExitCodeProcess(handle, &mut code) != 0;
        CloseHandle(handle);
        ok && code == STILL_ACTIVE as u32
    }
}

/// Whether a spawn failed because the executable is still open for writing.
///
/// On Unix a freshly written executable can briefly stay open in a child forked
/// by another thread, and exec fails with `ETXTBSY` until that child execs.
pub fn is_text_file_busy(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }

    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Ask the child to shut down.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGTERM, which redis-server handles by exiting cleanly
/// - **Windows**: There is no console-less graceful signal, so the child is killed
pub fn request_graceful_shutdown(child: &mut Child) -> Result<()> {
    let pid = child.id();

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| RedisServerError::Io {
            message: format!("pid {} out of range", pid),
            path: None,
            source: None,
        })?;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Already exited; the caller's wait() reaps it
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RedisServerError::Io {
                message: format!("Failed to send SIGTERM to {}: {}", pid, e),
                path: None,
                source: Some(std::io::Error::from(e)),
            }),
        }
    }

    #[cfg(not(unix))]
    {
        debug!("Killing process {}", pid);
        match child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Terminate the child gracefully, then forcefully if needed, and reap it.
///
/// With `timeout` set to `None` this waits for the child for as long as it takes.
/// Otherwise the child is killed once `timeout` has elapsed after the graceful
/// request.
pub fn terminate_child(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let pid = child.id();

    if let Some(status) = child.try_wait()? {
        debug!("Process {} had already exited: {}", pid, status);
        return Ok(status);
    }

    request_graceful_shutdown(child)?;

    let Some(timeout) = timeout else {
        let status = child.wait()?;
        debug!("Process {} exited: {}", pid, status);
        return Ok(status);
    };

    if let Some(status) = wait_with_deadline(child, timeout)? {
        debug!("Process {} terminated gracefully: {}", pid, status);
        return Ok(status);
    }

    warn!(
        "Process {} still running {:?} after graceful shutdown, killing",
        pid, timeout
    );
    if let Err(e) = child.kill() {
        // InvalidInput means the child exited between the checks
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(e.into());
        }
    }

    let status = child.wait()?;
    debug!("Process {} killed: {}", pid, status);
    Ok(status)
}

/// Poll the child until it exits or `timeout` elapses.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        sleep(ServerDefaults::EXIT_POLL_INTERVAL.min(deadline - now));
    }
}
