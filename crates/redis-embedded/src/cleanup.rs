//! Process-exit cleanup of scratch directories.
//!
//! Every extracted artifact is registered here when it is created. Paths are
//! removed either explicitly (a supervisor dropping its scratch directory calls
//! [`unregister`] after deleting it) or, for whatever is still listed when the
//! process exits normally, by a hook installed with `atexit`.
//!
//! Removal is best-effort: failures are ignored, and an abnormal exit (signal,
//! `abort`) leaves the directories behind.

// This module owns the libc `atexit` registration.
#![allow(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once};
use tracing::debug;

static GLOBAL: CleanupRegistry = CleanupRegistry::new();
static INSTALL_HOOK: Once = Once::new();

/// An ordered list of paths to delete.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        // A panic while holding the lock cannot leave the Vec inconsistent
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule a path for deletion.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut paths = self.lock();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    /// Forget a path. Returns whether it was registered.
    pub fn unregister(&self, path: &Path) -> bool {
        let mut paths = self.lock();
        let before = paths.len();
        paths.retain(|p| p != path);
        paths.len() != before
    }

    /// Snapshot of the currently registered paths.
    pub fn registered(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Delete every registered path, most recent first, and empty the list.
    ///
    /// Returns the number of paths that existed and were removed.
    pub fn drain(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        paths.iter().rev().filter(|p| remove_path(p)).count()
    }
}

fn remove_path(path: &Path) -> bool {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(_) => return false,
    };
    result.is_ok()
}

/// Schedule a path for deletion at process exit.
pub fn register(path: impl Into<PathBuf>) {
    install_exit_hook();
    GLOBAL.register(path);
}

/// Remove a path from the exit list, typically after deleting it eagerly.
pub fn unregister(path: &Path) -> bool {
    GLOBAL.unregister(path)
}

/// Paths that will be deleted at process exit.
pub fn registered() -> Vec<PathBuf> {
    GLOBAL.registered()
}

/// Delete everything on the exit list now.
pub fn drain() -> usize {
    GLOBAL.drain()
}

fn install_exit_hook() {
    INSTALL_HOOK.call_once(|| {
        #[cfg(unix)]
        {
            // SAFETY: `drain_at_exit` is a plain `extern "C"` function with no
            // arguments that never unwinds across the FFI boundary.
            let rc = unsafe { libc::atexit(drain_at_exit) };
            if rc != 0 {
                debug!("atexit registration failed ({}); scratch dirs rely on Drop", rc);
            }
        }
        #[cfg(not(unix))]
        {
            debug!("No exit hook on this platform; scratch dirs rely on Drop");
        }
    });
}

#[cfg(unix)]
extern "C" fn drain_at_exit() {
    let _ = std::panic::catch_unwind(|| GLOBAL.drain());
}
