//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather than
//! being scattered through the supervisor.
//!
//! - `permissions` - executable bits on extracted artifacts
//! - `process` - liveness checks and termination of the child

pub mod permissions;
pub mod process;

pub use permissions::{is_executable, set_executable};
pub use process::{
    is_process_alive, is_text_file_busy, request_graceful_shutdown, terminate_child,
};

use crate::error::{RedisServerError, Result};
use std::fmt;
use std::sync::OnceLock;

/// Host platforms a redis-server build exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformTarget {
    Windows,
    Linux,
    MacOsX,
}

static CURRENT: OnceLock<std::result::Result<PlatformTarget, String>> = OnceLock::new();

impl PlatformTarget {
    /// File name of the server binary for this platform.
    pub fn executable_name(&self) -> &'static str {
        match self {
            PlatformTarget::Windows => "redis-server.exe",
            PlatformTarget::Linux => "redis-server",
            PlatformTarget::MacOsX => "redis-server",
        }
    }

    /// Path segment the platform's artifacts are stored under.
    pub fn resource_segment(&self) -> &'static str {
        match self {
            PlatformTarget::Windows => "windows",
            PlatformTarget::Linux => "linux",
            PlatformTarget::MacOsX => "macosx",
        }
    }

    /// Map an OS name to a platform.
    ///
    /// Accepts both Rust's `std::env::consts::OS` values and the long forms
    /// reported by other runtimes (`"Windows 10"`, `"Mac OS X"`, `"Darwin"`).
    pub fn from_os_name(os: &str) -> Result<Self> {
        let os_lower = os.trim().to_lowercase();
        if matches!(os_lower.as_str(), "macos" | "mac os x" | "darwin") {
            Ok(PlatformTarget::MacOsX)
        } else if os_lower == "linux" {
            Ok(PlatformTarget::Linux)
        } else if os_lower.starts_with("windows") {
            Ok(PlatformTarget::Windows)
        } else {
            Err(RedisServerError::UnsupportedPlatform { os: os.to_string() })
        }
    }

    /// The platform of the running host, resolved once per process.
    pub fn current() -> Result<Self> {
        CURRENT
            .get_or_init(|| {
                Self::from_os_name(std::env::consts::OS).map_err(|_| std::env::consts::OS.to_string())
            })
            .clone()
            .map_err(|os| RedisServerError::UnsupportedPlatform { os })
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_segment())
    }
}
