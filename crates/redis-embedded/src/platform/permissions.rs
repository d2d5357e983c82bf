//! Platform-specific file permission handling.

use crate::error::{RedisServerError, Result};
use std::path::Path;
use tracing::debug;

/// Make a file executable.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sets the executable bit (mode 0o755)
/// - **Windows**: No-op (Windows determines executability by file extension)
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata =
            std::fs::metadata(path).map_err(|e| RedisServerError::extraction(e, path))?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| RedisServerError::extraction(e, path))?;
        debug!("Set executable permissions on: {}", path.display());
    }

    #[cfg(windows)]
    {
        if !path.exists() {
            return Err(RedisServerError::extraction(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                path,
            ));
        }
        debug!("Skipping executable bit on Windows for: {}", path.display());
    }

    Ok(())
}

/// Check if a file has executable permissions.
///
/// # Platform Behavior
/// - **Linux/macOS**: Checks if any execute bit is set
/// - **Windows**: Returns true for `.exe` files
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        path.is_file()
            && path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("exe"))
                .unwrap_or(false)
    }
}
