//! Process launching functionality.

use crate::error::{RedisServerError, Result};
use crate::platform;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, error, info};

const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Arguments passed to redis-server.
///
/// Always `--port <port>`; `--requirepass <password>` is added only for a
/// non-empty password.
pub fn launch_args(port: u16, password: Option<&str>) -> Vec<String> {
    let mut args = vec!["--port".to_string(), port.to_string()];
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        args.push("--requirepass".to_string());
        args.push(password.to_string());
    }
    args
}

/// Everything needed to start one redis-server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Path to the redis-server executable.
    pub executable: PathBuf,
    /// Arguments to pass.
    pub args: Vec<String>,
    /// Working directory; redis-server resolves relative resources against it.
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// Build the launch spec for an extracted executable.
    ///
    /// The working directory is the executable's parent directory.
    pub fn new(executable: impl AsRef<Path>, port: u16, password: Option<&str>) -> Self {
        let executable = executable.as_ref().to_path_buf();
        let working_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            executable,
            args: launch_args(port, password),
            working_dir,
        }
    }

    /// The command line as a single string, with the password masked.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                parts.push("****".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "--requirepass";
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args);
        cmd.current_dir(&self.working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        // Piped rather than inherited so it can be forwarded to tracing; the
        // supervisor always drains it
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Spawn the process with stdout and stderr piped.
    pub fn spawn(&self) -> Result<Child> {
        info!("Launching {}", self.display_command());

        let mut attempt = 1;
        let child = loop {
            match self.command().spawn() {
                Ok(child) => break child,
                Err(e) if platform::is_text_file_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                    debug!("{} is busy, retrying spawn", self.executable.display());
                    attempt += 1;
                    sleep(SPAWN_RETRY_DELAY);
                }
                Err(e) => {
                    error!("Failed to spawn {}: {}", self.executable.display(), e);
                    return Err(RedisServerError::Launch {
                        path: self.executable.clone(),
                        source: e,
                    });
                }
            }
        };

        info!("Launched redis-server with PID {}", child.id());
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_without_password() {
        assert_eq!(launch_args(6379, None), vec!["--port", "6379"]);
        assert_eq!(launch_args(6379, Some("")), vec!["--port", "6379"]);
    }

    #[test]
    fn test_args_with_password() {
        assert_eq!(
            launch_args(19999, Some("s3cret")),
            vec!["--port", "19999", "--requirepass", "s3cret"]
        );
    }

    #[test]
    fn test_launch_spec_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let exe = temp_dir.path().join("redis-server");

        let spec = LaunchSpec::new(&exe, 6380, Some("pw"));

        assert_eq!(spec.executable, exe);
        assert_eq!(spec.working_dir, temp_dir.path());
        assert_eq!(spec.args, launch_args(6380, Some("pw")));
    }

    #[test]
    fn test_display_command_masks_password() {
        let spec = LaunchSpec::new("/tmp/x/redis-server", 6380, Some("hunter2"));
        let shown = spec.display_command();
        assert_eq!(shown, "/tmp/x/redis-server --port 6380 --requirepass ****");
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_spawn_missing_binary() {
        let temp_dir = TempDir::new().unwrap();
        let spec = LaunchSpec::new(temp_dir.path().join("redis-server"), 6379, None);

        let err = spec.spawn().unwrap_err();
        assert!(matches!(err, RedisServerError::Launch { .. }));
    }
}
