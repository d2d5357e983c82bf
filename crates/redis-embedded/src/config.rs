//! Centralized defaults for the embedded Redis supervisor.
//!
//! Per-instance settings live on [`ServerConfig`], which is built once by
//! [`RedisServerBuilder`](crate::RedisServerBuilder) and never changes afterwards.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Version used when the caller does not ask for a specific one.
pub const LATEST_REDIS_VERSION: &str = "2.8.9";

/// Environment variable that overrides the on-disk resource root.
pub const RESOURCES_ENV_VAR: &str = "REDIS_EMBEDDED_RESOURCES";

/// Text redis-server prints on stdout once it accepts connections.
pub const READY_LINE: &str = "The server is now ready to accept connections on port";

static DEFAULT_READY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&regex::escape(READY_LINE)).expect("ready line pattern must compile")
});

/// Supervisor-wide defaults.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
    pub const KILL_WAIT: Duration = Duration::from_secs(2);
    pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const RESOURCE_NAMESPACE: &'static str = "redis";
    pub const LOOPBACK: [u8; 4] = [127, 0, 0, 1];

    /// The resource directory shipped next to this crate's manifest.
    pub fn bundled_resources_dir() -> &'static str {
        concat!(env!("CARGO_MANIFEST_DIR"), "/resources")
    }

    /// The default readiness pattern.
    pub fn ready_pattern() -> Regex {
        DEFAULT_READY_PATTERN.clone()
    }
}

/// Immutable configuration of one supervised server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Redis version to extract.
    pub version: String,
    /// Port passed to `--port`.
    pub port: u16,
    /// Password passed to `--requirepass` (empty strings are normalized to `None`).
    pub password: Option<String>,
    /// How long `start` waits for the readiness line; `None` waits forever.
    pub startup_timeout: Option<Duration>,
    /// How long `stop` waits after the graceful signal before killing; `None` waits forever.
    pub shutdown_timeout: Option<Duration>,
    /// Pattern a stdout line must match to count as ready.
    pub ready_pattern: Regex,
}
