//! The lifecycle supervisor.
//!
//! [`RedisServer`] owns one extracted executable and at most one running
//! redis-server child. Its state machine is
//!
//! ```text
//! Idle --start--> Starting --ready line--> Running --stop--> Stopped
//!                    |
//!                    +--launch failure / EOF / timeout--> Idle
//! ```
//!
//! `start` and `stop` serialize on one mutex; the accessors read an atomic
//! mirror of the state and never wait on that mutex.

use crate::artifact::{self, ArtifactSource, DirectorySource, ResolvedArtifact, ResourceKey};
use crate::config::{ServerConfig, ServerDefaults, LATEST_REDIS_VERSION};
use crate::error::{RedisServerError, Result};
use crate::platform::{self, PlatformTarget};
use crate::port::allocate_free_port;
use crate::process::{recv_outcome, LaunchSpec, OutputForwarder, ReadinessDetector, ReadyOutcome};
use regex::Regex;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of one supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, never started (or the last start failed).
    Idle = 0,
    /// `start` is launching the child and waiting for readiness.
    Starting = 1,
    /// The child printed its ready line and has not been stopped.
    Running = 2,
    /// The child was stopped. Terminal.
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopped,
            _ => LifecycleState::Idle,
        }
    }
}

/// One live child with the threads draining its output.
#[derive(Debug)]
struct ServerInstance {
    child: Child,
    stdout: OutputForwarder,
    stderr: OutputForwarder,
}

/// A disposable redis-server supervised by the current process.
///
/// # Example
///
/// ```rust,no_run
/// use redis_embedded::RedisServer;
///
/// fn main() -> redis_embedded::Result<()> {
///     let server = RedisServer::builder().password("s3cret").build()?;
///     server.start()?;
///     println!("redis listening on {}", server.addr());
///     server.stop()?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RedisServer {
    config: ServerConfig,
    artifact: ResolvedArtifact,
    state: AtomicU8,
    /// PID of the running child, 0 when there is none.
    pid: AtomicU32,
    instance: Mutex<Option<ServerInstance>>,
}

impl RedisServer {
    /// The latest bundled version on a free port, without a password.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// The latest bundled version on `port`.
    pub fn with_port(port: u16) -> Result<Self> {
        Self::builder().port(port).build()
    }

    /// A specific version on a free port.
    pub fn with_version(version: impl Into<String>) -> Result<Self> {
        Self::builder().version(version).build()
    }

    pub fn builder() -> RedisServerBuilder {
        RedisServerBuilder::new()
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Loopback address clients should connect to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::from(ServerDefaults::LOOPBACK), self.config.port))
    }

    /// Path of the extracted redis-server executable.
    pub fn executable(&self) -> &Path {
        self.artifact.executable()
    }

    /// Where in the artifact source the executable came from.
    pub fn resource_key(&self) -> &ResourceKey {
        self.artifact.key()
    }

    /// The private directory the executable was extracted into.
    pub fn scratch_dir(&self) -> &Path {
        self.artifact.dir()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// PID of the running child.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_instance(&self) -> MutexGuard<'_, Option<ServerInstance>> {
        // The slot is only ever replaced whole, so a poisoned lock is still consistent
        self.instance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launch redis-server and block until it reports that it accepts connections.
    ///
    /// # Errors
    /// - `AlreadyRunning` if this instance is running; the child is left alone
    /// - `AlreadyStopped` if this instance was stopped before
    /// - `Launch` if the process cannot be spawned
    /// - `NotReady` if its stdout closed before the ready line
    /// - `StartupTimeout` if the ready line did not arrive in time
    ///
    /// On every error the child, if one was spawned, has been killed and reaped.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.lock_instance();

        match self.state() {
            LifecycleState::Running => return Err(RedisServerError::AlreadyRunning),
            LifecycleState::Stopped => return Err(RedisServerError::AlreadyStopped),
            LifecycleState::Idle | LifecycleState::Starting => {}
        }

        self.set_state(LifecycleState::Starting);
        match self.launch() {
            Ok(instance) => {
                let pid = instance.child.id();
                *slot = Some(instance);
                self.pid.store(pid, Ordering::SeqCst);
                self.set_state(LifecycleState::Running);
                info!(
                    "redis-server {} ready on port {} (PID {})",
                    self.config.version, self.config.port, pid
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(LifecycleState::Idle);
                warn!("redis-server on port {} failed to start: {}", self.config.port, e);
                Err(e)
            }
        }
    }

    fn launch(&self) -> Result<ServerInstance> {
        let spec = LaunchSpec::new(
            self.artifact.executable(),
            self.config.port,
            self.config.password.as_deref(),
        );
        let mut child = spec.spawn()?;

        let (stdout, stderr, outcome_rx) = match self.watch_output(&mut child) {
            Ok(watch) => watch,
            Err(e) => {
                abort_child(&mut child);
                return Err(e);
            }
        };

        let outcome = recv_outcome(&outcome_rx, self.config.startup_timeout)
            .and_then(ReadyOutcome::into_result);
        match outcome {
            Ok(line) => {
                debug!("Ready line: {}", line);
                Ok(ServerInstance {
                    child,
                    stdout,
                    stderr,
                })
            }
            Err(e) => {
                abort_child(&mut child);
                stdout.finish(ServerDefaults::KILL_WAIT);
                stderr.finish(ServerDefaults::KILL_WAIT);
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn watch_output(
        &self,
        child: &mut Child,
    ) -> Result<(
        OutputForwarder,
        OutputForwarder,
        std::sync::mpsc::Receiver<Result<ReadyOutcome>>,
    )> {
        let pid = child.id();
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RedisServerError::Io {
                message: "child output was not captured".to_string(),
                path: None,
                source: None,
            });
        };

        let stderr = OutputForwarder::spawn(pid, "stderr", stderr)?;
        let detector = ReadinessDetector::new(self.config.ready_pattern.clone());
        let (stdout, outcome_rx) = OutputForwarder::spawn_ready_watch(pid, stdout, detector)?;
        Ok((stdout, stderr, outcome_rx))
    }

    /// Terminate the running child and wait for it to exit.
    ///
    /// Does nothing unless the server is running, so it is safe to call more
    /// than once. The child first gets a graceful shutdown request; if it is
    /// still alive after the configured shutdown timeout it is killed.
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.lock_instance();

        if self.state() != LifecycleState::Running {
            debug!("stop() on a {:?} redis-server is a no-op", self.state());
            return Ok(());
        }
        let Some(mut instance) = slot.take() else {
            return Ok(());
        };

        let pid = instance.child.id();
        info!("Stopping redis-server on port {} (PID {})", self.config.port, pid);

        match platform::terminate_child(&mut instance.child, self.config.shutdown_timeout) {
            Ok(status) => {
                instance.stdout.finish(ServerDefaults::KILL_WAIT);
                instance.stderr.finish(ServerDefaults::KILL_WAIT);
                self.pid.store(0, Ordering::SeqCst);
                self.set_state(LifecycleState::Stopped);
                info!("redis-server PID {} exited: {}", pid, status);
                Ok(())
            }
            Err(e) => {
                // Still ours and possibly alive; a later stop() can retry
                *slot = Some(instance);
                Err(e)
            }
        }
    }
}

impl Drop for RedisServer {
    fn drop(&mut self) {
        let instance = match self.instance.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut instance) = instance {
            let timeout = self
                .config
                .shutdown_timeout
                .unwrap_or(ServerDefaults::SHUTDOWN_TIMEOUT);
            debug!("Dropping running redis-server (PID {})", instance.child.id());
            if let Err(e) = platform::terminate_child(&mut instance.child, Some(timeout)) {
                warn!("Failed to stop redis-server on drop: {}", e);
            }
            self.set_state(LifecycleState::Stopped);
        }
        // The artifact field drops next and removes the scratch directory
    }
}

/// Kill and reap a child that will not become a running server.
fn abort_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!("Failed to kill redis-server PID {}: {}", child.id(), e);
        }
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap redis-server PID {}: {}", child.id(), e);
    }
}

/// Builder for configuring a [`RedisServer`].
///
/// Everything is resolved in [`build`](Self::build): the platform, the port
/// (allocated when not given) and the extracted executable.
///
/// ```rust,ignore
/// let server = RedisServer::builder()
///     .version("2.8.9")
///     .port(6380)
///     .password("s3cret")
///     .startup_timeout(Duration::from_secs(10))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct RedisServerBuilder {
    version: Option<String>,
    port: Option<u16>,
    password: Option<String>,
    startup_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    ready_pattern: Option<Regex>,
    source: Option<Box<dyn ArtifactSource>>,
    platform: Option<PlatformTarget>,
}

impl Default for RedisServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RedisServerBuilder {
    pub fn new() -> Self {
        Self {
            version: None,
            port: None,
            password: None,
            startup_timeout: Some(ServerDefaults::STARTUP_TIMEOUT),
            shutdown_timeout: Some(ServerDefaults::SHUTDOWN_TIMEOUT),
            ready_pattern: None,
            source: None,
            platform: None,
        }
    }

    /// Redis version to extract.
    ///
    /// Default: [`LATEST_REDIS_VERSION`]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Port to listen on.
    ///
    /// Default: a free port chosen by the OS
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Require clients to authenticate. An empty password means none.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// How long `start` waits for the ready line.
    ///
    /// Default: 30 seconds
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Make `start` wait for the ready line for as long as the child lives.
    pub fn wait_for_ready_indefinitely(mut self) -> Self {
        self.startup_timeout = None;
        self
    }

    /// How long `stop` waits after the graceful request before killing.
    ///
    /// Default: 10 seconds
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Make `stop` wait for the child to exit without ever killing it.
    pub fn wait_for_exit_indefinitely(mut self) -> Self {
        self.shutdown_timeout = None;
        self
    }

    /// Override the pattern that marks a stdout line as "ready".
    pub fn ready_pattern(mut self, pattern: Regex) -> Self {
        self.ready_pattern = Some(pattern);
        self
    }

    /// Where to take the executable from.
    ///
    /// Default: [`DirectorySource::from_env`]
    pub fn artifact_source(mut self, source: impl ArtifactSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Pretend to run on another platform when picking the artifact.
    ///
    /// Default: the host platform
    pub fn platform(mut self, platform: PlatformTarget) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Resolve the configuration and extract the executable.
    pub fn build(self) -> Result<RedisServer> {
        let platform = match self.platform {
            Some(platform) => platform,
            None => PlatformTarget::current()?,
        };

        let version = self
            .version
            .unwrap_or_else(|| LATEST_REDIS_VERSION.to_string());

        let port = match self.port {
            Some(0) => {
                return Err(RedisServerError::Config {
                    message: "port must be between 1 and 65535".to_string(),
                })
            }
            Some(port) => port,
            None => allocate_free_port()?,
        };

        let source = self
            .source
            .unwrap_or_else(|| Box::new(DirectorySource::from_env()) as Box<dyn ArtifactSource>);
        let artifact = artifact::resolve(source.as_ref(), &version, platform)?;

        let config = ServerConfig {
            version,
            port,
            password: self.password.filter(|p| !p.is_empty()),
            startup_timeout: self.startup_timeout,
            shutdown_timeout: self.shutdown_timeout,
            ready_pattern: self
                .ready_pattern
                .unwrap_or_else(ServerDefaults::ready_pattern),
        };

        debug!(
            "Configured redis-server {} from {} on port {}",
            config.version,
            artifact.key(),
            config.port
        );

        Ok(RedisServer {
            config,
            artifact,
            state: AtomicU8::new(LifecycleState::Idle as u8),
            pid: AtomicU32::new(0),
            instance: Mutex::new(None),
        })
    }
}
