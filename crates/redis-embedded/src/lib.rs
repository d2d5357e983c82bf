//! Redis Embedded - a disposable redis-server for tests.
//!
//! This crate extracts a platform-specific redis-server executable into a
//! private temp directory, launches it on a chosen or free port, blocks until
//! the server prints its "ready to accept connections" line, and tears it down
//! again on [`RedisServer::stop`] or drop.
//!
//! # Example
//!
//! ```rust,no_run
//! use redis_embedded::RedisServer;
//!
//! fn main() -> redis_embedded::Result<()> {
//!     let server = RedisServer::with_port(6380)?;
//!     server.start()?;
//!     assert!(server.is_active());
//!
//!     // ... talk to 127.0.0.1:6380 ...
//!
//!     server.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! # Artifacts
//!
//! Executables are looked up as `redis/<version>/<platform>/<executable>` in an
//! [`ArtifactSource`]. The default source is the directory named by the
//! `REDIS_EMBEDDED_RESOURCES` environment variable, or the `resources/`
//! directory of this crate. Binaries can also be compiled in with
//! [`BundledSource`].

pub mod artifact;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod platform;
pub mod port;
pub mod process;

mod server;

// Re-export commonly used types
pub use artifact::{ArtifactSource, BundledSource, DirectorySource, ResolvedArtifact, ResourceKey};
pub use config::{ServerConfig, ServerDefaults, LATEST_REDIS_VERSION, READY_LINE, RESOURCES_ENV_VAR};
pub use error::{RedisServerError, Result};
pub use platform::PlatformTarget;
pub use port::allocate_free_port;
pub use process::{ReadinessDetector, ReadyOutcome};
pub use server::{LifecycleState, RedisServer, RedisServerBuilder};
