//! Artifact resolution.
//!
//! Turns a `(version, platform)` pair into a runnable redis-server on disk:
//!
//! 1. Compute the [`ResourceKey`] `redis/<version>/<platform>/<executable>`
//! 2. Open it from an [`ArtifactSource`]
//! 3. Copy it into a fresh UUID-named directory under the system temp dir
//! 4. Mark it executable and register both paths for exit-time cleanup
//!
//! The returned [`ResolvedArtifact`] owns the directory and deletes it when
//! dropped.

mod source;

pub use source::{ArtifactSource, BundledSource, DirectorySource};

use crate::cleanup;
use crate::config::ServerDefaults;
use crate::error::{RedisServerError, Result};
use crate::platform::{self, PlatformTarget};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Logical location of one executable inside an artifact source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    version: String,
    platform: PlatformTarget,
}

impl ResourceKey {
    pub fn new(version: impl Into<String>, platform: PlatformTarget) -> Self {
        Self {
            version: version.into(),
            platform,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn platform(&self) -> PlatformTarget {
        self.platform
    }

    /// Path components, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        [
            ServerDefaults::RESOURCE_NAMESPACE,
            self.version.as_str(),
            self.platform.resource_segment(),
            self.platform.executable_name(),
        ]
        .into_iter()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// An executable extracted into a private scratch directory.
#[derive(Debug)]
pub struct ResolvedArtifact {
    dir: PathBuf,
    executable: PathBuf,
    key: ResourceKey,
}

impl ResolvedArtifact {
    /// Absolute path of the executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The scratch directory holding the executable.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn remove(&self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("Removed scratch dir {}", self.dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                // Leave it registered so the exit hook gets another try
                warn!("Failed to remove scratch dir {}: {}", self.dir.display(), e);
                return;
            }
        }
        cleanup::unregister(&self.executable);
        cleanup::unregister(&self.dir);
    }
}

impl Drop for ResolvedArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Extract the artifact for `(version, platform)` from `source`.
pub fn resolve(
    source: &dyn ArtifactSource,
    version: &str,
    platform: PlatformTarget,
) -> Result<ResolvedArtifact> {
    if version.trim().is_empty() {
        return Err(RedisServerError::Config {
            message: "version must not be empty".to_string(),
        });
    }

    let key = ResourceKey::new(version, platform);
    let mut reader = source
        .open(&key)
        .map_err(|e| RedisServerError::Extraction {
            message: format!("failed to open {}: {}", key, e),
            path: None,
            source: Some(e),
        })?
        .ok_or_else(|| RedisServerError::ArtifactNotFound {
            key: key.to_string(),
        })?;

    let dir = std::env::temp_dir().join(uuid::Uuid::new_v4().to_string());
    fs::create_dir_all(&dir).map_err(|e| RedisServerError::extraction(e, &dir))?;
    cleanup::register(&dir);

    let executable = dir.join(platform.executable_name());
    // From here on, dropping the artifact removes whatever was written
    let artifact = ResolvedArtifact {
        dir,
        executable,
        key,
    };
    cleanup::register(&artifact.executable);

    let file =
        File::create(&artifact.executable).map_err(|e| RedisServerError::extraction(e, &artifact.executable))?;
    let mut writer = BufWriter::new(file);
    let written = io::copy(&mut reader, &mut writer)
        .and_then(|n| writer.flush().map(|_| n))
        .map_err(|e| RedisServerError::extraction(e, &artifact.executable))?;
    drop(writer);

    platform::set_executable(&artifact.executable)?;

    info!(
        "Extracted {} ({} bytes) to {}",
        artifact.key,
        written,
        artifact.executable.display()
    );
    Ok(artifact)
}
