//! Where artifact bytes come from.

use super::ResourceKey;
use crate::config::{ServerDefaults, RESOURCES_ENV_VAR};
use crate::platform::PlatformTarget;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A read-only store of redis-server executables keyed by version and platform.
pub trait ArtifactSource: Send + Sync + fmt::Debug {
    /// Open the artifact stored under `key`.
    ///
    /// Returns `Ok(None)` when there is no such artifact and an error when it
    /// exists but cannot be opened.
    fn open(&self, key: &ResourceKey) -> io::Result<Option<Box<dyn Read + Send + '_>>>;
}

/// Artifacts laid out on disk as `<root>/redis/<version>/<platform>/<executable>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The resource root from `REDIS_EMBEDDED_RESOURCES`, or the `resources/`
    /// directory shipped with this crate.
    pub fn from_env() -> Self {
        match std::env::var_os(RESOURCES_ENV_VAR) {
            Some(root) if !root.is_empty() => Self::new(root),
            _ => Self::new(ServerDefaults::bundled_resources_dir()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path an artifact would have under this root.
    pub fn path_for(&self, key: &ResourceKey) -> PathBuf {
        key.segments().fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl ArtifactSource for DirectorySource {
    fn open(&self, key: &ResourceKey) -> io::Result<Option<Box<dyn Read + Send + '_>>> {
        let path = self.path_for(key);
        match File::open(&path) {
            Ok(file) => {
                if !file.metadata()?.is_file() {
                    return Ok(None);
                }
                Ok(Some(Box::new(file)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Artifacts compiled into the binary, usually with `include_bytes!`.
///
/// ```rust,ignore
/// let source = BundledSource::new()
///     .with_artifact("2.8.9", PlatformTarget::Linux, include_bytes!("../bin/redis-server"));
/// ```
#[derive(Default, Clone)]
pub struct BundledSource {
    artifacts: HashMap<String, &'static [u8]>,
}

impl BundledSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bytes of one executable.
    pub fn with_artifact(
        mut self,
        version: impl Into<String>,
        platform: PlatformTarget,
        bytes: &'static [u8],
    ) -> Self {
        let key = ResourceKey::new(version, platform);
        self.artifacts.insert(key.to_string(), bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl fmt::Debug for BundledSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.artifacts.keys().collect();
        keys.sort();
        f.debug_struct("BundledSource").field("artifacts", &keys).finish()
    }
}

impl ArtifactSource for BundledSource {
    fn open(&self, key: &ResourceKey) -> io::Result<Option<Box<dyn Read + Send + '_>>> {
        Ok(self
            .artifacts
            .get(&key.to_string())
            .map(|bytes| Box::new(*bytes) as Box<dyn Read + Send>))
    }
}
