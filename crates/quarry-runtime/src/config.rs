use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Where the runtime keeps and finds content.
///
/// Loaded from the `[runtime]` section of the stack configuration; every
/// field has a default so an empty file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Writable cache directory for manifests and downloaded bundles.
    pub persistent_root: PathBuf,
    /// Read-only directory of bundles and manifests shipped with the build.
    pub builtin_root: PathBuf,
    /// Remote base-url template. `{package}` and `{version}` are built in;
    /// other `{key}` placeholders are filled from [`Self::placeholders`].
    /// When empty, bundle downloads fall back to the manifest's recorded
    /// load path and remote manifest fetches are disabled.
    pub host_url: String,
    pub placeholders: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            persistent_root: PathBuf::from("quarry_cache"),
            builtin_root: PathBuf::from("builtin_bundles"),
            host_url: String::new(),
            placeholders: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Read the `[runtime]` section.
    ///
    /// # Errors
    ///
    /// Fails if the section exists but does not deserialize.
    pub fn from_config(config: &quarry_config::Config) -> Result<Self> {
        Ok(config.get_or_default("runtime")?)
    }
}
