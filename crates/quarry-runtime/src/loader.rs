use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// How a scene is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneMode {
    /// Replace whatever scenes are currently open.
    Single,
    /// Open on top of the current scenes.
    Additive,
}

/// An engine-side bundle object, returned by the loader and handed back for
/// unloading.
#[derive(Clone)]
pub struct BundleHandle {
    /// Content-addressed bundle file name.
    pub name: String,
    /// Whatever the engine associates with the loaded bundle.
    pub native: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for BundleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Bridge to the engine that owns the actual asset IO.
///
/// The runtime decides *which* files to load and in what order; the engine
/// decides *how*. Everything the registry loads goes through this trait, so
/// tests can substitute a recording fake.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Load a bundle file into the engine.
    async fn load_bundle(&self, path: &Path) -> Result<BundleHandle>;

    /// Load one asset out of a loaded bundle.
    async fn load_asset(
        &self,
        bundle: &BundleHandle,
        asset_path: &str,
    ) -> Result<Arc<dyn Any + Send + Sync>>;

    /// Open a scene contained in a loaded bundle.
    async fn load_scene(
        &self,
        bundle: &BundleHandle,
        scene_path: &str,
        mode: SceneMode,
    ) -> Result<()>;

    /// Release a bundle previously returned by [`Self::load_bundle`].
    fn unload_bundle(&self, bundle: &BundleHandle);
}
