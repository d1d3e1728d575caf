use std::any::Any;
use std::sync::Arc;

use quarry_net::ProgressStatus;

use crate::{AsyncOperation, LoadedResource, Result};

/// A reference-counted claim on a load operation.
///
/// Creating a handle pins the operation and everything it depends on;
/// calling [`AssetHandle::release`] drops that claim. Released content
/// stays resident until [`crate::AssetRuntime::unload_unused`] sweeps it,
/// so a release/reload pair in the same frame costs nothing.
pub struct AssetHandle {
    operation: AsyncOperation,
}

impl AssetHandle {
    pub(crate) fn new(operation: AsyncOperation) -> Self {
        operation.add_ref();
        Self { operation }
    }

    pub fn operation(&self) -> &AsyncOperation {
        &self.operation
    }

    pub fn is_done(&self) -> bool {
        self.operation.is_done()
    }

    pub fn succeeded(&self) -> bool {
        self.operation.succeeded()
    }

    pub fn progress(&self) -> ProgressStatus {
        self.operation.progress()
    }

    /// Wait for the load to settle and return its resource.
    pub async fn wait(&self) -> Result<LoadedResource> {
        self.operation.await_result().await
    }

    /// Block the current thread until the load settles. Must not be called
    /// from an async executor thread.
    pub fn wait_blocking(&self) -> Result<LoadedResource> {
        self.operation.wait_for_completed()
    }

    /// The loaded asset, downcast to `T`. `None` while the operation is
    /// unresolved, failed or of another payload kind.
    pub fn get_asset<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self.operation.payload()? {
            LoadedResource::Asset(asset) => asset.downcast::<T>().ok(),
            _ => None,
        }
    }

    /// All loaded assets of a batch that downcast to `T`.
    pub fn get_assets<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        match self.operation.payload() {
            Some(LoadedResource::Assets(assets)) => assets
                .into_iter()
                .filter_map(|asset| asset.downcast::<T>().ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Give up this handle's claim. The content becomes eligible for the
    /// next unload sweep once no other handle pins it.
    pub fn release(self) {
        self.operation.release();
    }
}
