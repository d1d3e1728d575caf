use std::sync::{Arc, Weak};

use async_trait::async_trait;

use quarry_manifest::AddressInfo;

use crate::providers::bundle_payload;
use crate::registry::RegistryShared;
use crate::{AsyncOperation, Error, LoadedResource, Provider, Result, SceneMode};

/// Opens a scene once its owning bundle is loaded.
pub(crate) struct SceneProvider {
    label: String,
    shared: Weak<RegistryShared>,
    row: AddressInfo,
    mode: SceneMode,
}

impl SceneProvider {
    pub(crate) fn new(shared: &Arc<RegistryShared>, row: AddressInfo, mode: SceneMode) -> Self {
        Self {
            label: format!("scene '{}'", row.address),
            shared: Arc::downgrade(shared),
            row,
            mode,
        }
    }
}

#[async_trait]
impl Provider for SceneProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn provide(&self, dependencies: &[AsyncOperation]) -> Result<LoadedResource> {
        let shared = self.shared.upgrade().ok_or(Error::Abandoned)?;
        let bundle = bundle_payload(dependencies)?;
        shared
            .loader()
            .load_scene(&bundle, &self.row.asset_path, self.mode)
            .await?;
        Ok(LoadedResource::Scene)
    }
}
