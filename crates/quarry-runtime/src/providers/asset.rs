use std::sync::{Arc, Weak};

use async_trait::async_trait;

use quarry_manifest::AddressInfo;

use crate::providers::bundle_payload;
use crate::registry::RegistryShared;
use crate::{AsyncOperation, Error, LoadedResource, Provider, Result};

/// Loads one asset out of its owning bundle, which is the operation's single
/// dependency.
pub(crate) struct AssetProvider {
    label: String,
    shared: Weak<RegistryShared>,
    row: AddressInfo,
}

impl AssetProvider {
    pub(crate) fn new(shared: &Arc<RegistryShared>, row: AddressInfo) -> Self {
        Self {
            label: format!("asset '{}'", row.address),
            shared: Arc::downgrade(shared),
            row,
        }
    }
}

#[async_trait]
impl Provider for AssetProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn provide(&self, dependencies: &[AsyncOperation]) -> Result<LoadedResource> {
        let shared = self.shared.upgrade().ok_or(Error::Abandoned)?;
        let bundle = bundle_payload(dependencies)?;
        let asset = shared
            .loader()
            .load_asset(&bundle, &self.row.asset_path)
            .await?;
        Ok(LoadedResource::Asset(asset))
    }
}
