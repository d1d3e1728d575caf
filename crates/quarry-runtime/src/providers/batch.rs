use async_trait::async_trait;

use crate::{AsyncOperation, Error, LoadedResource, Provider, Result};

/// Collects the payloads of the asset operations a set of address and label
/// keys resolved to.
pub(crate) struct BatchProvider {
    label: String,
}

impl BatchProvider {
    pub(crate) fn new(keys: &[String]) -> Self {
        Self {
            label: format!("assets for [{}]", keys.join(", ")),
        }
    }
}

#[async_trait]
impl Provider for BatchProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn provide(&self, dependencies: &[AsyncOperation]) -> Result<LoadedResource> {
        let mut assets = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            match dependency.payload() {
                Some(LoadedResource::Asset(asset)) => assets.push(asset),
                _ => {
                    return Err(Error::Loader(format!(
                        "'{}' did not produce an asset",
                        dependency.label()
                    )))
                }
            }
        }
        Ok(LoadedResource::Assets(assets))
    }
}
