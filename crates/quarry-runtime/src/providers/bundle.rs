use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, warn};

use quarry_net::{DownloadTask, ExpectedIntegrity, ProgressStatus};

use crate::host::join_url;
use crate::registry::{BundleRecord, RegistryShared};
use crate::{AsyncOperation, Error, LoadedResource, Provider, Result};

/// Materializes one bundle: finds it in the persistent cache, copies it from
/// the builtin directory or downloads it validated against its manifest
/// record, then hands the file to the engine loader.
pub(crate) struct BundleProvider {
    label: String,
    shared: Weak<RegistryShared>,
    record: BundleRecord,
    task: Mutex<Option<Arc<DownloadTask>>>,
}

impl BundleProvider {
    pub(crate) fn new(shared: &Arc<RegistryShared>, record: BundleRecord) -> Self {
        Self {
            label: format!("bundle '{}'", record.info.name),
            shared: Arc::downgrade(shared),
            record,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Provider for BundleProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn provide(&self, _dependencies: &[AsyncOperation]) -> Result<LoadedResource> {
        let shared = self.shared.upgrade().ok_or(Error::Abandoned)?;
        let name = &self.record.info.name;
        let local = shared.persistent_path(name);

        let mut cached = local.is_file();
        if cached && self.record.info.size != 0 {
            let actual = tokio::fs::metadata(&local).await?.len();
            if actual != self.record.info.size {
                warn!(
                    "cached bundle '{}' has {} bytes, expected {}, refetching",
                    name, actual, self.record.info.size
                );
                tokio::fs::remove_file(&local).await?;
                cached = false;
            }
        }

        if !cached {
            let builtin = shared.builtin_path(name);
            if builtin.is_file() {
                if let Some(parent) = local.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&builtin, &local).await?;
                debug!("copied builtin bundle '{}' into the cache", name);
            } else {
                let base = shared.remote_base(
                    &self.record.package,
                    &self.record.version,
                    &self.record.load_path,
                )?;
                let url = join_url(&base, name);
                let task = shared.downloader().download(
                    &url,
                    &local,
                    ExpectedIntegrity::from_bundle(&self.record.info),
                );
                *self.task.lock().unwrap() = Some(Arc::clone(&task));
                task.wait().await?;
            }
        }

        let handle = shared.loader().load_bundle(&local).await?;
        Ok(LoadedResource::Bundle(handle))
    }

    fn progress(&self) -> Option<ProgressStatus> {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .map(|task| task.progress())
    }
}
