use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::{info, warn};

use quarry_manifest::{manifest_hash_name, manifest_json_name, manifest_zip_name, ManifestData};
use quarry_net::ExpectedIntegrity;

use crate::host::{join_url, with_cache_buster};
use crate::registry::RegistryShared;
use crate::{AsyncOperation, Error, LoadedResource, Provider, Result};

/// Resolves and registers a package manifest.
///
/// Resolution order: the manifest json already in the persistent cache, the
/// manifest archive shipped in the builtin directory, then the remote host.
/// A remote fetch first downloads the `.hash` file and uses its digest to
/// validate the manifest archive. With `ignore_cache` both local sources are
/// skipped and remote URLs carry a freshness parameter.
pub(crate) struct PackageProvider {
    label: String,
    shared: Weak<RegistryShared>,
    package: String,
    version: String,
    ignore_cache: bool,
}

impl PackageProvider {
    pub(crate) fn new(
        shared: &Arc<RegistryShared>,
        package: String,
        version: String,
        ignore_cache: bool,
    ) -> Self {
        Self {
            label: format!("package '{}' {}", package, version),
            shared: Arc::downgrade(shared),
            package,
            version,
            ignore_cache,
        }
    }

    async fn fetch_remote(
        &self,
        shared: &Arc<RegistryShared>,
        json_name: &str,
        zip_name: &str,
        hash_name: &str,
    ) -> Result<ManifestData> {
        let base = shared.remote_base(&self.package, &self.version, "")?;
        let mut hash_url = join_url(&base, hash_name);
        let mut zip_url = join_url(&base, zip_name);
        if self.ignore_cache {
            hash_url = with_cache_buster(&hash_url);
            zip_url = with_cache_buster(&zip_url);
        }

        let hash_path = shared.persistent_path(hash_name);
        shared
            .downloader()
            .download(&hash_url, &hash_path, ExpectedIntegrity::default())
            .wait()
            .await?;
        let remote_md5 = tokio::fs::read_to_string(&hash_path).await?.trim().to_owned();

        let zip_path = shared.persistent_path(zip_name);
        let expected = ExpectedIntegrity {
            md5: Some(remote_md5),
            ..ExpectedIntegrity::default()
        };
        shared
            .downloader()
            .download(&zip_url, &zip_path, expected)
            .wait()
            .await?;

        extract_archive(&zip_path, shared.config().persistent_root.clone()).await?;
        read_manifest(&shared.persistent_path(json_name)).await
    }
}

#[async_trait]
impl Provider for PackageProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn provide(&self, _dependencies: &[AsyncOperation]) -> Result<LoadedResource> {
        let shared = self.shared.upgrade().ok_or(Error::Abandoned)?;

        let json_name = manifest_json_name(&self.package, &self.version);
        let zip_name = manifest_zip_name(&self.package, &self.version);
        let hash_name = manifest_hash_name(&self.package, &self.version);

        tokio::fs::create_dir_all(&shared.config().persistent_root).await?;

        let persistent_json = shared.persistent_path(&json_name);
        let mut manifest = None;
        if !self.ignore_cache && persistent_json.is_file() {
            match read_manifest(&persistent_json).await {
                Ok(parsed) => manifest = Some(parsed),
                Err(err) => warn!(
                    "cached manifest '{}' is unreadable, refetching: {}",
                    persistent_json.display(),
                    err
                ),
            }
        }

        let manifest = match manifest {
            Some(manifest) => manifest,
            None => {
                let builtin_zip = shared.builtin_path(&zip_name);
                if !self.ignore_cache && builtin_zip.is_file() {
                    extract_archive(&builtin_zip, shared.config().persistent_root.clone())
                        .await?;
                    read_manifest(&persistent_json).await?
                } else {
                    self.fetch_remote(&shared, &json_name, &zip_name, &hash_name)
                        .await?
                }
            }
        };

        let bundles = manifest.bundle_infos.len();
        let addresses = manifest.address_infos.len();
        shared.add_manifest(manifest)?;
        info!(
            "Registered package {} {} ({} bundles, {} addresses)",
            self.package, self.version, bundles, addresses
        );
        Ok(LoadedResource::Package(self.package.clone()))
    }
}

async fn read_manifest(path: &Path) -> Result<ManifestData> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || ManifestData::read_from_file(&path))
        .await
        .map_err(|err| Error::Manifest(err.to_string()))?
        .map_err(Error::from)
}

async fn extract_archive(archive: &Path, out_dir: PathBuf) -> Result<()> {
    let archive = archive.to_owned();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&out_dir)?;
        Ok(())
    })
    .await
    .map_err(|err| Error::Manifest(err.to_string()))?
}
