//! The runtime registry: manifest tables plus the cache of live operations.
//!
//! One [`RegistryShared`] sits behind every [`crate::AssetRuntime`]. It maps
//! addresses and labels to manifest rows, creates load operations on demand
//! and guarantees single-flight semantics: while an operation for a given
//! bundle, asset, batch or scene is cached, every request for it joins that
//! operation instead of spawning another.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use quarry_manifest::{AddressInfo, BundleInfo, DependencyResolver, ManifestData};
use quarry_net::Downloader;

use crate::providers::{
    AssetProvider, BatchProvider, BundleProvider, PackageProvider, SceneProvider,
};
use crate::{
    AsyncOperation, EngineLoader, Error, LoadedResource, OperationStatus, Result, RuntimeConfig,
    SceneMode, UrlBuilder,
};

/// One bundle row plus the package context needed to locate its file.
#[derive(Debug, Clone)]
pub(crate) struct BundleRecord {
    pub(crate) info: BundleInfo,
    pub(crate) package: String,
    pub(crate) version: String,
    pub(crate) load_path: String,
}

#[derive(Debug, Clone)]
struct PackageRecord {
    version: String,
    bundle_names: Vec<String>,
    address_keys: Vec<String>,
}

#[derive(Default)]
struct Tables {
    /// Address rows, keyed by address and by each label.
    addresses: HashMap<String, Vec<AddressInfo>>,
    bundles: HashMap<String, BundleRecord>,
    packages: HashMap<String, PackageRecord>,
    package_ops: HashMap<String, AsyncOperation>,
    bundle_ops: HashMap<String, AsyncOperation>,
    asset_ops: HashMap<String, AsyncOperation>,
    batch_ops: HashMap<String, AsyncOperation>,
    scene_ops: HashMap<String, AsyncOperation>,
}

pub(crate) struct RegistryShared {
    loader: Arc<dyn EngineLoader>,
    downloader: Downloader,
    config: RuntimeConfig,
    url_builder: UrlBuilder,
    next_op_id: AtomicU64,
    tables: Mutex<Tables>,
}

impl RegistryShared {
    pub(crate) fn new(
        loader: Arc<dyn EngineLoader>,
        downloader: Downloader,
        config: RuntimeConfig,
    ) -> Self {
        let url_builder = UrlBuilder::new(config.host_url.clone(), config.placeholders.clone());
        Self {
            loader,
            downloader,
            config,
            url_builder,
            next_op_id: AtomicU64::new(1),
            tables: Mutex::new(Tables::default()),
        }
    }

    pub(crate) fn loader(&self) -> &Arc<dyn EngineLoader> {
        &self.loader
    }

    pub(crate) fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn persistent_path(&self, file: &str) -> PathBuf {
        self.config.persistent_root.join(file)
    }

    pub(crate) fn builtin_path(&self, file: &str) -> PathBuf {
        self.config.builtin_root.join(file)
    }

    /// Remote base URL for a package: the configured host template when one
    /// is set, otherwise the load path its manifest recorded.
    pub(crate) fn remote_base(
        &self,
        package: &str,
        version: &str,
        load_path: &str,
    ) -> Result<String> {
        if !self.url_builder.is_empty() {
            return self.url_builder.base_for(package, version);
        }
        if !load_path.is_empty() {
            return Ok(load_path.trim_end_matches('/').to_owned());
        }
        Err(Error::Config(format!(
            "no host url is configured and package '{}' records no load path",
            package
        )))
    }

    pub(crate) fn address_rows(&self, key: &str) -> Vec<AddressInfo> {
        self.tables
            .lock()
            .unwrap()
            .addresses
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn package_version(&self, package: &str) -> Option<String> {
        self.tables
            .lock()
            .unwrap()
            .packages
            .get(package)
            .map(|record| record.version.clone())
    }

    /// Install a manifest's rows into the tables.
    ///
    /// Re-registering the version already installed is a no-op. A different
    /// version replaces the package, but only while none of its bundles has
    /// a live operation.
    pub(crate) fn add_manifest(&self, manifest: ManifestData) -> Result<()> {
        DependencyResolver::new(&manifest.bundle_infos).detect_cycles()?;

        let mut tables = self.tables.lock().unwrap();

        if let Some(previous) = tables.packages.get(&manifest.package_name).cloned() {
            if previous.version == manifest.version {
                debug!(
                    "package '{}' {} is already registered",
                    manifest.package_name, manifest.version
                );
                return Ok(());
            }
            let in_use = previous
                .bundle_names
                .iter()
                .any(|name| tables.bundle_ops.contains_key(name));
            if in_use {
                return Err(Error::PackageInUse(manifest.package_name.clone()));
            }
            info!(
                "replacing package '{}' {} with {}",
                manifest.package_name, previous.version, manifest.version
            );
            for name in &previous.bundle_names {
                tables.bundles.remove(name);
            }
            for key in &previous.address_keys {
                let emptied = if let Some(rows) = tables.addresses.get_mut(key) {
                    rows.retain(|row| row.package_name != manifest.package_name);
                    rows.is_empty()
                } else {
                    false
                };
                if emptied {
                    tables.addresses.remove(key);
                }
            }
        }

        let mut bundle_names = Vec::with_capacity(manifest.bundle_infos.len());
        for info in &manifest.bundle_infos {
            bundle_names.push(info.name.clone());
            tables.bundles.insert(
                info.name.clone(),
                BundleRecord {
                    info: info.clone(),
                    package: manifest.package_name.clone(),
                    version: manifest.version.clone(),
                    load_path: manifest.load_path.clone(),
                },
            );
        }

        let mut address_keys = Vec::new();
        for row in &manifest.address_infos {
            let mut keys = Vec::with_capacity(1 + row.labels.len());
            keys.push(row.address.clone());
            keys.extend(row.labels.iter().cloned());
            for key in keys {
                tables
                    .addresses
                    .entry(key.clone())
                    .or_default()
                    .push(row.clone());
                address_keys.push(key);
            }
        }

        tables.packages.insert(
            manifest.package_name.clone(),
            PackageRecord {
                version: manifest.version.clone(),
                bundle_names,
                address_keys,
            },
        );
        Ok(())
    }

    /// A cached operation is joined unless it failed; failed operations are
    /// replaced so the load can be retried.
    fn cached_op(ops: &HashMap<String, AsyncOperation>, key: &str) -> Option<AsyncOperation> {
        ops.get(key)
            .filter(|op| op.status() != OperationStatus::Failed)
            .cloned()
    }

    pub(crate) fn package_operation(
        self: &Arc<Self>,
        package: &str,
        version: &str,
        ignore_cache: bool,
    ) -> AsyncOperation {
        let key = format!("{}@{}", package, version);
        {
            let tables = self.tables.lock().unwrap();
            if let Some(op) = Self::cached_op(&tables.package_ops, &key) {
                return op;
            }
        }

        let provider =
            PackageProvider::new(self, package.to_owned(), version.to_owned(), ignore_cache);
        let op = AsyncOperation::new(self.next_id(), Box::new(provider), Vec::new());

        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = Self::cached_op(&tables.package_ops, &key) {
            return existing;
        }
        tables.package_ops.insert(key, op.clone());
        drop(tables);
        op.start();
        op
    }

    pub(crate) fn bundle_operation(self: &Arc<Self>, name: &str) -> Result<AsyncOperation> {
        {
            let tables = self.tables.lock().unwrap();
            if let Some(op) = Self::cached_op(&tables.bundle_ops, name) {
                return Ok(op);
            }
        }
        let record = {
            let tables = self.tables.lock().unwrap();
            tables
                .bundles
                .get(name)
                .cloned()
                .ok_or_else(|| Error::BundleNotFound(name.to_owned()))?
        };

        // dependency operations first, without holding the lock; the graph
        // is acyclic by manifest validation
        let mut dependencies = Vec::with_capacity(record.info.dependencies.len());
        for dep_name in &record.info.dependencies {
            dependencies.push(self.bundle_operation(dep_name)?);
        }

        let provider = BundleProvider::new(self, record);
        let op = AsyncOperation::new(self.next_id(), Box::new(provider), dependencies);

        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = Self::cached_op(&tables.bundle_ops, name) {
            return Ok(existing);
        }
        tables.bundle_ops.insert(name.to_owned(), op.clone());
        drop(tables);
        op.start();
        Ok(op)
    }

    pub(crate) fn asset_operation(self: &Arc<Self>, key: &str) -> Result<AsyncOperation> {
        {
            let tables = self.tables.lock().unwrap();
            if let Some(op) = Self::cached_op(&tables.asset_ops, key) {
                return Ok(op);
            }
        }
        let Some(row) = self.address_rows(key).into_iter().next() else {
            return Err(Error::AddressNotFound(key.to_owned()));
        };

        let bundle_op = self.bundle_operation(&row.bundle_name)?;
        let provider = AssetProvider::new(self, row);
        let op = AsyncOperation::new(self.next_id(), Box::new(provider), vec![bundle_op]);

        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = Self::cached_op(&tables.asset_ops, key) {
            return Ok(existing);
        }
        tables.asset_ops.insert(key.to_owned(), op.clone());
        drop(tables);
        op.start();
        Ok(op)
    }

    /// Each key is an address or a label; the batch is the deduplicated
    /// union of every asset they resolve to, in first-mention order.
    pub(crate) fn batch_operation(self: &Arc<Self>, keys: &[String]) -> Result<AsyncOperation> {
        let cache_key = keys.join("\n");
        {
            let tables = self.tables.lock().unwrap();
            if let Some(op) = Self::cached_op(&tables.batch_ops, &cache_key) {
                return Ok(op);
            }
        }

        let mut addresses = Vec::new();
        for key in keys {
            let rows = self.address_rows(key);
            if rows.is_empty() {
                return Err(Error::AddressNotFound(key.clone()));
            }
            for row in rows {
                if !addresses.contains(&row.address) {
                    addresses.push(row.address);
                }
            }
        }

        let mut dependencies = Vec::with_capacity(addresses.len());
        for address in &addresses {
            dependencies.push(self.asset_operation(address)?);
        }

        let provider = BatchProvider::new(keys);
        let op = AsyncOperation::new(self.next_id(), Box::new(provider), dependencies);

        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = Self::cached_op(&tables.batch_ops, &cache_key) {
            return Ok(existing);
        }
        tables.batch_ops.insert(cache_key, op.clone());
        drop(tables);
        op.start();
        Ok(op)
    }

    pub(crate) fn scene_operation(
        self: &Arc<Self>,
        key: &str,
        mode: SceneMode,
    ) -> Result<AsyncOperation> {
        let mode_key = match mode {
            SceneMode::Single => "single",
            SceneMode::Additive => "additive",
        };
        let cache_key = format!("{}#{}", key, mode_key);
        {
            let tables = self.tables.lock().unwrap();
            if let Some(op) = Self::cached_op(&tables.scene_ops, &cache_key) {
                return Ok(op);
            }
        }
        let Some(row) = self.address_rows(key).into_iter().next() else {
            return Err(Error::AddressNotFound(key.to_owned()));
        };

        let bundle_op = self.bundle_operation(&row.bundle_name)?;
        let provider = SceneProvider::new(self, row, mode);
        let op = AsyncOperation::new(self.next_id(), Box::new(provider), vec![bundle_op]);

        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = Self::cached_op(&tables.scene_ops, &cache_key) {
            return Ok(existing);
        }
        tables.scene_ops.insert(cache_key, op.clone());
        drop(tables);
        op.start();
        Ok(op)
    }

    /// Advisory sweep: flag every resolved, unreferenced operation, drop the
    /// flagged ones from the caches and unload their engine bundles. Returns
    /// how many bundles were unloaded.
    pub(crate) fn unload_unused(&self) -> usize {
        let mut tables = self.tables.lock().unwrap();

        for op in tables
            .asset_ops
            .values()
            .chain(tables.batch_ops.values())
            .chain(tables.scene_ops.values())
            .chain(tables.bundle_ops.values())
            .chain(tables.package_ops.values())
        {
            op.mark_unloadable();
        }

        tables.batch_ops.retain(|_, op| !op.can_unload());
        tables.scene_ops.retain(|_, op| !op.can_unload());
        tables.asset_ops.retain(|_, op| !op.can_unload());
        tables.package_ops.retain(|_, op| !op.can_unload());

        let mut unloaded = 0;
        tables.bundle_ops.retain(|name, op| {
            if !op.can_unload() {
                return true;
            }
            if let Some(LoadedResource::Bundle(handle)) = op.payload() {
                self.loader.unload_bundle(&handle);
            }
            debug!("unloaded bundle '{}'", name);
            unloaded += 1;
            false
        });
        unloaded
    }
}
