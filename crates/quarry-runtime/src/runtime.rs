use std::sync::Arc;

use quarry_manifest::ManifestData;
use quarry_net::{DownloadConfig, Downloader, ProgressStatus, Transport};

use crate::registry::RegistryShared;
use crate::{
    AssetHandle, EngineLoader, Error, Result, RuntimeConfig, SceneMode,
};

/// Options used to create an [`AssetRuntime`].
pub struct AssetRuntimeOptions {
    runtime_config: RuntimeConfig,
    download_config: DownloadConfig,
    loader: Option<Arc<dyn EngineLoader>>,
    transport: Option<Arc<dyn Transport>>,
}

impl AssetRuntimeOptions {
    pub fn new() -> Self {
        Self {
            runtime_config: RuntimeConfig::default(),
            download_config: DownloadConfig::default(),
            loader: None,
            transport: None,
        }
    }

    /// Read the `runtime` and `downloader` sections of a configuration.
    pub fn from_config(config: &quarry_config::Config) -> Result<Self> {
        Ok(Self {
            runtime_config: RuntimeConfig::from_config(config)?,
            download_config: config
                .get_or_default("downloader")
                .map_err(|err| Error::Config(err.to_string()))?,
            loader: None,
            transport: None,
        })
    }

    #[must_use]
    pub fn with_runtime_config(mut self, runtime_config: RuntimeConfig) -> Self {
        self.runtime_config = runtime_config;
        self
    }

    #[must_use]
    pub fn with_download_config(mut self, download_config: DownloadConfig) -> Self {
        self.download_config = download_config;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn EngineLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Substitute the transport downloads go through. Mostly useful to tests.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Create the runtime.
    ///
    /// # Errors
    ///
    /// Fails if no engine loader was provided, or if the HTTP transport
    /// cannot be initialized.
    pub fn create(self) -> Result<Arc<AssetRuntime>> {
        let loader = self
            .loader
            .ok_or_else(|| Error::Config("an engine loader is required".to_owned()))?;
        let downloader = match self.transport {
            Some(transport) => Downloader::with_transport(transport, self.download_config),
            None => Downloader::new(self.download_config)?,
        };
        Ok(Arc::new(AssetRuntime {
            shared: Arc::new(RegistryShared::new(loader, downloader, self.runtime_config)),
        }))
    }
}

impl Default for AssetRuntimeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for loading packaged content at runtime.
///
/// A runtime registers package manifests, then hands out [`AssetHandle`]s
/// for addresses, labels and scenes. Loads triggered through the same
/// runtime share a single operation per bundle, asset and scene.
pub struct AssetRuntime {
    shared: Arc<RegistryShared>,
}

impl AssetRuntime {
    /// Fetch and register a package's manifest, returning a handle to the
    /// in-flight registration.
    ///
    /// Resolution prefers the persistent cache, then the builtin directory,
    /// then the remote host. `ignore_cache` forces the remote fetch and adds
    /// a freshness parameter to its URLs. Requesting a package already being
    /// fetched joins that operation.
    pub fn add_package(&self, package: &str, version: &str, ignore_cache: bool) -> AssetHandle {
        AssetHandle::new(self.shared.package_operation(package, version, ignore_cache))
    }

    /// Register a manifest already in memory, bypassing package resolution.
    pub fn register_manifest(&self, manifest: ManifestData) -> Result<()> {
        self.shared.add_manifest(manifest)
    }

    /// Load the asset at `address`. The returned handle holds a claim on the
    /// asset and its bundle chain until released.
    pub fn load_asset(&self, address: &str) -> Result<AssetHandle> {
        Ok(AssetHandle::new(self.shared.asset_operation(address)?))
    }

    /// Load every asset the given keys resolve to, where each key is an
    /// address or a label. The batch payload holds the deduplicated union in
    /// first-mention order.
    pub fn load_assets<S: AsRef<str>>(&self, keys: &[S]) -> Result<AssetHandle> {
        let keys: Vec<String> = keys.iter().map(|key| key.as_ref().to_owned()).collect();
        Ok(AssetHandle::new(self.shared.batch_operation(&keys)?))
    }

    /// Load the scene at `address` and open it in `mode`.
    pub fn load_scene(&self, address: &str, mode: SceneMode) -> Result<AssetHandle> {
        Ok(AssetHandle::new(self.shared.scene_operation(address, mode)?))
    }

    /// Whether any registered manifest maps `key` (an address or label).
    pub fn has_asset(&self, key: &str) -> bool {
        !self.shared.address_rows(key).is_empty()
    }

    /// The registered version of `package`, if any.
    pub fn package_version(&self, package: &str) -> Option<String> {
        self.shared.package_version(package)
    }

    /// Aggregate progress of a handle's operation graph.
    pub fn progress_of(&self, handle: &AssetHandle) -> ProgressStatus {
        handle.progress()
    }

    /// Unload every resolved operation no handle claims anymore. Returns the
    /// number of bundles handed back to the engine for unloading.
    pub fn unload_unused(&self) -> usize {
        self.shared.unload_unused()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use quarry_manifest::{AddressInfo, BundleInfo};
    use quarry_net::FetchResponse;

    use crate::{BundleHandle, LoadedResource};

    use super::*;

    #[derive(Default)]
    struct FakeLoader {
        bundle_loads: Mutex<Vec<String>>,
        asset_loads: Mutex<Vec<String>>,
        scene_loads: Mutex<Vec<(String, SceneMode)>>,
        unloads: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EngineLoader for FakeLoader {
        async fn load_bundle(&self, path: &Path) -> Result<BundleHandle> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.bundle_loads.lock().unwrap().push(name.clone());
            Ok(BundleHandle {
                native: Arc::new(name.clone()),
                name,
            })
        }

        async fn load_asset(
            &self,
            _bundle: &BundleHandle,
            asset_path: &str,
        ) -> Result<Arc<dyn Any + Send + Sync>> {
            self.asset_loads.lock().unwrap().push(asset_path.to_owned());
            Ok(Arc::new(format!("asset:{}", asset_path)))
        }

        async fn load_scene(
            &self,
            _bundle: &BundleHandle,
            scene_path: &str,
            mode: SceneMode,
        ) -> Result<()> {
            self.scene_loads
                .lock()
                .unwrap()
                .push((scene_path.to_owned(), mode));
            Ok(())
        }

        fn unload_bundle(&self, bundle: &BundleHandle) {
            self.unloads.lock().unwrap().push(bundle.name.clone());
        }
    }

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn fetch(
            &self,
            url: &str,
            _offset: Option<u64>,
        ) -> quarry_net::Result<FetchResponse> {
            Err(quarry_net::Error::Transport(format!(
                "unexpected network access: {}",
                url
            )))
        }
    }

    fn address(address: &str, asset_path: &str, labels: &[&str], bundle: &str) -> AddressInfo {
        AddressInfo {
            address: address.to_owned(),
            asset_path: asset_path.to_owned(),
            labels: labels.iter().map(|label| (*label).to_owned()).collect(),
            bundle_name: bundle.to_owned(),
            package_name: "base".to_owned(),
        }
    }

    fn bundle(name: &str, dependencies: &[&str]) -> BundleInfo {
        BundleInfo {
            name: name.to_owned(),
            dependencies: dependencies.iter().map(|dep| (*dep).to_owned()).collect(),
            ..BundleInfo::default()
        }
    }

    fn fixture_manifest() -> ManifestData {
        ManifestData {
            package_name: "base".to_owned(),
            version: "1.0.0".to_owned(),
            load_path: "http://cdn.local/base/1.0.0".to_owned(),
            address_infos: vec![
                address("hero", "art/hero.png", &["ui"], "chars_abc.bundle"),
                address("icon", "art/icon.png", &["ui"], "chars_abc.bundle"),
                address("hub", "levels/hub.scene", &[], "levels_def.bundle"),
            ],
            bundle_infos: vec![
                bundle("chars_abc.bundle", &["shared_eee.bundle"]),
                bundle("shared_eee.bundle", &[]),
                bundle("levels_def.bundle", &[]),
            ],
        }
    }

    /// Runtime over a pre-populated cache, so no test touches the network.
    fn testbed() -> (tempfile::TempDir, Arc<AssetRuntime>, Arc<FakeLoader>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        for name in ["chars_abc.bundle", "shared_eee.bundle", "levels_def.bundle"] {
            std::fs::write(cache.join(name), name.as_bytes()).unwrap();
        }

        let loader = Arc::new(FakeLoader::default());
        let runtime = AssetRuntimeOptions::new()
            .with_runtime_config(RuntimeConfig {
                persistent_root: cache,
                builtin_root: dir.path().join("builtin"),
                host_url: String::new(),
                placeholders: HashMap::new(),
            })
            .with_loader(Arc::clone(&loader) as Arc<dyn EngineLoader>)
            .with_transport(Arc::new(NoTransport))
            .create()
            .unwrap();
        runtime.register_manifest(fixture_manifest()).unwrap();
        (dir, runtime, loader)
    }

    #[tokio::test]
    async fn load_asset_resolves_payload() {
        let (_dir, runtime, _loader) = testbed();

        let handle = runtime.load_asset("hero").unwrap();
        let resource = handle.wait().await.unwrap();
        assert!(matches!(resource, LoadedResource::Asset(_)));
        assert_eq!(
            handle.get_asset::<String>().unwrap().as_str(),
            "asset:art/hero.png"
        );
        assert!(runtime.has_asset("hero"));
        assert!(!runtime.has_asset("nope"));
        handle.release();
    }

    #[tokio::test]
    async fn unknown_address_is_reported() {
        let (_dir, runtime, _loader) = testbed();

        match runtime.load_asset("missing") {
            Err(Error::AddressNotFound(key)) => assert_eq!(key, "missing"),
            other => panic!("expected an address error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn dependencies_load_before_dependents() {
        let (_dir, runtime, loader) = testbed();

        let handle = runtime.load_asset("hero").unwrap();
        handle.wait().await.unwrap();

        let loads = loader.bundle_loads.lock().unwrap().clone();
        assert_eq!(loads, vec!["shared_eee.bundle", "chars_abc.bundle"]);
        handle.release();
    }

    #[tokio::test]
    async fn shared_bundle_loads_once() {
        let (_dir, runtime, loader) = testbed();

        let hero = runtime.load_asset("hero").unwrap();
        let icon = runtime.load_asset("icon").unwrap();
        hero.wait().await.unwrap();
        icon.wait().await.unwrap();

        let loads = loader.bundle_loads.lock().unwrap().clone();
        assert_eq!(
            loads.iter().filter(|n| *n == "chars_abc.bundle").count(),
            1
        );
        assert_eq!(
            loads.iter().filter(|n| *n == "shared_eee.bundle").count(),
            1
        );
        // both assets hang off the very same bundle operation
        assert_eq!(
            hero.operation().dependencies()[0].id(),
            icon.operation().dependencies()[0].id()
        );
        hero.release();
        icon.release();
    }

    #[tokio::test]
    async fn repeated_load_shares_one_operation_and_counts_each_handle() {
        let (_dir, runtime, _loader) = testbed();

        let first = runtime.load_asset("hero").unwrap();
        let second = runtime.load_asset("hero").unwrap();

        assert_eq!(first.operation().id(), second.operation().id());
        // one claim per handle, even though each claim walks the whole
        // dependency tree
        assert_eq!(2, first.operation().ref_count());
        assert_eq!(2, first.operation().dependencies()[0].ref_count());

        first.wait().await.unwrap();
        first.release();
        second.release();
        assert_eq!(2, runtime.unload_unused());
    }

    #[tokio::test]
    async fn sweep_unloads_released_content() {
        let (_dir, runtime, loader) = testbed();

        let handle = runtime.load_asset("hero").unwrap();
        handle.wait().await.unwrap();
        assert_eq!(runtime.unload_unused(), 0);

        handle.release();
        assert_eq!(runtime.unload_unused(), 2);
        let mut unloads = loader.unloads.lock().unwrap().clone();
        unloads.sort();
        assert_eq!(unloads, vec!["chars_abc.bundle", "shared_eee.bundle"]);

        // a fresh load goes through the engine again
        let again = runtime.load_asset("hero").unwrap();
        again.wait().await.unwrap();
        assert_eq!(loader.bundle_loads.lock().unwrap().len(), 4);
        again.release();
    }

    #[tokio::test]
    async fn reload_before_sweep_keeps_content() {
        let (_dir, runtime, loader) = testbed();

        let handle = runtime.load_asset("hero").unwrap();
        handle.wait().await.unwrap();
        handle.release();

        // a new claim lands before any sweep runs
        let again = runtime.load_asset("hero").unwrap();
        assert_eq!(runtime.unload_unused(), 0);
        again.wait().await.unwrap();
        assert_eq!(loader.bundle_loads.lock().unwrap().len(), 2);
        again.release();
    }

    #[tokio::test]
    async fn add_package_hands_back_the_operation() {
        let (_dir, runtime, _loader) = testbed();

        // no blocking: the registration is handed back as an operation
        let handle = runtime.add_package("ghost", "9.9.9", false);
        let joined = runtime.add_package("ghost", "9.9.9", false);
        assert_eq!(handle.operation().id(), joined.operation().id());
        assert!(!handle.is_done());

        // nothing serves the package, so the operation settles failed
        assert!(handle.wait().await.is_err());
        assert!(!handle.succeeded());
        joined.release();
        handle.release();
    }

    #[tokio::test]
    async fn batch_unions_addresses_and_labels() {
        let (_dir, runtime, _loader) = testbed();

        // "ui" labels hero and icon; naming "hero" again must not duplicate
        let handle = runtime.load_assets(&["hero", "ui"]).unwrap();
        let resource = handle.wait().await.unwrap();
        match resource {
            LoadedResource::Assets(assets) => assert_eq!(assets.len(), 2),
            other => panic!("expected an asset batch, got {:?}", other),
        }

        // the same key set joins the cached batch operation
        let again = runtime.load_assets(&["hero", "ui"]).unwrap();
        assert_eq!(handle.operation().id(), again.operation().id());

        match runtime.load_assets(&["hero", "nope"]) {
            Err(Error::AddressNotFound(key)) => assert_eq!(key, "nope"),
            other => panic!("expected an address error, got {:?}", other.map(|_| ())),
        }
        again.release();
        handle.release();
    }

    #[tokio::test]
    async fn label_batch_loads_every_match() {
        let (_dir, runtime, loader) = testbed();

        let handle = runtime.load_assets(&["ui"]).unwrap();
        let resource = handle.wait().await.unwrap();
        match resource {
            LoadedResource::Assets(assets) => assert_eq!(assets.len(), 2),
            other => panic!("expected an asset batch, got {:?}", other),
        }
        let strings = handle.get_assets::<String>();
        assert_eq!(strings.len(), 2);

        // the shared owning bundle still loaded exactly once
        let loads = loader.bundle_loads.lock().unwrap().clone();
        assert_eq!(
            loads.iter().filter(|n| *n == "chars_abc.bundle").count(),
            1
        );
        handle.release();
    }

    #[tokio::test]
    async fn scene_load_reaches_engine() {
        let (_dir, runtime, loader) = testbed();

        let handle = runtime.load_scene("hub", SceneMode::Single).unwrap();
        handle.wait().await.unwrap();

        let scenes = loader.scene_loads.lock().unwrap().clone();
        assert_eq!(scenes, vec![("levels/hub.scene".to_owned(), SceneMode::Single)]);
        handle.release();
    }

    #[tokio::test]
    async fn truncated_cached_bundle_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let builtin = dir.path().join("builtin");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&builtin).unwrap();

        let payload = b"the whole levels bundle";
        std::fs::write(builtin.join("levels_def.bundle"), payload).unwrap();
        // a torn write left a short file in the cache
        std::fs::write(cache.join("levels_def.bundle"), &payload[..5]).unwrap();

        let loader = Arc::new(FakeLoader::default());
        let runtime = AssetRuntimeOptions::new()
            .with_runtime_config(RuntimeConfig {
                persistent_root: cache.clone(),
                builtin_root: builtin,
                host_url: String::new(),
                placeholders: HashMap::new(),
            })
            .with_loader(Arc::clone(&loader) as Arc<dyn EngineLoader>)
            .with_transport(Arc::new(NoTransport))
            .create()
            .unwrap();
        runtime
            .register_manifest(ManifestData {
                package_name: "base".to_owned(),
                version: "1.0.0".to_owned(),
                load_path: String::new(),
                address_infos: vec![address("hub", "levels/hub.scene", &[], "levels_def.bundle")],
                bundle_infos: vec![BundleInfo {
                    name: "levels_def.bundle".to_owned(),
                    size: payload.len() as u64,
                    ..BundleInfo::default()
                }],
            })
            .unwrap();

        let handle = runtime.load_scene("hub", SceneMode::Single).unwrap();
        handle.wait().await.unwrap();

        // the stale file was replaced by the builtin copy before loading
        assert_eq!(
            payload.to_vec(),
            std::fs::read(cache.join("levels_def.bundle")).unwrap()
        );
        handle.release();
    }

    #[tokio::test]
    async fn package_replacement_rules() {
        let (_dir, runtime, _loader) = testbed();

        // re-registering the same version is a no-op
        runtime.register_manifest(fixture_manifest()).unwrap();
        assert_eq!(runtime.package_version("base").as_deref(), Some("1.0.0"));

        let handle = runtime.load_asset("hero").unwrap();
        handle.wait().await.unwrap();

        let mut v2 = fixture_manifest();
        v2.version = "2.0.0".to_owned();
        v2.address_infos.retain(|row| row.address != "hero");
        match runtime.register_manifest(v2.clone()) {
            Err(Error::PackageInUse(name)) => assert_eq!(name, "base"),
            other => panic!("expected package-in-use, got {:?}", other),
        }

        handle.release();
        runtime.unload_unused();
        runtime.register_manifest(v2).unwrap();
        assert_eq!(runtime.package_version("base").as_deref(), Some("2.0.0"));
        assert!(!runtime.has_asset("hero"));
        assert!(runtime.has_asset("icon"));
    }

    #[tokio::test]
    async fn progress_of_cached_load_is_complete() {
        let (_dir, runtime, _loader) = testbed();

        let handle = runtime.load_asset("hero").unwrap();
        handle.wait().await.unwrap();

        let progress = runtime.progress_of(&handle);
        assert!(progress.is_valid);
        assert!((progress.percent - 1.0).abs() < f32::EPSILON);
        handle.release();
    }
}
