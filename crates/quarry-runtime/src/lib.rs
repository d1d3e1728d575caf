//! Runtime loading of packaged game content.
//!
//! An [`AssetRuntime`] resolves package manifests (from the persistent cache,
//! a builtin directory or a remote host), downloads bundles on demand and
//! loads assets, labeled batches and scenes through an engine-provided
//! [`EngineLoader`]. Every load is an [`AsyncOperation`] in a dependency
//! graph; identical requests join the same operation, and reference counts
//! on handles drive the [`AssetRuntime::unload_unused`] sweep.

// crate-specific lint exceptions:
//#![allow()]

mod config;
mod errors;
mod handle;
mod host;
mod loader;
mod operation;
mod providers;
mod registry;
mod runtime;

pub use config::RuntimeConfig;
pub use errors::{Error, Result};
pub use handle::AssetHandle;
pub use host::UrlBuilder;
pub use loader::{BundleHandle, EngineLoader, SceneMode};
pub use operation::{AsyncOperation, LoadedResource, OperationStatus, Provider};
pub use quarry_net::{DownloadConfig, ProgressStatus};
pub use runtime::{AssetRuntime, AssetRuntimeOptions};
