//! Providers give [`crate::AsyncOperation`]s their behavior: one provider
//! type per kind of load the registry performs.

mod asset;
mod batch;
mod bundle;
mod package;
mod scene;

pub(crate) use asset::AssetProvider;
pub(crate) use batch::BatchProvider;
pub(crate) use bundle::BundleProvider;
pub(crate) use package::PackageProvider;
pub(crate) use scene::SceneProvider;

use crate::{AsyncOperation, BundleHandle, Error, LoadedResource, Result};

/// The bundle payload of an operation's first dependency.
pub(crate) fn bundle_payload(dependencies: &[AsyncOperation]) -> Result<BundleHandle> {
    match dependencies.first().and_then(AsyncOperation::payload) {
        Some(LoadedResource::Bundle(handle)) => Ok(handle),
        _ => Err(Error::Loader(
            "operation is missing its bundle dependency".to_owned(),
        )),
    }
}
