//! Build-time packing for asset packages.
//!
//! Takes the project's asset groups, decides which bundle each asset lands
//! in (splitting scenes from regular assets and extracting duplicated assets
//! into shared bundles), and generates the package manifest with integrity
//! data, dependency lists and the address table, plus the manifest transport
//! files.
//!
//! The actual archive format is the engine's concern: callers build one
//! archive per [`BundleBuildLayout`] and hand the files back as
//! [`BuiltBundle`]s for manifest generation.

// crate-specific lint exceptions:
//#![allow()]

mod archive;
mod errors;
mod generate;
mod layout;
mod pack;

pub use archive::{write_manifest_files, ManifestFiles};
pub use errors::{Error, Result};
pub use generate::{generate_manifest, AssetDependencyProvider, BuiltBundle, PackageDescription};
pub use layout::{is_scene_asset, AssetGroup, BundleBuildLayout, SCENE_EXTENSION};
pub use pack::{generate_layouts, SHARED_GROUP_ID};
