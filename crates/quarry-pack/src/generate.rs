//! Manifest generation.
//!
//! Consumes the packed layouts plus the archive writer's output files and
//! produces the package manifest: integrity data per bundle, direct and
//! indirect dependency lists, include/reference asset lists and the address
//! table. Bundle files are renamed to their content-addressed form here.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use quarry_manifest::{
    bundle_file_name, checksum, AddressInfo, BundleInfo, DependencyResolver, ManifestData,
};

use crate::{AssetGroup, BundleBuildLayout, Error, Result};

/// Asset-graph collaborator: expands asset paths to the full set of paths
/// they reference. The result is sorted and may include the input paths
/// themselves; the generator subtracts a bundle's own assets.
pub trait AssetDependencyProvider {
    fn expand(&self, paths: &[String], recursive: bool) -> Vec<String>;
}

/// One archive produced by the external archive writer.
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    pub layout_name: String,
    pub path: PathBuf,
}

/// Identity of the package being generated.
#[derive(Debug, Clone, Copy)]
pub struct PackageDescription<'a> {
    pub package_name: &'a str,
    pub version: &'a str,
    /// Remote base URL template recorded into the manifest.
    pub load_path: &'a str,
}

struct LayoutRecord<'a> {
    layout: &'a BundleBuildLayout,
    final_name: String,
    md5: String,
    crc32: u32,
    size: u64,
    reference_assets: Vec<String>,
}

/// Generate the manifest for a built package.
///
/// `groups` and `layouts` are the packer's input and output; `built` maps
/// each layout to the archive file written for it. Bundle files are renamed
/// in place to `<base>_<md5>.<ext>` and every name recorded in the manifest
/// refers to the renamed file.
///
/// # Errors
///
/// Fails if a layout has no built archive, a bundle file cannot be read or
/// renamed, or the resulting dependency graph is cyclic. Per-item structural
/// problems (an address collision, a reference to an asset no bundle owns)
/// are logged and skipped instead.
pub fn generate_manifest(
    desc: &PackageDescription<'_>,
    groups: &[AssetGroup],
    layouts: &[BundleBuildLayout],
    built: &[BuiltBundle],
    deps: &dyn AssetDependencyProvider,
) -> Result<ManifestData> {
    let start = Instant::now();

    let built_by_layout: HashMap<&str, &Path> = built
        .iter()
        .map(|b| (b.layout_name.as_str(), b.path.as_path()))
        .collect();

    // which layout owns each asset; unique by the packer's guarantee
    let mut owner: HashMap<&str, &str> = HashMap::new();
    for layout in layouts {
        for asset in &layout.all_referenced_assets {
            owner.insert(asset.as_str(), layout.bundle_name.as_str());
        }
    }

    let mut records: Vec<LayoutRecord<'_>> = Vec::with_capacity(layouts.len());
    let mut direct_edges: HashMap<String, Vec<String>> = HashMap::new();

    for layout in layouts {
        let path = built_by_layout
            .get(layout.bundle_name.as_str())
            .ok_or_else(|| Error::MissingBuiltBundle(layout.bundle_name.clone()))?;

        let md5 = checksum::md5_file(path)?;
        let crc32 = checksum::crc32_file(path)?;
        let size = std::fs::metadata(path)?.len();

        let file_name = path
            .file_name()
            .map_or_else(|| layout.bundle_name.clone(), |n| n.to_string_lossy().into_owned());
        let final_name = bundle_file_name(&file_name, &md5);
        std::fs::rename(path, path.with_file_name(&final_name))?;

        let include: BTreeSet<&str> = layout
            .all_referenced_assets
            .iter()
            .map(String::as_str)
            .collect();
        let mut reference_assets = Vec::new();
        let mut direct: BTreeSet<String> = BTreeSet::new();
        for asset in deps.expand(&layout.all_referenced_assets, true) {
            if include.contains(asset.as_str()) {
                continue;
            }
            match owner.get(asset.as_str()) {
                Some(owning) => {
                    reference_assets.push(asset.clone());
                    direct.insert((*owning).to_owned());
                }
                None => warn!(
                    "asset '{}' referenced by '{}' is not owned by any bundle, skipping",
                    asset, layout.bundle_name
                ),
            }
        }
        reference_assets.sort();
        direct_edges.insert(layout.bundle_name.clone(), direct.into_iter().collect());

        records.push(LayoutRecord {
            layout,
            final_name,
            md5,
            crc32,
            size,
            reference_assets,
        });
    }

    let resolver = DependencyResolver::from_edges(direct_edges);
    resolver.detect_cycles()?;

    let final_names: HashMap<&str, &str> = records
        .iter()
        .map(|r| (r.layout.bundle_name.as_str(), r.final_name.as_str()))
        .collect();
    let rename = |logical: &str| -> String {
        // closure targets are always layout names recorded above
        (*final_names.get(logical).unwrap()).to_owned()
    };

    let mut bundle_infos = Vec::with_capacity(records.len());
    for record in &records {
        let logical = record.layout.bundle_name.as_str();
        let direct = resolver.closure(logical, false)?;
        let indirect = resolver.indirect(logical)?;

        bundle_infos.push(BundleInfo {
            name: record.final_name.clone(),
            md5: record.md5.clone(),
            crc32: record.crc32,
            size: record.size,
            dependencies: direct.iter().map(|d| rename(d)).collect(),
            indirect_dependencies: indirect.iter().map(|d| rename(d)).collect(),
            include_assets: record.layout.all_referenced_assets.clone(),
            reference_assets: record.reference_assets.clone(),
        });
    }

    let mut address_infos = Vec::new();
    let mut seen_addresses: BTreeSet<String> = BTreeSet::new();
    for group in groups.iter().filter(|g| g.active) {
        for asset in &group.assets {
            let Some(owning) = owner.get(asset.as_str()) else {
                warn!("asset '{}' of group '{}' landed in no layout, skipping", asset, group.name);
                continue;
            };
            let address = address_of(asset);
            if !seen_addresses.insert(address.clone()) {
                warn!(
                    "duplicate address '{}' for '{}', keeping the first entry",
                    address, asset
                );
                continue;
            }
            address_infos.push(AddressInfo {
                address,
                asset_path: asset.clone(),
                labels: group.labels.clone(),
                bundle_name: rename(owning),
                package_name: desc.package_name.to_owned(),
            });
        }
    }

    info!(
        "Manifest generation for {} {} Ended: {} bundles, {} addresses ({}ms)",
        desc.package_name,
        desc.version,
        bundle_infos.len(),
        address_infos.len(),
        start.elapsed().as_millis()
    );

    Ok(ManifestData {
        package_name: desc.package_name.to_owned(),
        version: desc.version.to_owned(),
        load_path: desc.load_path.to_owned(),
        address_infos,
        bundle_infos,
    })
}

/// The address assigned to an asset: its file stem.
fn address_of(asset: &str) -> String {
    Path::new(asset)
        .file_stem()
        .map_or_else(|| asset.to_owned(), |stem| stem.to_string_lossy().into_owned())
}
