//! Bundle layout packing.
//!
//! Turns asset groups into bundle layouts: one layout per group (scenes split
//! out), then a deduplication pass that moves any asset referenced by two or
//! more layouts into a shared bundle grouped by common path prefix. Every
//! asset ends up in exactly one layout.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use tracing::{info, warn};

use crate::{is_scene_asset, AssetGroup, BundleBuildLayout};

/// Group id assigned to the layouts created by the duplicate-asset pass.
pub const SHARED_GROUP_ID: &str = "shared";

/// Compute the bundle layouts for a set of asset groups.
///
/// Inactive groups are skipped. Per active group, non-scene assets go to a
/// `"{group}_asset"` layout and scene assets to a `"{group}"` layout flagged
/// as a scene bundle. Assets appearing in two or more layouts are then pulled
/// into `share_*` layouts partitioned by common path prefix; share layouts
/// always copy to local streaming. A layout emptied by the dedup pass is
/// dropped.
pub fn generate_layouts(groups: &[AssetGroup]) -> Vec<BundleBuildLayout> {
    let start = Instant::now();

    let mut layouts = Vec::new();
    for group in groups.iter().filter(|g| g.active) {
        let (scenes, assets): (Vec<&String>, Vec<&String>) = group
            .assets
            .iter()
            .partition(|path| is_scene_asset(path));

        if !assets.is_empty() {
            layouts.push(BundleBuildLayout {
                bundle_name: format!("{}_asset", group.name),
                group_id: group.name.clone(),
                all_referenced_assets: assets.into_iter().cloned().collect(),
                copy_to_local_streaming: group.copy_to_streaming,
                is_scene_bundle: false,
            });
        }
        if !scenes.is_empty() {
            layouts.push(BundleBuildLayout {
                bundle_name: group.name.clone(),
                group_id: group.name.clone(),
                all_referenced_assets: scenes.into_iter().cloned().collect(),
                copy_to_local_streaming: group.copy_to_streaming,
                is_scene_bundle: true,
            });
        }
    }

    let shared = extract_shared_layouts(&mut layouts);

    layouts.retain(|layout| {
        if layout.all_referenced_assets.is_empty() {
            warn!(
                "layout '{}' is empty after deduplication, dropping it",
                layout.bundle_name
            );
            false
        } else {
            true
        }
    });
    layouts.extend(shared);

    info!(
        "Packing {} groups Ended: {} layouts ({}ms)",
        groups.len(),
        layouts.len(),
        start.elapsed().as_millis()
    );
    layouts
}

/// Remove every asset referenced by two or more layouts and regroup those
/// assets into `share_*` layouts by common path prefix.
fn extract_shared_layouts(layouts: &mut [BundleBuildLayout]) -> Vec<BundleBuildLayout> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for layout in layouts.iter() {
        for asset in &layout.all_referenced_assets {
            *counts.entry(asset.as_str()).or_default() += 1;
        }
    }

    let mut remaining: BTreeSet<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(asset, _)| asset.to_owned())
        .collect();
    if remaining.is_empty() {
        return Vec::new();
    }

    for layout in layouts.iter_mut() {
        layout
            .all_referenced_assets
            .retain(|asset| !remaining.contains(asset));
    }

    let mut shared = Vec::new();
    while let Some(first) = remaining.iter().next().cloned() {
        let prefix = share_prefix(&first, &remaining);
        let members: Vec<String> = remaining
            .iter()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect();
        for member in &members {
            remaining.remove(member);
        }

        shared.push(BundleBuildLayout {
            bundle_name: format!("share_{}", prefix.replace('/', "_")),
            group_id: SHARED_GROUP_ID.to_owned(),
            all_referenced_assets: members,
            copy_to_local_streaming: true,
            is_scene_bundle: false,
        });
    }
    shared
}

/// Greedily extend a candidate prefix directory-by-directory while at least
/// two remaining paths share it; fall back to the path's own parent-directory
/// keyword when no level reaches two. The current path always matches its own
/// keyword, so each share group removes at least one path.
fn share_prefix(path: &str, remaining: &BTreeSet<String>) -> String {
    let keyword = match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_owned(),
        None => path.to_owned(),
    };

    let mut candidate: Option<String> = None;
    let mut acc = String::new();
    for part in keyword.split('/') {
        if acc.is_empty() {
            acc.push_str(part);
        } else {
            acc.push('/');
            acc.push_str(part);
        }
        let matches = remaining.iter().filter(|p| p.starts_with(&acc)).count();
        if matches >= 2 {
            candidate = Some(acc.clone());
        } else {
            break;
        }
    }

    candidate.unwrap_or(keyword)
}
