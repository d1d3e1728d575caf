use std::path::Path;

/// File extension marking scene assets. Scene bundles cannot mix with
/// ordinary assets, so the packer splits them out per group.
pub const SCENE_EXTENSION: &str = "scene";

/// One logical group of source assets, as prepared by the external
/// asset-dependency collaborator: the asset list is already flattened,
/// deduplicated, sorted and recursively dependency-expanded.
#[derive(Debug, Clone, Default)]
pub struct AssetGroup {
    /// Group name; layout names derive from it.
    pub name: String,
    /// Inactive groups are skipped entirely.
    pub active: bool,
    /// Whether this group's bundles ship inside the application image.
    pub copy_to_streaming: bool,
    /// Labels applied to every address this group produces.
    pub labels: Vec<String>,
    /// Member asset paths.
    pub assets: Vec<String>,
}

/// One bundle to be written by the external archive writer.
///
/// `group_id` is the originating group's name, or `"shared"` for the layouts
/// produced by the duplicate-asset pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleBuildLayout {
    pub bundle_name: String,
    pub group_id: String,
    pub all_referenced_assets: Vec<String>,
    pub copy_to_local_streaming: bool,
    pub is_scene_bundle: bool,
}

/// Whether a path is a scene asset.
pub fn is_scene_asset(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map_or(false, |ext| ext == SCENE_EXTENSION)
}
