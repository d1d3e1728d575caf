use serde::{Deserialize, Serialize};

/// A row of the address table: one logical name a caller can load by.
///
/// The address is unique within its package; labels are shared tags used for
/// batch lookup, so a label resolves to a list of `AddressInfo`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressInfo {
    /// Stable logical name, assigned at build time.
    pub address: String,
    /// Engine-internal path of the source asset.
    pub asset_path: String,
    /// Zero or more tags for batch lookup.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Name of the bundle that owns the asset.
    pub bundle_name: String,
    /// Name of the package this row belongs to.
    pub package_name: String,
}
