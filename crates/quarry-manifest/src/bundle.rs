use serde::{Deserialize, Serialize};

/// Description of one built bundle: integrity data, dependency edges and the
/// asset paths it contains or references.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleInfo {
    /// Final content-addressed file name (`<base>_<md5>.<ext>`).
    pub name: String,
    /// MD5 of the bundle file, lowercase hex.
    pub md5: String,
    /// CRC32 of the bundle file.
    pub crc32: u32,
    /// Size of the bundle file in bytes.
    pub size: u64,
    /// Names of bundles this bundle depends on directly.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Transitive dependency closure minus the direct set.
    #[serde(default)]
    pub indirect_dependencies: Vec<String>,
    /// Asset paths embedded in this bundle.
    #[serde(default)]
    pub include_assets: Vec<String>,
    /// Asset paths used by this bundle but owned by another one.
    #[serde(default)]
    pub reference_assets: Vec<String>,
}

impl BundleInfo {
    // sort contents so serialization is deterministic
    pub(crate) fn pre_serialize(&mut self) {
        self.dependencies.sort();
        self.indirect_dependencies.sort();
        self.include_assets.sort();
        self.reference_assets.sort();
    }

    /// Human-readable size, for log lines.
    pub fn human_size(&self) -> String {
        format_size(self.size)
    }
}

/// Format a byte count for display (`640 B`, `2.5 MB`, ..).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
