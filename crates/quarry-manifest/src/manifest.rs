use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AddressInfo, BundleInfo, Result};

/// The serialized description of one package: its address table and bundle
/// set, produced once per build and consumed at runtime.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ManifestData {
    pub package_name: String,
    pub version: String,
    /// Remote base URL template; may contain `{placeholder}` segments
    /// resolved at runtime.
    pub load_path: String,
    pub address_infos: Vec<AddressInfo>,
    pub bundle_infos: Vec<BundleInfo>,
}

impl ManifestData {
    // sort contents so serialization is deterministic
    fn pre_serialize(&mut self) {
        self.address_infos.sort_by(|a, b| a.address.cmp(&b.address));
        self.bundle_infos.sort_by(|a, b| a.name.cmp(&b.name));
        for bundle in &mut self.bundle_infos {
            bundle.pre_serialize();
        }
    }

    /// Serialize to pretty-printed JSON with deterministic ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&mut self) -> Result<Vec<u8>> {
        self.pre_serialize();
        let mut buffer = vec![];
        serde_json::to_writer_pretty(&mut buffer, &self)?;
        Ok(buffer)
    }

    /// Write the manifest as JSON to the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_to_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Parse a manifest from a JSON reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid manifest.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Look up a bundle by final name.
    pub fn bundle(&self, name: &str) -> Option<&BundleInfo> {
        self.bundle_infos.iter().find(|b| b.name == name)
    }
}

/// `Manifest_<package>_<version>.json` — the manifest payload.
pub fn manifest_json_name(package: &str, version: &str) -> String {
    format!("Manifest_{}_{}.json", package, version)
}

/// `Manifest_<package>_<version>.zip` — archive containing the JSON payload.
pub fn manifest_zip_name(package: &str, version: &str) -> String {
    format!("Manifest_{}_{}.zip", package, version)
}

/// `Manifest_<package>_<version>.hash` — text file holding the MD5 of the
/// `.zip`.
pub fn manifest_hash_name(package: &str, version: &str) -> String {
    format!("Manifest_{}_{}.hash", package, version)
}

/// Content-addressed bundle file name: the digest is spliced in before the
/// extension so changed content naturally produces a new name.
pub fn bundle_file_name(base: &str, md5: &str) -> String {
    match base.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, md5, ext),
        None => format!("{}_{}", base, md5),
    }
}
