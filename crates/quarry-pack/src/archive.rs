//! Manifest archive emission.
//!
//! A published package is described by three sibling files: the manifest
//! json, a zip archive wrapping that json for transport, and a text file
//! holding the archive's MD5 digest so clients can validate the download
//! before unpacking it.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::{FileOptions, ZipWriter};

use quarry_manifest::{
    checksum, manifest_hash_name, manifest_json_name, manifest_zip_name, ManifestData,
};

use crate::Result;

/// Paths of the three files written for a package manifest.
#[derive(Debug, Clone)]
pub struct ManifestFiles {
    pub json_path: PathBuf,
    pub zip_path: PathBuf,
    pub hash_path: PathBuf,
}

/// Write the manifest triplet (`.json`, `.zip`, `.hash`) into `out_dir`.
///
/// # Errors
///
/// Fails on serialization or filesystem errors.
pub fn write_manifest_files(manifest: &mut ManifestData, out_dir: &Path) -> Result<ManifestFiles> {
    let json_name = manifest_json_name(&manifest.package_name, &manifest.version);
    let zip_name = manifest_zip_name(&manifest.package_name, &manifest.version);
    let hash_name = manifest_hash_name(&manifest.package_name, &manifest.version);

    let json_path = out_dir.join(&json_name);
    let zip_path = out_dir.join(&zip_name);
    let hash_path = out_dir.join(&hash_name);

    let json = manifest.to_json()?;
    std::fs::write(&json_path, &json)?;

    let mut writer = ZipWriter::new(std::fs::File::create(&zip_path)?);
    writer.start_file(json_name, FileOptions::default())?;
    writer.write_all(&json)?;
    writer.finish()?;

    let digest = checksum::md5_file(&zip_path)?;
    std::fs::write(&hash_path, &digest)?;

    info!(
        "Wrote manifest for {} {} to {}",
        manifest.package_name,
        manifest.version,
        out_dir.display()
    );

    Ok(ManifestFiles {
        json_path,
        zip_path,
        hash_path,
    })
}
