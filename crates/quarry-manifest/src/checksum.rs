//! Content checksums used for bundle and manifest integrity.
//!
//! All digests are rendered as lowercase hex, matching the values embedded
//! in manifest files and content-addressed bundle names.

use std::io::Read;
use std::path::Path;

use crc::{Crc, CRC_32_ISO_HDLC};
use md5::{Digest, Md5};

use crate::Result;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// CRC32 of a byte slice.
pub fn crc32_bytes(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// CRC32 of a file's contents, read in chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn crc32_file(path: impl AsRef<Path>) -> Result<u32> {
    let mut file = std::fs::File::open(path)?;
    let mut digest = CRC32.digest();
    let mut buffer = vec![0_u8; READ_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(digest.finalize())
}

/// MD5 of a byte slice, as lowercase hex.
pub fn md5_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// MD5 of a file's contents, as lowercase hex, read in chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn md5_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0_u8; READ_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
