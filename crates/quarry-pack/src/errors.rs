use thiserror::Error;

/// An error type for the packing crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] quarry_manifest::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("no built archive was provided for layout '{0}'")]
    MissingBuiltBundle(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
