use thiserror::Error;

/// An error type for the manifest crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown bundle: {0}")]
    UnknownBundle(String),
    #[error("circular dependency between bundles, through '{0}'")]
    CircularDependency(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
