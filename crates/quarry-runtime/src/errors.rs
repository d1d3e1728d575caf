use thiserror::Error;

/// Runtime load failures.
///
/// `Clone` so one failed operation can hand its error to every handle and
/// dependent operation observing it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("address '{0}' is not registered")]
    AddressNotFound(String),

    #[error("bundle '{0}' is not registered")]
    BundleNotFound(String),

    #[error("package '{0}' is still in use and cannot be replaced")]
    PackageInUse(String),

    #[error("download failed: {0}")]
    Download(#[from] quarry_net::Error),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("engine loader error: {0}")]
    Loader(String),

    /// A dependency of the operation failed; carries the dependency's label
    /// and error.
    #[error("dependency '{0}' failed: {1}")]
    DependencyFailed(String, Box<Error>),

    #[error("file io error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The runtime behind the operation is gone.
    #[error("operation was abandoned before completing")]
    Abandoned,

    #[error("blocking wait is not supported on this platform")]
    BlockingWaitUnsupported,

    #[error("host url template references unknown placeholder '{0}'")]
    UnknownPlaceholder(String),
}

impl From<quarry_manifest::Error> for Error {
    fn from(err: quarry_manifest::Error) -> Self {
        Self::Manifest(err.to_string())
    }
}

impl From<quarry_config::Error> for Error {
    fn from(err: quarry_config::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Manifest(format!("manifest archive: {}", err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
