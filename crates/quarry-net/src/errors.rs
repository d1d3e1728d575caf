use thiserror::Error;

/// Download failures.
///
/// The error is `Clone` so a failed download can be reported to every
/// operation waiting on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Connection or stream level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a status the downloader does not accept.
    #[error("server returned status {0} for '{1}'")]
    Status(u16, String),

    /// The resource does not exist; never retried.
    #[error("resource not found at '{0}'")]
    NotFound(String),

    /// Local filesystem failure while staging the download.
    #[error("file io error: {0}")]
    Io(String),

    /// The downloaded payload does not match its manifest record.
    #[error("integrity check failed for '{0}': {1}")]
    Integrity(String, String),

    /// All attempts were used up; wraps the last failure.
    #[error("download failed after {0} attempts: {1}")]
    RetriesExhausted(u32, Box<Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
