use thiserror::Error;

/// An error type for the configuration crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
