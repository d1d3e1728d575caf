//! Configuration.
//!
//! Layered configuration for the quarry stack: TOML files discovered by
//! walking up from a starting directory, optionally overridden by a file
//! named in `QUARRY_CONFIG`, then by `QUARRY_`-prefixed environment
//! variables. Later sources win.

// crate-specific lint exceptions:
//#![allow()]

mod errors;

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

pub use errors::{Error, Result};

/// The default filename for configuration files.
pub static DEFAULT_FILENAME: &str = "quarry.toml";

/// A loaded, immutable configuration.
///
/// Unlike a process-global configuration singleton, a `Config` is built
/// explicitly and handed to the components that need it, so tests and
/// embedders can run several isolated configurations side by side.
#[derive(Debug, Clone, Default)]
pub struct Config {
    figment: Figment,
}

impl Config {
    /// Create a configuration from a TOML string.
    ///
    /// Useful for tests mostly.
    pub fn from_toml(toml: &str) -> Self {
        let figment = Figment::new().merge(Toml::string(toml));
        Self { figment }
    }

    /// Load the configuration from all its sources.
    ///
    /// Sources are read in order, later ones overriding earlier ones:
    ///
    /// - the closest `quarry.toml` found in the current working directory or
    ///   one of its ancestors;
    /// - any file named by the `QUARRY_CONFIG` environment variable;
    /// - environment variables prefixed with `QUARRY_`, with `__` separating
    ///   nested keys.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be loaded, an error is returned.
    pub fn load() -> Result<Self> {
        let path = std::env::current_dir()?;

        Self::load_with_current_directory(path)
    }

    /// Load a configuration, using the specified root as the current
    /// directory.
    ///
    /// See [`Config::load`] for the source order.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be loaded, an error is returned.
    pub fn load_with_current_directory(path: impl AsRef<Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Starting with the given directory, walk up to the root, stopping as
        // soon as we find a configuration file.
        for dir in path.as_ref().ancestors() {
            let config_file_path = dir.join(DEFAULT_FILENAME);

            if std::fs::metadata(&config_file_path).is_ok() {
                figment = figment.merge(Toml::file(config_file_path));
                break;
            }
        }

        // If a specific configuration file was specified, try to read it.
        if let Some(config_file_path) = std::env::var_os("QUARRY_CONFIG") {
            figment = figment.merge(Toml::file(config_file_path));
        }

        // Finally, read from environment variables, starting with `QUARRY_`.
        let figment = figment.merge(Env::prefixed("QUARRY_").split("__"));

        Ok(Self { figment })
    }

    /// Override this configuration with another one.
    pub fn override_with(&mut self, other: Self) {
        let figment = std::mem::take(&mut self.figment);
        self.figment = figment.merge(other.figment);
    }

    /// Get the value specified by the key.
    ///
    /// If the value does not exist, None is returned.
    ///
    /// # Errors
    ///
    /// If any error occurs other than the specified key not existing in the
    /// configuration, it is returned.
    pub fn get<'de, T>(&self, key: &str) -> Result<Option<T>>
    where
        T: serde::Deserialize<'de>,
    {
        match self.figment.extract_inner(key) {
            Ok(value) => Ok(Some(value)),
            Err(err) => match &err.kind {
                figment::error::Kind::MissingField(missing_key) => {
                    if key == missing_key {
                        Ok(None)
                    } else {
                        Err(Box::new(err).into())
                    }
                }
                _ => Err(Box::new(err).into()),
            },
        }
    }

    /// Get the value specified by the key or a specified default value if it
    /// is not found.
    ///
    /// # Errors
    ///
    /// If any other error occurs, it is returned.
    pub fn get_or<'de, T>(&self, key: &str, default: T) -> Result<T>
    where
        T: serde::Deserialize<'de>,
    {
        self.get(key).map(|value| value.unwrap_or(default))
    }

    /// Get the value specified by the key or builds a default value by
    /// calling the specified function if the key is not found.
    ///
    /// # Errors
    ///
    /// If any other error occurs, it is returned.
    pub fn get_or_else<'de, T, F>(&self, key: &str, f: F) -> Result<T>
    where
        T: serde::Deserialize<'de>,
        F: FnOnce() -> T,
    {
        self.get(key).map(|value| value.unwrap_or_else(f))
    }

    /// Get the value specified by the key or a default value if it is not
    /// found.
    ///
    /// # Errors
    ///
    /// If any other error occurs, it is returned.
    pub fn get_or_default<'de, T>(&self, key: &str) -> Result<T>
    where
        T: serde::Deserialize<'de> + Default,
    {
        self.get(key).map(Option::unwrap_or_default)
    }
}
