//! Package manifest model of the quarry content-delivery stack.
//!
//! A *package* is a named, versioned collection of bundles plus the manifest
//! describing them. This crate holds the pure data side: the manifest and its
//! deterministic JSON persistence, the address and bundle tables it carries,
//! content checksums, file-name conventions, and bundle dependency
//! resolution. Producing manifests is the packing crate's job; loading them
//! at runtime is the runtime crate's.

// crate-specific lint exceptions:
//#![allow()]

mod address;
pub use address::*;

mod bundle;
pub use bundle::*;

mod errors;
pub use errors::{Error, Result};

mod manifest;
pub use manifest::*;

mod resolver;
pub use resolver::*;

pub mod checksum;
