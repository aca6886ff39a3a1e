//! rustomo-io: Source import and target persistence for rustomo.
//!
//! This crate connects the pure layout engine in `rustomo-core` to real
//! files: source catalogs that inspect physical files, JSON configuration and
//! manifests, and (behind the `hdf5` feature) HDF5 import and output.
//!

mod catalog;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod manifest;

pub use catalog::FsCatalog;
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use self::hdf5::{read_source_tree, Hdf5Catalog, Hdf5LayoutWriter, ReadOptions, WriteMode};
pub use manifest::{
    load_config, read_manifest, write_manifest, Manifest, MANIFEST_FORMAT_VERSION,
};
