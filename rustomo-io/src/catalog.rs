//! Filesystem-backed source catalog.

use rustomo_core::{SourceCatalog, SourceStatus};
use std::path::Path;

/// Catalog that only checks whether the physical file exists.
///
/// Dataset paths and shapes are not inspected; use `Hdf5Catalog` for that.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCatalog;

impl SourceCatalog for FsCatalog {
    fn locate(&self, file: &Path, _internal_path: &str) -> SourceStatus {
        if file.is_file() {
            SourceStatus::Present(None)
        } else {
            SourceStatus::Missing
        }
    }
}
