//! JSON configuration loading and layout manifests.
//!
//! A manifest is the composed [`TargetLayout`] serialized as JSON, so that a
//! persistence layer other than HDF5 can build the same virtual arrays.

use crate::{Error, Result};
use rustomo_core::{ConversionConfig, ConversionReport, TargetLayout};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Manifest format version written by this crate.
pub const MANIFEST_FORMAT_VERSION: &str = "0.1";

/// Serialized conversion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: String,
    /// Source scan file the layout was composed from.
    pub source_file: PathBuf,
    pub layout: TargetLayout,
    /// Present when the conversion completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ConversionReport>,
}

impl Manifest {
    pub fn new(source_file: impl Into<PathBuf>, layout: TargetLayout) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION.to_string(),
            source_file: source_file.into(),
            layout,
            report: None,
        }
    }

    #[must_use]
    pub fn with_report(mut self, report: ConversionReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Checks that every composed array partitions its leading axis.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] naming the first broken array.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MANIFEST_FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported manifest version {}",
                self.format_version
            )));
        }
        for array in &self.layout.arrays {
            if !array.is_partition() {
                return Err(Error::InvalidFormat(format!(
                    "{} sources do not partition its leading axis",
                    array.target_key
                )));
            }
        }
        Ok(())
    }
}

/// Loads a conversion config from JSON. Missing fields take their defaults.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or fails validation.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConversionConfig> {
    let file = File::open(path)?;
    let config: ConversionConfig = serde_json::from_reader(BufReader::new(file))?;
    config.validate()?;
    Ok(config)
}

/// Writes a manifest as pretty-printed JSON.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_manifest<P: AsRef<Path>>(path: P, manifest: &Manifest) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, manifest)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads and validates a manifest.
///
/// # Errors
/// Returns an error if the file cannot be read or the manifest is inconsistent.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Manifest> {
    let file = File::open(path)?;
    let manifest: Manifest = serde_json::from_reader(BufReader::new(file))?;
    manifest.validate()?;
    Ok(manifest)
}
