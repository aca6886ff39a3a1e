//! Output composition: canonical keys, the target layout and the conversion driver.

use crate::angles::theta_from_params;
use crate::classify::Classification;
use crate::config::ConversionConfig;
use crate::layout::{LayoutBuilder, LogicalArrayDescriptor, SourceCatalog};
use crate::report::{ConversionReport, PlacedArray, SkipReason, SkippedRecord};
use crate::tree::SourceTree;
use crate::walker::walk;
use crate::{Error, Result};
use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Group holding every emitted array.
pub const EXCHANGE_GROUP: &str = "/exchange";

/// Top-level groups of the target layout, created in this order.
pub const TARGET_GROUPS: [&str; 4] = [EXCHANGE_GROUP, "/default", "/measurement", "/process"];

/// Canonical target keys under [`EXCHANGE_GROUP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKey {
    /// Projection data.
    Data,
    /// Primary white-field sequence.
    DataWhite,
    /// Alternate white-field sequence used once `data_white` is taken.
    DataWhiteFallback,
    DataDark,
    /// Rotation angles.
    Theta,
}

impl TargetKey {
    /// Keys tried, in order, for a classification.
    #[must_use]
    pub fn candidates(class: Classification) -> &'static [Self] {
        match class {
            Classification::Projection => &[Self::Data],
            Classification::Flat => &[Self::DataWhite, Self::DataWhiteFallback],
            Classification::Dark => &[Self::DataDark],
        }
    }

    /// Dataset name inside the exchange group.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::DataWhite => "data_white",
            Self::DataWhiteFallback => "data_whiteF",
            Self::DataDark => "data_dark",
            Self::Theta => "theta",
        }
    }

    /// Absolute target path.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Data => "/exchange/data",
            Self::DataWhite => "/exchange/data_white",
            Self::DataWhiteFallback => "/exchange/data_whiteF",
            Self::DataDark => "/exchange/data_dark",
            Self::Theta => "/exchange/theta",
        }
    }

    /// Returns true for the projection-data key, the only key always stitched.
    #[must_use]
    pub fn is_projection_data(self) -> bool {
        self == Self::Data
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Hands out target keys, never reusing one that was placed.
#[derive(Debug, Clone, Default)]
pub struct KeyAssigner {
    placed: Vec<TargetKey>,
}

impl KeyAssigner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First free key for `class`, or `None` when all candidates are placed.
    #[must_use]
    pub fn next_key(&self, class: Classification) -> Option<TargetKey> {
        TargetKey::candidates(class)
            .iter()
            .copied()
            .find(|key| !self.placed.contains(key))
    }

    /// Marks `key` as placed.
    pub fn mark_placed(&mut self, key: TargetKey) {
        if !self.placed.contains(&key) {
            self.placed.push(key);
        }
    }
}

/// Sink for a composed target layout.
///
/// Implemented by the in-memory [`TargetLayout`] and by persistence backends.
pub trait TargetWriter {
    type Error: From<Error>;

    /// Creates a group at an absolute path.
    ///
    /// # Errors
    /// Returns a backend error if the group cannot be created.
    fn create_group(&mut self, path: &str) -> std::result::Result<(), Self::Error>;

    /// Creates a composed array from a fully resolved descriptor.
    ///
    /// # Errors
    /// Returns a backend error if the array cannot be created.
    fn create_virtual_array(
        &mut self,
        descriptor: &LogicalArrayDescriptor,
    ) -> std::result::Result<(), Self::Error>;

    /// Creates a dense 1-D floating-point array.
    ///
    /// # Errors
    /// Returns a backend error if the array cannot be created.
    fn create_array(&mut self, key: &str, data: &[f64]) -> std::result::Result<(), Self::Error>;
}

/// Materialized 1-D array of the target layout.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DenseArray {
    pub key: String,
    pub data: Vec<f64>,
}

/// In-memory target layout.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TargetLayout {
    pub groups: Vec<String>,
    pub arrays: Vec<LogicalArrayDescriptor>,
    pub dense: Vec<DenseArray>,
}

impl TargetLayout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Composed array stored at `key`.
    #[must_use]
    pub fn array(&self, key: &str) -> Option<&LogicalArrayDescriptor> {
        self.arrays.iter().find(|a| a.target_key == key)
    }

    /// Dense array stored at `key`.
    #[must_use]
    pub fn dense(&self, key: &str) -> Option<&[f64]> {
        self.dense
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.data.as_slice())
    }

    /// The angle sequence, once generated.
    #[must_use]
    pub fn theta(&self) -> Option<&[f64]> {
        self.dense(TargetKey::Theta.path())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.array(key).is_some() || self.dense(key).is_some()
    }

    fn check_free(&self, key: &str) -> Result<()> {
        if self.contains(key) {
            return Err(Error::Config(format!("{key} already exists in target layout")));
        }
        Ok(())
    }
}

impl TargetWriter for TargetLayout {
    type Error = Error;

    fn create_group(&mut self, path: &str) -> Result<()> {
        if !self.groups.iter().any(|g| g == path) {
            self.groups.push(path.to_string());
        }
        Ok(())
    }

    fn create_virtual_array(&mut self, descriptor: &LogicalArrayDescriptor) -> Result<()> {
        self.check_free(&descriptor.target_key)?;
        self.arrays.push(descriptor.clone());
        Ok(())
    }

    fn create_array(&mut self, key: &str, data: &[f64]) -> Result<()> {
        self.check_free(key)?;
        self.dense.push(DenseArray {
            key: key.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Replays an in-memory layout into another writer.
///
/// # Errors
/// Returns the first error reported by `writer`.
pub fn persist<W: TargetWriter>(
    layout: &TargetLayout,
    writer: &mut W,
) -> std::result::Result<(), W::Error> {
    for group in &layout.groups {
        writer.create_group(group)?;
    }
    for array in &layout.arrays {
        writer.create_virtual_array(array)?;
    }
    for dense in &layout.dense {
        writer.create_array(&dense.key, &dense.data)?;
    }
    Ok(())
}

/// Drives one conversion: walk, build, place, then generate angles.
pub struct Converter<'a, C: ?Sized> {
    config: &'a ConversionConfig,
    catalog: &'a C,
    data_dir: Option<PathBuf>,
}

impl<'a, C: SourceCatalog + ?Sized> Converter<'a, C> {
    pub fn new(config: &'a ConversionConfig, catalog: &'a C) -> Self {
        Self {
            config,
            catalog,
            data_dir: None,
        }
    }

    /// Directory used to resolve relative physical file names.
    ///
    /// Defaults to the directory of the source file.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Converts `tree` into `writer`.
    ///
    /// Arrays are written as soon as they are placed. If the angle parameters
    /// are missing the error is returned after every array has been written,
    /// leaving a layout without `theta`.
    ///
    /// # Errors
    /// Returns [`Error::MissingParameter`] or [`Error::MalformedMetadata`]
    /// for run-level failures and any error reported by `writer`.
    pub fn run<W: TargetWriter>(
        &self,
        tree: &SourceTree,
        writer: &mut W,
    ) -> std::result::Result<ConversionReport, W::Error> {
        self.config.validate()?;

        for group in TARGET_GROUPS {
            writer.create_group(group)?;
        }

        let outcome = walk(tree, self.config)?;
        let mut report = ConversionReport {
            skipped: outcome.skipped,
            anomalies: outcome.anomalies,
            params: outcome.params.clone(),
            ..ConversionReport::default()
        };

        let data_dir = self.data_dir.clone().unwrap_or_else(|| {
            tree.file_path()
                .parent()
                .map_or_else(PathBuf::new, Path::to_path_buf)
        });
        let builder = LayoutBuilder::new(tree, self.config, data_dir, self.catalog);
        let mut keys = KeyAssigner::new();

        for record in &outcome.records {
            let path = tree.path(record.array);
            let Some(key) = keys.next_key(record.classification) else {
                warn!(
                    "no free target key for {} record {path}, skipping",
                    record.classification
                );
                report.skipped.push(SkippedRecord::new(
                    path,
                    SkipReason::KeyExhausted(record.classification),
                ));
                continue;
            };

            let descriptor = match builder.build(record, key) {
                Ok(descriptor) => descriptor,
                Err(err) if err.is_recoverable() => {
                    warn!("skipping {path}: {err}");
                    let reason = match err {
                        Error::NotFound { path } => SkipReason::SourceNotFound(path),
                        other => SkipReason::ShapeMismatch(other.to_string()),
                    };
                    report.skipped.push(SkippedRecord::new(path, reason));
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            writer.create_virtual_array(&descriptor)?;
            keys.mark_placed(key);
            info!(
                "placed {path} at {key} ({} source(s), shape {:?})",
                descriptor.sources.len(),
                descriptor.total_shape
            );
            report.placed.push(PlacedArray {
                target_key: descriptor.target_key,
                source_path: path,
                classification: record.classification,
                source_count: descriptor.sources.len(),
                total_shape: descriptor.total_shape,
            });
        }

        let theta = theta_from_params(&outcome.params)?;
        writer.create_array(TargetKey::Theta.path(), &theta)?;
        info!("wrote {} angles to {}", theta.len(), TargetKey::Theta);
        report.theta_len = theta.len();

        Ok(report)
    }
}

/// Converts `tree` into a fresh in-memory layout.
///
/// # Errors
/// See [`Converter::run`].
pub fn convert<C: SourceCatalog + ?Sized>(
    tree: &SourceTree,
    config: &ConversionConfig,
    catalog: &C,
) -> Result<(TargetLayout, ConversionReport)> {
    let mut layout = TargetLayout::new();
    let report = Converter::new(config, catalog).run(tree, &mut layout)?;
    Ok((layout, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_candidates() {
        let mut keys = KeyAssigner::new();
        assert_eq!(keys.next_key(Classification::Flat), Some(TargetKey::DataWhite));
        keys.mark_placed(TargetKey::DataWhite);
        assert_eq!(
            keys.next_key(Classification::Flat),
            Some(TargetKey::DataWhiteFallback)
        );
        keys.mark_placed(TargetKey::DataWhiteFallback);
        assert_eq!(keys.next_key(Classification::Flat), None);

        assert_eq!(keys.next_key(Classification::Dark), Some(TargetKey::DataDark));
        assert_eq!(keys.next_key(Classification::Projection), Some(TargetKey::Data));
    }

    #[test]
    fn test_key_paths() {
        assert_eq!(TargetKey::DataWhiteFallback.path(), "/exchange/data_whiteF");
        assert_eq!(TargetKey::DataWhiteFallback.name(), "data_whiteF");
        assert!(TargetKey::Data.is_projection_data());
        assert!(!TargetKey::DataDark.is_projection_data());
        for key in [TargetKey::Data, TargetKey::DataWhite, TargetKey::DataDark, TargetKey::Theta] {
            assert_eq!(key.path(), format!("{EXCHANGE_GROUP}/{}", key.name()));
        }
    }

    #[test]
    fn test_layout_refuses_overwrite() {
        let mut layout = TargetLayout::new();
        layout.create_array("/exchange/theta", &[0.0, 1.0]).unwrap();
        assert!(layout.create_array("/exchange/theta", &[2.0]).is_err());
        assert_eq!(layout.theta(), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_persist_replays_everything() {
        let mut source = TargetLayout::new();
        source.create_group("/exchange").unwrap();
        source.create_group("/exchange").unwrap();
        source.create_array("/exchange/theta", &[0.0]).unwrap();

        let mut copy = TargetLayout::new();
        persist(&source, &mut copy).unwrap();
        assert_eq!(copy, source);
        assert_eq!(copy.groups, vec!["/exchange".to_string()]);
    }
}
