//! Conversion summary: what was placed, what was skipped and why.

use crate::classify::Classification;
use crate::params::{AcquisitionParams, ParamAnomaly};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reason a candidate array did not make it into the target layout.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "detail", rename_all = "snake_case"))]
pub enum SkipReason {
    /// The title label under the top-level scan group is missing.
    TitleNotFound(String),
    /// The title exists but its text was not loaded.
    TitleUnread(String),
    /// The title matched no classification keyword.
    Unclassified(String),
    /// A physical source file or dataset is missing.
    SourceNotFound(String),
    /// A physical source does not fit its slab.
    ShapeMismatch(String),
    /// Every target key for this classification is already taken.
    KeyExhausted(Classification),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TitleNotFound(path) => write!(f, "title {path} not found"),
            Self::TitleUnread(path) => write!(f, "title {path} has no loaded value"),
            Self::Unclassified(label) => write!(f, "title {label:?} matches no keyword"),
            Self::SourceNotFound(path) => write!(f, "physical source {path} not found"),
            Self::ShapeMismatch(detail) => write!(f, "{detail}"),
            Self::KeyExhausted(class) => write!(f, "no free target key left for {class}"),
        }
    }
}

/// A source array that was not placed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkippedRecord {
    /// Path of the array in the source tree.
    pub path: String,
    pub reason: SkipReason,
}

impl SkippedRecord {
    pub fn new(path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            path: path.into(),
            reason,
        }
    }

    /// Unclassified arrays are expected in most scans and do not make a run partial.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self.reason, SkipReason::Unclassified(_))
    }
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// A logical array written to the target layout.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlacedArray {
    pub target_key: String,
    pub source_path: String,
    pub classification: Classification,
    pub source_count: usize,
    pub total_shape: Vec<usize>,
}

/// Summary of one conversion run.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionReport {
    pub placed: Vec<PlacedArray>,
    pub skipped: Vec<SkippedRecord>,
    pub anomalies: Vec<ParamAnomaly>,
    pub params: AcquisitionParams,
    /// Length of the generated angle sequence.
    pub theta_len: usize,
}

impl ConversionReport {
    /// Returns true when at least one classified array could not be placed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.skipped.iter().any(SkippedRecord::is_failure)
    }

    /// Skipped records that make the run partial.
    pub fn failures(&self) -> impl Iterator<Item = &SkippedRecord> {
        self.skipped.iter().filter(|s| s.is_failure())
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Placed arrays: {}", self.placed.len())?;
        for placed in &self.placed {
            writeln!(
                f,
                "  {} <- {} ({}, {} source(s), shape {:?})",
                placed.target_key,
                placed.source_path,
                placed.classification,
                placed.source_count,
                placed.total_shape
            )?;
        }
        writeln!(f, "Angles: {}", self.theta_len)?;
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped: {}", self.skipped.len())?;
            for skipped in &self.skipped {
                writeln!(f, "  {skipped}")?;
            }
        }
        for anomaly in &self.anomalies {
            writeln!(f, "Parameter anomaly: {anomaly}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ignores_unclassified() {
        let mut report = ConversionReport::default();
        report.skipped.push(SkippedRecord::new(
            "/3.1/measurement/image",
            SkipReason::Unclassified("alignment".to_string()),
        ));
        assert!(!report.is_partial());

        report.skipped.push(SkippedRecord::new(
            "/4.1/measurement/image",
            SkipReason::KeyExhausted(Classification::Flat),
        ));
        assert!(report.is_partial());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_display_lists_skips() {
        let mut report = ConversionReport::default();
        report.skipped.push(SkippedRecord::new(
            "/2.1/measurement/image",
            SkipReason::TitleNotFound("/2.1/title".to_string()),
        ));
        let text = report.to_string();
        assert!(text.contains("Skipped: 1"));
        assert!(text.contains("/2.1/measurement/image: title /2.1/title not found"));
    }
}
