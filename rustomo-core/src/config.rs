//! Conversion configuration.

use crate::params::ParamField;
use crate::{Error, Result};
use std::collections::HashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maps a node name found in the source tree to a parameter field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterName {
    pub name: String,
    pub field: ParamField,
}

impl ParameterName {
    pub fn new(name: impl Into<String>, field: ParamField) -> Self {
        Self {
            name: name.into(),
            field,
        }
    }
}

/// Configuration for one source-to-target conversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConversionConfig {
    /// Name of the acquisition arrays to classify.
    pub image_name: String,
    /// Required rank of those arrays.
    pub image_rank: usize,
    /// Label looked up under the top-level scan group.
    pub title_name: String,
    /// Entry group inside each physical file. When `None`, the internal path
    /// recorded in the virtual-source manifest is used as-is.
    pub source_entry: Option<String>,
    /// Dataset name inside each physical file's entry.
    pub source_dataset: String,
    /// Recognised parameter names.
    pub parameter_names: Vec<ParameterName>,
    /// Check physical sources before composing.
    pub verify_sources: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            image_name: "image".to_string(),
            image_rank: 3,
            title_name: "title".to_string(),
            source_entry: Some("entry_0000".to_string()),
            source_dataset: "data".to_string(),
            parameter_names: vec![
                ParameterName::new("scan_range", ParamField::ScanRange),
                ParameterName::new("half_acquisition", ParamField::HalfAcquisition),
                ParameterName::new("npoints", ParamField::AngleCount),
            ],
            verify_sources: true,
        }
    }
}

impl ConversionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the arrays to classify.
    #[must_use]
    pub fn with_image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = name.into();
        self
    }

    /// Sets the title label name.
    #[must_use]
    pub fn with_title_name(mut self, name: impl Into<String>) -> Self {
        self.title_name = name.into();
        self
    }

    /// Sets the entry group used to rebuild physical dataset paths.
    #[must_use]
    pub fn with_source_entry(mut self, entry: Option<String>) -> Self {
        self.source_entry = entry;
        self
    }

    /// Sets the dataset name inside each physical file.
    #[must_use]
    pub fn with_source_dataset(mut self, name: impl Into<String>) -> Self {
        self.source_dataset = name.into();
        self
    }

    /// Adds or replaces a recognised parameter name.
    #[must_use]
    pub fn with_parameter_name(mut self, name: impl Into<String>, field: ParamField) -> Self {
        let name = name.into();
        self.parameter_names.retain(|p| p.name != name);
        self.parameter_names.push(ParameterName::new(name, field));
        self
    }

    /// Enables or disables source probing.
    #[must_use]
    pub fn with_verify_sources(mut self, verify: bool) -> Self {
        self.verify_sources = verify;
        self
    }

    /// Parameter field recognised for a node name.
    #[must_use]
    pub fn parameter_field(&self, name: &str) -> Option<ParamField> {
        self.parameter_names
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.field)
    }

    /// Checks the configuration for values that cannot work.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.image_name.is_empty() {
            return Err(Error::Config("image_name must not be empty".to_string()));
        }
        if self.title_name.is_empty() {
            return Err(Error::Config("title_name must not be empty".to_string()));
        }
        if self.image_rank == 0 {
            return Err(Error::Config("image_rank must be at least 1".to_string()));
        }
        if self.source_dataset.is_empty() {
            return Err(Error::Config(
                "source_dataset must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for param in &self.parameter_names {
            if !seen.insert(param.name.as_str()) {
                return Err(Error::Config(format!(
                    "parameter name {:?} listed twice",
                    param.name
                )));
            }
        }
        Ok(())
    }
}
