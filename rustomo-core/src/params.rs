//! Scan-wide acquisition parameters collected during the walk.

use crate::tree::Value;
use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Canonical acquisition parameter fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ParamField {
    /// Angular range of the rotation, in degrees.
    ScanRange,
    /// Half-acquisition (offset rotation axis) flag.
    HalfAcquisition,
    /// Number of angular steps.
    AngleCount,
}

impl ParamField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScanRange => "scan_range",
            Self::HalfAcquisition => "half_acquisition",
            Self::AngleCount => "angle_count",
        }
    }
}

impl fmt::Display for ParamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter value that could not be interpreted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RejectedParam {
    pub field: ParamField,
    pub path: String,
    pub reason: String,
}

impl fmt::Display for RejectedParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {} rejected: {}", self.field, self.path, self.reason)
    }
}

/// Irregularity noticed while recording parameters. Never fatal by itself.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParamAnomaly {
    /// A parameter was written more than once during one walk.
    Overwritten {
        field: ParamField,
        /// Path of the node whose value replaced the earlier one.
        path: String,
        previous: String,
        replacement: String,
    },
    Rejected(RejectedParam),
}

impl ParamAnomaly {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Overwritten { path, .. } => path,
            Self::Rejected(rejected) => &rejected.path,
        }
    }
}

impl fmt::Display for ParamAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwritten {
                field,
                path,
                previous,
                replacement,
            } => write!(f, "{field} overwritten by {path} ({previous} -> {replacement})"),
            Self::Rejected(rejected) => write!(f, "{rejected}"),
        }
    }
}

/// Acquisition parameters; every field is optional until seen.
///
/// A rejected value clears its field. The rejection is kept so that a later
/// [`require_scan_range`](Self::require_scan_range) or
/// [`require_angle_count`](Self::require_angle_count) can name it.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcquisitionParams {
    pub scan_range: Option<f64>,
    pub half_acquisition: Option<bool>,
    pub angle_count: Option<u64>,
    /// Latest rejection per field, cleared by a later valid write.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rejected: Vec<RejectedParam>,
}

impl AcquisitionParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `field`; the last writer wins.
    ///
    /// Returns an anomaly when the field was already set or when the value
    /// has the wrong kind. A wrong-kind value leaves the field unset.
    pub fn record(
        &mut self,
        field: ParamField,
        value: &Value,
        path: &str,
    ) -> Option<ParamAnomaly> {
        let previous = match field {
            ParamField::ScanRange => match value.as_f64().filter(|v| v.is_finite()) {
                Some(range) => self.scan_range.replace(range).map(|v| v.to_string()),
                None => return Some(self.reject(field, path, expected(field, value))),
            },
            ParamField::HalfAcquisition => match value {
                Value::Bool(flag) => self.half_acquisition.replace(*flag).map(|v| v.to_string()),
                Value::Int(v) => self.half_acquisition.replace(*v != 0).map(|v| v.to_string()),
                _ => return Some(self.reject(field, path, expected(field, value))),
            },
            ParamField::AngleCount => match angle_count_from(value) {
                Some(count) => self.angle_count.replace(count).map(|v| v.to_string()),
                None => return Some(self.reject(field, path, expected(field, value))),
            },
        };
        self.rejected.retain(|r| r.field != field);

        previous.map(|previous| ParamAnomaly::Overwritten {
            field,
            path: path.to_string(),
            previous,
            replacement: self.display_field(field),
        })
    }

    /// Marks `field` as unusable, clearing any earlier value.
    pub fn reject(
        &mut self,
        field: ParamField,
        path: &str,
        reason: impl Into<String>,
    ) -> ParamAnomaly {
        match field {
            ParamField::ScanRange => self.scan_range = None,
            ParamField::HalfAcquisition => self.half_acquisition = None,
            ParamField::AngleCount => self.angle_count = None,
        }
        let rejected = RejectedParam {
            field,
            path: path.to_string(),
            reason: reason.into(),
        };
        self.rejected.retain(|r| r.field != field);
        self.rejected.push(rejected.clone());
        ParamAnomaly::Rejected(rejected)
    }

    fn display_field(&self, field: ParamField) -> String {
        match field {
            ParamField::ScanRange => self.scan_range.map(|v| v.to_string()),
            ParamField::HalfAcquisition => self.half_acquisition.map(|v| v.to_string()),
            ParamField::AngleCount => self.angle_count.map(|v| v.to_string()),
        }
        .unwrap_or_default()
    }

    fn unavailable(&self, field: ParamField) -> Error {
        match self.rejected.iter().find(|r| r.field == field) {
            Some(rejected) => Error::MalformedMetadata {
                path: rejected.path.clone(),
                reason: format!("{field}: {}", rejected.reason),
            },
            None => Error::MissingParameter(field),
        }
    }

    /// Scan range, required for the angle sequence.
    ///
    /// # Errors
    /// Returns [`Error::MissingParameter`] if it was never recorded, or
    /// [`Error::MalformedMetadata`] if the last value seen was rejected.
    pub fn require_scan_range(&self) -> Result<f64> {
        self.scan_range
            .ok_or_else(|| self.unavailable(ParamField::ScanRange))
    }

    /// Angle count, required for the angle sequence.
    ///
    /// # Errors
    /// Returns [`Error::MissingParameter`] if it was never recorded, or
    /// [`Error::MalformedMetadata`] if the last value seen was rejected.
    pub fn require_angle_count(&self) -> Result<u64> {
        self.angle_count
            .ok_or_else(|| self.unavailable(ParamField::AngleCount))
    }
}

fn expected(field: ParamField, value: &Value) -> String {
    let kind = match field {
        ParamField::ScanRange => "a finite number",
        ParamField::HalfAcquisition => "a boolean",
        ParamField::AngleCount => "a non-negative integer",
    };
    format!("expected {kind}, found {value}")
}

/// Integral counts; float counts are truncated the way acquisition software stores them.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn angle_count_from(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::Float(v) if v.is_finite() && *v >= 0.0 => Some(v.trunc() as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_record_fields() {
        let mut params = AcquisitionParams::new();
        assert!(params
            .record(ParamField::ScanRange, &Value::Int(180), "/1.1/scan_range")
            .is_none());
        params.record(ParamField::AngleCount, &Value::Float(900.0), "/1.1/npoints");
        params.record(ParamField::HalfAcquisition, &Value::Int(1), "/1.1/half");

        assert_relative_eq!(params.require_scan_range().unwrap(), 180.0);
        assert_eq!(params.require_angle_count().unwrap(), 900);
        assert_eq!(params.half_acquisition, Some(true));
        assert!(params.rejected.is_empty());
    }

    #[test]
    fn test_second_write_is_reported() {
        let mut params = AcquisitionParams::new();
        params.record(ParamField::ScanRange, &Value::Float(180.0), "/1.1/scan_range");
        let anomaly = params
            .record(ParamField::ScanRange, &Value::Float(360.0), "/2.1/scan_range")
            .expect("overwrite should be reported");

        assert_eq!(
            anomaly,
            ParamAnomaly::Overwritten {
                field: ParamField::ScanRange,
                path: "/2.1/scan_range".to_string(),
                previous: "180".to_string(),
                replacement: "360".to_string(),
            }
        );
        assert_relative_eq!(params.scan_range.unwrap(), 360.0);
    }

    #[test]
    fn test_wrong_kind_is_rejected_not_fatal() {
        let mut params = AcquisitionParams::new();
        let anomaly = params
            .record(ParamField::ScanRange, &Value::Text("wide".into()), "/x")
            .unwrap();
        assert!(matches!(
            anomaly,
            ParamAnomaly::Rejected(ref rejected) if rejected.field == ParamField::ScanRange
        ));
        assert_eq!(anomaly.path(), "/x");

        params.record(ParamField::AngleCount, &Value::Int(-3), "/y");
        params.record(ParamField::HalfAcquisition, &Value::Float(1.0), "/z");
        params.record(ParamField::HalfAcquisition, &Value::Text("False".into()), "/z");

        assert_eq!(params.scan_range, None);
        assert_eq!(params.angle_count, None);
        assert_eq!(params.half_acquisition, None);
        assert_eq!(params.rejected.len(), 3);
    }

    #[test]
    fn test_rejection_surfaces_when_required() {
        let mut params = AcquisitionParams::new();
        params.record(ParamField::ScanRange, &Value::Float(180.0), "/1.1/scan_range");
        params.record(ParamField::ScanRange, &Value::Bool(true), "/2.1/scan_range");

        let err = params.require_scan_range().unwrap_err();
        assert!(
            matches!(err, Error::MalformedMetadata { ref path, .. } if path == "/2.1/scan_range")
        );
    }

    #[test]
    fn test_valid_write_clears_rejection() {
        let mut params = AcquisitionParams::new();
        params.record(ParamField::AngleCount, &Value::Text("many".into()), "/1.1/npoints");
        assert!(params
            .record(ParamField::AngleCount, &Value::Int(10), "/2.1/npoints")
            .is_none());
        assert_eq!(params.require_angle_count().unwrap(), 10);
        assert!(params.rejected.is_empty());
    }

    #[test]
    fn test_missing_parameters() {
        let params = AcquisitionParams::new();
        assert_eq!(
            params.require_scan_range().unwrap_err(),
            Error::MissingParameter(ParamField::ScanRange)
        );
        assert_eq!(
            params.require_angle_count().unwrap_err().to_string(),
            "missing acquisition parameter: angle_count"
        );
    }
}
