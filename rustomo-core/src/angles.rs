//! Rotation angle sequence.

use crate::params::{AcquisitionParams, ParamField};
use crate::{Error, Result};

/// Evenly spaced angles over `[0, scan_range]`, both ends included.
///
/// The last element is exactly `scan_range`. A single angle is `[0.0]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn angle_sequence(scan_range: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step = scan_range / (count - 1) as f64;
            let mut angles: Vec<f64> = (0..count).map(|i| i as f64 * step).collect();
            angles[count - 1] = scan_range;
            angles
        }
    }
}

/// Angle sequence derived from collected parameters.
///
/// # Errors
/// Returns [`Error::MissingParameter`] naming the first absent field, or
/// [`Error::MalformedMetadata`] if a field was rejected during the walk or
/// the count does not fit in memory.
pub fn theta_from_params(params: &AcquisitionParams) -> Result<Vec<f64>> {
    let scan_range = params.require_scan_range()?;
    let count = params.require_angle_count()?;
    let count = usize::try_from(count).map_err(|_| Error::MalformedMetadata {
        path: ParamField::AngleCount.to_string(),
        reason: format!("{count} angles exceed the addressable range"),
    })?;
    Ok(angle_sequence(scan_range, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_endpoints_and_length() {
        let angles = angle_sequence(180.0, 100);
        assert_eq!(angles.len(), 100);
        assert_relative_eq!(angles[0], 0.0);
        assert!((angles[99] - 180.0).abs() < f64::EPSILON);
        assert!(angles.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_uniform_spacing() {
        let angles = angle_sequence(360.0, 5);
        assert_eq!(angles.len(), 5);
        for (angle, expected) in angles.iter().zip([0.0, 90.0, 180.0, 270.0, 360.0]) {
            assert_relative_eq!(*angle, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_last_angle_exact_for_awkward_ranges() {
        for count in [3_usize, 7, 901, 1501] {
            let angles = angle_sequence(179.7, count);
            assert_eq!(angles.len(), count);
            assert!((angles[count - 1] - 179.7).abs() < f64::EPSILON);
            assert!(angles.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_degenerate_counts() {
        assert!(angle_sequence(180.0, 0).is_empty());
        assert_eq!(angle_sequence(180.0, 1), vec![0.0]);
    }

    #[test]
    fn test_theta_requires_both_parameters() {
        let mut params = AcquisitionParams::new();
        params.angle_count = Some(10);
        assert_eq!(
            theta_from_params(&params).unwrap_err(),
            Error::MissingParameter(ParamField::ScanRange)
        );

        params.angle_count = None;
        params.scan_range = Some(180.0);
        assert_eq!(
            theta_from_params(&params).unwrap_err(),
            Error::MissingParameter(ParamField::AngleCount)
        );

        params.angle_count = Some(10);
        assert_eq!(theta_from_params(&params).unwrap().len(), 10);
    }
}
