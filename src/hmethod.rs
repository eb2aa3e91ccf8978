//! H-method: compare two datasets by the angle between their "total
//! eigenvectors".
//!
//! Each dataset's uncentered, unscaled scatter matrix `AᵀA` is
//! eigen-decomposed; the eigenvectors are weighted by their eigenvalues,
//! summed and normalized. The angle between the two resulting unit vectors
//! is zero only when the weighted eigenbases agree.
//!
//! Eigenvector signs are solver-defined, so the angle is only meaningful
//! for matrices decomposed by the same backend.

use std::fmt;
use std::str::FromStr;

use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::covariance::{covariance_matrix, Centering, CovarianceOptions, Scaling};
use crate::eigen::eigen_decompose;
use crate::error::{Result, SigqcPcaError};

/// Unit of the angle returned by [`h_method`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AngleUnits {
    #[default]
    Degrees,
    Radians,
}

impl FromStr for AngleUnits {
    type Err = SigqcPcaError;

    /// `"d"` or `"r"`, case-insensitive.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "d" => Ok(AngleUnits::Degrees),
            "r" => Ok(AngleUnits::Radians),
            _ => Err(SigqcPcaError::UnsupportedAngleUnits(s.to_string())),
        }
    }
}

impl fmt::Display for AngleUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleUnits::Degrees => write!(f, "d"),
            AngleUnits::Radians => write!(f, "r"),
        }
    }
}

/// Angle between the total eigenvectors of `test` and `reference`.
///
/// Both inputs are (n_rows, n_features); a single row is allowed.
///
/// # Errors
/// `FeatureCountMismatch` when the feature counts differ, `InvalidDataset`
/// for empty or all-zero data, `Linalg` if the solver fails.
pub fn h_method(test: ArrayView2<f64>, reference: ArrayView2<f64>, units: AngleUnits) -> Result<f64> {
    if test.ncols() != reference.ncols() {
        return Err(SigqcPcaError::FeatureCountMismatch {
            expected: reference.ncols(),
            actual: test.ncols(),
        });
    }
    let test_total = normalized_total_eigenvector(test)?;
    let reference_total = normalized_total_eigenvector(reference)?;
    let angle = angle_between(test_total.view(), reference_total.view(), units);
    debug!("H-method angle: {} {}", angle, units);
    Ok(angle)
}

/// Eigenvalue-weighted sum of the eigenvectors of `AᵀA`, scaled to unit length.
pub fn normalized_total_eigenvector(data: ArrayView2<f64>) -> Result<Array1<f64>> {
    let options = CovarianceOptions::covariance()
        .with_centering(Centering::None)
        .with_scaling(Scaling::None);
    // The mean is not read when centering is off.
    let unused_mean = Array1::zeros(data.ncols());
    let scatter = covariance_matrix(data, &unused_mean, &options)?;
    let eig = eigen_decompose(&scatter)?;

    let total = eig.eigenvectors.dot(&eig.eigenvalues);
    let norm = magnitude(total.view());
    if norm < f64::EPSILON {
        return Err(SigqcPcaError::invalid_dataset(
            "total eigenvector has zero length; data has no dominant direction",
        ));
    }
    Ok(total / norm)
}

/// Euclidean length.
pub fn magnitude(vector: ArrayView1<f64>) -> f64 {
    vector.dot(&vector).sqrt()
}

/// Angle between two unit vectors. The dot product is clamped to [-1, 1]
/// so rounding cannot push `acos` out of its domain.
pub fn angle_between(a: ArrayView1<f64>, b: ArrayView1<f64>, units: AngleUnits) -> f64 {
    let radians = a.dot(&b).clamp(-1.0, 1.0).acos();
    match units {
        AngleUnits::Degrees => radians.to_degrees(),
        AngleUnits::Radians => radians,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn identical_inputs_have_zero_angle() {
        let data = array![[1.0, 2.0, 0.5], [0.3, -1.0, 2.0], [4.0, 0.0, 1.0], [2.0, 2.0, 2.0]];
        let angle = h_method(data.view(), data.view(), AngleUnits::Degrees).unwrap();
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn orthogonal_dominant_directions_are_ninety_degrees() {
        let test = array![[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let reference = array![[0.0, 3.0, 0.0], [0.0, -1.0, 0.0]];
        let degrees = h_method(test.view(), reference.view(), AngleUnits::Degrees).unwrap();
        assert_abs_diff_eq!(degrees, 90.0, epsilon = 1e-9);
        let radians = h_method(test.view(), reference.view(), AngleUnits::Radians).unwrap();
        assert_abs_diff_eq!(radians, std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn single_row_inputs_are_accepted() {
        let row = array![[3.0, 4.0]];
        let total = normalized_total_eigenvector(row.view()).unwrap();
        // AᵀA = [[9,12],[12,16]] has one non-zero eigenvalue along [3,4]/5.
        assert_abs_diff_eq!(total[0].abs(), 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(total[1].abs(), 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(magnitude(total.view()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn dot_product_is_clamped() {
        let a = array![1.0, 0.0];
        let slightly_long = array![1.0 + 1e-15, 0.0];
        let angle = angle_between(a.view(), slightly_long.view(), AngleUnits::Degrees);
        assert_eq!(angle, 0.0);
        let opposite = array![-1.0 - 1e-15, 0.0];
        assert_abs_diff_eq!(angle_between(a.view(), opposite.view(), AngleUnits::Degrees), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn angle_units_parse() {
        assert_eq!("d".parse::<AngleUnits>().unwrap(), AngleUnits::Degrees);
        assert_eq!("R".parse::<AngleUnits>().unwrap(), AngleUnits::Radians);
        match "grad".parse::<AngleUnits>() {
            Err(SigqcPcaError::UnsupportedAngleUnits(u)) => assert_eq!(u, "grad"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let a = array![[1.0, 2.0]];
        let b = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            h_method(a.view(), b.view(), AngleUnits::Degrees),
            Err(SigqcPcaError::FeatureCountMismatch { expected: 3, actual: 2 })
        ));
        let zeros = ndarray::Array2::<f64>::zeros((2, 2));
        assert!(matches!(
            h_method(zeros.view(), zeros.view(), AngleUnits::Degrees),
            Err(SigqcPcaError::InvalidDataset(_))
        ));
    }
}
