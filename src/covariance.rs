//! Covariance and correlation matrices of a unit×feature dataset.
//!
//! The three switches of the computation are explicit enums collected in
//! [`CovarianceOptions`] so every combination can be named and tested on its own:
//!
//! - [`Centering`]: subtract the mean vector from every row first, or not.
//! - [`Scaling`]: divisor applied to the accumulated outer-product sum.
//! - [`MatrixKind`]: keep the covariance, or normalize it into a correlation matrix.

use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SigqcPcaError};

/// Standard deviations below this are treated as zero variance.
pub const DEGENERATE_STD_THRESHOLD: f64 = 1e-9;

/// Whether rows are centered around the mean vector before forming outer products.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Centering {
    #[default]
    AroundMean,
    None,
}

/// Divisor applied to the sum of outer products.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scaling {
    /// Divide by the unit count U.
    #[default]
    ByUnitCount,
    /// Divide by U - 1.
    ByDegreesOfFreedom,
    /// Raw sum of outer products.
    None,
}

impl Scaling {
    /// Divisor for a dataset with `n_units` rows, or `None` when unscaled.
    pub fn divisor(self, n_units: usize) -> Result<Option<f64>> {
        match self {
            Scaling::ByUnitCount => Ok(Some(n_units as f64)),
            Scaling::ByDegreesOfFreedom => {
                if n_units < 2 {
                    return Err(SigqcPcaError::invalid_dataset(
                        "Degrees-of-freedom scaling needs at least 2 units.",
                    ));
                }
                Ok(Some((n_units - 1) as f64))
            }
            Scaling::None => Ok(None),
        }
    }
}

/// Covariance matrix, or covariance normalized by feature standard deviations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixKind {
    #[default]
    Covariance,
    Correlation,
}

/// Configuration of [`covariance_matrix`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovarianceOptions {
    pub centering: Centering,
    pub scaling: Scaling,
    pub kind: MatrixKind,
}

impl CovarianceOptions {
    /// Centered covariance divided by the unit count.
    pub fn covariance() -> Self {
        Self::default()
    }

    /// Centered correlation matrix.
    pub fn correlation() -> Self {
        Self {
            kind: MatrixKind::Correlation,
            ..Self::default()
        }
    }

    pub fn with_scaling(mut self, scaling: Scaling) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_centering(mut self, centering: Centering) -> Self {
        self.centering = centering;
        self
    }
}

fn check_not_empty(dataset: &ArrayView2<f64>) -> Result<()> {
    if dataset.nrows() == 0 || dataset.ncols() == 0 {
        return Err(SigqcPcaError::invalid_dataset(format!(
            "Dataset has zero units or zero features (shape {}x{}).",
            dataset.nrows(),
            dataset.ncols()
        )));
    }
    Ok(())
}

/// Arithmetic mean of the dataset over the unit axis.
pub fn mean_vector(dataset: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_not_empty(&dataset)?;
    dataset
        .mean_axis(Axis(0))
        .ok_or_else(|| SigqcPcaError::invalid_dataset("Failed to compute mean of the dataset."))
}

/// Feature×feature covariance (or correlation) matrix of `dataset`.
///
/// `mean` is only read when `options.centering` is [`Centering::AroundMean`].
///
/// # Errors
/// - `InvalidDataset` for an empty dataset, or degrees-of-freedom scaling with one unit.
/// - `FeatureCountMismatch` when `mean` does not have one entry per column.
/// - `DegenerateFeature` in correlation mode when a feature has zero variance.
pub fn covariance_matrix(
    dataset: ArrayView2<f64>,
    mean: &Array1<f64>,
    options: &CovarianceOptions,
) -> Result<Array2<f64>> {
    check_not_empty(&dataset)?;
    let n_units = dataset.nrows();
    let n_features = dataset.ncols();

    let mut working = dataset.to_owned();
    if options.centering == Centering::AroundMean {
        if mean.len() != n_features {
            return Err(SigqcPcaError::FeatureCountMismatch {
                expected: n_features,
                actual: mean.len(),
            });
        }
        working -= mean;
    }

    let outer = working.t().dot(&working);
    // Enforce exact symmetry; BLAS products can differ in the last bit.
    let mut matrix = (&outer + &outer.t()) * 0.5;

    if let Some(divisor) = options.scaling.divisor(n_units)? {
        matrix /= divisor;
    }
    debug!(
        "Computed {:?} scatter matrix {:?} from {} units ({:?}, {:?})",
        options.kind,
        matrix.dim(),
        n_units,
        options.centering,
        options.scaling
    );

    match options.kind {
        MatrixKind::Covariance => Ok(matrix),
        MatrixKind::Correlation => correlation_from_covariance(&matrix),
    }
}

/// Per-feature standard deviations, `sqrt` of the covariance diagonal.
///
/// # Errors
/// `DegenerateFeature` for the first feature whose standard deviation is below
/// [`DEGENERATE_STD_THRESHOLD`].
pub fn feature_scale(covariance: &Array2<f64>) -> Result<Array1<f64>> {
    let scale = covariance.diag().mapv(|v| v.max(0.0).sqrt());
    if let Some(index) = scale
        .iter()
        .position(|&sd| !sd.is_finite() || sd < DEGENERATE_STD_THRESHOLD)
    {
        return Err(SigqcPcaError::DegenerateFeature { index });
    }
    Ok(scale)
}

/// Normalize entry (i, j) by `sd_i * sd_j`. The result has a unit diagonal
/// and entries clamped to [-1, 1].
pub fn correlation_from_covariance(covariance: &Array2<f64>) -> Result<Array2<f64>> {
    let scale = feature_scale(covariance)?;
    let n = covariance.nrows();
    let mut correlation = Array2::<f64>::zeros((n, n));
    for ((i, j), value) in correlation.indexed_iter_mut() {
        *value = if i == j {
            1.0
        } else {
            (covariance[[i, j]] / (scale[i] * scale[j])).clamp(-1.0, 1.0)
        };
    }
    Ok(correlation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn scenario() -> Array2<f64> {
        array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]
    }

    #[test]
    fn mean_of_three_units() {
        let mean = mean_vector(scenario().view()).unwrap();
        assert_eq!(mean, array![3.0, 4.0]);
    }

    #[test]
    fn centered_covariance_divided_by_unit_count() {
        let data = scenario();
        let mean = mean_vector(data.view()).unwrap();
        let cov = covariance_matrix(data.view(), &mean, &CovarianceOptions::covariance()).unwrap();
        for v in cov.iter() {
            assert_abs_diff_eq!(*v, 8.0 / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn degrees_of_freedom_divisor() {
        let data = scenario();
        let mean = mean_vector(data.view()).unwrap();
        let options = CovarianceOptions::covariance().with_scaling(Scaling::ByDegreesOfFreedom);
        let cov = covariance_matrix(data.view(), &mean, &options).unwrap();
        for v in cov.iter() {
            assert_abs_diff_eq!(*v, 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn unscaled_sum_of_outer_products() {
        let data = scenario();
        let mean = mean_vector(data.view()).unwrap();
        let options = CovarianceOptions::covariance().with_scaling(Scaling::None);
        let cov = covariance_matrix(data.view(), &mean, &options).unwrap();
        for v in cov.iter() {
            assert_abs_diff_eq!(*v, 8.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn uncentered_second_moment() {
        let data = scenario();
        let mean = mean_vector(data.view()).unwrap();
        let options = CovarianceOptions::covariance()
            .with_centering(Centering::None)
            .with_scaling(Scaling::None);
        let cov = covariance_matrix(data.view(), &mean, &options).unwrap();
        // [1,3,5]·[1,3,5] = 35, [1,3,5]·[2,4,6] = 44, [2,4,6]·[2,4,6] = 56
        assert_abs_diff_eq!(cov[[0, 0]], 35.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 44.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 0]], 44.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[1, 1]], 56.0, epsilon = 1e-12);
    }

    #[test]
    fn correlation_has_unit_diagonal_and_bounded_entries() {
        let data = array![
            [1.0, 10.0, 3.0],
            [2.0, 8.0, 1.0],
            [3.0, 9.0, 4.0],
            [4.0, 5.0, 1.0],
            [5.0, 4.0, 5.0]
        ];
        let mean = mean_vector(data.view()).unwrap();
        let corr = covariance_matrix(data.view(), &mean, &CovarianceOptions::correlation()).unwrap();
        for i in 0..3 {
            assert_eq!(corr[[i, i]], 1.0);
            for j in 0..3 {
                assert!(corr[[i, j]].abs() <= 1.0);
                assert_abs_diff_eq!(corr[[i, j]], corr[[j, i]], epsilon = 1e-15);
            }
        }
        // Correlation does not depend on the divisor.
        let options = CovarianceOptions::correlation().with_scaling(Scaling::ByDegreesOfFreedom);
        let corr_dof = covariance_matrix(data.view(), &mean, &options).unwrap();
        for (a, b) in corr.iter().zip(corr_dof.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn perfectly_correlated_features() {
        let data = scenario();
        let mean = mean_vector(data.view()).unwrap();
        let corr = covariance_matrix(data.view(), &mean, &CovarianceOptions::correlation()).unwrap();
        assert_abs_diff_eq!(corr[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_variance_feature_is_degenerate_in_correlation_mode() {
        let data = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let mean = mean_vector(data.view()).unwrap();
        let err = covariance_matrix(data.view(), &mean, &CovarianceOptions::correlation()).unwrap_err();
        assert!(matches!(err, SigqcPcaError::DegenerateFeature { index: 1 }));

        // Covariance mode accepts it.
        let cov = covariance_matrix(data.view(), &mean, &CovarianceOptions::covariance()).unwrap();
        assert_eq!(cov[[1, 1]], 0.0);
    }

    #[test]
    fn diagonal_is_non_negative_in_covariance_mode() {
        let data = array![[-3.0, 0.5, 2.0], [1.0, -0.25, 2.5], [4.0, 0.0, -1.0], [0.0, 1.0, 0.0]];
        let mean = mean_vector(data.view()).unwrap();
        let cov = covariance_matrix(data.view(), &mean, &CovarianceOptions::covariance()).unwrap();
        assert!(cov.diag().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn empty_dataset_and_single_unit_dof_are_rejected() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            mean_vector(empty.view()),
            Err(SigqcPcaError::InvalidDataset(_))
        ));

        let single = array![[1.0, 2.0]];
        let mean = mean_vector(single.view()).unwrap();
        let options = CovarianceOptions::covariance().with_scaling(Scaling::ByDegreesOfFreedom);
        assert!(matches!(
            covariance_matrix(single.view(), &mean, &options),
            Err(SigqcPcaError::InvalidDataset(_))
        ));
    }

    #[test]
    fn mean_length_must_match_columns() {
        let data = scenario();
        let err = covariance_matrix(data.view(), &array![1.0], &CovarianceOptions::covariance()).unwrap_err();
        assert!(matches!(
            err,
            SigqcPcaError::FeatureCountMismatch { expected: 2, actual: 1 }
        ));
    }
}
