//! Symmetric eigen-decomposition sorted by explained variance, plus the
//! variance summaries derived from the eigenvalues.

use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SigqcPcaError};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};

/// Eigenvalues sorted descending, paired with the matching eigenvector columns.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub eigenvalues: Array1<f64>,
    /// Shape (n_features, n_features); column i belongs to `eigenvalues[i]`.
    pub eigenvectors: Array2<f64>,
}

/// Eigen-decompose a symmetric matrix with the configured backend.
///
/// Eigenvalues come back in descending order. The sort is stable, so exactly
/// equal eigenvalues keep the solver's relative order and the result is
/// deterministic for a fixed input. Eigenvector columns are re-normalized to
/// unit length; their sign is whatever the solver produced.
///
/// # Errors
/// Returns an error if the matrix is not square, contains non-finite values,
/// or the solver fails.
pub fn eigen_decompose(matrix: &Array2<f64>) -> Result<EigenDecomposition> {
    eigen_decompose_with(&LinAlgBackendProvider::new(), matrix)
}

/// As [`eigen_decompose`], with an explicit backend.
pub fn eigen_decompose_with<B: BackendEigh>(backend: &B, matrix: &Array2<f64>) -> Result<EigenDecomposition> {
    if matrix.nrows() != matrix.ncols() {
        return Err(SigqcPcaError::Linalg(format!(
            "Matrix must be square, got {}x{}.",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(SigqcPcaError::Linalg(
            "Matrix contains non-finite (NaN or infinity) values.".to_string(),
        ));
    }
    let n = matrix.nrows();
    if n == 0 {
        return Ok(EigenDecomposition {
            eigenvalues: Array1::zeros(0),
            eigenvectors: Array2::zeros((0, 0)),
        });
    }

    let output = backend
        .eigh_upper(matrix)
        .map_err(|e| SigqcPcaError::Linalg(e.to_string()))?;

    let mut order: Vec<usize> = (0..n).collect();
    // sort_by is stable: ties keep solver order.
    order.sort_by(|&a, &b| {
        output.eigenvalues[b]
            .partial_cmp(&output.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let eigenvalues = Array1::from_iter(order.iter().map(|&i| output.eigenvalues[i]));
    let mut eigenvectors = output.eigenvectors.select(Axis(1), &order);
    for mut column in eigenvectors.columns_mut() {
        let norm = column.dot(&column).sqrt();
        if norm > 1e-12 {
            column.mapv_inplace(|x| x / norm);
        } else {
            warn!("Solver returned a near-zero eigenvector (norm {:e}); left as is.", norm);
        }
    }
    debug!("Sorted eigenvalues: {:?}", eigenvalues);

    Ok(EigenDecomposition { eigenvalues, eigenvectors })
}

/// Total variance: the sum of the eigenvalues (the trace of the decomposed matrix).
pub fn total_variance(eigenvalues: &Array1<f64>) -> f64 {
    eigenvalues.sum()
}

/// Fraction of the total variance explained by each component.
///
/// Returns zeros when the total variance is zero.
pub fn proportion_of_variance(eigenvalues: &Array1<f64>) -> Array1<f64> {
    let total = total_variance(eigenvalues);
    if total.abs() < f64::EPSILON {
        return Array1::zeros(eigenvalues.len());
    }
    eigenvalues.mapv(|v| v / total)
}

/// Cumulative proportion of variance explained by the first `n_pcs` components.
///
/// `n_pcs` is clamped to the number of eigenvalues; using all components gives 1.0
/// for a non-degenerate decomposition.
pub fn cumulative_proportion_of_variance(eigenvalues: &Array1<f64>, n_pcs: usize) -> f64 {
    let n = n_pcs.min(eigenvalues.len());
    proportion_of_variance(eigenvalues).iter().take(n).sum()
}
