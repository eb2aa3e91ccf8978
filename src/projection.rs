//! Projection of test units onto a stored reference basis.

use std::path::Path;

use log::{debug, info};
use ndarray::{s, Array2};

use crate::error::{Result, SigqcPcaError};
use crate::reference::ReferenceArtifact;

/// Scores of `dataset` on the first `n_pcs` components of `reference`.
///
/// Computes `(dataset - mean) · V[:, :k]`, with `k = min(n_pcs, n_features)`.
/// For a correlation-mode reference each centered column is divided by the
/// stored feature scale first. Column identity is not checked, only count.
///
/// # Errors
/// `FeatureCountMismatch` when the dataset width differs from the reference.
pub fn project_scores(reference: &ReferenceArtifact, dataset: &Array2<f64>, n_pcs: usize) -> Result<Array2<f64>> {
    let n_features = reference.n_features();
    if dataset.ncols() != n_features {
        return Err(SigqcPcaError::FeatureCountMismatch {
            expected: n_features,
            actual: dataset.ncols(),
        });
    }
    let k = n_pcs.min(reference.eigenvectors.ncols());

    let mut centered = dataset - &reference.mean;
    if let Some(scale) = &reference.feature_scale {
        centered /= scale;
    }
    let scores = centered.dot(&reference.eigenvectors.slice(s![.., ..k]));
    debug!("Projected {:?} dataset onto {} components", dataset.dim(), k);
    Ok(scores)
}

/// Writes `Serial Number,PC1,...,PCk` followed by one row per unit.
///
/// # Errors
/// `InvalidDataset` when there is not one serial number per score row.
pub fn write_pc_scores_csv<P: AsRef<Path>>(path: P, serial_numbers: &[String], scores: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    if serial_numbers.len() != scores.nrows() {
        return Err(SigqcPcaError::invalid_dataset(format!(
            "{} serial numbers for {} score rows",
            serial_numbers.len(),
            scores.nrows()
        )));
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["Serial Number".to_string()];
    header.extend((1..=scores.ncols()).map(|i| format!("PC{i}")));
    writer.write_record(&header)?;
    for (serial, row) in serial_numbers.iter().zip(scores.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(serial.clone());
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| SigqcPcaError::io(path, e))?;
    info!("Wrote {} PC score rows to {}", scores.nrows(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::{covariance_matrix, feature_scale, mean_vector, CovarianceOptions};
    use crate::eigen::eigen_decompose;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn build_reference(data: &Array2<f64>, correlation: bool) -> ReferenceArtifact {
        let mean = mean_vector(data.view()).unwrap();
        let cov = covariance_matrix(data.view(), &mean, &CovarianceOptions::covariance()).unwrap();
        let (matrix, scale) = if correlation {
            let options = CovarianceOptions::correlation();
            (covariance_matrix(data.view(), &mean, &options).unwrap(), Some(feature_scale(&cov).unwrap()))
        } else {
            (cov, None)
        };
        let eig = eigen_decompose(&matrix).unwrap();
        ReferenceArtifact {
            mean,
            eigenvalues: eig.eigenvalues,
            eigenvectors: eig.eigenvectors,
            feature_scale: scale,
        }
    }

    fn sample() -> Array2<f64> {
        array![
            [2.5, 2.4, 0.5],
            [0.5, 0.7, 1.5],
            [2.2, 2.9, 0.9],
            [1.9, 2.2, 1.1],
            [3.1, 3.0, 0.2],
            [2.3, 2.7, 0.8],
            [2.0, 1.6, 1.7]
        ]
    }

    fn score_covariance(scores: &Array2<f64>) -> Array2<f64> {
        let mean: Array1<f64> = scores.mean_axis(ndarray::Axis(0)).unwrap();
        let centered = scores - &mean;
        centered.t().dot(&centered) / scores.nrows() as f64
    }

    #[test]
    fn scenario_second_component_scores_are_zero() {
        let data = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let reference = build_reference(&data, false);
        assert_eq!(reference.mean, array![3.0, 4.0]);
        let scores = project_scores(&reference, &data, 10).unwrap();
        assert_eq!(scores.dim(), (3, 2));
        for v in scores.column(1) {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
        let r = 2.0 * 2f64.sqrt();
        assert_abs_diff_eq!(scores[[0, 0]].abs(), r, epsilon = 1e-12);
        assert_abs_diff_eq!(scores[[1, 0]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn self_projection_decorrelates_with_eigenvalues_on_diagonal() {
        for correlation in [false, true] {
            let data = sample();
            let reference = build_reference(&data, correlation);
            let scores = project_scores(&reference, &data, 3).unwrap();
            let cov = score_covariance(&scores);
            for ((i, j), v) in cov.indexed_iter() {
                let expected = if i == j { reference.eigenvalues[i] } else { 0.0 };
                assert_abs_diff_eq!(*v, expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn component_count_is_clamped() {
        let data = sample();
        let reference = build_reference(&data, false);
        assert_eq!(project_scores(&reference, &data, 2).unwrap().dim(), (7, 2));
        assert_eq!(project_scores(&reference, &data, 50).unwrap().dim(), (7, 3));
        assert_eq!(project_scores(&reference, &data, 0).unwrap().dim(), (7, 0));
    }

    #[test]
    fn extra_column_is_a_feature_count_mismatch() {
        let reference = build_reference(&sample(), false);
        let wide = Array2::<f64>::zeros((2, 4));
        match project_scores(&reference, &wide, 3) {
            Err(SigqcPcaError::FeatureCountMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scores_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        let serials = vec!["SN1".to_string(), "SN2".to_string()];
        let scores = array![[1.5, -2.0], [0.0, 0.25]];
        write_pc_scores_csv(&path, &serials, &scores).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Serial Number,PC1,PC2", "SN1,1.5,-2", "SN2,0,0.25"]);

        assert!(matches!(
            write_pc_scores_csv(&path, &serials[..1], &scores),
            Err(SigqcPcaError::InvalidDataset(_))
        ));
    }
}
