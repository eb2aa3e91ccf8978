//! The two batch operations: build and save a reference basis from good
//! units, then score test units against it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::covariance::{covariance_matrix, feature_scale, mean_vector, CovarianceOptions, MatrixKind, Scaling};
use crate::dataset::{load_dataset, InputType};
use crate::eigen::{cumulative_proportion_of_variance, eigen_decompose, total_variance};
use crate::error::Result;
use crate::projection::{project_scores, write_pc_scores_csv};
use crate::reference::ReferenceArtifact;
use crate::report::{generate_report, sibling, ReportInput};

/// Title used in reports when the dataset carries no product name.
const DEFAULT_REPORT_TITLE: &str = "SigQC";

/// Parameters of [`store_reference_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreReferenceConfig {
    /// Dataset of known-good units.
    pub reference_file_path: PathBuf,
    /// `"ascii"` or `"unit"`, case-insensitive.
    pub input_type: String,
    /// Directory the artifact is written to.
    pub output_path: PathBuf,
    pub output_name: String,
    /// Decompose the correlation matrix instead of the covariance matrix.
    pub use_correlation: bool,
    pub scaling: Scaling,
}

impl Default for StoreReferenceConfig {
    fn default() -> Self {
        StoreReferenceConfig {
            reference_file_path: PathBuf::new(),
            input_type: "ascii".to_string(),
            output_path: PathBuf::from("."),
            output_name: "ReferenceData.csv".to_string(),
            use_correlation: false,
            scaling: Scaling::ByUnitCount,
        }
    }
}

/// Parameters of [`implement_pca`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplementPcaConfig {
    /// Artifact written by [`store_reference_data`].
    pub reference_file_path: PathBuf,
    /// Dataset of units to score.
    pub test_file_path: PathBuf,
    /// `"ascii"` or `"unit"`, case-insensitive.
    pub input_type: String,
    /// Output stem; `<output_name>.csv` and the report files are written next to it.
    pub output_name: String,
    pub generate_report: bool,
    /// Number of leading components to keep; clamped to the feature count.
    pub n_pcs: usize,
}

impl Default for ImplementPcaConfig {
    fn default() -> Self {
        ImplementPcaConfig {
            reference_file_path: PathBuf::new(),
            test_file_path: PathBuf::new(),
            input_type: "ascii".to_string(),
            output_name: "PCA_Results".to_string(),
            generate_report: true,
            n_pcs: 10,
        }
    }
}

/// What [`implement_pca`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaRunSummary {
    pub scores_path: PathBuf,
    /// `None` when the report was not requested or could not be generated.
    pub report_path: Option<PathBuf>,
    pub n_units: usize,
    pub n_components: usize,
}

/// Mean, eigenpairs and (in correlation mode) feature scale of `dataset`.
///
/// # Errors
/// `InvalidDataset` for an empty dataset, `DegenerateFeature` for a
/// zero-variance feature in correlation mode, `Linalg` if the solver fails.
pub fn build_reference(dataset: ArrayView2<f64>, use_correlation: bool, scaling: Scaling) -> Result<ReferenceArtifact> {
    let mean = mean_vector(dataset)?;
    let options = CovarianceOptions::covariance().with_scaling(scaling);
    let covariance = covariance_matrix(dataset, &mean, &options)?;

    let (matrix, scale) = if use_correlation {
        let options = CovarianceOptions {
            kind: MatrixKind::Correlation,
            ..options
        };
        let scale = feature_scale(&covariance)?;
        (covariance_matrix(dataset, &mean, &options)?, Some(scale))
    } else {
        (covariance, None)
    };

    let eig = eigen_decompose(&matrix)?;
    info!(
        "Reference basis: {} features, total variance {:.6e}, first component explains {:.2}%",
        eig.eigenvalues.len(),
        total_variance(&eig.eigenvalues),
        cumulative_proportion_of_variance(&eig.eigenvalues, 1) * 100.0
    );
    Ok(ReferenceArtifact {
        mean,
        eigenvalues: eig.eigenvalues,
        eigenvectors: eig.eigenvectors,
        feature_scale: scale,
    })
}

/// Builds the reference basis from a file of known-good units and saves it to
/// `<output_path>/<output_name>`. Returns the path written.
///
/// The input type is checked before anything is read or written.
pub fn store_reference_data(config: &StoreReferenceConfig) -> Result<PathBuf> {
    let input_type: InputType = config.input_type.parse()?;
    let start = Instant::now();

    let dataset = load_dataset(&config.reference_file_path, input_type)?;
    let artifact = build_reference(dataset.matrix.view(), config.use_correlation, config.scaling)?;

    let out = config.output_path.join(&config.output_name);
    artifact.write_to_path(&out)?;
    info!(
        "Stored reference data for {} units in {:?}",
        dataset.n_units(),
        start.elapsed()
    );
    Ok(out)
}

/// Scores the units in the test file against a stored reference basis and
/// writes `<output_name>.csv`, then (optionally) the report.
///
/// Report failures do not fail the run; they are logged and leave
/// `report_path` empty.
pub fn implement_pca(config: &ImplementPcaConfig) -> Result<PcaRunSummary> {
    let input_type: InputType = config.input_type.parse()?;
    let start = Instant::now();

    let reference = ReferenceArtifact::read_from_path(&config.reference_file_path)?;
    let dataset = load_dataset(&config.test_file_path, input_type)?;
    let scores = project_scores(&reference, &dataset.matrix, config.n_pcs)?;

    let stem = Path::new(&config.output_name);
    let scores_path = sibling(stem, ".csv");
    write_pc_scores_csv(&scores_path, &dataset.serial_numbers, &scores)?;

    let report_path = if config.generate_report {
        let input = ReportInput {
            title: dataset.product_name.as_deref().unwrap_or(DEFAULT_REPORT_TITLE),
            serial_numbers: &dataset.serial_numbers,
            scores: &scores,
            eigenvalues: &reference.eigenvalues,
        };
        match generate_report(stem, &input, config.n_pcs) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Report generation failed, PC scores were still written: {}", e);
                None
            }
        }
    } else {
        None
    };

    info!(
        "Scored {} units on {} components in {:?}",
        dataset.n_units(),
        scores.ncols(),
        start.elapsed()
    );
    Ok(PcaRunSummary {
        scores_path,
        report_path,
        n_units: dataset.n_units(),
        n_components: scores.ncols(),
    })
}
