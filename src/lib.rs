// SigQC principal component scoring

#![doc = include_str!("../README.md")]

pub mod ascii_testcase;
pub mod covariance;
pub mod dataset;
pub mod eigen;
pub mod error;
pub mod hmethod;
pub mod linalg_backends;
pub mod projection;
pub mod reference;
pub mod report;
pub mod unit_data;
pub mod workflow;

pub use covariance::{Centering, CovarianceOptions, MatrixKind, Scaling};
pub use dataset::{load_dataset, Dataset, InputType};
pub use eigen::{eigen_decompose, EigenDecomposition};
pub use error::{Result, SigqcPcaError};
pub use hmethod::{h_method, AngleUnits};
pub use projection::project_scores;
pub use reference::ReferenceArtifact;
pub use workflow::{
    build_reference, implement_pca, store_reference_data, ImplementPcaConfig, PcaRunSummary,
    StoreReferenceConfig,
};
