//! Unit×feature datasets read from SigQC exports.
//!
//! Two source formats are supported, chosen by a case-insensitive type flag:
//! - `"ascii"`: a Test Case Data (ASCII) export, one data block per test case
//!   ([`crate::ascii_testcase`]); blocks are stacked horizontally in file order.
//! - `"unit"`: a Unit Data export, one combined table ([`crate::unit_data`]).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::ascii_testcase::AsciiTestCaseFile;
use crate::error::{Result, SigqcPcaError};
use crate::unit_data::UnitDataFile;

/// Placeholder SigQC writes for a missing measurement.
pub const MISSING_VALUE_PLACEHOLDER: &str = "--------";

/// Source format of a dataset file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    Ascii,
    Unit,
}

impl FromStr for InputType {
    type Err = SigqcPcaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(InputType::Ascii),
            "unit" => Ok(InputType::Unit),
            _ => Err(SigqcPcaError::UnsupportedInputType(s.to_string())),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputType::Ascii => write!(f, "ascii"),
            InputType::Unit => write!(f, "unit"),
        }
    }
}

/// A dataset matrix with its row and column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Shape (n_units, n_features).
    pub matrix: Array2<f64>,
    /// One serial number per row.
    pub serial_numbers: Vec<String>,
    /// One name per column.
    pub feature_names: Vec<String>,
    /// Product name from the first test-case header, when the source has one.
    pub product_name: Option<String>,
}

impl Dataset {
    /// Builds a dataset, checking that the labels fit the matrix.
    pub fn new(
        matrix: Array2<f64>,
        serial_numbers: Vec<String>,
        feature_names: Vec<String>,
        product_name: Option<String>,
    ) -> Result<Self> {
        if serial_numbers.len() != matrix.nrows() {
            return Err(SigqcPcaError::invalid_dataset(format!(
                "{} serial numbers for {} units",
                serial_numbers.len(),
                matrix.nrows()
            )));
        }
        if feature_names.len() != matrix.ncols() {
            return Err(SigqcPcaError::invalid_dataset(format!(
                "{} feature names for {} features",
                feature_names.len(),
                matrix.ncols()
            )));
        }
        Ok(Self {
            matrix,
            serial_numbers,
            feature_names,
            product_name,
        })
    }

    pub fn n_units(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Reads `path` as the given source format.
pub fn load_dataset<P: AsRef<Path>>(path: P, input_type: InputType) -> Result<Dataset> {
    let path = path.as_ref();
    let dataset = match input_type {
        InputType::Ascii => AsciiTestCaseFile::read(path)?.to_dataset()?,
        InputType::Unit => UnitDataFile::read(path)?.to_dataset()?,
    };
    info!(
        "Loaded {} dataset {} with {} units x {} features",
        input_type,
        path.display(),
        dataset.n_units(),
        dataset.n_features()
    );
    Ok(dataset)
}

/// Parses one measurement cell. Empty cells and the SigQC placeholder read as 0.0.
pub(crate) fn parse_measurement(cell: &str, line: u64, column: usize) -> Result<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell == MISSING_VALUE_PLACEHOLDER {
        return Ok(0.0);
    }
    cell.parse::<f64>().map_err(|_| {
        SigqcPcaError::invalid_dataset(format!(
            "line {line}, column {}: '{cell}' is not a number",
            column + 1
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn input_type_is_case_insensitive() {
        assert_eq!("ascii".parse::<InputType>().unwrap(), InputType::Ascii);
        assert_eq!("ASCII".parse::<InputType>().unwrap(), InputType::Ascii);
        assert_eq!("Unit".parse::<InputType>().unwrap(), InputType::Unit);
    }

    #[test]
    fn unknown_input_type_is_rejected() {
        match "xml".parse::<InputType>() {
            Err(SigqcPcaError::UnsupportedInputType(t)) => assert_eq!(t, "xml"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn measurement_placeholders() {
        assert_eq!(parse_measurement("--------", 1, 0).unwrap(), 0.0);
        assert_eq!(parse_measurement(" ", 1, 0).unwrap(), 0.0);
        assert_eq!(parse_measurement(" 1.5e-3 ", 1, 0).unwrap(), 1.5e-3);
        assert!(matches!(
            parse_measurement("abc", 4, 2),
            Err(SigqcPcaError::InvalidDataset(msg)) if msg.contains("line 4, column 3")
        ));
    }

    #[test]
    fn labels_must_fit_matrix() {
        let m = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(Dataset::new(m.clone(), vec!["a".into()], vec!["x".into(), "y".into()], None).is_err());
        assert!(Dataset::new(m.clone(), vec!["a".into(), "b".into()], vec!["x".into()], None).is_err());
        let ds = Dataset::new(m, vec!["a".into(), "b".into()], vec!["x".into(), "y".into()], None).unwrap();
        assert_eq!((ds.n_units(), ds.n_features()), (2, 2));
    }
}
