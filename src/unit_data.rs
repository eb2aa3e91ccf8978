//! Reader for SigQC Unit Data exports.
//!
//! Layout: the first row carries acceptance test names, the second row test
//! case names, both starting at the fourth column. Every following row is
//! `serial, date, time, value...`.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};

use crate::dataset::{parse_measurement, Dataset};
use crate::error::{Result, SigqcPcaError};

const LABEL_COLUMNS: usize = 3;

/// Parsed content of a unit data file.
#[derive(Debug, Clone)]
pub struct UnitDataFile {
    serial_numbers: Vec<String>,
    dates: Vec<String>,
    times: Vec<String>,
    test_names: Vec<String>,
    case_names: Vec<String>,
    case_data: Array2<f64>,
}

impl UnitDataFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_with_delimiter(path, b',')
    }

    pub fn read_with_delimiter<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SigqcPcaError::io(path, e))?;
        Self::from_reader(file, delimiter)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = csv_reader.records();

        let mut label_row = |what: &str| -> Result<Vec<String>> {
            let record = records
                .next()
                .ok_or_else(|| SigqcPcaError::invalid_dataset(format!("unit data file has no {what} row")))??;
            Ok(record.iter().skip(LABEL_COLUMNS).map(str::to_string).collect())
        };
        let test_names = label_row("test name")?;
        let case_names = label_row("case name")?;
        let n_cols = case_names.len();
        if n_cols == 0 || test_names.len() != n_cols {
            return Err(SigqcPcaError::invalid_dataset(format!(
                "{} test names for {} case names",
                test_names.len(),
                n_cols
            )));
        }

        let mut serial_numbers = Vec::new();
        let mut dates = Vec::new();
        let mut times = Vec::new();
        let mut flat = Vec::new();
        for record in records {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            if record.iter().all(str::is_empty) {
                continue;
            }
            if record.len() != LABEL_COLUMNS + n_cols {
                return Err(SigqcPcaError::invalid_dataset(format!(
                    "line {line}: expected {} values, found {}",
                    n_cols,
                    record.len().saturating_sub(LABEL_COLUMNS)
                )));
            }
            serial_numbers.push(record[0].to_string());
            dates.push(record[1].to_string());
            times.push(record[2].to_string());
            for (j, cell) in record.iter().enumerate().skip(LABEL_COLUMNS) {
                flat.push(parse_measurement(cell, line, j)?);
            }
        }

        let case_data = Array2::from_shape_vec((serial_numbers.len(), n_cols), flat)
            .map_err(|e| SigqcPcaError::invalid_dataset(format!("unit data shape: {e}")))?;
        Ok(Self {
            serial_numbers,
            dates,
            times,
            test_names,
            case_names,
            case_data,
        })
    }

    pub fn serial_numbers(&self) -> &[String] {
        &self.serial_numbers
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn times(&self) -> &[String] {
        &self.times
    }

    /// Acceptance test name of each column.
    pub fn test_names(&self) -> &[String] {
        &self.test_names
    }

    /// Test case name of each column.
    pub fn case_names(&self) -> &[String] {
        &self.case_names
    }

    /// Test names in order of first appearance.
    pub fn unique_test_names(&self) -> Vec<&str> {
        let mut unique: Vec<&str> = Vec::new();
        for name in &self.test_names {
            if !unique.contains(&name.as_str()) {
                unique.push(name);
            }
        }
        unique
    }

    /// Column index of the case identified by test and case name.
    pub fn index_of_case(&self, test_name: &str, case_name: &str) -> Option<usize> {
        self.test_names
            .iter()
            .zip(&self.case_names)
            .position(|(t, c)| t == test_name && c == case_name)
    }

    /// Values of one test case across all units.
    pub fn column(&self, test_name: &str, case_name: &str) -> Option<ArrayView1<'_, f64>> {
        self.index_of_case(test_name, case_name)
            .map(|j| self.case_data.index_axis(Axis(1), j))
    }

    /// Shape (n_units, n_cases).
    pub fn case_data_table(&self) -> &Array2<f64> {
        &self.case_data
    }

    /// The whole table as a dataset; feature names are the case names.
    pub fn to_dataset(&self) -> Result<Dataset> {
        if self.case_data.nrows() == 0 {
            return Err(SigqcPcaError::invalid_dataset("unit data file contains no units"));
        }
        Dataset::new(
            self.case_data.clone(),
            self.serial_numbers.clone(),
            self.case_names.clone(),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const SAMPLE: &str = "\
Serial,Date,Time,T1,T1,T2
,,,Gain,Phase,Gain
SN1,2024-01-01,08:00,1.0,2.0,3.0
SN2,2024-01-01,08:05,4.0,--------,6.0
";

    #[test]
    fn reads_labels_and_values() {
        let file = UnitDataFile::from_reader(SAMPLE.as_bytes(), b',').unwrap();
        assert_eq!(file.serial_numbers(), ["SN1", "SN2"]);
        assert_eq!(file.dates(), ["2024-01-01", "2024-01-01"]);
        assert_eq!(file.times(), ["08:00", "08:05"]);
        assert_eq!(file.test_names(), ["T1", "T1", "T2"]);
        assert_eq!(file.case_names(), ["Gain", "Phase", "Gain"]);
        assert_eq!(file.unique_test_names(), vec!["T1", "T2"]);
        assert_eq!(file.case_data_table(), &array![[1.0, 2.0, 3.0], [4.0, 0.0, 6.0]]);
    }

    #[test]
    fn cases_are_keyed_by_test_and_case_name() {
        let file = UnitDataFile::from_reader(SAMPLE.as_bytes(), b',').unwrap();
        assert_eq!(file.index_of_case("T2", "Gain"), Some(2));
        assert_eq!(file.index_of_case("T2", "Phase"), None);
        assert_eq!(file.column("T1", "Gain").unwrap().to_vec(), vec![1.0, 4.0]);
    }

    #[test]
    fn tab_delimited_input() {
        let tabbed = SAMPLE.replace(',', "\t");
        let file = UnitDataFile::from_reader(tabbed.as_bytes(), b'\t').unwrap();
        assert_eq!(file.case_data_table().dim(), (2, 3));
    }

    #[test]
    fn to_dataset_uses_case_names() {
        let ds = UnitDataFile::from_reader(SAMPLE.as_bytes(), b',')
            .unwrap()
            .to_dataset()
            .unwrap();
        assert_eq!(ds.feature_names, vec!["Gain", "Phase", "Gain"]);
        assert_eq!(ds.n_units(), 2);
        assert!(ds.product_name.is_none());
    }

    #[test]
    fn ragged_and_empty_files_are_rejected() {
        let ragged = format!("{SAMPLE}SN3,d,t,1.0\n");
        assert!(matches!(
            UnitDataFile::from_reader(ragged.as_bytes(), b','),
            Err(SigqcPcaError::InvalidDataset(_))
        ));
        let no_units = "a,b,c,T1\n,,,Gain\n";
        let file = UnitDataFile::from_reader(no_units.as_bytes(), b',').unwrap();
        assert!(file.to_dataset().is_err());
        assert!(UnitDataFile::from_reader("".as_bytes(), b',').is_err());
    }
}
