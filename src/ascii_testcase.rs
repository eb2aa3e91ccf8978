//! Reader for SigQC "Test Case Data (ASCII) Export" files.
//!
//! The file is comma separated with rows of varying length. Sections are
//! opened by a row containing a marker cell:
//!
//! - `BEGINHEADER` … `ENDHEADER`: product, acceptance test and case names,
//!   data source, function type, element count, an unused row, x and y units
//!   (one value per row).
//! - `BEGINDATA` … `ENDDATA`: a label row (two label cells then one domain
//!   value per feature), then `serial, timestamp, value...` per unit. A data
//!   block belongs to the most recent header.
//! - `BEGINLIMITS` … `ENDLIMITS`: domain row, lower limits, upper limits.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use ndarray::{concatenate, Array2, ArrayView2, Axis};

use crate::dataset::{parse_measurement, Dataset};
use crate::error::{Result, SigqcPcaError};

const BEGIN_HEADER: &str = "BEGINHEADER";
const END_HEADER: &str = "ENDHEADER";
const BEGIN_DATA: &str = "BEGINDATA";
const END_DATA: &str = "ENDDATA";
const BEGIN_LIMITS: &str = "BEGINLIMITS";
const END_LIMITS: &str = "ENDLIMITS";

/// Test-case identification and units from a header section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsciiHeader {
    pub product_name: String,
    pub test_name: String,
    pub case_name: String,
    pub data_source: Option<String>,
    pub function_type: Option<String>,
    /// Declared number of samples.
    pub elements: Option<usize>,
    pub x_units: Option<String>,
    pub y_units: Option<String>,
}

/// Measurements of every unit for one test case.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiMatrix {
    /// Index into [`AsciiTestCaseFile::headers`] of the header this block follows.
    pub header_index: Option<usize>,
    pub serial_numbers: Vec<String>,
    pub timestamps: Vec<String>,
    /// Domain value labels, one per column of `values`.
    pub x_values: Vec<String>,
    /// Shape (n_units, n_domain_values).
    pub values: Array2<f64>,
}

/// Lower and upper limits for one test case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsciiLimits {
    pub domains: Vec<String>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Parsed content of an ASCII test-case export.
#[derive(Debug, Clone, Default)]
pub struct AsciiTestCaseFile {
    headers: Vec<AsciiHeader>,
    matrices: Vec<AsciiMatrix>,
    limits: Vec<AsciiLimits>,
}

struct Row {
    line: u64,
    cells: Vec<String>,
}

impl Row {
    fn has_marker(&self, marker: &str) -> bool {
        self.cells.iter().any(|c| c == marker)
    }

    fn joined(&self) -> String {
        self.cells.concat()
    }
}

/// Cursor over the rows of the file, in the spirit of a CSV reader's `next`.
struct Rows {
    rows: Vec<Row>,
    pos: usize,
}

impl Rows {
    fn next_row(&mut self, context: &str) -> Result<&Row> {
        let row = self.rows.get(self.pos).ok_or_else(|| {
            SigqcPcaError::invalid_dataset(format!("unexpected end of file inside {context} section"))
        })?;
        self.pos += 1;
        Ok(row)
    }
}

impl AsciiTestCaseFile {
    /// Reads and parses the file at `path`.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SigqcPcaError::io(path, e))?;
        Self::from_reader(file)
    }

    /// Parses an export from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            rows.push(Row {
                line,
                cells: record.iter().map(str::to_string).collect(),
            });
        }

        let mut cursor = Rows { rows, pos: 0 };
        let mut parsed = AsciiTestCaseFile::default();
        while cursor.pos < cursor.rows.len() {
            let row = &cursor.rows[cursor.pos];
            let (header, data, limits) = (
                row.has_marker(BEGIN_HEADER),
                row.has_marker(BEGIN_DATA),
                row.has_marker(BEGIN_LIMITS),
            );
            cursor.pos += 1;
            if header {
                let header = read_header(&mut cursor)?;
                debug!("Read header for case '{}'", header.case_name);
                parsed.headers.push(header);
            } else if data {
                let header_index = parsed.headers.len().checked_sub(1);
                parsed.matrices.push(read_matrix(&mut cursor, header_index)?);
            } else if limits {
                parsed.limits.push(read_limits(&mut cursor)?);
            }
        }
        Ok(parsed)
    }

    pub fn headers(&self) -> &[AsciiHeader] {
        &self.headers
    }

    pub fn test_case_count(&self) -> usize {
        self.matrices.len()
    }

    pub fn matrix_at(&self, index: usize) -> Option<&AsciiMatrix> {
        self.matrices.get(index)
    }

    /// Header of the test case at `index`.
    pub fn header_of(&self, index: usize) -> Option<&AsciiHeader> {
        self.matrices
            .get(index)
            .and_then(|m| m.header_index)
            .and_then(|h| self.headers.get(h))
    }

    pub fn limits_at(&self, index: usize) -> Option<&AsciiLimits> {
        self.limits.get(index)
    }

    /// Smallest and largest feature count over all test cases.
    pub fn min_max_features(&self) -> Option<(usize, usize)> {
        min_max(self.matrices.iter().map(|m| m.values.ncols()))
    }

    /// Smallest and largest unit count over all test cases.
    pub fn min_max_units(&self) -> Option<(usize, usize)> {
        min_max(self.matrices.iter().map(|m| m.values.nrows()))
    }

    /// Stacks every test case horizontally, in file order, into one dataset.
    ///
    /// Serial numbers come from the first test case. Feature names are
    /// `"<case name> <domain value>"`.
    ///
    /// # Errors
    /// `InvalidDataset` when the file has no data section or test cases differ
    /// in unit count.
    pub fn to_dataset(&self) -> Result<Dataset> {
        let first = self
            .matrices
            .first()
            .ok_or_else(|| SigqcPcaError::invalid_dataset("file contains no BEGINDATA section"))?;
        let n_units = first.values.nrows();

        let mut feature_names = Vec::new();
        for (i, matrix) in self.matrices.iter().enumerate() {
            if matrix.values.nrows() != n_units {
                return Err(SigqcPcaError::invalid_dataset(format!(
                    "test case {} has {} units, test case 1 has {}",
                    i + 1,
                    matrix.values.nrows(),
                    n_units
                )));
            }
            if matrix.serial_numbers != first.serial_numbers {
                warn!(
                    "Serial numbers of test case {} differ from test case 1; rows are stacked by position.",
                    i + 1
                );
            }
            let case_name = self.header_of(i).map_or("", |h| h.case_name.as_str());
            feature_names.extend(matrix.x_values.iter().map(|x| format!("{case_name} {x}")));
        }

        let views: Vec<ArrayView2<f64>> = self.matrices.iter().map(|m| m.values.view()).collect();
        let stacked = concatenate(Axis(1), &views)
            .map_err(|e| SigqcPcaError::invalid_dataset(format!("failed to stack test cases: {e}")))?;

        Dataset::new(
            stacked,
            first.serial_numbers.clone(),
            feature_names,
            self.headers.first().map(|h| h.product_name.clone()),
        )
    }
}

fn min_max<I: Iterator<Item = usize>>(counts: I) -> Option<(usize, usize)> {
    counts.fold(None, |acc, c| match acc {
        None => Some((c, c)),
        Some((lo, hi)) => Some((lo.min(c), hi.max(c))),
    })
}

fn read_header(cursor: &mut Rows) -> Result<AsciiHeader> {
    let mut fields: Vec<(u64, String)> = Vec::new();
    loop {
        let row = cursor.next_row(BEGIN_HEADER)?;
        if row.has_marker(END_HEADER) {
            break;
        }
        fields.push((row.line, row.joined()));
    }
    if fields.len() < 3 {
        return Err(SigqcPcaError::invalid_dataset(format!(
            "header has {} rows, expected product, test and case names",
            fields.len()
        )));
    }
    let optional = |i: usize| fields.get(i).map(|(_, s)| s).filter(|s| !s.is_empty()).cloned();
    let elements = match fields.get(5) {
        Some((_, s)) if s.trim().is_empty() => None,
        Some((line, s)) => Some(s.trim().parse::<usize>().map_err(|_| {
            SigqcPcaError::invalid_dataset(format!("line {line}: element count '{s}' is not a whole number"))
        })?),
        None => None,
    };
    Ok(AsciiHeader {
        product_name: fields[0].1.clone(),
        test_name: fields[1].1.clone(),
        case_name: fields[2].1.clone(),
        data_source: optional(3),
        function_type: optional(4),
        elements,
        // Row 6 is not used by SigQC consumers.
        x_units: optional(7),
        y_units: optional(8),
    })
}

fn read_matrix(cursor: &mut Rows, header_index: Option<usize>) -> Result<AsciiMatrix> {
    let labels = cursor.next_row(BEGIN_DATA)?;
    let mut x_values: Vec<String> = labels.cells.iter().skip(2).cloned().collect();
    while x_values.last().map_or(false, |x| x.is_empty()) {
        x_values.pop();
    }
    let n_x = x_values.len();
    if n_x == 0 {
        return Err(SigqcPcaError::invalid_dataset(format!(
            "line {}: data section has no domain values",
            labels.line
        )));
    }

    let mut serial_numbers = Vec::new();
    let mut timestamps = Vec::new();
    let mut flat = Vec::new();
    loop {
        let row = cursor.next_row(BEGIN_DATA)?;
        if row.has_marker(END_DATA) {
            break;
        }
        if row.cells.len() < 2 + n_x || row.cells[2 + n_x..].iter().any(|c| !c.is_empty()) {
            return Err(SigqcPcaError::invalid_dataset(format!(
                "line {}: expected {} values, found {}",
                row.line,
                n_x,
                row.cells.len().saturating_sub(2)
            )));
        }
        serial_numbers.push(row.cells[0].clone());
        timestamps.push(row.cells[1].clone());
        for (j, cell) in row.cells[2..2 + n_x].iter().enumerate() {
            flat.push(parse_measurement(cell, row.line, j + 2)?);
        }
    }

    let values = Array2::from_shape_vec((serial_numbers.len(), n_x), flat)
        .map_err(|e| SigqcPcaError::invalid_dataset(format!("data section shape: {e}")))?;
    Ok(AsciiMatrix {
        header_index,
        serial_numbers,
        timestamps,
        x_values,
        values,
    })
}

fn read_limits(cursor: &mut Rows) -> Result<AsciiLimits> {
    let numeric = |row: &Row| -> Vec<f64> {
        row.cells
            .iter()
            .filter_map(|c| c.parse::<f64>().ok())
            .collect()
    };
    let domains = cursor.next_row(BEGIN_LIMITS)?.cells.clone();
    let lower = numeric(cursor.next_row(BEGIN_LIMITS)?);
    let upper = numeric(cursor.next_row(BEGIN_LIMITS)?);
    loop {
        if cursor.next_row(BEGIN_LIMITS)?.has_marker(END_LIMITS) {
            break;
        }
    }
    Ok(AsciiLimits { domains, lower, upper })
}
