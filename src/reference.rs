//! The reference artifact: mean vector, eigenvalues and eigenvectors of a
//! baseline dataset, and its sentinel-delimited text format.
//!
//! ```text
//! BEGINAVGVECTOR
//! <comma-separated mean vector>
//! ENDAVGVECTOR
//! BEGINEVALS
//! <comma-separated eigenvalues>
//! ENDEVALS
//! BEGINEVECS
//! <one comma-separated row per eigenvector-matrix row>
//! ENDEVECS
//! ```
//!
//! Artifacts built from a correlation matrix also carry the feature scale used
//! to standardize the data, between the mean and eigenvalue sections:
//!
//! ```text
//! BEGINSTANDDEV
//! <comma-separated feature standard deviations>
//! ENDSTANDDEV
//! ISCORRMATRIX
//! True
//! ENDCORRMATRIX
//! ```
//!
//! Values are written with Rust's shortest round-trip float formatting, so a
//! write followed by a read reproduces every value bit for bit.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SigqcPcaError};

const BEGIN_AVG: &str = "BEGINAVGVECTOR";
const END_AVG: &str = "ENDAVGVECTOR";
const BEGIN_STD: &str = "BEGINSTANDDEV";
const END_STD: &str = "ENDSTANDDEV";
const BEGIN_CORR: &str = "ISCORRMATRIX";
const END_CORR: &str = "ENDCORRMATRIX";
const BEGIN_EVALS: &str = "BEGINEVALS";
const END_EVALS: &str = "ENDEVALS";
const BEGIN_EVECS: &str = "BEGINEVECS";
const END_EVECS: &str = "ENDEVECS";

/// Persisted PCA basis of a reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceArtifact {
    /// Mean of the reference dataset. Shape: (n_features)
    pub mean: Array1<f64>,
    /// Eigenvalues, descending. Shape: (n_features)
    pub eigenvalues: Array1<f64>,
    /// Column i is the eigenvector of `eigenvalues[i]`. Shape: (n_features, n_features)
    pub eigenvectors: Array2<f64>,
    /// Feature standard deviations; present only for correlation-mode artifacts.
    pub feature_scale: Option<Array1<f64>>,
}

impl ReferenceArtifact {
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// True when the basis was computed from a correlation matrix.
    pub fn is_correlation(&self) -> bool {
        self.feature_scale.is_some()
    }

    /// Saves the artifact in the sentinel-delimited text format.
    ///
    /// The file is created (or truncated) at `path`.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| SigqcPcaError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer).map_err(|e| SigqcPcaError::io(path, e))?;
        writer.flush().map_err(|e| SigqcPcaError::io(path, e))?;
        info!(
            "Wrote reference artifact with {} features to {}",
            self.n_features(),
            path.display()
        );
        Ok(())
    }

    /// Writes the text format to any writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "{BEGIN_AVG}")?;
        writeln!(writer, "{}", join_row(self.mean.iter()))?;
        writeln!(writer, "{END_AVG}")?;
        if let Some(scale) = &self.feature_scale {
            writeln!(writer, "{BEGIN_STD}")?;
            writeln!(writer, "{}", join_row(scale.iter()))?;
            writeln!(writer, "{END_STD}")?;
            writeln!(writer, "{BEGIN_CORR}")?;
            writeln!(writer, "True")?;
            writeln!(writer, "{END_CORR}")?;
        }
        writeln!(writer, "{BEGIN_EVALS}")?;
        writeln!(writer, "{}", join_row(self.eigenvalues.iter()))?;
        writeln!(writer, "{END_EVALS}")?;
        writeln!(writer, "{BEGIN_EVECS}")?;
        for row in self.eigenvectors.rows() {
            writeln!(writer, "{}", join_row(row.iter()))?;
        }
        writeln!(writer, "{END_EVECS}")?;
        Ok(())
    }

    /// Loads an artifact previously saved with [`ReferenceArtifact::write_to_path`].
    ///
    /// # Errors
    /// `Io` if the file cannot be opened, `CorruptReferenceFile` for any
    /// structural or numeric problem (see [`ReferenceArtifact::read_from`]).
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SigqcPcaError::io(path, e))?;
        let artifact = Self::read_from(BufReader::new(file))?;
        info!(
            "Loaded reference artifact with {} features from {}",
            artifact.n_features(),
            path.display()
        );
        Ok(artifact)
    }

    /// Parses the text format.
    ///
    /// Lines outside sections are ignored. A vector section uses the first line
    /// after its BEGIN marker; further lines up to the END marker are skipped.
    /// The eigenvector section stacks every line up to `ENDEVECS`.
    ///
    /// # Errors
    /// `CorruptReferenceFile` when a sentinel is missing, sections are out of
    /// order or repeated, a value is not a number, or the section lengths disagree.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut parser = Parser::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SigqcPcaError::corrupt(idx + 1, format!("unreadable line: {e}")))?;
            parser.feed(idx + 1, line.trim())?;
        }
        parser.finish()
    }

    /// Checks that all components describe the same feature space.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let n = self.mean.len();
        if n == 0 {
            return Err("mean vector is empty".to_string());
        }
        if self.eigenvalues.len() != n {
            return Err(format!(
                "eigenvalue count ({}) does not match mean vector length ({})",
                self.eigenvalues.len(),
                n
            ));
        }
        if self.eigenvectors.dim() != (n, n) {
            return Err(format!(
                "eigenvector matrix is {}x{}, expected {}x{}",
                self.eigenvectors.nrows(),
                self.eigenvectors.ncols(),
                n,
                n
            ));
        }
        if let Some(scale) = &self.feature_scale {
            if scale.len() != n {
                return Err(format!(
                    "standard deviation count ({}) does not match mean vector length ({})",
                    scale.len(),
                    n
                ));
            }
            if scale.iter().any(|&s| !s.is_finite() || s <= 0.0) {
                return Err("standard deviations must be positive and finite".to_string());
            }
        }
        let non_finite = if self.mean.iter().any(|v| !v.is_finite()) {
            Some("mean vector")
        } else if self.eigenvalues.iter().any(|v| !v.is_finite()) {
            Some("eigenvalues")
        } else if self.eigenvectors.iter().any(|v| !v.is_finite()) {
            Some("eigenvectors")
        } else {
            None
        };
        if let Some(name) = non_finite {
            return Err(format!("{name} contain non-finite values"));
        }
        Ok(())
    }
}

fn join_row<'a, I: Iterator<Item = &'a f64>>(values: I) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

fn parse_row(line_no: usize, line: &str) -> Result<Vec<f64>> {
    line.split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                SigqcPcaError::corrupt(line_no, format!("'{field}' is not a number"))
            })
        })
        .collect()
}

/// Sections in the order the writer emits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    AvgVector,
    StandDev,
    CorrFlag,
    Evals,
    Evecs,
}

impl Section {
    fn from_begin(marker: &str) -> Option<Self> {
        match marker {
            BEGIN_AVG => Some(Section::AvgVector),
            BEGIN_STD => Some(Section::StandDev),
            BEGIN_CORR => Some(Section::CorrFlag),
            BEGIN_EVALS => Some(Section::Evals),
            BEGIN_EVECS => Some(Section::Evecs),
            _ => None,
        }
    }

    fn from_end(marker: &str) -> Option<Self> {
        match marker {
            END_AVG => Some(Section::AvgVector),
            END_STD => Some(Section::StandDev),
            END_CORR => Some(Section::CorrFlag),
            END_EVALS => Some(Section::Evals),
            END_EVECS => Some(Section::Evecs),
            _ => None,
        }
    }

    fn end_marker(self) -> &'static str {
        match self {
            Section::AvgVector => END_AVG,
            Section::StandDev => END_STD,
            Section::CorrFlag => END_CORR,
            Section::Evals => END_EVALS,
            Section::Evecs => END_EVECS,
        }
    }
}

#[derive(Default)]
struct Parser {
    /// Open section and whether its first data line has been consumed.
    open: Option<(Section, bool)>,
    last_closed: Option<Section>,
    mean: Option<Vec<f64>>,
    stddev: Option<Vec<f64>>,
    corr_flag: Option<bool>,
    evals: Option<Vec<f64>>,
    evec_rows: Vec<Vec<f64>>,
    evecs_done: bool,
    last_line: usize,
}

impl Parser {
    fn feed(&mut self, line_no: usize, line: &str) -> Result<()> {
        self.last_line = line_no;
        if let Some(section) = Section::from_begin(line) {
            if let Some((open, _)) = self.open {
                return Err(SigqcPcaError::corrupt(
                    line_no,
                    format!("{line} found before {}", open.end_marker()),
                ));
            }
            if self.last_closed.map_or(false, |closed| section <= closed) {
                return Err(SigqcPcaError::corrupt(line_no, format!("{line} is out of order")));
            }
            self.open = Some((section, false));
            return Ok(());
        }

        if let Some(section) = Section::from_end(line) {
            match self.open {
                Some((open, seen_data)) if open == section => {
                    if !seen_data && section != Section::Evecs {
                        return Err(SigqcPcaError::corrupt(line_no, format!("{line} closes an empty section")));
                    }
                    if section == Section::Evecs {
                        self.evecs_done = true;
                    }
                    self.open = None;
                    self.last_closed = Some(section);
                    Ok(())
                }
                _ => Err(SigqcPcaError::corrupt(line_no, format!("{line} without matching BEGIN marker"))),
            }
        } else {
            self.data_line(line_no, line)
        }
    }

    fn data_line(&mut self, line_no: usize, line: &str) -> Result<()> {
        let Some((section, seen_data)) = self.open else {
            // Outside any section.
            return Ok(());
        };
        if section == Section::Evecs {
            if line.is_empty() {
                return Ok(());
            }
            self.evec_rows.push(parse_row(line_no, line)?);
            return Ok(());
        }
        if seen_data {
            debug!("Skipping extra line {} inside {:?} section", line_no, section);
            return Ok(());
        }
        match section {
            Section::AvgVector => self.mean = Some(parse_row(line_no, line)?),
            Section::StandDev => self.stddev = Some(parse_row(line_no, line)?),
            Section::Evals => self.evals = Some(parse_row(line_no, line)?),
            Section::CorrFlag => {
                self.corr_flag = Some(match line {
                    "True" | "true" => true,
                    "False" | "false" => false,
                    other => {
                        return Err(SigqcPcaError::corrupt(
                            line_no,
                            format!("'{other}' is not a correlation flag"),
                        ))
                    }
                })
            }
            Section::Evecs => {}
        }
        self.open = Some((section, true));
        Ok(())
    }

    fn finish(self) -> Result<ReferenceArtifact> {
        let eof = self.last_line + 1;
        if let Some((open, _)) = self.open {
            return Err(SigqcPcaError::corrupt(eof, format!("missing {}", open.end_marker())));
        }
        let mean = self
            .mean
            .ok_or_else(|| SigqcPcaError::corrupt(eof, format!("missing {BEGIN_AVG} section")))?;
        let evals = self
            .evals
            .ok_or_else(|| SigqcPcaError::corrupt(eof, format!("missing {BEGIN_EVALS} section")))?;
        if !self.evecs_done {
            return Err(SigqcPcaError::corrupt(eof, format!("missing {BEGIN_EVECS} section")));
        }

        let feature_scale = match (self.corr_flag, self.stddev) {
            (Some(true), None) => {
                return Err(SigqcPcaError::corrupt(
                    eof,
                    format!("correlation flag set but no {BEGIN_STD} section"),
                ))
            }
            (Some(false), _) => None,
            (_, stddev) => stddev.map(Array1::from),
        };

        let n_rows = self.evec_rows.len();
        let n_cols = self.evec_rows.first().map_or(0, Vec::len);
        if self.evec_rows.iter().any(|row| row.len() != n_cols) {
            return Err(SigqcPcaError::corrupt(eof, "eigenvector rows have different lengths"));
        }
        let flat: Vec<f64> = self.evec_rows.into_iter().flatten().collect();
        let eigenvectors = Array2::from_shape_vec((n_rows, n_cols), flat)
            .map_err(|e| SigqcPcaError::corrupt(eof, format!("eigenvector matrix: {e}")))?;

        let artifact = ReferenceArtifact {
            mean: Array1::from(mean),
            eigenvalues: Array1::from(evals),
            eigenvectors,
            feature_scale,
        };
        artifact
            .validate()
            .map_err(|reason| SigqcPcaError::corrupt(eof, reason))?;
        Ok(artifact)
    }
}
