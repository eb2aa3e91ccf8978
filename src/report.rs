//! PC score figures and the Markdown report that links them.
//!
//! Figures are SVG files rendered with `plotters`; every file is written next
//! to the report and named after the report's output stem.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{Array1, Array2};
use plotters::prelude::*;

use crate::eigen::cumulative_proportion_of_variance;
use crate::error::{Result, SigqcPcaError};

const FIGURE_SIZE: (u32, u32) = (640, 480);

type PlotResult<T> = std::result::Result<T, Box<dyn Error>>;

/// Everything the report shows about one projected dataset.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    /// Used in the section header; usually the product name.
    pub title: &'a str,
    pub serial_numbers: &'a [String],
    /// Shape (n_units, n_components).
    pub scores: &'a Array2<f64>,
    /// All reference eigenvalues, descending.
    pub eigenvalues: &'a Array1<f64>,
}

/// Renders every figure for the first `n_pcs` components and writes
/// `<stem>.md`. Returns the report path.
///
/// # Errors
/// `Report` when there is nothing to plot or a figure cannot be drawn, `Io`
/// when the Markdown file cannot be written.
pub fn generate_report(output_stem: &Path, input: &ReportInput<'_>, n_pcs: usize) -> Result<PathBuf> {
    let n = n_pcs.min(input.scores.ncols());
    if n == 0 || input.scores.nrows() == 0 {
        return Err(SigqcPcaError::Report(format!(
            "nothing to plot: {} units, {} components",
            input.scores.nrows(),
            n
        )));
    }
    let scores = input.scores.slice(ndarray::s![.., ..n]).to_owned();

    let mut figures = plot_pc_scores(output_stem, &format!("{} PC Scores", input.title), &scores)?;
    figures.push(plot_pc_boxplot(output_stem, &scores)?);
    figures.push(plot_cumulative_variance(output_stem, input.eigenvalues, n)?);

    let report_path = sibling(output_stem, ".md");
    fs::write(&report_path, render_markdown(input.title, input.serial_numbers, &figures))
        .map_err(|e| SigqcPcaError::io(&report_path, e))?;
    info!("Wrote report with {} figures to {}", figures.len(), report_path.display());
    Ok(report_path)
}

/// Scatter plots of PC i against PC i+1 for consecutive pairs. A single
/// component is plotted against the unit index instead.
pub fn plot_pc_scores(output_stem: &Path, title: &str, scores: &Array2<f64>) -> Result<Vec<PathBuf>> {
    let n = scores.ncols();
    let mut paths = Vec::new();
    if n == 1 {
        let points: Vec<(f64, f64)> = scores
            .column(0)
            .iter()
            .enumerate()
            .map(|(i, &y)| ((i + 1) as f64, y))
            .collect();
        let path = sibling(output_stem, "_PCScores1.svg");
        draw_scatter(&path, title, "Unit", "PC1", &points).map_err(report_error)?;
        paths.push(path);
        return Ok(paths);
    }
    for i in 0..n - 1 {
        let points: Vec<(f64, f64)> = scores
            .column(i)
            .iter()
            .zip(scores.column(i + 1))
            .map(|(&x, &y)| (x, y))
            .collect();
        let path = sibling(output_stem, &format!("_PCScores{}-{}.svg", i + 1, i + 2));
        let (x_desc, y_desc) = (format!("PC{}", i + 1), format!("PC{}", i + 2));
        draw_scatter(&path, title, &x_desc, &y_desc, &points).map_err(report_error)?;
        paths.push(path);
    }
    Ok(paths)
}

/// One horizontal box per component, PC1 at the bottom.
pub fn plot_pc_boxplot(output_stem: &Path, scores: &Array2<f64>) -> Result<PathBuf> {
    let path = sibling(output_stem, "_Boxplot.svg");
    draw_boxplot(&path, scores).map_err(report_error)?;
    Ok(path)
}

/// Bar chart of the variance explained by the first 1..=n components together.
pub fn plot_cumulative_variance(output_stem: &Path, eigenvalues: &Array1<f64>, n: usize) -> Result<PathBuf> {
    let path = sibling(output_stem, "_VarianceExplained.svg");
    let bars: Vec<f64> = (1..=n)
        .map(|j| cumulative_proportion_of_variance(eigenvalues, j))
        .collect();
    draw_bars(&path, &bars).map_err(report_error)?;
    Ok(path)
}

fn report_error(e: Box<dyn Error>) -> SigqcPcaError {
    SigqcPcaError::Report(e.to_string())
}

/// `<stem><suffix>` in the stem's directory.
pub(crate) fn sibling(stem: &Path, suffix: &str) -> PathBuf {
    let name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.with_file_name(format!("{name}{suffix}"))
}

/// Padded axis bounds that never collapse to an empty range.
fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    (lo - pad, hi + pad)
}

fn draw_scatter(path: &Path, title: &str, x_desc: &str, y_desc: &str, points: &[(f64, f64)]) -> PlotResult<()> {
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let (x0, x1) = padded_range(points.iter().map(|p| p.0));
    let (y0, y1) = padded_range(points.iter().map(|p| p.1));

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;
    chart.configure_mesh().x_desc(x_desc).y_desc(y_desc).draw()?;
    chart.draw_series(
        points
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 4, BLUE.mix(0.6).filled())),
    )?;
    root.present()?;
    debug!("Drew {} points to {}", points.len(), path.display());
    Ok(())
}

fn draw_boxplot(path: &Path, scores: &Array2<f64>) -> PlotResult<()> {
    let n = scores.ncols();
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let (x0, x1) = padded_range(scores.iter().copied());

    let mut chart = ChartBuilder::on(&root)
        .caption("Boxplot of PC Scores", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0 as f32..x1 as f32, 0.5f64..n as f64 + 0.5)?;
    chart
        .configure_mesh()
        .x_desc("PC Score")
        .y_desc("PC")
        .y_labels(n)
        .y_label_formatter(&|y: &f64| {
            if (y - y.round()).abs() < 1e-6 {
                format!("PC{}", y.round() as usize)
            } else {
                String::new()
            }
        })
        .draw()?;

    let boxes: Vec<Boxplot<f64, _>> = scores
        .columns()
        .into_iter()
        .enumerate()
        .map(|(i, column)| {
            let values = column.to_vec();
            let quartiles = Quartiles::new(&values);
            Boxplot::new_horizontal((i + 1) as f64, &quartiles)
                .width(20)
                .whisker_width(0.5)
                .style(BLUE)
        })
        .collect();
    chart.draw_series(boxes)?;
    root.present()?;
    Ok(())
}

fn draw_bars(path: &Path, bars: &[f64]) -> PlotResult<()> {
    let n = bars.len();
    let root = SVGBackend::new(path, FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cumulative Proportion of Variance Explained", ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.5f64..n as f64 + 0.5, 0f64..1.05)?;
    chart
        .configure_mesh()
        .y_desc("Proportion of Total Variance")
        .x_labels(n)
        .x_label_formatter(&|x: &f64| {
            if (x - x.round()).abs() < 1e-6 {
                format!("PC{}", x.round() as usize)
            } else {
                String::new()
            }
        })
        .draw()?;
    chart.draw_series(bars.iter().enumerate().map(|(i, &v)| {
        let x = (i + 1) as f64;
        Rectangle::new([(x - 0.4, 0.0), (x + 0.4, v)], GREEN.filled())
    }))?;
    root.present()?;
    Ok(())
}

/// The report body: one section with the tested units and every figure.
pub fn render_markdown(title: &str, serial_numbers: &[String], figures: &[PathBuf]) -> String {
    let mut out = format!("# {title} PC Scores: Principal Component Boxplot\n\n");
    out.push_str(&format!("Unit(s) Tested: {}\n\n", serial_numbers.join(" , ")));
    for figure in figures {
        let name = figure
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(&format!("![{name}]({name})\n\n"));
    }
    out
}
