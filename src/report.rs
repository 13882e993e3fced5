//! Sweep reports: JSON summaries and elbow curve plots

use crate::bias_variance::{FoldResults, SweepMode};
use crate::error::{Result, SkmError};
use crate::elbow::KRange;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Scalar outcome of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldSummary {
    pub fold: usize,
    pub train_acc: f64,
    pub val_acc: f64,
    pub test_acc: Option<f64>,
    #[serde(default)]
    pub test_set_acc: Option<f64>,
    #[serde(default)]
    pub k_labels: Vec<usize>,
    pub k_vals: Vec<i64>,
    pub k_scores: Vec<Vec<f64>>,
}

/// Whole-sweep report written to `report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub mode: SweepMode,
    pub folds: Vec<FoldSummary>,
    pub mean_train_acc: f64,
    pub mean_val_acc: f64,
    pub mean_test_acc: Option<f64>,
    #[serde(default)]
    pub mean_test_set_acc: Option<f64>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn mean_present(values: Vec<Option<f64>>) -> Option<f64> {
    let present: Vec<f64> = values.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(mean(&present))
    }
}

impl SweepReport {
    pub fn from_results(results: &FoldResults, mode: &SweepMode) -> Self {
        let folds: Vec<FoldSummary> = results
            .records()
            .iter()
            .map(|r| FoldSummary {
                fold: r.fold,
                train_acc: r.train_acc,
                val_acc: r.val_acc,
                test_acc: r.test_acc,
                test_set_acc: r.test_set_acc,
                k_labels: r.k_labels.clone(),
                k_vals: r.k_vals.clone(),
                k_scores: r.k_scores.clone(),
            })
            .collect();
        Self {
            mode: mode.clone(),
            mean_train_acc: mean(&results.train_accs()),
            mean_val_acc: mean(&results.val_accs()),
            mean_test_acc: mean_present(results.test_accs()),
            mean_test_set_acc: mean_present(results.test_set_accs()),
            folds,
        }
    }

    /// Mean train accuracy minus mean validation accuracy
    pub fn generalization_gap(&self) -> f64 {
        self.mean_train_acc - self.mean_val_acc
    }
}

pub fn write_report(report: &SweepReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)
        .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))?;
    log::info!("report written to {}", path.display());
    Ok(())
}

pub fn read_report(path: &Path) -> Result<SweepReport> {
    let content = fs::read_to_string(path)
        .map_err(|e| SkmError::ExportError(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Plain-text fold table, for the terminal
pub fn format_summary(report: &SweepReport) -> String {
    let cell = |value: Option<f64>| {
        value
            .map(|t| format!("{:.3}", t))
            .unwrap_or_else(|| "  -  ".to_string())
    };
    let mut out = String::new();
    out.push_str("fold  train   val     test    set     k\n");
    for f in &report.folds {
        let k: Vec<String> = f
            .k_labels
            .iter()
            .zip(&f.k_vals)
            .map(|(label, k)| format!("{}:{}", label, k))
            .collect();
        out.push_str(&format!(
            "{:>4}  {:.3}   {:.3}   {}   {}   [{}]\n",
            f.fold,
            f.train_acc,
            f.val_acc,
            cell(f.test_acc),
            cell(f.test_set_acc),
            k.join(", ")
        ));
    }
    out.push_str(&format!(
        "mean  {:.3}   {:.3}   {}   {}\n",
        report.mean_train_acc,
        report.mean_val_acc,
        cell(report.mean_test_acc),
        cell(report.mean_test_set_acc)
    ));
    out
}

/// Plot one elbow curve as a PNG, marking the chosen k
pub fn plot_elbow_curve(
    range: &KRange,
    scores: &[f64],
    chosen_k: Option<usize>,
    title: &str,
    path: &Path,
) -> Result<()> {
    let ks = range.values();
    let points: Vec<(f64, f64)> = ks
        .iter()
        .zip(scores)
        .map(|(&k, &s)| (k as f64, s))
        .collect();
    if points.is_empty() {
        return Err(SkmError::ExportError(format!(
            "no scores to plot for {}",
            title
        )));
    }
    let x_max = points.last().map(|p| p.0).unwrap_or(1.0) + 1.0;
    let y_max = points.iter().map(|p| p.1).fold(0.0, f64::max) * 1.1 + f64::EPSILON;

    let root = BitMapBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| SkmError::ExportError(format!("Failed to fill plot background: {:?}", e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0f64..x_max, 0.0f64..y_max)
        .map_err(|e| SkmError::ExportError(format!("Failed to build chart: {:?}", e)))?;

    chart
        .configure_mesh()
        .x_desc("k")
        .y_desc("Sum of cosine distances")
        .draw()
        .map_err(|e| SkmError::ExportError(format!("Failed to draw mesh: {:?}", e)))?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
        .map_err(|e| SkmError::ExportError(format!("Failed to draw series: {:?}", e)))?;
    chart
        .draw_series(points.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))
        .map_err(|e| SkmError::ExportError(format!("Failed to draw points: {:?}", e)))?;

    if let Some(k) = chosen_k {
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(k as f64, 0.0), (k as f64, y_max)],
                &RED,
            )))
            .map_err(|e| SkmError::ExportError(format!("Failed to draw elbow: {:?}", e)))?;
    }

    root.present()
        .map_err(|e| SkmError::ExportError(format!("Failed to write {}: {:?}", path.display(), e)))?;
    Ok(())
}

/// `<dir>/elbow_val_<fold>_class_<label>.png`
pub fn elbow_plot_path(dir: &Path, fold: usize, label: usize) -> PathBuf {
    dir.join(format!("elbow_val_{:02}_class_{:02}.png", fold, label))
}

/// Elbow plots for every fold and class of a search sweep; returns the
/// written paths
pub fn plot_elbow_curves(results: &FoldResults, range: &KRange, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for record in results.records() {
        let entries = record.k_labels.iter().zip(&record.k_scores).zip(&record.k_vals);
        for ((label, scores), &k) in entries {
            if scores.is_empty() {
                continue;
            }
            let path = elbow_plot_path(dir, record.fold, *label);
            let chosen = usize::try_from(k).ok();
            plot_elbow_curve(
                range,
                scores,
                chosen,
                &format!("fold {} class {}", record.fold, label),
                &path,
            )?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SweepReport {
        SweepReport {
            mode: SweepMode::Fixed(vec![8, 8]),
            folds: vec![
                FoldSummary {
                    fold: 0,
                    train_acc: 1.0,
                    val_acc: 0.5,
                    test_acc: None,
                    test_set_acc: None,
                    k_labels: vec![0, 1],
                    k_vals: vec![8, 8],
                    k_scores: Vec::new(),
                },
                FoldSummary {
                    fold: 1,
                    train_acc: 0.9,
                    val_acc: 0.7,
                    test_acc: None,
                    test_set_acc: None,
                    k_labels: vec![0, 1],
                    k_vals: vec![8, 8],
                    k_scores: Vec::new(),
                },
            ],
            mean_train_acc: 0.95,
            mean_val_acc: 0.6,
            mean_test_acc: None,
            mean_test_set_acc: None,
        }
    }

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_report(&report(), &path).unwrap();
        assert_eq!(read_report(&path).unwrap(), report());
    }

    #[test]
    fn plot_names_carry_class_label() {
        let path = elbow_plot_path(Path::new("out"), 2, 7);
        assert_eq!(path, Path::new("out/elbow_val_02_class_07.png"));
    }

    #[test]
    fn gap_is_train_minus_val() {
        assert!((report().generalization_gap() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn summary_lists_every_fold() {
        let text = format_summary(&report());
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("0.600"));
        assert!(text.contains("[0:8, 1:8]"));
    }
}
