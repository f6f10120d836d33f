//! PNG renderings of detection counts and power series.

mod matrix;
mod series;

pub use matrix::{heatmap_hist, hist3d};
pub use series::{detections_timeline, plot_dm_series};

use std::path::{Path, PathBuf};

use itertools::{Itertools, MinMaxResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Couldn't draw {}: {reason}", .path.display())]
    Drawing { path: PathBuf, reason: String },

    #[error("Nothing to plot in {}: {reason}", .path.display())]
    NoData { path: PathBuf, reason: String },
}

/// The result of a drawing routine. Every `plotters` error is boxed, as the
/// error types differ between drawing areas.
type DrawResult = Result<(), Box<dyn std::error::Error>>;

fn drawing_error(path: &Path, e: Box<dyn std::error::Error>) -> PlotError {
    PlotError::Drawing {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// The smallest and largest finite values.
fn finite_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    match values
        .into_iter()
        .filter(|v| v.is_finite())
        .minmax_by(|a, b| a.total_cmp(b))
    {
        MinMaxResult::NoElements => None,
        MinMaxResult::OneElement(&v) => Some((v, v)),
        MinMaxResult::MinMax(&min, &max) => Some((min, max)),
    }
}

/// Where `v` sits between `min` and `max`, from 0 to 1. A range of zero width
/// puts everything at 0.
fn normalise(v: f64, min: f64, max: f64) -> f64 {
    if max > min {
        ((v - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Format a (rounded) count for annotating a plot. Negative zero is "0".
fn format_count(v: f64) -> String {
    if v == 0.0 {
        "0".to_string()
    } else {
        format!("{v}")
    }
}

/// A path for a test plot, in a directory of its own under the system's
/// temporary directory.
#[cfg(test)]
fn scratch_png(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dm_sweep_plots_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    if path.exists() {
        std::fs::remove_file(&path).unwrap();
    }
    path
}

/// Check that a PNG was written to `path`, then remove it.
#[cfg(test)]
fn assert_png_written(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.len() > 8, "{} is too short", path.display());
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    std::fs::remove_file(path).unwrap();
}
