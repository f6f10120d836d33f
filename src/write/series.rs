//! Plots against time: detections per snapshot over an observation, and a
//! channel's power within one snapshot.

use std::path::Path;

use log::debug;
use ndarray::ArrayView1;
use plotters::prelude::*;

use super::{drawing_error, finite_range, DrawResult, PlotError};
use crate::{
    sweep::SnapshotTotal,
    timestamps::{format_epoch, parse_snapshot_time, ObservationSpan},
};

const WIDTH: u32 = 1400;
const HEIGHT: u32 = 800;

/// Draw the detections of each snapshot as a bar at the snapshot's time, in
/// hours since the start of `span`. Snapshots whose names don't carry a
/// timestamp are skipped.
pub fn detections_timeline(
    path: &Path,
    timeline: &[SnapshotTotal],
    span: ObservationSpan,
    title: &str,
) -> Result<(), PlotError> {
    let bars = timeline_bars(timeline, span);
    if bars.is_empty() {
        return Err(PlotError::NoData {
            path: path.to_path_buf(),
            reason: "no snapshot has a timestamp".to_string(),
        });
    }
    debug!("Drawing a timeline of {} snapshots to {}", bars.len(), path.display());
    draw_timeline(path, &bars, span, title).map_err(|e| drawing_error(path, e))
}

/// The hours since the start of `span` and the detections of each timestamped
/// snapshot.
fn timeline_bars(timeline: &[SnapshotTotal], span: ObservationSpan) -> Vec<(f64, f64)> {
    timeline
        .iter()
        .filter_map(|t| match parse_snapshot_time(&t.name) {
            Ok(epoch) => Some((span.hours_since_start(epoch), t.peaks as f64)),
            Err(e) => {
                debug!("Leaving {} off the timeline: {e}", t.name);
                None
            }
        })
        .collect()
}

/// Bars are 80% as wide as the smallest gap between snapshots, or a minute
/// wide if there is no gap.
fn bar_width(hours: &[f64]) -> f64 {
    let mut sorted = hours.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&gap| gap > 0.0)
        .min_by(|a, b| a.total_cmp(b))
        .map(|gap| 0.8 * gap)
        .unwrap_or(1.0 / 60.0)
}

fn draw_timeline(path: &Path, bars: &[(f64, f64)], span: ObservationSpan, title: &str) -> DrawResult {
    let hours: Vec<f64> = bars.iter().map(|&(h, _)| h).collect();
    let width = bar_width(&hours);
    let (first, last) = finite_range(&hours).unwrap_or((0.0, 0.0));
    let (_, most) = finite_range(bars.iter().map(|(_, n)| n)).unwrap_or((0.0, 0.0));

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(180)
        .y_label_area_size(80)
        .build_cartesian_2d(
            (first - width)..(last + width),
            0.0..(most * 1.1).max(1.0),
        )?;
    chart
        .configure_mesh()
        .x_labels(12)
        .x_label_formatter(&|h| format_epoch(span.at_hours(*h)))
        .x_label_style(
            ("sans-serif", 16)
                .into_font()
                .transform(FontTransform::Rotate90),
        )
        .y_desc("Detections")
        .axis_desc_style(("sans-serif", 22))
        .draw()?;

    chart.draw_series(bars.iter().map(|&(h, n)| {
        Rectangle::new(
            [(h - width / 2.0, 0.0), (h + width / 2.0, n)],
            BLUE.mix(0.7).filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Power in decibels. Non-positive power has no finite level, and gets `None`.
fn to_db(p: f64) -> Option<f64> {
    let db = 10.0 * p.log10();
    db.is_finite().then_some(db)
}

/// Draw a channel's power series in dB against time, spread evenly over
/// `minutes`. With `overlay`, a second line (e.g. a smoothed threshold, which
/// may be undefined at the start) is drawn over it in dB as well.
pub fn plot_dm_series(
    path: &Path,
    series: ArrayView1<f64>,
    overlay: Option<&[Option<f64>]>,
    minutes: f64,
    title: &str,
) -> Result<(), PlotError> {
    let step = if series.len() > 1 {
        minutes / (series.len() - 1) as f64
    } else {
        0.0
    };
    let points: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .filter_map(|(i, &p)| to_db(p).map(|db| (i as f64 * step, db)))
        .collect();
    if points.is_empty() {
        return Err(PlotError::NoData {
            path: path.to_path_buf(),
            reason: "the series has no positive power".to_string(),
        });
    }
    let overlay: Vec<(f64, f64)> = overlay
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.and_then(to_db).map(|db| (i as f64 * step, db)))
        .collect();

    debug!("Drawing {} samples to {}", points.len(), path.display());
    draw_dm_series(path, &points, &overlay, minutes, title).map_err(|e| drawing_error(path, e))
}

fn draw_dm_series(
    path: &Path,
    points: &[(f64, f64)],
    overlay: &[(f64, f64)],
    minutes: f64,
    title: &str,
) -> DrawResult {
    let (low, high) = finite_range(points.iter().chain(overlay).map(|(_, db)| db))
        .unwrap_or((0.0, 0.0));

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(0.0..minutes.max(f64::EPSILON), (low - 0.1)..(high + 0.1))?;
    chart
        .configure_mesh()
        .x_desc("Time [min]")
        .y_desc("Power [dB]")
        .x_label_formatter(&|v| format!("{:.1}", v))
        .y_label_formatter(&|v| format!("{:.2}", v))
        .axis_desc_style(("sans-serif", 22))
        .draw()?;

    chart.draw_series(LineSeries::new(points.iter().copied(), BLUE.stroke_width(1)))?;
    if !overlay.is_empty() {
        chart.draw_series(LineSeries::new(overlay.iter().copied(), RED.stroke_width(2)))?;
    }

    root.present()?;
    Ok(())
}
