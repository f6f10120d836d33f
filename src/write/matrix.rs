//! Channel-by-sigma matrices: annotated heatmaps with marginal totals, and 3D
//! bar charts.

use std::path::Path;

use log::debug;
use ndarray::{ArrayView2, Axis};
use plotters::prelude::*;
use plotters::style::colors::colormaps::ViridisRGB;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use super::{drawing_error, finite_range, format_count, normalise, DrawResult, PlotError};

const WIDTH: u32 = 1400;
const HEIGHT: u32 = 1000;
/// Pixels given to the marginal bar charts above and to the right of the
/// heatmap.
const MARGINAL_SIZE: u32 = 200;
const LABEL_AREA: u32 = 80;

/// Draw `matrix` (rows are channels, columns sigma thresholds) as a heatmap
/// with every cell annotated. The totals per sigma are drawn as bars above the
/// heatmap, and the totals per channel as bars to its right.
pub fn heatmap_hist(
    path: &Path,
    matrix: ArrayView2<f64>,
    channel_labels: &[String],
    sigma_labels: &[String],
    title: &str,
) -> Result<(), PlotError> {
    check_shape(path, matrix, channel_labels, sigma_labels)?;
    debug!("Drawing heatmap to {}", path.display());
    draw_heatmap_hist(path, matrix, channel_labels, sigma_labels, title)
        .map_err(|e| drawing_error(path, e))
}

fn check_shape(
    path: &Path,
    matrix: ArrayView2<f64>,
    channel_labels: &[String],
    sigma_labels: &[String],
) -> Result<(), PlotError> {
    let no_data = |reason: String| PlotError::NoData {
        path: path.to_path_buf(),
        reason,
    };
    if matrix.is_empty() {
        return Err(no_data("the matrix is empty".to_string()));
    }
    if matrix.dim() != (channel_labels.len(), sigma_labels.len()) {
        return Err(no_data(format!(
            "a {:?} matrix doesn't fit {} channel and {} sigma labels",
            matrix.dim(),
            channel_labels.len(),
            sigma_labels.len()
        )));
    }
    Ok(())
}

fn draw_heatmap_hist(
    path: &Path,
    matrix: ArrayView2<f64>,
    channel_labels: &[String],
    sigma_labels: &[String],
    title: &str,
) -> DrawResult {
    let (num_rows, num_cols) = matrix.dim();
    let (rows, cols) = (num_rows as f64, num_cols as f64);
    let (min, max) = finite_range(matrix.iter()).unwrap_or((0.0, 0.0));
    let col_sums = matrix.sum_axis(Axis(0));
    let row_sums = matrix.sum_axis(Axis(1));

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;
    let area = root.titled(title, ("sans-serif", 30))?;
    let main_width = area.dim_in_pixel().0 - MARGINAL_SIZE;
    let (upper, lower) = area.split_vertically(MARGINAL_SIZE);
    let (top_area, _corner) = upper.split_horizontally(main_width);
    let (heatmap_area, right_area) = lower.split_horizontally(main_width);

    // Rows run top to bottom, so row i sits at y = rows - 1 - i.
    let row_y = |i: usize| rows - 1.0 - i as f64;

    let mut heatmap = ChartBuilder::on(&heatmap_area)
        .margin(10)
        .x_label_area_size(LABEL_AREA)
        .y_label_area_size(LABEL_AREA)
        .build_cartesian_2d(0.0..cols, 0.0..rows)?;
    heatmap
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_desc("σ threshold")
        .y_desc("DM")
        .x_label_formatter(&|_| String::new())
        .y_label_formatter(&|_| String::new())
        .axis_desc_style(("sans-serif", 22))
        .draw()?;

    let font = ("sans-serif", 16).into_font();
    for ((i, j), &v) in matrix.indexed_iter() {
        let (x, y) = (j as f64, row_y(i));
        let level = normalise(v, min, max);
        heatmap.draw_series(std::iter::once(Rectangle::new(
            [(x, y), (x + 1.0, y + 1.0)],
            ViridisRGB.get_color(level).filled(),
        )))?;
        heatmap.draw_series(std::iter::once(Rectangle::new(
            [(x, y), (x + 1.0, y + 1.0)],
            WHITE.stroke_width(1),
        )))?;
        let text_colour = if level > 0.5 { BLACK } else { WHITE };
        heatmap.draw_series(std::iter::once(Text::new(
            format_count(v),
            (x + 0.5, y + 0.5),
            font.color(&text_colour)
                .pos(Pos::new(HPos::Center, VPos::Center)),
        )))?;
    }

    // Category labels go at the middle of each cell, outside the plotting area.
    let label_style = TextStyle::from(("sans-serif", 18).into_font());
    for (j, label) in sigma_labels.iter().enumerate() {
        let (px, py) = heatmap.backend_coord(&(j as f64 + 0.5, 0.0));
        root.draw(&Text::new(
            label.as_str(),
            (px, py + 8),
            label_style.pos(Pos::new(HPos::Center, VPos::Top)),
        ))?;
    }
    for (i, label) in channel_labels.iter().enumerate() {
        let (px, py) = heatmap.backend_coord(&(0.0, row_y(i) + 0.5));
        root.draw(&Text::new(
            label.as_str(),
            (px - 8, py),
            label_style.pos(Pos::new(HPos::Right, VPos::Center)),
        ))?;
    }

    // Totals per sigma.
    let (low, high) = bar_range(col_sums.iter());
    let mut top = ChartBuilder::on(&top_area)
        .margin(10)
        .x_label_area_size(0)
        .y_label_area_size(LABEL_AREA)
        .build_cartesian_2d(0.0..cols, low..high)?;
    top.configure_mesh()
        .disable_x_mesh()
        .y_max_light_lines(0)
        .y_labels(4)
        .y_desc("Total")
        .x_label_formatter(&|_| String::new())
        .draw()?;
    top.draw_series(col_sums.iter().enumerate().map(|(j, &v)| {
        let x = j as f64;
        Rectangle::new([(x + 0.1, 0.0), (x + 0.9, v)], BLUE.mix(0.6).filled())
    }))?;

    // Totals per channel.
    let (low, high) = bar_range(row_sums.iter());
    let mut right = ChartBuilder::on(&right_area)
        .margin(10)
        .x_label_area_size(LABEL_AREA)
        .y_label_area_size(0)
        .build_cartesian_2d(low..high, 0.0..rows)?;
    right
        .configure_mesh()
        .disable_y_mesh()
        .x_max_light_lines(0)
        .x_labels(3)
        .x_desc("Total")
        .y_label_formatter(&|_| String::new())
        .draw()?;
    right.draw_series(row_sums.iter().enumerate().map(|(i, &v)| {
        let y = row_y(i);
        Rectangle::new([(0.0, y + 0.1), (v, y + 0.9)], BLUE.mix(0.6).filled())
    }))?;

    root.present()?;
    Ok(())
}

/// An axis range for bars growing from 0 to each of `values`, with a little
/// headroom.
fn bar_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> (f64, f64) {
    let (min, max) = finite_range(values).unwrap_or((0.0, 0.0));
    let (low, high) = (min.min(0.0), max.max(0.0));
    if high > low {
        let pad = 0.1 * (high - low);
        (if low < 0.0 { low - pad } else { 0.0 }, high + pad)
    } else {
        (0.0, 1.0)
    }
}

/// Draw `matrix` as a 3D bar chart: one bar per channel and sigma threshold.
pub fn hist3d(
    path: &Path,
    matrix: ArrayView2<f64>,
    channel_labels: &[String],
    sigma_labels: &[String],
    title: &str,
) -> Result<(), PlotError> {
    check_shape(path, matrix, channel_labels, sigma_labels)?;
    debug!("Drawing 3D histogram to {}", path.display());
    draw_hist3d(path, matrix, channel_labels, sigma_labels, title)
        .map_err(|e| drawing_error(path, e))
}

fn draw_hist3d(
    path: &Path,
    matrix: ArrayView2<f64>,
    channel_labels: &[String],
    sigma_labels: &[String],
    title: &str,
) -> DrawResult {
    let (num_rows, num_cols) = matrix.dim();
    let (min, max) = finite_range(matrix.iter()).unwrap_or((0.0, 0.0));
    let (low, high) = bar_range(matrix.iter());

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(20)
        .build_cartesian_3d(0.0..num_cols as f64, low..high, 0.0..num_rows as f64)?;
    chart.with_projection(|mut p| {
        p.yaw = 0.7;
        p.pitch = 0.4;
        p.scale = 0.8;
        p.into_matrix()
    });

    let sigma_label = |x: &f64| {
        sigma_labels
            .get(x.floor() as usize)
            .cloned()
            .unwrap_or_default()
    };
    let channel_label = |z: &f64| {
        channel_labels
            .get(z.floor() as usize)
            .cloned()
            .unwrap_or_default()
    };
    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.15))
        .max_light_lines(0)
        .x_labels(num_cols)
        .z_labels(num_rows)
        .x_formatter(&sigma_label)
        .z_formatter(&channel_label)
        .draw()?;

    // Back rows first, so nearer bars are drawn over them.
    for i in (0..num_rows).rev() {
        chart.draw_series(matrix.row(i).iter().enumerate().map(|(j, &v)| {
            let (x, z) = (j as f64, i as f64);
            let colour = ViridisRGB.get_color(normalise(v, min, max));
            Cubiod::new(
                [(x + 0.15, 0.0, z + 0.15), (x + 0.85, v, z + 0.85)],
                colour.mix(0.9).filled(),
                BLACK.stroke_width(1),
            )
        }))?;
    }

    root.present()?;
    Ok(())
}
