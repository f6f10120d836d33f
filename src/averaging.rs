//! Running means and order statistics over power series.

use ndarray::ArrayView1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmoothingError {
    #[error("The moving-average window must be at least one sample")]
    ZeroWindow,

    #[error("The moving-average window ({window} samples) is longer than the series ({len} samples)")]
    WindowTooLong { window: usize, len: usize },
}

/// Calculate the moving average of `data` over a window of `window` samples.
///
/// Entry `i` is the mean of `data[i + 1 - window..=i]`. The first `window - 1`
/// entries have no full window behind them and are `None`, so the output is
/// always as long as the input. Each mean is a difference of two prefix sums,
/// so the cost doesn't depend on the window size.
pub fn moving_average(
    data: ArrayView1<f64>,
    window: usize,
) -> Result<Vec<Option<f64>>, SmoothingError> {
    if window == 0 {
        return Err(SmoothingError::ZeroWindow);
    }
    if window > data.len() {
        return Err(SmoothingError::WindowTooLong {
            window,
            len: data.len(),
        });
    }

    let mut prefix_sums = Vec::with_capacity(data.len() + 1);
    prefix_sums.push(0.0);
    let mut running = 0.0;
    for &d in data {
        running += d;
        prefix_sums.push(running);
    }

    let n = window as f64;
    let mut averages = vec![None; window - 1];
    averages.extend(
        prefix_sums[window..]
            .iter()
            .zip(prefix_sums.iter())
            .map(|(end, start)| Some((end - start) / n)),
    );
    debug_assert_eq!(averages.len(), data.len());
    Ok(averages)
}

/// The median of some values. An even number of values gives the mean of the
/// middle two. The values are reordered in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
