//! Counting detections in one channel's power series.
//!
//! Two different things get counted against the same threshold,
//! `median(smoothed series) + sigma * std(series)`:
//!
//! * events: contiguous excursions of the high envelope above the threshold.
//!   One wide pulse is one event.
//! * peaks: local maxima of the raw series above the threshold. One wide pulse
//!   can hold many peaks.

use log::trace;
use ndarray::ArrayView1;

use crate::{
    averaging::{median, moving_average},
    envelope::{hl_envelope_indices, sign},
    DetectionParams,
};

/// The statistics a threshold is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// The median of the valid part of the moving average.
    pub median: f64,

    /// The (population) standard deviation of the raw series.
    pub std: f64,
}

impl Baseline {
    /// Get the baseline of a series. `None` if the series is shorter than the
    /// smoothing window, or its statistics aren't finite.
    pub fn new(series: ArrayView1<f64>, params: &DetectionParams) -> Option<Baseline> {
        let smoothed = moving_average(series, params.window).ok()?;
        let mut valid: Vec<f64> = smoothed[params.warmup()..]
            .iter()
            .flatten()
            .copied()
            .collect();
        let median = median(&mut valid)?;
        let std = series.std(0.0);
        if median.is_finite() && std.is_finite() {
            Some(Baseline { median, std })
        } else {
            None
        }
    }

    pub fn threshold(&self, sigma: f64) -> f64 {
        self.median + sigma * self.std
    }
}

/// The threshold that detections in `series` must exceed at `sigma`.
pub fn detection_threshold(
    series: ArrayView1<f64>,
    sigma: f64,
    params: &DetectionParams,
) -> Option<f64> {
    Baseline::new(series, params).map(|b| b.threshold(sigma))
}

/// Local maxima of `x`. A peak is strictly higher than its left neighbour and
/// than the first different sample on its right; flat-topped peaks are
/// reported at their middle sample (the left one of the two middles for even
/// widths). The first and last samples are never peaks.
pub fn local_maxima(x: ArrayView1<f64>) -> Vec<usize> {
    let mut peaks = vec![];
    if x.len() < 3 {
        return peaks;
    }

    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && x[i_ahead] == x[i] {
                i_ahead += 1;
            }
            if x[i_ahead] < x[i] {
                peaks.push((i + i_ahead - 1) / 2);
                i = i_ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Count the samples `k` where `values[k] - threshold` and
/// `values[k + 1] - threshold` have different signs.
fn count_sign_changes(values: &[f64], threshold: f64) -> usize {
    values
        .windows(2)
        .filter(|w| sign(w[0] - threshold) != sign(w[1] - threshold))
        .count()
}

/// Peaks above a threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeakDetections {
    /// Sample indices of the peaks.
    pub indices: Vec<usize>,

    /// The power at each peak.
    pub values: Vec<f64>,
}

impl PeakDetections {
    pub fn count(&self) -> usize {
        self.indices.len()
    }
}

/// Everything about one channel that doesn't depend on sigma, so that a sweep
/// over many sigma values only pays for the smoothing and envelope once.
pub struct ChannelDetector<'a> {
    series: ArrayView1<'a, f64>,
    baseline: Option<Baseline>,
    envelope: Vec<f64>,
    maxima: Vec<usize>,
}

impl<'a> ChannelDetector<'a> {
    pub fn new(series: ArrayView1<'a, f64>, params: &DetectionParams) -> ChannelDetector<'a> {
        let baseline = Baseline::new(series, params);
        if baseline.is_none() {
            trace!(
                "No baseline for a series of {} samples; it will have no detections",
                series.len()
            );
        }
        let envelope = hl_envelope_indices(
            series,
            params.envelope_chunk,
            params.envelope_chunk,
            false,
        )
        .high
        .into_iter()
        .map(|i| series[i])
        .collect();

        ChannelDetector {
            series,
            baseline,
            envelope,
            maxima: local_maxima(series),
        }
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// The number of excursions of the high envelope above the threshold.
    /// Every excursion enters and leaves, so it is half the number of
    /// threshold crossings (rounded down, for an excursion still open at the
    /// end of the series).
    pub fn events(&self, sigma: f64) -> usize {
        match self.baseline {
            Some(b) => count_sign_changes(&self.envelope, b.threshold(sigma)) / 2,
            None => 0,
        }
    }

    /// The number of local maxima of the raw series above the threshold.
    pub fn peak_count(&self, sigma: f64) -> usize {
        match self.baseline {
            Some(b) => {
                let threshold = b.threshold(sigma);
                self.maxima
                    .iter()
                    .filter(|&&i| self.series[i] > threshold)
                    .count()
            }
            None => 0,
        }
    }

    /// The local maxima of the raw series that are above the threshold.
    pub fn peaks(&self, sigma: f64) -> PeakDetections {
        let mut detections = PeakDetections::default();
        if let Some(b) = self.baseline {
            let threshold = b.threshold(sigma);
            for &i in &self.maxima {
                let value = self.series[i];
                if value > threshold {
                    detections.indices.push(i);
                    detections.values.push(value);
                }
            }
        }
        detections
    }
}

/// Count the events in `series` at `sigma`. See [`ChannelDetector::events`].
pub fn count_events(series: ArrayView1<f64>, sigma: f64, params: &DetectionParams) -> usize {
    ChannelDetector::new(series, params).events(sigma)
}

/// Find the peaks in `series` above the threshold at `sigma`.
pub fn peaks_over_threshold(
    series: ArrayView1<f64>,
    sigma: f64,
    params: &DetectionParams,
) -> PeakDetections {
    ChannelDetector::new(series, params).peaks(sigma)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::{aview1, Array1};

    /// A baseline alternating between 1.0 and 1.1, with pulses raised by 99
    /// over the given sample ranges.
    pub(crate) fn pulsed_series(len: usize, pulses: &[std::ops::Range<usize>]) -> Array1<f64> {
        Array1::from_iter((0..len).map(|i| {
            let base = 1.0 + 0.1 * (i % 2) as f64;
            if pulses.iter().any(|p| p.contains(&i)) {
                base + 99.0
            } else {
                base
            }
        }))
    }

    #[test]
    fn test_local_maxima() {
        let x = aview1(&[0.0, 1.0, 0.0, 2.0, 2.0, 0.0, 3.0, 3.0, 3.0, 1.0, 5.0]);
        assert_eq!(local_maxima(x), vec![1, 3, 7]);

        // A plateau running off the end isn't a peak.
        let x = aview1(&[0.0, 1.0, 1.0, 1.0]);
        assert!(local_maxima(x).is_empty());
        assert!(local_maxima(aview1(&[1.0, 2.0])).is_empty());
    }

    #[test]
    fn test_threshold() {
        let params = DetectionParams {
            window: 2,
            envelope_chunk: 256,
        };
        let series = aview1(&[1.0, 3.0, 1.0, 3.0]);
        // Smoothed: [_, 2, 2, 2]; std is 1.
        let b = Baseline::new(series, &params).unwrap();
        assert_eq!(b.median, 2.0);
        assert_eq!(b.std, 1.0);
        assert_eq!(detection_threshold(series, 3.0, &params), Some(5.0));
    }

    #[test]
    fn single_pulse_is_one_event() {
        let series = pulsed_series(10240, &[4096..6144]);
        let params = DetectionParams::default();
        assert_eq!(count_events(series.view(), 1.0, &params), 1);
    }

    #[test]
    fn two_pulses_are_two_events() {
        let series = pulsed_series(10240, &[2048..3072, 7168..8192]);
        let params = DetectionParams::default();
        assert_eq!(count_events(series.view(), 1.0, &params), 2);
    }

    #[test]
    fn wide_pulse_has_many_peaks_but_one_event() {
        let series = pulsed_series(10240, &[4096..6144]);
        let params = DetectionParams::default();
        let detector = ChannelDetector::new(series.view(), &params);

        let peaks = detector.peaks(1.0);
        assert!(peaks.count() > 1);
        assert_eq!(peaks.count(), 1024);
        assert_eq!(detector.peak_count(1.0), 1024);
        assert!(peaks.indices.iter().all(|i| (4096..6144).contains(i)));
        assert!(peaks.values.iter().all(|&v| v > 100.0));
        assert_eq!(detector.events(1.0), 1);
    }

    #[test]
    fn high_sigma_detects_nothing() {
        let series = pulsed_series(10240, &[4096..6144]);
        let params = DetectionParams::default();
        let detector = ChannelDetector::new(series.view(), &params);
        assert_eq!(detector.events(8.0), 0);
        assert_eq!(detector.peaks(8.0).count(), 0);
    }

    #[test]
    fn degenerate_series_detect_nothing() {
        let params = DetectionParams::default();

        // Flat: zero variance, no turning points.
        let flat = Array1::from_elem(1000, 4.0);
        assert_eq!(count_events(flat.view(), 0.0, &params), 0);
        assert_eq!(peaks_over_threshold(flat.view(), 0.0, &params).count(), 0);

        // Shorter than the smoothing window.
        let short = pulsed_series(100, &[40..60]);
        assert!(Baseline::new(short.view(), &params).is_none());
        assert_eq!(count_events(short.view(), 1.0, &params), 0);
        assert_eq!(peaks_over_threshold(short.view(), 1.0, &params).count(), 0);

        let empty = Array1::<f64>::zeros(0);
        assert_eq!(count_events(empty.view(), 1.0, &params), 0);
    }
}
