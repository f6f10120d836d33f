//! Threshold-sweep detection counting on dedispersed power time-series.
//!
//! Each snapshot archive holds one power series per dispersion measure (DM).
//! Every series is smoothed, thresholded at `median + sigma * std` and its
//! excursions counted, for a sweep of sigma values. Counts are summed over a
//! batch of snapshots into channel×threshold matrices and rendered as PNGs.

pub mod averaging;
pub mod detect;
pub mod envelope;
mod error;
pub mod read;
pub mod sweep;
pub mod timestamps;
pub mod write;

pub use error::DmSweepError;

use read::{CalibrationTrim, ChannelLayout};
use sweep::SigmaSweep;

/// The default moving-average window, in samples.
pub const DEFAULT_WINDOW: usize = 256;

/// The default number of local maxima reduced into one envelope point.
pub const DEFAULT_ENVELOPE_CHUNK: usize = 256;

/// The sigma used for the per-snapshot detection timeline unless the user
/// asks for another.
pub const DEFAULT_TIMELINE_SIGMA: f64 = 8.0;

/// Parameters shared by the event and peak counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionParams {
    /// The moving-average window used for the baseline.
    pub window: usize,

    /// The number of local maxima per chunk when building the high envelope.
    pub envelope_chunk: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            envelope_chunk: DEFAULT_ENVELOPE_CHUNK,
        }
    }
}

impl DetectionParams {
    /// The number of leading smoothed samples that have no value. Statistics
    /// over the baseline skip exactly this many samples.
    pub fn warmup(&self) -> usize {
        self.window.saturating_sub(1)
    }
}

/// Everything a batch run needs, built once (usually from the command line)
/// and handed around by reference.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// The sigma values to sweep, ascending.
    pub sweep: SigmaSweep,

    pub detection: DetectionParams,

    /// Which archive keys are DM channels, and in what order.
    pub layout: ChannelLayout,

    /// How much of the head of each series is a calibration pulse.
    pub calibration: CalibrationTrim,

    /// The sigma at which per-snapshot detections are counted for the
    /// timeline plot.
    pub timeline_sigma: f64,
}

impl AnalysisConfig {
    pub fn new(sweep: SigmaSweep) -> AnalysisConfig {
        AnalysisConfig {
            sweep,
            detection: DetectionParams::default(),
            layout: ChannelLayout::default(),
            calibration: CalibrationTrim::default(),
            timeline_sigma: DEFAULT_TIMELINE_SIGMA,
        }
    }
}
