//! Sweeping the detection threshold over a batch of snapshots.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::{aview1, prelude::*};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::{
    detect::ChannelDetector,
    read::{snapshot_name, SnapshotError, SnapshotRead},
    AnalysisConfig, DetectionParams,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    #[error("The sigma sweep must have at least one value")]
    Empty,

    #[error("Sigma value {0} isn't finite")]
    NonFinite(f64),

    #[error("Sigma values must increase, but {value} follows {previous}")]
    NotAscending { previous: f64, value: f64 },

    #[error("The last sigma ({last}) is smaller than the first ({first})")]
    BadRange { first: u32, last: u32 },
}

#[derive(Error, Debug)]
pub enum CountsIoError {
    #[error("Couldn't access detection counts file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't (de)serialise detection counts in {}: {source}", .path.display())]
    Encoding {
        path: PathBuf,
        source: bincode::Error,
    },

    #[error("Detection counts in {} are inconsistent: {reason}", .path.display())]
    Inconsistent { path: PathBuf, reason: String },
}

/// The sigma values of a sweep. Never empty, always strictly ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigmaSweep(Vec1<f64>);

impl SigmaSweep {
    pub fn new(values: Vec<f64>) -> Result<SigmaSweep, SweepError> {
        if let Some(&bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(SweepError::NonFinite(bad));
        }
        if let Some(w) = values.windows(2).find(|w| w[1] <= w[0]) {
            return Err(SweepError::NotAscending {
                previous: w[0],
                value: w[1],
            });
        }
        Vec1::try_from_vec(values)
            .map(SigmaSweep)
            .map_err(|_| SweepError::Empty)
    }

    /// Every integer sigma from `first` to `last`, inclusive.
    pub fn from_range(first: u32, last: u32) -> Result<SigmaSweep, SweepError> {
        if last < first {
            return Err(SweepError::BadRange { first, last });
        }
        SigmaSweep::new((first..=last).map(f64::from).collect())
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Labels for plot axes.
    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(|s| format!("{s}")).collect()
    }
}

/// Detections counted in a single snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCounts {
    /// Peaks over threshold, [channel][sigma].
    pub peaks: Array2<u64>,

    /// Events over threshold, [channel][sigma].
    pub events: Array2<u64>,

    /// Peaks over the timeline sigma, summed over all channels.
    pub timeline_peaks: u64,
}

/// Count the peaks and events of every channel at every sigma of `sweep`.
/// Channels are independent, so they're counted in parallel.
pub fn sweep_snapshot(
    channels: &[Array1<f64>],
    sweep: &SigmaSweep,
    timeline_sigma: f64,
    params: &DetectionParams,
) -> SnapshotCounts {
    let num_sigmas = sweep.len();
    let per_channel: Vec<(Vec<u64>, Vec<u64>, u64)> = channels
        .par_iter()
        .map(|series| {
            let detector = ChannelDetector::new(series.view(), params);
            let (peaks, events) = sweep
                .values()
                .iter()
                .map(|&sigma| {
                    (
                        detector.peak_count(sigma) as u64,
                        detector.events(sigma) as u64,
                    )
                })
                .unzip();
            (peaks, events, detector.peak_count(timeline_sigma) as u64)
        })
        .collect();

    let mut counts = SnapshotCounts {
        peaks: Array2::zeros((channels.len(), num_sigmas)),
        events: Array2::zeros((channels.len(), num_sigmas)),
        timeline_peaks: 0,
    };
    for (i_chan, (peaks, events, timeline)) in per_channel.into_iter().enumerate() {
        counts.peaks.row_mut(i_chan).assign(&aview1(&peaks));
        counts.events.row_mut(i_chan).assign(&aview1(&events));
        counts.timeline_peaks += timeline;
    }
    counts
}

/// Peak detections of one snapshot at the timeline sigma.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTotal {
    /// The snapshot's file name.
    pub name: String,

    pub peaks: u64,
}

/// Detection counts summed over a batch of snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCounts {
    pub sweep: SigmaSweep,

    pub channel_names: Vec<String>,

    /// Peaks over threshold, [channel][sigma].
    pub peaks: Array2<u64>,

    /// Events over threshold, [channel][sigma].
    pub events: Array2<u64>,

    /// The sigma used for `timeline`.
    pub timeline_sigma: f64,

    /// Peaks per snapshot at `timeline_sigma`, in snapshot order. Never empty
    /// for a completed sweep.
    pub timeline: Vec<SnapshotTotal>,
}

impl DetectionCounts {
    /// No detections yet.
    pub fn new(sweep: SigmaSweep, channel_names: Vec<String>, timeline_sigma: f64) -> Self {
        let shape = (channel_names.len(), sweep.len());
        Self {
            sweep,
            channel_names,
            peaks: Array2::zeros(shape),
            events: Array2::zeros(shape),
            timeline_sigma,
            timeline: vec![],
        }
    }

    /// Add the counts of one more snapshot.
    pub fn add(&mut self, name: String, counts: &SnapshotCounts) {
        self.peaks += &counts.peaks;
        self.events += &counts.events;
        self.timeline.push(SnapshotTotal {
            name,
            peaks: counts.timeline_peaks,
        });
    }

    pub fn first_snapshot(&self) -> Option<&str> {
        self.timeline.first().map(|t| t.name.as_str())
    }

    pub fn last_snapshot(&self) -> Option<&str> {
        self.timeline.last().map(|t| t.name.as_str())
    }

    /// Write these counts to `path`, so they can be plotted again without
    /// repeating the sweep.
    pub fn save(&self, path: &Path) -> Result<(), CountsIoError> {
        let io_err = |source| CountsIoError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        bincode::serialize_into(&mut writer, self).map_err(|source| CountsIoError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        info!("Saved detection counts to {}", path.display());
        Ok(())
    }

    /// Read counts written by [`DetectionCounts::save`].
    pub fn load(path: &Path) -> Result<DetectionCounts, CountsIoError> {
        let file = File::open(path).map_err(|source| CountsIoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let counts: DetectionCounts = bincode::deserialize_from(BufReader::new(file))
            .map_err(|source| CountsIoError::Encoding {
                path: path.to_path_buf(),
                source,
            })?;

        let expected = (counts.channel_names.len(), counts.sweep.len());
        for (name, matrix) in [("peaks", &counts.peaks), ("events", &counts.events)] {
            if matrix.dim() != expected {
                return Err(CountsIoError::Inconsistent {
                    path: path.to_path_buf(),
                    reason: format!(
                        "{name} matrix is {:?}, but there are {} channels and {} sigmas",
                        matrix.dim(),
                        expected.0,
                        expected.1
                    ),
                });
            }
        }
        if counts.timeline.is_empty() {
            return Err(CountsIoError::Inconsistent {
                path: path.to_path_buf(),
                reason: "no snapshots were counted".to_string(),
            });
        }
        debug!(
            "Loaded counts for {} snapshots from {}",
            counts.timeline.len(),
            path.display()
        );
        Ok(counts)
    }
}

/// Count peaks and events over every snapshot, channel and sigma, summing
/// over snapshots. Snapshots are read one at a time, in order; any failure to
/// read one aborts the whole sweep.
pub fn count_detections<R: SnapshotRead + ?Sized>(
    reader: &R,
    snapshots: &Vec1<PathBuf>,
    config: &AnalysisConfig,
    progress_bar: Option<ProgressBar>,
) -> Result<DetectionCounts, SnapshotError> {
    let channel_names = reader.channel_names();
    let mut counts = DetectionCounts::new(
        config.sweep.clone(),
        channel_names.clone(),
        config.timeline_sigma,
    );

    for snapshot in snapshots {
        let channels = reader.read_channels(snapshot)?;
        if channels.len() != channel_names.len() {
            return Err(SnapshotError::ChannelCount {
                path: snapshot.clone(),
                found: channels.len(),
                expected: channel_names.len(),
            });
        }
        let snapshot_counts = sweep_snapshot(
            &channels,
            &config.sweep,
            config.timeline_sigma,
            &config.detection,
        );
        debug!(
            "{}: {} peaks, {} events over all sigmas",
            snapshot.display(),
            snapshot_counts.peaks.sum(),
            snapshot_counts.events.sum()
        );
        counts.add(snapshot_name(snapshot), &snapshot_counts);

        if let Some(progress_bar) = progress_bar.as_ref() {
            progress_bar.inc(1);
        }
    }

    if let Some(progress_bar) = progress_bar.as_ref() {
        progress_bar.abandon_with_message("Finished counting detections");
    }
    Ok(counts)
}

/// Turn counts of "detections over sigma j" into counts of "detections over
/// sigma j but not over sigma j + 1". The last column has nothing above it
/// and is kept as is.
///
/// This only makes sense if the counts never increase with sigma along a row.
/// Rows where they do are passed through anyway (giving negative counts), with
/// a warning.
pub fn deaccumulate(cumulative: &Array2<u64>) -> Array2<i64> {
    let mut out = cumulative.mapv(|c| c as i64);

    for (i_row, row) in cumulative.outer_iter().enumerate() {
        if row.windows(2).into_iter().any(|w| w[1] > w[0]) {
            warn!(
                "Detection counts of channel {i_row} increase with sigma; \
                 de-accumulated counts will be negative"
            );
        }
    }

    let num_cols = out.ncols();
    for mut row in out.rows_mut() {
        for j in 0..num_cols.saturating_sub(1) {
            let above = row[j + 1];
            row[j] -= above;
        }
    }
    out
}

/// Turn counts into counts per hour, rounded to the nearest integer (ties to
/// even). If `hours` isn't positive (e.g. there's only one snapshot), the
/// counts are left as they are.
pub fn normalize_per_hour(counts: &Array2<i64>, hours: f64) -> Array2<f64> {
    if hours > 0.0 && hours.is_finite() {
        counts.mapv(|c| (c as f64 / hours).round_ties_even())
    } else {
        warn!("Observation spans {hours} hours; not normalising counts per hour");
        counts.mapv(|c| c as f64)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::detect::tests::pulsed_series;

    #[test]
    fn test_sweep_validation() {
        assert_eq!(SigmaSweep::new(vec![]), Err(SweepError::Empty));
        assert_eq!(
            SigmaSweep::new(vec![3.0, 3.0]),
            Err(SweepError::NotAscending {
                previous: 3.0,
                value: 3.0
            })
        );
        assert_eq!(
            SigmaSweep::new(vec![1.0, f64::NAN]).unwrap_err().to_string(),
            "Sigma value NaN isn't finite"
        );
        assert_eq!(
            SigmaSweep::from_range(9, 8),
            Err(SweepError::BadRange { first: 9, last: 8 })
        );

        let sweep = SigmaSweep::from_range(10, 18).unwrap();
        assert_eq!(sweep.len(), 9);
        assert_eq!(sweep.values()[0], 10.0);
        assert_eq!(sweep.labels()[8], "18");
    }

    #[test]
    fn test_deaccumulate() {
        let m = array![[10, 7, 3, 3], [5, 5, 5, 5], [1, 0, 0, 0]];
        let d = deaccumulate(&m);
        assert_eq!(d, array![[3, 4, 0, 3], [0, 0, 0, 5], [1, 0, 0, 0]]);
        // The input is untouched.
        assert_eq!(m[[0, 0]], 10);
    }

    #[test]
    fn deaccumulate_passes_through_non_cumulative_rows() {
        let m = array![[1, 4, 2]];
        assert_eq!(deaccumulate(&m), array![[-3, 2, 2]]);
    }

    #[test]
    fn deaccumulate_single_column() {
        let m = array![[4], [2]];
        assert_eq!(deaccumulate(&m), array![[4], [2]]);
    }

    #[test]
    fn test_normalize_per_hour() {
        let m = array![[10, 5, 3], [-4, 0, 1]];
        assert_eq!(
            normalize_per_hour(&m, 2.0),
            array![[5.0, 2.0, 2.0], [-2.0, 0.0, 0.0]]
        );
        assert_eq!(
            normalize_per_hour(&m, 0.0),
            array![[10.0, 5.0, 3.0], [-4.0, 0.0, 1.0]]
        );
    }

    /// Snapshots kept in memory.
    struct MemoryReader(HashMap<PathBuf, Vec<Array1<f64>>>);

    impl SnapshotRead for MemoryReader {
        fn channel_names(&self) -> Vec<String> {
            vec!["45".to_string(), "90".to_string(), "135".to_string()]
        }

        fn read_channels(&self, snapshot: &Path) -> Result<Vec<Array1<f64>>, SnapshotError> {
            self.0
                .get(snapshot)
                .cloned()
                .ok_or_else(|| SnapshotError::MissingKey {
                    path: snapshot.to_path_buf(),
                    key: "everything".to_string(),
                })
        }
    }

    fn two_snapshots() -> (MemoryReader, Vec1<PathBuf>) {
        let a = PathBuf::from("2023-03-01 00_00_00.npz");
        let b = PathBuf::from("2023-03-01 00_05_00.npz");
        let mut map = HashMap::new();
        map.insert(
            a.clone(),
            vec![
                pulsed_series(10240, &[4096..6144]),
                pulsed_series(10240, &[2048..3072, 7168..8192]),
                pulsed_series(10240, &[]),
            ],
        );
        map.insert(
            b.clone(),
            vec![
                pulsed_series(10240, &[]),
                pulsed_series(10240, &[1024..2048]),
                pulsed_series(10240, &[4096..6144]),
            ],
        );
        (MemoryReader(map), Vec1::try_from_vec(vec![a, b]).unwrap())
    }

    #[test]
    fn test_sweep_snapshot() {
        let (reader, snapshots) = two_snapshots();
        let channels = reader.read_channels(&snapshots[0]).unwrap();
        let sweep = SigmaSweep::new(vec![2.0, 8.0]).unwrap();
        let counts = sweep_snapshot(&channels, &sweep, 2.0, &DetectionParams::default());

        assert_eq!(counts.events, array![[1, 0], [2, 0], [0, 0]]);
        assert_eq!(counts.peaks, array![[1024, 0], [1024, 0], [0, 0]]);
        assert_eq!(counts.timeline_peaks, 2048);
    }

    #[test]
    fn batch_counts_are_sums_of_snapshot_counts() {
        let (reader, snapshots) = two_snapshots();
        let mut config = AnalysisConfig::new(SigmaSweep::from_range(2, 4).unwrap());
        config.timeline_sigma = 3.0;

        let per_snapshot: Vec<SnapshotCounts> = snapshots
            .iter()
            .map(|s| {
                let channels = reader.read_channels(s).unwrap();
                sweep_snapshot(
                    &channels,
                    &config.sweep,
                    config.timeline_sigma,
                    &config.detection,
                )
            })
            .collect();

        let total = count_detections(&reader, &snapshots, &config, None).unwrap();
        assert_eq!(total.peaks, &per_snapshot[0].peaks + &per_snapshot[1].peaks);
        assert_eq!(
            total.events,
            &per_snapshot[0].events + &per_snapshot[1].events
        );
        assert_eq!(total.channel_names, reader.channel_names());
        assert_eq!(total.timeline.len(), 2);
        assert_eq!(total.timeline[0].peaks, per_snapshot[0].timeline_peaks);
        assert_eq!(total.first_snapshot(), Some("2023-03-01 00_00_00.npz"));
        assert_eq!(total.last_snapshot(), Some("2023-03-01 00_05_00.npz"));
    }

    #[test]
    fn a_bad_snapshot_aborts_the_sweep() {
        let (reader, _) = two_snapshots();
        let snapshots = Vec1::try_from_vec(vec![
            PathBuf::from("2023-03-01 00_00_00.npz"),
            PathBuf::from("missing.npz"),
        ])
        .unwrap();
        let config = AnalysisConfig::new(SigmaSweep::from_range(8, 8).unwrap());
        let result = count_detections(&reader, &snapshots, &config, None);
        assert!(matches!(result, Err(SnapshotError::MissingKey { .. })));
    }

    #[test]
    fn counts_survive_a_round_trip_through_a_file() {
        let (reader, snapshots) = two_snapshots();
        let config = AnalysisConfig::new(SigmaSweep::from_range(1, 2).unwrap());
        let counts = count_detections(&reader, &snapshots, &config, None).unwrap();

        let path =
            std::env::temp_dir().join(format!("dm-sweep-counts-{}.bin", std::process::id()));
        counts.save(&path).unwrap();
        let loaded = DetectionCounts::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.unwrap(), counts);
    }
}
