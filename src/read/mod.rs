pub mod npz;

use std::path::{Path, PathBuf};

use log::{debug, trace};
use ndarray::{Array1, ArrayD, Axis, Slice};
use thiserror::Error;
use vec1::Vec1;

pub use npz::NpzSnapshotReader;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Couldn't read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} isn't a readable npz archive: {source}", .path.display())]
    Npz {
        path: PathBuf,
        source: ndarray_npy::ReadNpzError,
    },

    #[error("No .npz snapshots found in {}", .0.display())]
    NoSnapshots(PathBuf),

    #[error(
        "{} has {found} arrays, but DM channels {first}..{end} were expected",
        .path.display()
    )]
    TooFewArrays {
        path: PathBuf,
        found: usize,
        first: usize,
        end: usize,
    },

    #[error("{} has {found} DM channels, but {expected} were expected", .path.display())]
    ChannelCount {
        path: PathBuf,
        found: usize,
        expected: usize,
    },

    #[error("{} has no array '{key}'", .path.display())]
    MissingKey { path: PathBuf, key: String },

    #[error("Array '{key}' in {} isn't a supported numeric type", .path.display())]
    UnsupportedDtype { path: PathBuf, key: String },

    #[error("Invalid channel layout: {0}")]
    BadLayout(String),
}

/// Where the DM channels sit among a snapshot's (sorted) array keys.
///
/// Sorting the keys puts the channels in lexical order, so e.g. "dm11" lands
/// right after "dm1". One element is moved to restore DM order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    /// The position of the first DM channel among the sorted keys.
    pub first_key: usize,

    pub num_channels: usize,

    /// The element at this position of the channel keys is moved...
    pub moved_from: usize,

    /// ... to this position.
    pub moved_to: usize,

    /// Channel `i` is named `dm_step * (i + 1)`.
    pub dm_step: u32,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self {
            first_key: 2,
            num_channels: 11,
            moved_from: 2,
            moved_to: 10,
            dm_step: 45,
        }
    }
}

/// The name of an array in an archive, without the ".npy" that NumPy appends
/// to each entry.
fn array_key(name: &str) -> &str {
    name.strip_suffix(".npy").unwrap_or(name)
}

impl ChannelLayout {
    /// Pick out the DM channel keys from all of the keys of a snapshot, in
    /// channel order. Keys are ordered by array name, ignoring any ".npy"
    /// suffix, but are returned as given.
    pub fn select_keys<S: AsRef<str>>(
        &self,
        path: &Path,
        keys: &[S],
    ) -> Result<Vec<String>, SnapshotError> {
        if self.moved_from >= self.num_channels || self.moved_to >= self.num_channels {
            return Err(SnapshotError::BadLayout(format!(
                "can't move channel {} to {} with only {} channels",
                self.moved_from, self.moved_to, self.num_channels
            )));
        }
        let end = self.first_key + self.num_channels;
        if keys.len() < end {
            return Err(SnapshotError::TooFewArrays {
                path: path.to_path_buf(),
                found: keys.len(),
                first: self.first_key,
                end,
            });
        }

        let mut sorted: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        sorted.sort_by(|a, b| array_key(a).cmp(array_key(b)));
        let mut selected = sorted[self.first_key..end].to_vec();
        let moved = selected.remove(self.moved_from);
        selected.insert(self.moved_to, moved);
        debug!("DM channel keys: {selected:?}");
        Ok(selected)
    }

    /// The DM of each channel, for labelling.
    pub fn channel_names(&self) -> Vec<String> {
        (1..=self.num_channels as u32)
            .map(|i| (self.dm_step * i).to_string())
            .collect()
    }
}

/// The head of every snapshot series is a calibration pulse that must not be
/// counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTrim {
    /// The length of the calibration pulse \[seconds\].
    pub calibration_seconds: f64,

    /// The length of the whole snapshot \[seconds\].
    pub observation_seconds: f64,
}

impl Default for CalibrationTrim {
    fn default() -> Self {
        Self {
            calibration_seconds: 2.0,
            observation_seconds: 5.0 * 60.0,
        }
    }
}

impl CalibrationTrim {
    /// How many leading samples of a series of `len` samples to drop.
    pub fn samples_to_skip(&self, len: usize) -> usize {
        if self.observation_seconds <= 0.0 {
            return 0;
        }
        let skip = (len as f64 * self.calibration_seconds / self.observation_seconds).floor();
        if skip > 0.0 {
            (skip as usize).min(len)
        } else {
            0
        }
    }

    /// Drop the calibration pulse from an array and flatten what's left in
    /// row-major order.
    ///
    /// A 1-D array loses its leading fraction of samples. Anything with more
    /// dimensions holds one row per time step, and loses whole leading rows:
    /// as many as the calibration fraction of a single row's length.
    pub fn apply(&self, array: ArrayD<f64>) -> Array1<f64> {
        if array.ndim() < 2 {
            let skip = self.samples_to_skip(array.len());
            return array.iter().skip(skip).copied().collect();
        }
        let rows = array.len_of(Axis(0));
        let skip = self.samples_to_skip(array.len_of(Axis(1))).min(rows);
        trace!("Dropping {skip} of {rows} rows of a {:?} array", array.shape());
        array
            .slice_axis(Axis(0), Slice::from(skip..))
            .iter()
            .copied()
            .collect()
    }
}

/// Something that can produce the DM channel series of a snapshot.
pub trait SnapshotRead: Sync {
    /// The DM channel names, in the order [`SnapshotRead::read_channels`]
    /// returns them.
    fn channel_names(&self) -> Vec<String>;

    /// Read every DM channel of a snapshot, in channel order, without the
    /// calibration pulse.
    fn read_channels(&self, snapshot: &Path) -> Result<Vec<Array1<f64>>, SnapshotError>;
}

/// The `.npz` files in `dir`, sorted by name. The name of a snapshot starts
/// with its timestamp, so this is also time order.
pub fn list_snapshots(dir: &Path) -> Result<Vec1<PathBuf>, SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut snapshots = vec![];
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("npz") {
            snapshots.push(path);
        }
    }
    snapshots.sort_unstable_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Found {} snapshots in {}", snapshots.len(), dir.display());
    Vec1::try_from_vec(snapshots).map_err(|_| SnapshotError::NoSnapshots(dir.to_path_buf()))
}

/// The file name of a snapshot, which is what its timestamp is parsed from.
pub fn snapshot_name(snapshot: &Path) -> String {
    snapshot
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| snapshot.display().to_string())
}
