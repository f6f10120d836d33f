//! Snapshots stored as NumPy `.npz` archives.

use std::{
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use log::{debug, trace};
use ndarray::{Array1, ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::NpzReader;

use super::{CalibrationTrim, ChannelLayout, SnapshotError, SnapshotRead};

fn open_npz(path: &Path) -> Result<NpzReader<BufReader<File>>, SnapshotError> {
    let file = File::open(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    NpzReader::new(BufReader::new(file)).map_err(|source| SnapshotError::Npz {
        path: path.to_path_buf(),
        source,
    })
}

fn array_names<R: Read + Seek>(
    npz: &mut NpzReader<R>,
    path: &Path,
) -> Result<Vec<String>, SnapshotError> {
    npz.names().map_err(|source| SnapshotError::Npz {
        path: path.to_path_buf(),
        source,
    })
}

/// Read an array of any numeric type and shape, widened to `f64`. `None` if
/// the element type isn't numeric.
fn read_widened<R: Read + Seek>(npz: &mut NpzReader<R>, key: &str) -> Option<ArrayD<f64>> {
    macro_rules! try_read_as {
        ($ty:ty) => {
            if let Ok(array) = npz.by_name::<OwnedRepr<$ty>, IxDyn>(key) {
                trace!("'{key}' is {} with shape {:?}", stringify!($ty), array.shape());
                return Some(array.mapv(|v| v as f64));
            }
        };
    }

    try_read_as!(f64);
    try_read_as!(f32);
    try_read_as!(i64);
    try_read_as!(i32);
    try_read_as!(i16);
    try_read_as!(i8);
    try_read_as!(u64);
    try_read_as!(u32);
    try_read_as!(u16);
    try_read_as!(u8);
    None
}

pub struct NpzSnapshotReader {
    layout: ChannelLayout,

    calibration: CalibrationTrim,

    /// The archive keys of the DM channels, in channel order. All snapshots
    /// of a batch are expected to use the same keys.
    keys: Vec<String>,
}

impl NpzSnapshotReader {
    /// Work out the DM channel keys from `first_snapshot`; every snapshot this
    /// reader reads afterwards is expected to use them too.
    pub fn new(
        first_snapshot: &Path,
        layout: ChannelLayout,
        calibration: CalibrationTrim,
    ) -> Result<NpzSnapshotReader, SnapshotError> {
        debug!("Getting DM channel keys from {}", first_snapshot.display());
        let mut npz = open_npz(first_snapshot)?;
        let names = array_names(&mut npz, first_snapshot)?;
        let keys = layout.select_keys(first_snapshot, &names)?;
        Ok(NpzSnapshotReader {
            layout,
            calibration,
            keys,
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl SnapshotRead for NpzSnapshotReader {
    fn channel_names(&self) -> Vec<String> {
        self.layout.channel_names()
    }

    fn read_channels(&self, snapshot: &Path) -> Result<Vec<Array1<f64>>, SnapshotError> {
        debug!("Reading {}", snapshot.display());
        let mut npz = open_npz(snapshot)?;
        let names = array_names(&mut npz, snapshot)?;

        let mut channels = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            if !names.contains(key) {
                return Err(SnapshotError::MissingKey {
                    path: snapshot.to_path_buf(),
                    key: key.clone(),
                });
            }
            let array =
                read_widened(&mut npz, key).ok_or_else(|| SnapshotError::UnsupportedDtype {
                    path: snapshot.to_path_buf(),
                    key: key.clone(),
                })?;
            channels.push(self.calibration.apply(array));
        }
        Ok(channels)
    }
}
