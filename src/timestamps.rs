//! Snapshot file names start with the UTC time the snapshot was taken, e.g.
//! "2023-03-01 14_05_00.npz".

use std::path::PathBuf;

use hifitime::{Duration, Epoch};
use thiserror::Error;
use vec1::Vec1;

use crate::read::snapshot_name;

/// The number of characters of the timestamp at the start of a snapshot name.
pub const TIMESTAMP_LEN: usize = 19;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("'{0}' doesn't start with a 'YYYY-MM-DD HH_MM_SS' timestamp")]
    Malformed(String),

    #[error("'{name}' doesn't start with a valid date: {reason}")]
    InvalidDate { name: String, reason: String },
}

/// Parse the timestamp at the start of a snapshot name. Time fields may be
/// separated by '_' (as in file names) or ':'.
pub fn parse_snapshot_time(name: &str) -> Result<Epoch, TimestampError> {
    let malformed = || TimestampError::Malformed(name.to_string());
    let stamp = name.get(..TIMESTAMP_LEN).ok_or_else(malformed)?;
    let b = stamp.as_bytes();
    let separators_ok = stamp.is_ascii()
        && b[4] == b'-'
        && b[7] == b'-'
        && (b[10] == b' ' || b[10] == b'T')
        && matches!(b[13], b'_' | b':')
        && matches!(b[16], b'_' | b':');
    if !separators_ok {
        return Err(malformed());
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32, TimestampError> {
        let s = &stamp[range];
        if !s.bytes().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        s.parse().map_err(|_| malformed())
    };
    let year = field(0..4)? as i32;
    let month = field(5..7)? as u8;
    let day = field(8..10)? as u8;
    let hour = field(11..13)? as u8;
    let minute = field(14..16)? as u8;
    let second = field(17..19)? as u8;

    Epoch::maybe_from_gregorian_utc(year, month, day, hour, minute, second, 0).map_err(|e| {
        TimestampError::InvalidDate {
            name: name.to_string(),
            reason: format!("{e:?}"),
        }
    })
}

/// Format an epoch as "YYYY-MM-DD HH:MM:SS" (UTC).
pub fn format_epoch(epoch: Epoch) -> String {
    let (y, m, d, h, min, s, _) = epoch.to_gregorian_utc();
    format!("{y:04}-{m:02}-{d:02} {h:02}:{min:02}:{s:02}")
}

/// The time between the first and last snapshots of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationSpan {
    pub start: Epoch,
    pub end: Epoch,
}

impl ObservationSpan {
    pub fn from_names(first: &str, last: &str) -> Result<ObservationSpan, TimestampError> {
        Ok(ObservationSpan {
            start: parse_snapshot_time(first)?,
            end: parse_snapshot_time(last)?,
        })
    }

    /// The span of a batch of snapshot files, from the names of the first and
    /// last.
    pub fn from_snapshots(snapshots: &Vec1<PathBuf>) -> Result<ObservationSpan, TimestampError> {
        ObservationSpan::from_names(
            &snapshot_name(snapshots.first()),
            &snapshot_name(snapshots.last()),
        )
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The elapsed time in hours, used to turn counts into rates.
    pub fn hours(&self) -> f64 {
        self.duration().to_seconds() / 3600.0
    }

    /// Hours since the start of the span at `epoch`.
    pub fn hours_since_start(&self, epoch: Epoch) -> f64 {
        (epoch - self.start).to_seconds() / 3600.0
    }

    /// The epoch `hours` after the start of the span.
    pub fn at_hours(&self, hours: f64) -> Epoch {
        self.start + Duration::from_seconds(hours * 3600.0)
    }
}
