use thiserror::Error;

use crate::{
    averaging::SmoothingError,
    read::SnapshotError,
    sweep::{CountsIoError, SweepError},
    timestamps::TimestampError,
    write::PlotError,
};

/// Anything that can stop a batch run.
#[derive(Error, Debug)]
pub enum DmSweepError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    #[error(transparent)]
    Smoothing(#[from] SmoothingError),

    #[error(transparent)]
    Sweep(#[from] SweepError),

    #[error(transparent)]
    CountsIo(#[from] CountsIoError),

    #[error(transparent)]
    Plot(#[from] PlotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
