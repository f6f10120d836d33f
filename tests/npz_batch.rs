//! Sweeping real .npz archives written to a temporary directory.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use ndarray::prelude::*;
use ndarray_npy::NpzWriter;

use dm_sweep::{
    read::{list_snapshots, CalibrationTrim, ChannelLayout, NpzSnapshotReader, SnapshotRead},
    sweep::{count_detections, deaccumulate, normalize_per_hour, SigmaSweep},
    timestamps::ObservationSpan,
    AnalysisConfig,
};

/// The sorted archive keys, for the default layout. Channel `i` is stored
/// under `CHANNEL_KEYS[i]`; sorting puts channel 10 third.
const CHANNEL_KEYS: [&str; 11] = [
    "c00", "c01", "c03", "c04", "c05", "c06", "c07", "c08", "c09", "c10", "c02",
];

fn fresh_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dm_sweep_{name}_{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a snapshot with two metadata arrays (which sort first) and the given
/// DM channels.
fn write_snapshot(path: &Path, channels: &[Array1<f64>]) {
    assert_eq!(channels.len(), CHANNEL_KEYS.len());
    let mut npz = NpzWriter::new(File::create(path).unwrap());
    npz.add_array("a_meta", &array![1_i64, 2, 3]).unwrap();
    npz.add_array("b_meta", &array![0.5_f64]).unwrap();
    for (key, channel) in CHANNEL_KEYS.iter().zip(channels) {
        npz.add_array(*key, channel).unwrap();
    }
    npz.finish().unwrap();
}

/// An alternating 1.0/1.1 baseline with pulses raised by 99.
fn pulsed_series(len: usize, pulses: &[std::ops::Range<usize>]) -> Array1<f64> {
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
fn channels_come_out_in_dm_order() {
    let dir = fresh_dir("order");
    let path = dir.join("2023-03-01 14_00_00.npz");

    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("a_meta", &array![1_i64]).unwrap();
    npz.add_array("b_meta", &array![1_i64]).unwrap();
    for (i, key) in CHANNEL_KEYS.iter().enumerate() {
        let series = Array1::from_iter((0..300).map(|s| (i * 1000 + s) as f64));
        match i {
            // Narrower types are widened.
            1 => npz.add_array(*key, &series.mapv(|v| v as f32)).unwrap(),
            2 => npz.add_array(*key, &series.mapv(|v| v as i32)).unwrap(),
            // Multi-dimensional arrays are flattened.
            3 => npz
                .add_array(*key, &series.into_shape((10, 30)).unwrap())
                .unwrap(),
            _ => npz.add_array(*key, &series).unwrap(),
        }
    }
    npz.finish().unwrap();

    let reader =
        NpzSnapshotReader::new(&path, ChannelLayout::default(), CalibrationTrim::default())
            .unwrap();
    let keys: Vec<&str> = reader
        .keys()
        .iter()
        .map(|k| k.trim_end_matches(".npy"))
        .collect();
    assert_eq!(keys, CHANNEL_KEYS);
    assert_eq!(reader.channel_names().first().map(String::as_str), Some("45"));
    assert_eq!(reader.channel_names().last().map(String::as_str), Some("495"));

    let channels = reader.read_channels(&path).unwrap();
    assert_eq!(channels.len(), 11);
    for (i, channel) in channels.iter().enumerate() {
        if i == 3 {
            // Rows of 30 samples are too short to hold any calibration.
            assert_eq!(channel.len(), 300);
            assert_eq!(channel[0], 3000.0);
            continue;
        }
        // 300 samples over 5 minutes; the first 2 seconds are dropped.
        assert_eq!(channel.len(), 298);
        assert_eq!(channel[0], (i * 1000 + 2) as f64);
        assert_eq!(channel[297], (i * 1000 + 299) as f64);
    }

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn two_dimensional_channels_lose_leading_rows() {
    let dir = fresh_dir("rows");
    let path = dir.join("2023-03-01 14_00_00.npz");

    // Keys as NumPy writes them.
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("a_meta.npy", &array![1_i64]).unwrap();
    npz.add_array("b_meta.npy", &array![1_i64]).unwrap();
    for (i, key) in CHANNEL_KEYS.iter().enumerate() {
        let channel =
            Array2::from_shape_fn((100, 1500), |(r, c)| (i * 1_000_000 + r * 1500 + c) as f64);
        npz.add_array(format!("{key}.npy"), &channel).unwrap();
    }
    npz.finish().unwrap();

    let reader =
        NpzSnapshotReader::new(&path, ChannelLayout::default(), CalibrationTrim::default())
            .unwrap();
    let expected_keys: Vec<String> = CHANNEL_KEYS.iter().map(|k| format!("{k}.npy")).collect();
    assert_eq!(reader.keys(), expected_keys.as_slice());

    let channels = reader.read_channels(&path).unwrap();
    for (i, channel) in channels.iter().enumerate() {
        // Rows of 1500 samples over 5 minutes: the first 10 rows are dropped.
        assert_eq!(channel.len(), 90 * 1500);
        assert_eq!(channel[0], (i * 1_000_000 + 15000) as f64);
        assert_eq!(channel[channel.len() - 1], (i * 1_000_000 + 149_999) as f64);
    }

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn too_few_arrays_is_an_error() {
    let dir = fresh_dir("few");
    let path = dir.join("2023-03-01 14_00_00.npz");
    let mut npz = NpzWriter::new(File::create(&path).unwrap());
    npz.add_array("a_meta", &array![1_i64]).unwrap();
    npz.add_array("c00", &array![1.0_f64, 2.0]).unwrap();
    npz.finish().unwrap();

    let result =
        NpzSnapshotReader::new(&path, ChannelLayout::default(), CalibrationTrim::default());
    assert!(result.is_err());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn batch_sweep_over_archives() {
    let dir = fresh_dir("batch");
    let len = 10240;
    let quiet = || pulsed_series(len, &[]);
    let pulsed = || pulsed_series(len, &[4096..6144]);

    let mut first: Vec<Array1<f64>> = (0..11).map(|_| quiet()).collect();
    first[0] = pulsed();
    let mut second = first.clone();
    second[10] = pulsed();
    // Written out of order, and with something that isn't a snapshot.
    write_snapshot(&dir.join("2023-03-01 14_05_00.npz"), &second);
    write_snapshot(&dir.join("2023-03-01 14_00_00.npz"), &first);
    std::fs::write(dir.join("notes.txt"), "not a snapshot").unwrap();

    let snapshots = list_snapshots(&dir).unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.first().ends_with("2023-03-01 14_00_00.npz"));

    let mut config = AnalysisConfig::new(SigmaSweep::new(vec![2.0, 8.0]).unwrap());
    config.timeline_sigma = 2.0;
    let reader =
        NpzSnapshotReader::new(snapshots.first(), config.layout.clone(), config.calibration)
            .unwrap();
    let counts = count_detections(&reader, &snapshots, &config, None).unwrap();

    let mut expected_events = Array2::<u64>::zeros((11, 2));
    expected_events[(0, 0)] = 2;
    expected_events[(10, 0)] = 1;
    assert_eq!(counts.events, expected_events);

    let mut expected_peaks = Array2::<u64>::zeros((11, 2));
    expected_peaks[(0, 0)] = 2048;
    expected_peaks[(10, 0)] = 1024;
    assert_eq!(counts.peaks, expected_peaks);

    let timeline: Vec<u64> = counts.timeline.iter().map(|t| t.peaks).collect();
    assert_eq!(timeline, vec![1024, 2048]);

    let span = ObservationSpan::from_names(
        counts.first_snapshot().unwrap(),
        counts.last_snapshot().unwrap(),
    )
    .unwrap();
    assert!((span.hours() - 5.0 / 60.0).abs() < 1e-12);
    let rates = normalize_per_hour(&deaccumulate(&counts.peaks), span.hours());
    assert_eq!(rates[(0, 0)], 24576.0);
    assert_eq!(rates[(10, 0)], 12288.0);
    assert_eq!(rates[(5, 1)], 0.0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn an_empty_directory_has_no_snapshots() {
    let dir = fresh_dir("empty");
    assert!(list_snapshots(&dir).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}
