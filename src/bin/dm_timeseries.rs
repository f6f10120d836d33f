//! Plot the power of each DM channel of one snapshot against time.

use std::path::PathBuf;

use clap::{AppSettings, Parser};
use log::info;

use dm_sweep::{
    averaging::moving_average,
    read::{snapshot_name, CalibrationTrim, ChannelLayout, NpzSnapshotReader, SnapshotRead},
    write::plot_dm_series,
    DmSweepError, DEFAULT_WINDOW,
};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The .npz snapshot to plot.
    snapshot: PathBuf,

    /// How many DM channels to plot, starting from the lowest DM.
    #[clap(short, long, default_value_t = 11)]
    quantity: usize,

    /// Where the plots are written.
    #[clap(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Also draw the moving average raised by this many standard deviations.
    #[clap(long)]
    overlay_sigma: Option<f64>,

    /// The moving-average window of the overlay [samples].
    #[clap(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,

    /// The length of the snapshot [minutes].
    #[clap(long, default_value_t = 5.0)]
    minutes: f64,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv).
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbosity);

    if let Err(e) = try_main(args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn try_main(args: Args) -> Result<(), DmSweepError> {
    let reader = NpzSnapshotReader::new(
        &args.snapshot,
        ChannelLayout::default(),
        CalibrationTrim::default(),
    )?;
    let channels = reader.read_channels(&args.snapshot)?;
    let name = snapshot_name(&args.snapshot);
    let stem = args
        .snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.clone());
    std::fs::create_dir_all(&args.output_dir)?;

    for (dm, series) in reader
        .channel_names()
        .iter()
        .zip(channels.iter())
        .take(args.quantity)
    {
        let overlay = match args.overlay_sigma {
            Some(sigma) => {
                let std = series.std(0.0);
                let smoothed = moving_average(series.view(), args.window)?;
                Some(
                    smoothed
                        .into_iter()
                        .map(|s| s.map(|s| s + sigma * std))
                        .collect::<Vec<_>>(),
                )
            }
            None => None,
        };

        let path = args.output_dir.join(format!("{stem}_DM{dm}.png"));
        plot_dm_series(
            &path,
            series.view(),
            overlay.as_deref(),
            args.minutes,
            &format!("DM {dm} ({name})"),
        )?;
        info!("Wrote {}", path.display());
    }

    Ok(())
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        _ => builder.filter_level(log::LevelFilter::Trace),
    };
    builder.init();
}
