use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

use clap::{AppSettings, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;

use dm_sweep::{
    averaging::SmoothingError,
    read::{list_snapshots, NpzSnapshotReader},
    sweep::{count_detections, deaccumulate, normalize_per_hour, DetectionCounts, SigmaSweep},
    timestamps::{format_epoch, ObservationSpan},
    write::{detections_timeline, heatmap_hist, hist3d},
    AnalysisConfig, DetectionParams, DmSweepError, DEFAULT_ENVELOPE_CHUNK, DEFAULT_TIMELINE_SIGMA,
    DEFAULT_WINDOW,
};

#[derive(Parser)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_long_args = true)]
struct Args {
    /// The directory containing the .npz snapshots to sweep.
    #[clap(default_value = ".")]
    input_dir: PathBuf,

    /// Where the plots are written.
    #[clap(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// The first (smallest) sigma of the sweep. Asked for if not given.
    #[clap(long)]
    first_sigma: Option<u32>,

    /// The last (largest) sigma of the sweep, inclusive. Asked for if not
    /// given.
    #[clap(long)]
    last_sigma: Option<u32>,

    /// The sigma at which detections are counted for the timeline plot.
    #[clap(long, default_value_t = DEFAULT_TIMELINE_SIGMA)]
    timeline_sigma: f64,

    /// The moving-average window used for the detection baseline [samples].
    #[clap(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,

    /// The number of turning points reduced into one envelope point.
    #[clap(long, default_value_t = DEFAULT_ENVELOPE_CHUNK)]
    envelope_chunk: usize,

    /// Save the counts to this file, so they can be plotted again without
    /// another sweep.
    #[clap(long)]
    save_counts: Option<PathBuf>,

    /// Plot counts saved by an earlier run instead of sweeping the snapshots.
    #[clap(long)]
    load_counts: Option<PathBuf>,

    /// Don't draw the 3D histograms.
    #[clap(long)]
    no_3d: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    verbosity: u8,

    /// Disable progress bars.
    #[clap(long)]
    no_progress_bars: bool,
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
    if args.window == 0 {
        return Err(SmoothingError::ZeroWindow.into());
    }

    let counts = match args.load_counts.as_deref() {
        Some(path) => {
            info!("Loading counts from {}", path.display());
            DetectionCounts::load(path)?
        }
        None => sweep_snapshots(&args)?,
    };
    if let Some(path) = args.save_counts.as_deref() {
        info!("Saving counts to {}", path.display());
        counts.save(path)?;
    }

    let span = ObservationSpan::from_names(
        counts.first_snapshot().unwrap_or_default(),
        counts.last_snapshot().unwrap_or_default(),
    )?;
    let from_to = format!(
        "from {} to {}",
        format_epoch(span.start),
        format_epoch(span.end)
    );
    let hours = span.hours();
    info!(
        "{} snapshots {from_to} ({hours:.2} hours)",
        counts.timeline.len()
    );

    std::fs::create_dir_all(&args.output_dir)?;
    let sigma_labels = counts.sweep.labels();
    for (name, title, cumulative) in [
        ("peaks", "Peaks per hour", &counts.peaks),
        ("events", "Events per hour", &counts.events),
    ] {
        let rates = normalize_per_hour(&deaccumulate(cumulative), hours);
        let title = format!("{title} {from_to}");

        let path = args.output_dir.join(format!("{name}_heatmap.png"));
        heatmap_hist(
            &path,
            rates.view(),
            &counts.channel_names,
            &sigma_labels,
            &title,
        )?;
        info!("Wrote {}", path.display());

        if !args.no_3d {
            let path = args.output_dir.join(format!("{name}_hist3d.png"));
            hist3d(
                &path,
                rates.view(),
                &counts.channel_names,
                &sigma_labels,
                &title,
            )?;
            info!("Wrote {}", path.display());
        }
    }

    let path = args.output_dir.join("timeline.png");
    detections_timeline(
        &path,
        &counts.timeline,
        span,
        &format!("Peaks above {}σ per snapshot", counts.timeline_sigma),
    )?;
    info!("Wrote {}", path.display());

    Ok(())
}

/// Read every snapshot in the input directory and count its detections.
fn sweep_snapshots(args: &Args) -> Result<DetectionCounts, DmSweepError> {
    let snapshots = list_snapshots(&args.input_dir)?;
    info!(
        "Found {} snapshots in {}",
        snapshots.len(),
        args.input_dir.display()
    );
    // The counts are plotted against the snapshot times; don't sweep if they
    // can't be read.
    ObservationSpan::from_snapshots(&snapshots)?;

    let first_sigma = match args.first_sigma {
        Some(s) => s,
        None => prompt_sigma("first")?,
    };
    let last_sigma = match args.last_sigma {
        Some(s) => s,
        None => prompt_sigma("last")?,
    };
    let mut config = AnalysisConfig::new(SigmaSweep::from_range(first_sigma, last_sigma)?);
    config.detection = DetectionParams {
        window: args.window,
        envelope_chunk: args.envelope_chunk,
    };
    config.timeline_sigma = args.timeline_sigma;
    info!(
        "Sweeping sigma from {first_sigma} to {last_sigma} ({} thresholds)",
        config.sweep.len()
    );

    let reader = NpzSnapshotReader::new(
        snapshots.first(),
        config.layout.clone(),
        config.calibration,
    )?;
    let progress_bar = ProgressBar::with_draw_target(
        Some(snapshots.len() as _),
        if args.no_progress_bars {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stdout()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:17}: [{wide_bar:.blue}] {pos:3}/{len:3} snapshots ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message("Counting");
    progress_bar.tick();

    let counts = count_detections(&reader, &snapshots, &config, Some(progress_bar))?;
    Ok(counts)
}

/// Ask for a sigma on stdin until a whole number is given.
fn prompt_sigma(which: &str) -> Result<u32, std::io::Error> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("Enter the {which} sigma: ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stdin closed before the {which} sigma was given"),
            ));
        }
        match line.trim().parse() {
            Ok(sigma) => return Ok(sigma),
            Err(_) => println!("'{}' isn't a whole number", line.trim()),
        }
    }
}

fn setup_logging(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.init();
}
