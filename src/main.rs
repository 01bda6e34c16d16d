use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pitchbatch::analyzer::pitch::{PitchAlgorithm, PitchUnit};
use pitchbatch::analyzer::{self, FileOutcome, FileProcessor};
use pitchbatch::config::AppConfig;
use pitchbatch::report::ResultTable;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pitchbatch", version, about = "Frame-wise pitch and confidence for a directory of audio files")]
struct Cli {
    /// Directory of audio files (default: ./wav)
    #[arg(short, long)]
    source_dir: Option<PathBuf>,

    /// Output CSV path (default: ./all_pitches.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of parallel workers (0 = all cores)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Samples per analysis frame
    #[arg(long)]
    window_size: Option<usize>,

    /// Samples between frame starts
    #[arg(long)]
    hop_size: Option<usize>,

    /// Pitch algorithm (yin, acf)
    #[arg(long)]
    algorithm: Option<PitchAlgorithm>,

    /// Dip acceptance threshold in (0, 1]
    #[arg(long)]
    tolerance: Option<f32>,

    /// Output unit for the Pitch column (hz, midi, cent, bin)
    #[arg(long)]
    unit: Option<PitchUnit>,

    /// Lowest fundamental searched, in Hz
    #[arg(long)]
    min_frequency: Option<f32>,

    /// Highest fundamental searched, in Hz
    #[arg(long)]
    max_frequency: Option<f32>,

    /// Frames quieter than this (dBFS) are reported unvoiced
    #[arg(long, allow_hyphen_values = true)]
    silence_db: Option<f32>,

    /// Include subdirectories of the source directory
    #[arg(short, long)]
    recursive: bool,

    /// Order the output by file name instead of completion order
    #[arg(long)]
    sort: bool,

    /// Config file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Exit status after a Ctrl-C, matching shell convention.
const EXIT_INTERRUPTED: i32 = 130;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Resolve settings: CLI > config file > defaults
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path).context("Failed to load config")?,
        None => AppConfig::load(),
    };
    apply_overrides(&mut config, &cli);

    let start = Instant::now();
    let source_dir = config.source_dir();
    let output_path = config.output_path();

    let files = pitchbatch::scanner::discover(&source_dir, config.recursive)
        .with_context(|| format!("The folder '{}' does not exist.", source_dir.display()))?;

    let processor = Arc::new(FileProcessor::from_config(&config.pitch).context("Invalid pitch settings")?);
    let workers = config.resolve_workers();

    if !pitchbatch::interrupt::install() {
        log::debug!("Interrupt handler not installed");
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} Processing Files [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut table = ResultTable::new(config.pitch.unit, processor.window_size());
    let summary = analyzer::analyze_files(
        processor,
        &files,
        workers,
        pitchbatch::interrupt::flag(),
        |done| {
            pb.inc(1);
            // suspend() also prints when the bar is hidden (stdout not a terminal)
            if let Some(line) = done.status_line() {
                pb.suspend(|| println!("{}", line));
            }
            match done.outcome {
                FileOutcome::Done(result) => table.push(result),
                FileOutcome::Failed(e) => {
                    log::warn!("Skipping {} ({}): {}", done.path.display(), e.kind(), e);
                }
                FileOutcome::Skipped => {
                    log::debug!("Not started (interrupted): {}", done.path.display());
                }
            }
        },
    )
    .context("Analysis failed")?;

    pb.finish_with_message(format!("{} processed, {} failed", summary.processed, summary.failed));

    if config.sort_by_file {
        table.sort_by_file();
    }
    table
        .save(&output_path)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!(
        "Total files processed: {} out of {}",
        summary.processed, summary.discovered
    );
    if summary.failed > 0 {
        println!("Failed: {} (see diagnostics above)", summary.failed);
    }
    println!(
        "Total processing time: {:.2} seconds. Data saved to '{}'.",
        start.elapsed().as_secs_f64(),
        output_path.display()
    );

    if pitchbatch::interrupt::interrupted() {
        eprintln!(
            "Interrupted: {} files were not started",
            summary.skipped
        );
        std::process::exit(EXIT_INTERRUPTED);
    }

    Ok(())
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(dir) = &cli.source_dir {
        config.source_dir = Some(dir.clone());
    }
    if let Some(out) = &cli.output {
        config.output_path = Some(out.clone());
    }
    if let Some(jobs) = cli.jobs {
        config.workers = jobs;
    }
    if cli.recursive {
        config.recursive = true;
    }
    if cli.sort {
        config.sort_by_file = true;
    }

    let pitch = &mut config.pitch;
    if let Some(w) = cli.window_size {
        pitch.window_size = w;
    }
    if let Some(h) = cli.hop_size {
        pitch.hop_size = h;
    }
    if let Some(a) = cli.algorithm {
        pitch.algorithm = a;
    }
    if let Some(t) = cli.tolerance {
        pitch.tolerance = t;
    }
    if let Some(u) = cli.unit {
        pitch.unit = u;
    }
    if let Some(f) = cli.min_frequency {
        pitch.min_frequency = f;
    }
    if let Some(f) = cli.max_frequency {
        pitch.max_frequency = f;
    }
    if let Some(db) = cli.silence_db {
        pitch.silence_db = db;
    }
}
