use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::time::{sleep, Duration};

use ftm_ranging::clock::MonotonicClock;
use ftm_ranging::ftm::{FtmController, SimulatedResponder};
use ftm_ranging::records::{OutputFormat, RecordSink, RecordWriter};
use ftm_ranging::settings::{
    RangerSettings, SettingsStore, SettingsWatcher, KEY_CALIBRATION_OFFSET_CM,
};
use ftm_ranging::{ProcessedReading, Ranger, RangingPipeline};

#[derive(Parser, Debug)]
#[command(name = "ftm_ranger")]
#[command(about = "Continuous FTM ranging with calibration and smoothing", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Settings file (flat JSON object), watched for changes
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Record output file (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Record format (csv, jsonl)
    #[arg(long, default_value = "csv")]
    format: OutputFormat,

    /// Gzip-compress the output file
    #[arg(long)]
    gzip: bool,

    /// Live status snapshot, rewritten every 2 seconds
    #[arg(long, default_value = "live_status.json")]
    status_file: PathBuf,

    /// Skip startup calibration (offset 0 unless one is persisted)
    #[arg(long)]
    skip_calibration: bool,

    /// Settings poll interval in milliseconds
    #[arg(long, default_value = "500")]
    settings_poll_ms: u64,

    /// Simulated responder: true distance
    #[arg(long, default_value = "150.0")]
    sim_distance_cm: f64,

    /// Simulated responder: constant measurement bias
    #[arg(long, default_value = "2.0")]
    sim_bias_cm: f64,

    /// Simulated responder: jitter amplitude
    #[arg(long, default_value = "3.0")]
    sim_jitter_cm: f64,

    /// Simulated responder: every Nth exchange is invalid (0 = never)
    #[arg(long, default_value = "0")]
    sim_invalid_every: u64,

    /// Simulated responder never answers
    #[arg(long)]
    sim_unresponsive: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("[{}] FTM Ranger starting", ts_now());
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Settings: {}", args.settings.display());
    info!("  Output: {}", describe_output(args.output.as_deref(), args.gzip));

    let mut store = SettingsStore::load(&args.settings)
        .with_context(|| format!("loading {}", args.settings.display()))?;
    let settings = RangerSettings::from_source(&store);
    let (_watcher, changes) = SettingsWatcher::spawn(
        &args.settings,
        Duration::from_millis(args.settings_poll_ms.max(10)),
    )?;

    let pipeline = if args.skip_calibration && settings.calibration_offset_cm.is_none() {
        RangingPipeline::uncalibrated(settings.filter_window)
    } else {
        RangingPipeline::from_settings(&settings)
    };
    if pipeline.calibration().is_calibrating() {
        info!(
            "Calibrating: place the device {:.1} cm from the responder ({} samples)",
            settings.calibration_reference_cm, settings.calibration_samples
        );
    }

    let clock = MonotonicClock::new();
    let mut radio = SimulatedResponder::new(clock, args.sim_distance_cm)
        .with_bias_cm(args.sim_bias_cm)
        .with_jitter_cm(args.sim_jitter_cm)
        .with_invalid_every(args.sim_invalid_every);
    radio.set_responsive(!args.sim_unresponsive);

    let controller = FtmController::new(radio, clock);
    let mut ranger = Ranger::new(controller, pipeline, settings);
    ranger.start()?;

    let mut writer = match &args.output {
        Some(path) => RecordWriter::create(path, args.format, args.gzip)?,
        None => RecordWriter::stdout(args.format),
    };

    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                info!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        if let Some(next) = changes.try_iter().last() {
            ranger.apply_settings(next)?;
        }

        if let Some(update) = ranger.tick() {
            info!("{}", update.sample.report_line(&update.config));
            match update.reading {
                ProcessedReading::Calibrating { progress_percent } => {
                    if progress_percent % 10 == 0 {
                        info!("Calibration {}%", progress_percent);
                    }
                }
                ProcessedReading::CalibrationComplete { offset_cm } => {
                    if let Err(e) = persist_offset(&mut store, offset_cm) {
                        warn!("Could not persist calibration offset: {:#}", e);
                    }
                }
                ProcessedReading::Distance { .. } => {}
            }
            if let Some(record) = update.record() {
                writer.emit(&record)?;
            }
        }

        // Update live status every 2 seconds
        let now = Utc::now();
        if (now.signed_duration_since(last_status_update).num_seconds() as u64) >= 2 {
            if let Err(e) = ranger.status(start).save(&args.status_file) {
                warn!("Could not write {}: {}", args.status_file.display(), e);
            }
            last_status_update = now;
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = sleep(Duration::from_millis(1)) => {}
        }
    }

    ranger.end_session();
    let rows = writer.finish()?;

    let stats = ranger.controller().stats();
    info!(
        "[{}] Done: {} samples, {} records, {} invalid, {} timeouts, uptime {}s",
        ts_now(),
        ranger.samples(),
        rows,
        stats.invalid_readings,
        stats.timeouts,
        uptime_secs(start)
    );
    Ok(())
}

/// Write the offset back so the next start can skip calibration
fn persist_offset(store: &mut SettingsStore, offset_cm: f32) -> Result<()> {
    store.reload()?;
    store.set_number(KEY_CALIBRATION_OFFSET_CM, offset_cm as f64);
    store.save()?;
    info!(
        "Saved calibration offset {:.2} cm to {}",
        offset_cm,
        store.path().display()
    );
    Ok(())
}

fn describe_output(path: Option<&Path>, gzip: bool) -> String {
    match path {
        Some(p) if gzip => format!("{} (gzip)", p.display()),
        Some(p) => p.display().to_string(),
        None => "stdout".to_string(),
    }
}

fn uptime_secs(start: DateTime<Utc>) -> u64 {
    Utc::now().signed_duration_since(start).num_seconds().max(0) as u64
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
