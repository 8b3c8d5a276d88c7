use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use crossbeam::channel::{self, Receiver};
use log::{info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use tokio::signal;
use tokio::time::{sleep, Duration};

use ftm_ranging::clock::MonotonicClock;
use ftm_ranging::ftm::{FtmController, SessionConfig, SimulatedResponder, DEFAULT_TIMEOUT_MS};
use ftm_ranging::records::{OutputFormat, RecordWriter};
use ftm_ranging::sweep::{DriverStatus, Sweep, SweepDriver, SweepMode, SweepPlan};

#[derive(Parser, Debug)]
#[command(name = "ftm_sweep")]
#[command(about = "Collect FTM samples over a grid of distances and session configs", long_about = None)]
struct Args {
    /// Physical distances in cm, visited in order
    #[arg(long, value_delimiter = ',', default_value = "50,100,200")]
    distances: Vec<u32>,

    /// Session configs as frames:burst, sampled in order at each distance
    #[arg(long, value_delimiter = ',', default_value = "16:2,64:10")]
    configs: Vec<SessionConfig>,

    /// Valid samples collected per (distance, config) cell
    #[arg(long, default_value = "1000")]
    samples: u32,

    /// Pause after each distance until Enter is pressed
    #[arg(long)]
    interactive: bool,

    /// Record output file (stdout when omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Record format (csv, jsonl)
    #[arg(long, default_value = "csv")]
    format: OutputFormat,

    /// Gzip-compress the output file
    #[arg(long)]
    gzip: bool,

    /// Report timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Simulated responder: constant measurement bias
    #[arg(long, default_value = "2.0")]
    sim_bias_cm: f64,

    /// Simulated responder: jitter amplitude
    #[arg(long, default_value = "3.0")]
    sim_jitter_cm: f64,

    /// Simulated responder: every Nth exchange is invalid (0 = never)
    #[arg(long, default_value = "0")]
    sim_invalid_every: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mode = if args.interactive {
        SweepMode::Interactive
    } else {
        SweepMode::Automatic
    };
    let plan = SweepPlan::new(args.distances.clone(), args.configs.clone())
        .with_samples_per_config(args.samples)
        .with_mode(mode);
    info!(
        "Sweep plan: distances {:?} cm, configs [{}], {} samples each ({} total), {:?}",
        plan.distances_cm,
        plan.configs
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        plan.samples_per_config,
        plan.total_samples(),
        plan.mode
    );
    let sweep = Sweep::new(plan)?;

    let Some(first) = sweep.current_cell() else {
        bail!("sweep has no cells");
    };

    let clock = MonotonicClock::new();
    let radio = SimulatedResponder::new(clock, first.physical_distance_cm as f64)
        .with_bias_cm(args.sim_bias_cm)
        .with_jitter_cm(args.sim_jitter_cm)
        .with_invalid_every(args.sim_invalid_every);
    let controller = FtmController::new(radio, clock).with_timeout_ms(args.timeout_ms);

    let writer = match &args.output {
        Some(path) => RecordWriter::create(path, args.format, args.gzip)?,
        None => RecordWriter::stdout(args.format),
    };

    if mode == SweepMode::Interactive {
        info!(
            "Interactive sweep: place the device at {} cm, ranging starts now",
            first.physical_distance_cm
        );
    }
    let operator = spawn_operator_input()?;

    let mut driver = SweepDriver::new(controller, sweep, writer);
    driver.start()?;

    let start = Utc::now();
    let mut simulated_distance = first.physical_distance_cm;
    let mut prompted = false;
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        match driver.tick()? {
            DriverStatus::Complete => break,
            DriverStatus::AwaitingOperator { next_distance_cm } => {
                if !prompted {
                    info!(
                        "Move the device to {} cm and press Enter to continue",
                        next_distance_cm
                    );
                    prompted = true;
                }
                if operator.try_recv().is_ok() {
                    // Sim follows the operator before ranging resumes
                    driver
                        .controller_mut()
                        .radio_mut()
                        .set_true_distance_cm(next_distance_cm as f64);
                    simulated_distance = next_distance_cm;
                    driver.confirm_operator()?;
                    prompted = false;
                }
            }
            DriverStatus::Running => {
                // Enter presses while sampling do not count as confirmations
                while operator.try_recv().is_ok() {}
            }
        }

        if let Some(cell) = driver.sweep().current_cell() {
            if cell.physical_distance_cm != simulated_distance {
                driver
                    .controller_mut()
                    .radio_mut()
                    .set_true_distance_cm(cell.physical_distance_cm as f64);
                simulated_distance = cell.physical_distance_cm;
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("Interrupted, keeping the {} records collected so far", driver.sink().rows());
                driver.controller_mut().end_session();
                break;
            }
            _ = sleep(Duration::from_millis(1)) => {}
        }
    }

    let stats = driver.controller().stats();
    let rows = driver.into_sink().finish()?;

    info!(
        "Sweep finished in {}s: {} records, {} invalid readings discarded, {} timeouts",
        Utc::now().signed_duration_since(start).num_seconds().max(0),
        rows,
        stats.invalid_readings,
        stats.timeouts
    );
    Ok(())
}

/// Blocking stdin reader; every line is one operator confirmation
fn spawn_operator_input() -> Result<Receiver<()>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if let Err(e) = line {
                    warn!("stdin closed: {}", e);
                    break;
                }
                if tx.send(()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
