//! Data-collection sweeps over a grid of physical distances and FTM session
//! configurations.
//!
//! For each distance (outer loop) every configuration (inner loop) gets a
//! fixed quota of valid samples. Automatic sweeps run through the grid
//! without stopping; interactive sweeps pause after the last configuration
//! of each distance until the operator confirms the device was moved.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{RangingError, RangingResult};
use crate::ftm::{FtmController, FtmRadio, PollOutcome, RangingSample, SessionConfig};
use crate::records::{RecordSink, SweepRecord};

pub const DEFAULT_SAMPLES_PER_CONFIG: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepMode {
    Automatic,
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub distances_cm: Vec<u32>,
    pub configs: Vec<SessionConfig>,
    pub samples_per_config: u32,
    pub mode: SweepMode,
}

impl SweepPlan {
    pub fn new(distances_cm: Vec<u32>, configs: Vec<SessionConfig>) -> Self {
        Self {
            distances_cm,
            configs,
            samples_per_config: DEFAULT_SAMPLES_PER_CONFIG,
            mode: SweepMode::Automatic,
        }
    }

    pub fn with_samples_per_config(mut self, samples: u32) -> Self {
        self.samples_per_config = samples;
        self
    }

    pub fn with_mode(mut self, mode: SweepMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cell_count(&self) -> usize {
        self.distances_cm.len() * self.configs.len()
    }

    pub fn total_samples(&self) -> u64 {
        self.cell_count() as u64 * self.samples_per_config as u64
    }

    fn validate(&self) -> RangingResult<()> {
        if self.distances_cm.is_empty() {
            return Err(RangingError::Sweep("no distances in sweep plan".into()));
        }
        if self.configs.is_empty() {
            return Err(RangingError::Sweep("no configurations in sweep plan".into()));
        }
        if self.samples_per_config == 0 {
            return Err(RangingError::Sweep("samples per config must be > 0".into()));
        }
        Ok(())
    }
}

/// One cell of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCell {
    pub physical_distance_cm: u32,
    pub config: SessionConfig,
}

/// What the caller has to do after a sample was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAdvance {
    /// Keep sampling the current cell
    Continue,
    /// Cell full; switch the session to the next configuration
    NextConfig(SessionConfig),
    /// Distance finished; the device moves to the next distance
    NextDistance(SweepCell),
    /// Distance finished; wait for the operator before continuing
    AwaitOperator { next_distance_cm: u32 },
    /// Every cell is full
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepProgress {
    pub distance_index: usize,
    pub config_index: usize,
    pub samples_in_cell: u32,
    pub cells_done: usize,
    pub cells_total: usize,
}

/// Sweep state: advances monotonically through the grid
#[derive(Debug, Clone)]
pub struct Sweep {
    plan: SweepPlan,
    distance_index: usize,
    config_index: usize,
    samples_in_cell: u32,
    cell_complete: bool,
    complete: bool,
    waiting_for_operator: bool,
}

impl Sweep {
    pub fn new(plan: SweepPlan) -> RangingResult<Self> {
        plan.validate()?;
        Ok(Self {
            plan,
            distance_index: 0,
            config_index: 0,
            samples_in_cell: 0,
            cell_complete: false,
            complete: false,
            waiting_for_operator: false,
        })
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Cell currently being sampled, `None` once the sweep is complete
    pub fn current_cell(&self) -> Option<SweepCell> {
        if self.complete {
            return None;
        }
        Some(SweepCell {
            physical_distance_cm: self.plan.distances_cm[self.distance_index],
            config: self.plan.configs[self.config_index],
        })
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_waiting_for_operator(&self) -> bool {
        self.waiting_for_operator
    }

    /// True when the current cell reached its quota but the sweep has not
    /// moved on (only while waiting for the operator)
    pub fn is_cell_complete(&self) -> bool {
        self.cell_complete
    }

    pub fn progress(&self) -> SweepProgress {
        let cells_total = self.plan.cell_count();
        let cells_done = if self.complete {
            cells_total
        } else {
            self.distance_index * self.plan.configs.len()
                + self.config_index
                + usize::from(self.cell_complete)
        };
        SweepProgress {
            distance_index: self.distance_index,
            config_index: self.config_index,
            samples_in_cell: self.samples_in_cell,
            cells_done,
            cells_total,
        }
    }

    /// Count a valid sample towards the current cell. Invalid samples, and
    /// samples arriving while paused or after completion, are ignored.
    pub fn accept(&mut self, sample: &RangingSample) -> Option<(SweepRecord, SweepAdvance)> {
        if sample.is_invalid() || self.complete || self.waiting_for_operator {
            return None;
        }

        let cell = self.current_cell()?;
        let record = SweepRecord {
            physical_distance_cm: cell.physical_distance_cm,
            frame_count: cell.config.frame_count.as_u8(),
            burst_period: cell.config.burst_period,
            distance_cm: sample.distance_cm,
            rtt_ns: sample.rtt_ns,
            elapsed_ms: sample.elapsed_ms,
        };

        self.samples_in_cell += 1;
        if self.samples_in_cell < self.plan.samples_per_config {
            return Some((record, SweepAdvance::Continue));
        }

        Some((record, self.advance()))
    }

    fn advance(&mut self) -> SweepAdvance {
        self.samples_in_cell = 0;

        if self.config_index + 1 < self.plan.configs.len() {
            self.config_index += 1;
            return SweepAdvance::NextConfig(self.plan.configs[self.config_index]);
        }

        if self.distance_index + 1 >= self.plan.distances_cm.len() {
            self.complete = true;
            return SweepAdvance::Complete;
        }

        match self.plan.mode {
            SweepMode::Automatic => {
                self.distance_index += 1;
                self.config_index = 0;
                match self.current_cell() {
                    Some(cell) => SweepAdvance::NextDistance(cell),
                    None => SweepAdvance::Complete,
                }
            }
            SweepMode::Interactive => {
                self.cell_complete = true;
                self.waiting_for_operator = true;
                SweepAdvance::AwaitOperator {
                    next_distance_cm: self.plan.distances_cm[self.distance_index + 1],
                }
            }
        }
    }

    /// Operator moved the device: resume at the next distance with the
    /// first configuration
    pub fn confirm_operator(&mut self) -> Option<SweepCell> {
        if !self.waiting_for_operator {
            return None;
        }
        self.waiting_for_operator = false;
        self.cell_complete = false;
        self.distance_index += 1;
        self.config_index = 0;
        self.current_cell()
    }
}

/// State of a [`SweepDriver`] after one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Running,
    AwaitingOperator { next_distance_cm: u32 },
    Complete,
}

/// Runs a [`Sweep`] against a controller, writing one record per valid sample
pub struct SweepDriver<R: FtmRadio, C: Clock, S: RecordSink<SweepRecord>> {
    controller: FtmController<R, C>,
    sweep: Sweep,
    sink: S,
    started: bool,
}

impl<R: FtmRadio, C: Clock, S: RecordSink<SweepRecord>> SweepDriver<R, C, S> {
    pub fn new(controller: FtmController<R, C>, sweep: Sweep, sink: S) -> Self {
        Self {
            controller,
            sweep,
            sink,
            started: false,
        }
    }

    /// Start ranging with the first cell's configuration
    pub fn start(&mut self) -> RangingResult<()> {
        let cell = self
            .sweep
            .current_cell()
            .ok_or_else(|| RangingError::Sweep("sweep already complete".into()))?;
        info!(
            "Sweep start: {} cells x {} samples, first cell {} cm @ {}",
            self.sweep.plan().cell_count(),
            self.sweep.plan().samples_per_config,
            cell.physical_distance_cm,
            cell.config
        );
        self.controller.start(cell.config)?;
        self.started = true;
        Ok(())
    }

    /// One bounded step of the sweep loop
    pub fn tick(&mut self) -> RangingResult<DriverStatus> {
        if self.sweep.is_complete() {
            return Ok(DriverStatus::Complete);
        }
        if self.sweep.is_waiting_for_operator() {
            return Ok(self.status());
        }
        if !self.started {
            self.start()?;
        }

        let sample = match self.controller.poll() {
            PollOutcome::Sample(sample) => sample,
            outcome => {
                if let Some(retries) = stall_milestone(&outcome) {
                    warn!("Sweep stalled: {} timeouts so far", retries);
                }
                return Ok(DriverStatus::Running);
            }
        };

        let Some((record, advance)) = self.sweep.accept(&sample) else {
            return Ok(self.status());
        };
        self.sink.emit(&record)?;

        match advance {
            SweepAdvance::Continue => {}
            SweepAdvance::NextConfig(config) => {
                info!(
                    "Cell done, next config {} at {} cm",
                    config, record.physical_distance_cm
                );
                self.controller.reconfigure(config)?;
            }
            SweepAdvance::NextDistance(cell) => {
                info!(
                    "Distance {} cm done, continuing at {} cm",
                    record.physical_distance_cm, cell.physical_distance_cm
                );
                self.controller.reconfigure(cell.config)?;
            }
            SweepAdvance::AwaitOperator { next_distance_cm } => {
                info!(
                    "Distance {} cm done. Move the device to {} cm and confirm",
                    record.physical_distance_cm, next_distance_cm
                );
                self.controller.end_session();
                self.sink.flush()?;
            }
            SweepAdvance::Complete => {
                info!("Sweep complete: all {} cells collected", self.sweep.plan().cell_count());
                self.controller.end_session();
                self.sink.flush()?;
            }
        }
        Ok(self.status())
    }

    /// Operator confirmation. Resumes ranging at the next distance.
    pub fn confirm_operator(&mut self) -> RangingResult<Option<SweepCell>> {
        let Some(cell) = self.sweep.confirm_operator() else {
            return Ok(None);
        };
        info!(
            "Resuming sweep at {} cm with config {}",
            cell.physical_distance_cm, cell.config
        );
        self.controller.reconfigure(cell.config)?;
        Ok(Some(cell))
    }

    pub fn status(&self) -> DriverStatus {
        if self.sweep.is_complete() {
            DriverStatus::Complete
        } else if self.sweep.is_waiting_for_operator() {
            let next = self.sweep.progress().distance_index + 1;
            DriverStatus::AwaitingOperator {
                next_distance_cm: self.sweep.plan().distances_cm[next],
            }
        } else {
            DriverStatus::Running
        }
    }

    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    pub fn controller(&self) -> &FtmController<R, C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FtmController<R, C> {
        &mut self.controller
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Every tenth timeout of a stalled sweep is worth a warning
fn stall_milestone(outcome: &PollOutcome) -> Option<u64> {
    match outcome {
        PollOutcome::TimedOut { retries } if retries % 10 == 0 => Some(*retries),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ftm::controller::tests::MockRadio;
    use crate::ftm::{FrameCount, SimulatedResponder};

    fn configs() -> Vec<SessionConfig> {
        vec![
            SessionConfig::new(FrameCount::Frames16, 2),
            SessionConfig::new(FrameCount::Frames64, 10),
        ]
    }

    fn sample(distance_cm: u32) -> RangingSample {
        RangingSample {
            distance_cm,
            rtt_ns: 5,
            timestamp_ms: 0,
            elapsed_ms: 30,
        }
    }

    #[test]
    fn test_empty_plans_are_rejected() {
        assert!(Sweep::new(SweepPlan::new(vec![], configs())).is_err());
        assert!(Sweep::new(SweepPlan::new(vec![100], vec![])).is_err());
        assert!(Sweep::new(SweepPlan::new(vec![100], configs()).with_samples_per_config(0)).is_err());
    }

    #[test]
    fn test_automatic_sweep_visits_cells_in_order() {
        let plan = SweepPlan::new(vec![100, 200], configs()).with_samples_per_config(5);
        let mut sweep = Sweep::new(plan).unwrap();

        let mut records = Vec::new();
        let mut advances = Vec::new();
        for i in 0..100 {
            if let Some((record, advance)) = sweep.accept(&sample(100 + i)) {
                records.push(record);
                if advance != SweepAdvance::Continue {
                    advances.push(advance);
                }
            }
        }

        assert_eq!(records.len(), 20);
        assert!(sweep.is_complete());
        assert_eq!(sweep.current_cell(), None);

        let cells: Vec<(u32, u8)> = records
            .chunks(5)
            .map(|c| (c[0].physical_distance_cm, c[0].frame_count))
            .collect();
        assert_eq!(cells, vec![(100, 16), (100, 64), (200, 16), (200, 64)]);

        assert_eq!(advances.len(), 4);
        assert_eq!(advances[0], SweepAdvance::NextConfig(configs()[1]));
        assert_eq!(
            advances[1],
            SweepAdvance::NextDistance(SweepCell {
                physical_distance_cm: 200,
                config: configs()[0]
            })
        );
        assert_eq!(advances[3], SweepAdvance::Complete);
    }

    #[test]
    fn test_invalid_samples_do_not_count() {
        let plan = SweepPlan::new(vec![100], configs()).with_samples_per_config(2);
        let mut sweep = Sweep::new(plan).unwrap();

        assert!(sweep.accept(&RangingSample {
            distance_cm: 0,
            rtt_ns: 0,
            timestamp_ms: 0,
            elapsed_ms: 0
        })
        .is_none());
        assert_eq!(sweep.progress().samples_in_cell, 0);
    }

    #[test]
    fn test_interactive_sweep_pauses_between_distances() {
        let plan = SweepPlan::new(vec![50, 150], configs())
            .with_samples_per_config(3)
            .with_mode(SweepMode::Interactive);
        let mut sweep = Sweep::new(plan).unwrap();

        let mut last = SweepAdvance::Continue;
        for _ in 0..6 {
            last = sweep.accept(&sample(50)).unwrap().1;
        }
        assert_eq!(last, SweepAdvance::AwaitOperator { next_distance_cm: 150 });
        assert!(sweep.is_waiting_for_operator());
        assert!(sweep.is_cell_complete());
        assert_eq!(sweep.progress().cells_done, 2);

        // Blocked until confirmed
        assert!(sweep.accept(&sample(50)).is_none());

        let cell = sweep.confirm_operator().unwrap();
        assert_eq!(cell.physical_distance_cm, 150);
        assert_eq!(cell.config, configs()[0]);
        assert!(sweep.confirm_operator().is_none());

        let (record, _) = sweep.accept(&sample(151)).unwrap();
        assert_eq!(record.physical_distance_cm, 150);
        assert_eq!(record.frame_count, 16);
    }

    #[test]
    fn test_single_distance_interactive_completes_without_pause() {
        let plan = SweepPlan::new(vec![80], configs())
            .with_samples_per_config(1)
            .with_mode(SweepMode::Interactive);
        let mut sweep = Sweep::new(plan).unwrap();
        sweep.accept(&sample(80));
        assert_eq!(sweep.accept(&sample(80)).unwrap().1, SweepAdvance::Complete);
        assert!(!sweep.is_waiting_for_operator());
    }

    #[test]
    fn test_driver_collects_full_grid_with_simulator() {
        let clock = ManualClock::new(0);
        let radio = SimulatedResponder::new(clock.clone(), 100.0)
            .with_jitter_cm(3.0)
            .with_invalid_every(4);
        let controller = FtmController::new(radio, clock.clone());
        let plan = SweepPlan::new(vec![100, 200], configs()).with_samples_per_config(5);
        let mut driver = SweepDriver::new(controller, Sweep::new(plan).unwrap(), Vec::new());

        let mut ticks = 0;
        while driver.tick().unwrap() != DriverStatus::Complete {
            clock.advance(10);
            ticks += 1;
            assert!(ticks < 100_000, "sweep did not finish");
        }

        let records = driver.sink();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|r| !(r.distance_cm == 0 && r.rtt_ns == 0)));
        assert!(driver.controller().stats().invalid_readings > 0);
        assert_eq!(driver.controller().state(), crate::ftm::ControllerState::Idle);
        assert_eq!(driver.controller().config(), configs()[1]);
    }

    #[test]
    fn test_driver_waits_for_operator() {
        let clock = ManualClock::new(0);
        let controller = FtmController::new(
            SimulatedResponder::new(clock.clone(), 100.0),
            clock.clone(),
        );
        let plan = SweepPlan::new(vec![100, 300], vec![SessionConfig::default()])
            .with_samples_per_config(2)
            .with_mode(SweepMode::Interactive);
        let mut driver = SweepDriver::new(controller, Sweep::new(plan).unwrap(), Vec::new());

        let mut status = DriverStatus::Running;
        for _ in 0..1_000 {
            status = driver.tick().unwrap();
            if status != DriverStatus::Running {
                break;
            }
            clock.advance(10);
        }
        assert_eq!(status, DriverStatus::AwaitingOperator { next_distance_cm: 300 });
        assert_eq!(driver.sink().len(), 2);

        // Paused: no polling, no records
        let requests = driver.controller().stats().requests;
        for _ in 0..50 {
            clock.advance(100);
            driver.tick().unwrap();
        }
        assert_eq!(driver.controller().stats().requests, requests);
        assert_eq!(driver.sink().len(), 2);

        driver.controller_mut().radio_mut().set_true_distance_cm(300.0);
        driver.confirm_operator().unwrap();
        while driver.tick().unwrap() != DriverStatus::Complete {
            clock.advance(10);
        }
        let records = driver.into_sink();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].physical_distance_cm, 300);
        assert_eq!(records[3].distance_cm, 300);
    }

    #[test]
    fn test_stall_milestone_every_tenth_timeout() {
        assert_eq!(stall_milestone(&PollOutcome::TimedOut { retries: 10 }), Some(10));
        assert_eq!(stall_milestone(&PollOutcome::TimedOut { retries: 11 }), None);
        assert_eq!(stall_milestone(&PollOutcome::Pending), None);
        assert_eq!(stall_milestone(&PollOutcome::Invalid { status: None }), None);
    }

    #[test]
    fn test_driver_keeps_retrying_on_silent_peer() {
        let clock = ManualClock::new(0);
        let controller = FtmController::new(MockRadio::with_script(vec![]), clock.clone());
        let plan = SweepPlan::new(vec![100], configs()).with_samples_per_config(1);
        let mut driver = SweepDriver::new(controller, Sweep::new(plan).unwrap(), Vec::new());

        for _ in 0..30 {
            clock.advance(5_000);
            assert_eq!(driver.tick().unwrap(), DriverStatus::Running);
        }
        // First tick starts the session; each later tick times out once
        assert_eq!(driver.controller().stats().timeouts, 29);
        assert!(driver.sink().is_empty());
    }
}
