//! Continuous ranging: one controller feeding one pipeline, reconfigured in
//! place when the settings file changes.

use chrono::{DateTime, Utc};
use log::info;

use crate::clock::Clock;
use crate::error::RangingResult;
use crate::ftm::{FtmController, FtmRadio, PollOutcome, RangingSample, SessionConfig};
use crate::live_status::RangingStatus;
use crate::pipeline::{ProcessedReading, RangingPipeline};
use crate::records::RangingRecord;
use crate::settings::RangerSettings;

/// One valid sample and what the pipeline made of it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangingUpdate {
    pub sample: RangingSample,
    pub config: SessionConfig,
    pub reading: ProcessedReading,
}

impl RangingUpdate {
    /// Output record, only for calibrated distances
    pub fn record(&self) -> Option<RangingRecord> {
        match self.reading {
            ProcessedReading::Distance {
                calibrated_cm,
                smoothed_cm,
                ..
            } => Some(RangingRecord {
                timestamp_ms: self.sample.timestamp_ms,
                frame_count: self.config.frame_count.as_u8(),
                burst_period: self.config.burst_period,
                distance_cm: self.sample.distance_cm,
                rtt_ns: self.sample.rtt_ns,
                elapsed_ms: self.sample.elapsed_ms,
                calibrated_cm,
                smoothed_cm,
            }),
            _ => None,
        }
    }
}

/// Effect of a settings change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsOutcome {
    pub session_restarted: bool,
    pub timeout_changed: bool,
    pub recalibrating: bool,
}

pub struct Ranger<R: FtmRadio, C: Clock> {
    controller: FtmController<R, C>,
    pipeline: RangingPipeline,
    settings: RangerSettings,
    samples: u64,
    last_sample: Option<RangingSample>,
    last_smoothed: Option<f32>,
}

impl<R: FtmRadio, C: Clock> Ranger<R, C> {
    pub fn new(
        mut controller: FtmController<R, C>,
        pipeline: RangingPipeline,
        settings: RangerSettings,
    ) -> Self {
        controller.set_timeout_ms(settings.timeout_ms);
        Self {
            controller,
            pipeline,
            settings,
            samples: 0,
            last_sample: None,
            last_smoothed: None,
        }
    }

    pub fn start(&mut self) -> RangingResult<()> {
        self.controller.start(self.settings.session)
    }

    /// Apply a settings snapshot on the loop thread. The session is ended
    /// and restarted only when the radio parameters changed, so saving the
    /// calibration offset never interrupts ranging.
    pub fn apply_settings(&mut self, next: RangerSettings) -> RangingResult<SettingsOutcome> {
        let mut outcome = SettingsOutcome {
            recalibrating: self.pipeline.apply_settings(&next),
            ..SettingsOutcome::default()
        };
        if outcome.recalibrating {
            info!(
                "Recalibrating: place the device {:.1} cm from the responder",
                next.calibration_reference_cm
            );
        }

        if next.timeout_ms != self.settings.timeout_ms {
            info!("FTM timeout changed to {} ms", next.timeout_ms);
            self.controller.set_timeout_ms(next.timeout_ms);
            outcome.timeout_changed = true;
        }
        if next.session != self.settings.session {
            info!("FTM session changed: {} -> {}", self.settings.session, next.session);
            self.controller.reconfigure(next.session)?;
            outcome.session_restarted = true;
        }

        self.settings = next;
        Ok(outcome)
    }

    /// Poll once and push a valid sample through the pipeline
    pub fn tick(&mut self) -> Option<RangingUpdate> {
        let PollOutcome::Sample(sample) = self.controller.poll() else {
            return None;
        };
        self.samples += 1;
        self.last_sample = Some(sample);

        let reading = self.pipeline.process(&sample)?;
        match reading {
            ProcessedReading::CalibrationComplete { offset_cm } => {
                self.settings.calibration_offset_cm = Some(offset_cm);
            }
            ProcessedReading::Distance { smoothed_cm, .. } => {
                self.last_smoothed = Some(smoothed_cm);
            }
            ProcessedReading::Calibrating { .. } => {}
        }
        Some(RangingUpdate {
            sample,
            config: self.controller.config(),
            reading,
        })
    }

    pub fn status(&self, started_at: DateTime<Utc>) -> RangingStatus {
        let calibration = self.pipeline.calibration();
        let mut status = RangingStatus::new(started_at, self.controller.config())
            .with_stats(&self.controller.stats());
        status.state = self.controller.state();
        status.peer_ranging_capable = self.controller.is_peer_ranging_capable();
        status.samples = self.samples;
        status.calibration_complete = calibration.is_calibrated();
        status.calibration_progress_percent = calibration.progress_percent();
        status.calibration_offset_cm = calibration.offset();
        status.last_distance_cm = self.last_sample.map(|s| s.distance_cm);
        status.last_rtt_ns = self.last_sample.map(|s| s.rtt_ns);
        status.last_response_ms = self.last_sample.map(|s| s.elapsed_ms);
        status.smoothed_cm = self.last_smoothed;
        status
    }

    pub fn end_session(&mut self) {
        self.controller.end_session();
    }

    pub fn controller(&self) -> &FtmController<R, C> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut FtmController<R, C> {
        &mut self.controller
    }

    pub fn pipeline(&self) -> &RangingPipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> &RangerSettings {
        &self.settings
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ftm::controller::tests::MockRadio;
    use crate::ftm::{ControllerState, FrameCount};
    use approx::assert_relative_eq;

    fn ranger(
        radio: MockRadio,
        settings: RangerSettings,
    ) -> (Ranger<MockRadio, ManualClock>, ManualClock) {
        let clock = ManualClock::new(0);
        let pipeline = RangingPipeline::from_settings(&settings);
        let controller = FtmController::new(radio, clock.clone());
        let mut ranger = Ranger::new(controller, pipeline, settings);
        ranger.start().unwrap();
        (ranger, clock)
    }

    fn calibrated() -> RangerSettings {
        RangerSettings {
            calibration_offset_cm: Some(2.0),
            ..RangerSettings::default()
        }
    }

    #[test]
    fn test_session_change_restarts_ranging() {
        let (mut ranger, _clock) = ranger(MockRadio::with_script(vec![None, None]), calibrated());
        let next_session = SessionConfig::new(FrameCount::Frames16, 2);
        let outcome = ranger
            .apply_settings(RangerSettings {
                session: next_session,
                ..calibrated()
            })
            .unwrap();

        assert!(outcome.session_restarted);
        assert!(!outcome.timeout_changed);
        let radio = ranger.controller().radio();
        assert_eq!(radio.ends, 1);
        assert_eq!(radio.configured.last(), Some(&next_session));
        assert_eq!(radio.requests, 2);
        assert_eq!(ranger.controller().config(), next_session);
        assert_eq!(ranger.controller().state(), ControllerState::AwaitingReport);
    }

    #[test]
    fn test_offset_only_change_keeps_session_running() {
        let (mut ranger, _clock) = ranger(MockRadio::with_script(vec![None]), calibrated());
        let outcome = ranger
            .apply_settings(RangerSettings {
                calibration_offset_cm: Some(4.0),
                ..calibrated()
            })
            .unwrap();

        assert_eq!(outcome, SettingsOutcome::default());
        assert_eq!(ranger.controller().radio().ends, 0);
        assert_eq!(ranger.controller().radio().requests, 1);
        assert_relative_eq!(ranger.pipeline().calibration().offset(), 4.0);
    }

    #[test]
    fn test_timeout_change_applies_without_restart() {
        let (mut ranger, clock) = ranger(MockRadio::with_script(vec![None, None]), calibrated());
        let outcome = ranger
            .apply_settings(RangerSettings {
                timeout_ms: 1_000,
                ..calibrated()
            })
            .unwrap();

        assert!(outcome.timeout_changed);
        assert!(!outcome.session_restarted);
        assert_eq!(ranger.controller().timeout_ms(), 1_000);

        clock.advance(1_000);
        assert!(ranger.tick().is_none());
        assert_eq!(ranger.controller().stats().timeouts, 1);
    }

    #[test]
    fn test_startup_calibration_then_records() {
        let settings = RangerSettings {
            calibration_samples: 2,
            ..RangerSettings::default()
        };
        let radio = MockRadio::with_script(vec![
            Some((102, 7)),
            Some((0, 0)),
            Some((104, 7)),
            Some((153, 10)),
        ]);
        let (mut ranger, _clock) = ranger(radio, settings);

        let first = ranger.tick().unwrap();
        assert!(first.record().is_none());
        // Zero/zero report never reaches the pipeline
        assert!(ranger.tick().is_none());
        assert_eq!(
            ranger.tick().unwrap().reading,
            ProcessedReading::CalibrationComplete { offset_cm: 3.0 }
        );
        assert_eq!(ranger.settings().calibration_offset_cm, Some(3.0));

        let record = ranger.tick().unwrap().record().unwrap();
        assert_eq!(record.distance_cm, 153);
        assert_relative_eq!(record.calibrated_cm, 150.0);
        assert_eq!(record.frame_count, 64);
        assert_eq!(ranger.samples(), 3);
    }

    #[test]
    fn test_status_reflects_loop_state() {
        let (mut ranger, _clock) =
            ranger(MockRadio::with_script(vec![Some((90, 6)), None]), calibrated());
        ranger.tick();
        let status = ranger.status(Utc::now());
        assert_eq!(status.samples, 1);
        assert_eq!(status.last_distance_cm, Some(90));
        assert_eq!(status.smoothed_cm, Some(88.0));
        assert!(status.calibration_complete);
        assert_eq!(status.requests, 2);
        assert_eq!(status.state, ControllerState::AwaitingReport);
    }
}
