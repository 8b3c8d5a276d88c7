use log::info;
use serde::{Deserialize, Serialize};

use crate::calibration::FtmCalibration;
use crate::ftm::RangingSample;
use crate::settings::RangerSettings;
use crate::smoothing::MovingAverage;

/// What happened to one accepted sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProcessedReading {
    /// Sample went into the calibration, nothing to report downstream yet
    Calibrating { progress_percent: u32 },
    /// This sample completed the calibration
    CalibrationComplete { offset_cm: f32 },
    /// Calibrated and smoothed distance
    Distance {
        raw_cm: u32,
        calibrated_cm: f32,
        smoothed_cm: f32,
        filter_ready: bool,
    },
}

/// Owns the calibration and the smoothing filter; consumes raw samples only
pub struct RangingPipeline {
    calibration: FtmCalibration,
    filter: MovingAverage,
    /// Last offset restored, injected or computed here. A persisted offset
    /// equal to it is an echo of our own state, not an edit.
    known_offset: Option<f32>,
    /// Collection was restarted by changed calibration parameters
    settings_recalibration: bool,
    /// Persisted offset at that restart; measured against the old reference
    stale_offset: Option<f32>,
}

impl RangingPipeline {
    pub fn new(calibration: FtmCalibration, filter: MovingAverage) -> Self {
        let known_offset = calibration.is_calibrated().then(|| calibration.offset());
        Self {
            calibration,
            filter,
            known_offset,
            settings_recalibration: false,
            stale_offset: None,
        }
    }

    /// Build from settings, restoring a persisted offset when present
    pub fn from_settings(settings: &RangerSettings) -> Self {
        let mut calibration = FtmCalibration::new(
            settings.calibration_reference_cm,
            settings.calibration_samples,
        );
        if let Some(offset) = settings.calibration_offset_cm {
            info!("Restoring calibration offset {:.2} cm", offset);
            calibration.set_offset(offset);
        }
        Self::new(calibration, MovingAverage::new(settings.filter_window))
    }

    /// Skip calibration entirely (offset 0)
    pub fn uncalibrated(filter_window: usize) -> Self {
        let mut calibration = FtmCalibration::default();
        calibration.set_offset(0.0);
        Self::new(calibration, MovingAverage::new(filter_window))
    }

    /// Route a sample to the calibration while it is collecting, otherwise
    /// through the offset and the moving average. Invalid samples are
    /// dropped so neither stage ever sees them.
    pub fn process(&mut self, sample: &RangingSample) -> Option<ProcessedReading> {
        if sample.is_invalid() {
            return None;
        }

        let raw = sample.distance_cm as f32;
        if self.calibration.is_calibrating() {
            if self.calibration.add_sample(raw) {
                let offset_cm = self.calibration.offset();
                self.known_offset = Some(offset_cm);
                self.settings_recalibration = false;
                info!(
                    "Calibration complete: offset {:.2} cm at reference {:.1} cm ({} samples)",
                    offset_cm,
                    self.calibration.reference_cm(),
                    self.calibration.samples_collected()
                );
                return Some(ProcessedReading::CalibrationComplete { offset_cm });
            }
            return Some(ProcessedReading::Calibrating {
                progress_percent: self.calibration.progress_percent(),
            });
        }

        let calibrated_cm = self.calibration.apply(raw);
        let smoothed_cm = self.filter.add_sample(calibrated_cm);
        Some(ProcessedReading::Distance {
            raw_cm: sample.distance_cm,
            calibrated_cm,
            smoothed_cm,
            filter_ready: self.filter.is_ready(),
        })
    }

    /// Apply changed calibration or filter settings. Returns true when a
    /// new calibration run was started.
    ///
    /// A persisted offset is only injected when it differs from the last
    /// known one, and never while a run started by changed parameters is
    /// still collecting.
    pub fn apply_settings(&mut self, settings: &RangerSettings) -> bool {
        if self.filter.capacity() != settings.filter_window.max(1) {
            self.filter = MovingAverage::new(settings.filter_window);
        }

        let params_changed = self.calibration.reference_cm() != settings.calibration_reference_cm
            || self.calibration.target_samples() != settings.calibration_samples.max(1);
        if params_changed {
            info!(
                "Calibration parameters changed, recalibrating at {:.1} cm",
                settings.calibration_reference_cm
            );
            self.calibration = FtmCalibration::new(
                settings.calibration_reference_cm,
                settings.calibration_samples,
            );
            self.filter.reset();
            self.settings_recalibration = true;
            self.stale_offset = settings.calibration_offset_cm;
            return true;
        }

        if self.settings_recalibration && self.calibration.is_calibrating() {
            return false;
        }
        if settings.calibration_offset_cm != self.stale_offset {
            self.stale_offset = None;
        }
        if let Some(offset) = settings.calibration_offset_cm {
            if self.known_offset != Some(offset) && self.stale_offset != Some(offset) {
                info!("Calibration offset set to {:.2} cm from settings", offset);
                self.calibration.set_offset(offset);
                self.known_offset = Some(offset);
                self.filter.reset();
            }
        }
        false
    }

    pub fn calibration(&self) -> &FtmCalibration {
        &self.calibration
    }

    pub fn filter(&self) -> &MovingAverage {
        &self.filter
    }

    pub fn recalibrate(&mut self) {
        self.calibration.reset();
        self.filter.reset();
    }

    pub fn is_recalibrating_from_settings(&self) -> bool {
        self.settings_recalibration && self.calibration.is_calibrating()
    }
}
