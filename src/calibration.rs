//! Startup calibration against a known reference distance.
//!
//! The device is placed at a measured distance from the responder, a fixed
//! number of raw readings is averaged, and the difference to the reference
//! becomes a constant bias that is subtracted from every later reading.

use log::debug;

pub const DEFAULT_REFERENCE_CM: f32 = 100.0;
pub const DEFAULT_TARGET_SAMPLES: u32 = 100;

#[derive(Clone, Debug)]
pub struct FtmCalibration {
    reference_cm: f32,
    target_samples: u32,
    samples_collected: u32,
    sum: f64,
    offset_cm: f32,
    complete: bool,
}

impl FtmCalibration {
    /// Create a calibration collecting `target_samples` readings (minimum 1)
    pub fn new(reference_cm: f32, target_samples: u32) -> Self {
        Self {
            reference_cm,
            target_samples: target_samples.max(1),
            samples_collected: 0,
            sum: 0.0,
            offset_cm: 0.0,
            complete: false,
        }
    }

    /// Feed one raw reading. Returns true only on the sample that completes
    /// the calibration; once complete, further samples are ignored.
    pub fn add_sample(&mut self, measured_cm: f32) -> bool {
        if self.complete {
            return false;
        }

        self.sum += measured_cm as f64;
        self.samples_collected += 1;

        if self.samples_collected < self.target_samples {
            return false;
        }

        let mean = self.sum / self.samples_collected as f64;
        self.offset_cm = (mean - self.reference_cm as f64) as f32;
        self.complete = true;
        debug!(
            "calibration mean {:.2} cm over {} samples, offset {:.2} cm",
            mean, self.samples_collected, self.offset_cm
        );
        true
    }

    /// Remove the bias from a raw reading, clamped at 0 cm
    pub fn apply(&self, raw_cm: f32) -> f32 {
        (raw_cm - self.offset_cm).max(0.0)
    }

    pub fn is_calibrating(&self) -> bool {
        !self.complete
    }

    pub fn is_calibrated(&self) -> bool {
        self.complete
    }

    pub fn offset(&self) -> f32 {
        self.offset_cm
    }

    /// Restore a previously computed offset without collecting samples
    pub fn set_offset(&mut self, offset_cm: f32) {
        self.offset_cm = offset_cm;
        self.complete = true;
    }

    pub fn progress_percent(&self) -> u32 {
        (self.samples_collected as u64 * 100 / self.target_samples as u64) as u32
    }

    pub fn samples_collected(&self) -> u32 {
        self.samples_collected
    }

    pub fn target_samples(&self) -> u32 {
        self.target_samples
    }

    pub fn reference_cm(&self) -> f32 {
        self.reference_cm
    }

    /// Restart collection with the same reference and target
    pub fn reset(&mut self) {
        self.samples_collected = 0;
        self.sum = 0.0;
        self.offset_cm = 0.0;
        self.complete = false;
    }
}

impl Default for FtmCalibration {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_CM, DEFAULT_TARGET_SAMPLES)
    }
}
