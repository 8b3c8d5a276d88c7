use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::RangingResult;
use crate::ftm::{ControllerState, ControllerStats, SessionConfig};

/// Snapshot of the ranging loop, rewritten periodically for external viewers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RangingStatus {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub state: ControllerState,
    pub frame_count: u8,
    pub burst_period: u8,
    pub peer_ranging_capable: bool,
    // Counters
    pub samples: u64,
    pub requests: u64,
    pub invalid_readings: u64,
    pub timeouts: u64,
    pub consecutive_timeouts: u64,
    // Calibration
    pub calibration_complete: bool,
    pub calibration_progress_percent: u32,
    pub calibration_offset_cm: f32,
    // Latest reading
    pub last_distance_cm: Option<u32>,
    pub last_rtt_ns: Option<u32>,
    pub last_response_ms: Option<u64>,
    pub smoothed_cm: Option<f32>,
}

impl RangingStatus {
    pub fn new(started_at: DateTime<Utc>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            uptime_seconds: now.signed_duration_since(started_at).num_seconds().max(0) as u64,
            state: ControllerState::Idle,
            frame_count: config.frame_count.as_u8(),
            burst_period: config.burst_period,
            peer_ranging_capable: true,
            samples: 0,
            requests: 0,
            invalid_readings: 0,
            timeouts: 0,
            consecutive_timeouts: 0,
            calibration_complete: false,
            calibration_progress_percent: 0,
            calibration_offset_cm: 0.0,
            last_distance_cm: None,
            last_rtt_ns: None,
            last_response_ms: None,
            smoothed_cm: None,
        }
    }

    /// Copy the controller counters into the snapshot
    pub fn with_stats(mut self, stats: &ControllerStats) -> Self {
        self.requests = stats.requests;
        self.invalid_readings = stats.invalid_readings;
        self.timeouts = stats.timeouts;
        self.consecutive_timeouts = stats.consecutive_timeouts;
        self
    }

    pub fn save(&self, path: &Path) -> RangingResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
