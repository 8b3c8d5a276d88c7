use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RangingError, RangingResult};

/// Outcome of an FTM exchange as reported by the radio driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FtmStatus {
    /// Exchange completed
    Success,
    /// Peer does not support FTM
    Unsupported,
    /// Peer rejected the requested session parameters
    ConfRejected,
    /// Peer did not answer the FTM request
    NoResponse,
    /// Any other failure during the exchange
    Fail,
}

/// Number of FTM frames requested per burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FrameCount {
    NoPreference,
    Frames16,
    Frames24,
    Frames32,
    Frames64,
}

impl FrameCount {
    pub fn as_u8(self) -> u8 {
        match self {
            FrameCount::NoPreference => 0,
            FrameCount::Frames16 => 16,
            FrameCount::Frames24 => 24,
            FrameCount::Frames32 => 32,
            FrameCount::Frames64 => 64,
        }
    }
}

impl TryFrom<u8> for FrameCount {
    type Error = RangingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameCount::NoPreference),
            16 => Ok(FrameCount::Frames16),
            24 => Ok(FrameCount::Frames24),
            32 => Ok(FrameCount::Frames32),
            64 => Ok(FrameCount::Frames64),
            other => Err(RangingError::InvalidParameters(format!(
                "frame count {other} not in {{0, 16, 24, 32, 64}}"
            ))),
        }
    }
}

impl From<FrameCount> for u8 {
    fn from(value: FrameCount) -> Self {
        value.as_u8()
    }
}

/// Parameters applied to every request of an FTM session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionConfig {
    pub frame_count: FrameCount,
    /// Spacing between bursts in units of 100 ms (0 = no preference)
    pub burst_period: u8,
}

impl SessionConfig {
    pub fn new(frame_count: FrameCount, burst_period: u8) -> Self {
        Self {
            frame_count,
            burst_period,
        }
    }

    /// Build from raw numbers as they come out of settings or the CLI
    pub fn from_raw(frame_count: u32, burst_period: u32) -> RangingResult<Self> {
        let frames = u8::try_from(frame_count)
            .map_err(|_| {
                RangingError::InvalidParameters(format!("frame count {frame_count} out of range"))
            })
            .and_then(FrameCount::try_from)?;
        let burst = u8::try_from(burst_period).map_err(|_| {
            RangingError::InvalidParameters(format!(
                "burst period {burst_period} not in [0, 255]"
            ))
        })?;
        Ok(Self::new(frames, burst))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(FrameCount::Frames64, 10)
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.frame_count.as_u8(), self.burst_period)
    }
}

/// Parses `frames:burst`, e.g. `64:10`
impl FromStr for SessionConfig {
    type Err = RangingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (frames, burst) = s.split_once(':').ok_or_else(|| {
            RangingError::InvalidParameters(format!("expected frames:burst, got '{s}'"))
        })?;
        let frames: u32 = frames.trim().parse().map_err(|_| {
            RangingError::InvalidParameters(format!("bad frame count in '{s}'"))
        })?;
        let burst: u32 = burst.trim().parse().map_err(|_| {
            RangingError::InvalidParameters(format!("bad burst period in '{s}'"))
        })?;
        Self::from_raw(frames, burst)
    }
}

/// Raw FTM session control exposed by the underlying radio driver.
///
/// `acknowledge_report` must be called exactly once per available report
/// before the next `request_measurement`; `FtmController` enforces that.
pub trait FtmRadio {
    /// Apply session parameters. An error means the peer rejected them and
    /// may fall back to its own defaults.
    fn configure_session(&mut self, config: &SessionConfig) -> Result<(), FtmStatus>;

    fn is_peer_ranging_capable(&self) -> bool;

    /// Fire-and-forget. An error means no report will ever arrive.
    fn request_measurement(&mut self) -> Result<(), FtmStatus>;

    fn is_report_available(&self) -> bool;

    fn read_last_distance_cm(&self) -> u32;

    fn read_last_rtt_ns(&self) -> u32;

    /// Explicit status of the last exchange, when the driver exposes one
    fn last_status(&self) -> Option<FtmStatus> {
        None
    }

    fn acknowledge_report(&mut self);

    fn end_session(&mut self);
}

impl<R: FtmRadio + ?Sized> FtmRadio for Box<R> {
    fn configure_session(&mut self, config: &SessionConfig) -> Result<(), FtmStatus> {
        (**self).configure_session(config)
    }

    fn is_peer_ranging_capable(&self) -> bool {
        (**self).is_peer_ranging_capable()
    }

    fn request_measurement(&mut self) -> Result<(), FtmStatus> {
        (**self).request_measurement()
    }

    fn is_report_available(&self) -> bool {
        (**self).is_report_available()
    }

    fn read_last_distance_cm(&self) -> u32 {
        (**self).read_last_distance_cm()
    }

    fn read_last_rtt_ns(&self) -> u32 {
        (**self).read_last_rtt_ns()
    }

    fn last_status(&self) -> Option<FtmStatus> {
        (**self).last_status()
    }

    fn acknowledge_report(&mut self) {
        (**self).acknowledge_report()
    }

    fn end_session(&mut self) {
        (**self).end_session()
    }
}
