//! 802.11mc Fine Timing Measurement ranging: session control, calibration,
//! smoothing, and data-collection sweeps over a pluggable radio.

pub mod calibration;
pub mod clock;
pub mod error;
pub mod ftm;
pub mod live_status;
pub mod pipeline;
pub mod ranger;
pub mod records;
pub mod settings;
pub mod smoothing;
pub mod sweep;

pub use calibration::FtmCalibration;
pub use clock::{format_elapsed, Clock, ManualClock, MonotonicClock};
pub use error::{RangingError, RangingResult};
pub use ftm::{FtmController, FtmRadio, PollOutcome, RangingSample, SessionConfig};
pub use pipeline::{ProcessedReading, RangingPipeline};
pub use ranger::{Ranger, RangingUpdate, SettingsOutcome};
pub use smoothing::MovingAverage;
pub use sweep::{Sweep, SweepDriver, SweepMode, SweepPlan};
