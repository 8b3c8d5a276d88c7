// FTM session control
pub mod controller;
pub mod radio;
pub mod simulated;

pub use controller::{
    ControllerState, ControllerStats, FtmController, PollOutcome, RangingSample, RequestMode,
    DEFAULT_TIMEOUT_MS,
};
pub use radio::{FrameCount, FtmRadio, FtmStatus, SessionConfig};
pub use simulated::SimulatedResponder;
