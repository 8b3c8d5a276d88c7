use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{format_elapsed, Clock};
use crate::error::{RangingError, RangingResult};
use crate::ftm::radio::{FtmRadio, FtmStatus, SessionConfig};

/// Default bound on the wait for a report after a request
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// One completed ranging exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangingSample {
    pub distance_cm: u32,
    pub rtt_ns: u32,
    /// Monotonic time the report was consumed
    pub timestamp_ms: u64,
    /// Time between the request and the report
    pub elapsed_ms: u64,
}

impl RangingSample {
    /// Zero distance together with zero RTT is the only error signal the
    /// driver gives without an explicit status.
    pub fn is_invalid(&self) -> bool {
        self.distance_cm == 0 && self.rtt_ns == 0
    }

    /// Human-readable diagnostic line for this report
    pub fn report_line(&self, config: &SessionConfig) -> String {
        format!(
            "FTM Report - Distance: {} cm, RTT: {} ns, Response Time: {} (frames: {}, burst: {})",
            self.distance_cm,
            self.rtt_ns,
            format_elapsed(self.elapsed_ms),
            config.frame_count.as_u8(),
            config.burst_period
        )
    }
}

/// Controller state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// No request in flight
    Idle,
    /// Request issued, waiting for the radio to signal a report
    AwaitingReport,
    /// Report signalled, about to be read and acknowledged
    ReportReady,
    /// No report within the timeout
    TimedOut,
}

/// Whether a valid report triggers the next request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    Continuous,
    SingleShot,
}

/// Result of one non-blocking poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing requested
    Idle,
    /// Still waiting for the report
    Pending,
    /// Valid measurement, already acknowledged
    Sample(RangingSample),
    /// Report discarded as invalid; a new request has been issued
    Invalid { status: Option<FtmStatus> },
    /// Timeout hit; stale report drained and the request re-issued
    TimedOut { retries: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub requests: u64,
    pub acknowledgements: u64,
    pub reports: u64,
    pub invalid_readings: u64,
    pub timeouts: u64,
    pub consecutive_timeouts: u64,
}

/// Drives the request/report lifecycle of one FTM session.
///
/// At most one request is outstanding at any time: a report is always
/// acknowledged before the next request goes out, and timeouts or
/// `end_session` drain the pending report first.
pub struct FtmController<R: FtmRadio, C: Clock> {
    radio: R,
    clock: C,
    config: SessionConfig,
    state: ControllerState,
    mode: RequestMode,
    timeout_ms: u64,
    requested_at_ms: u64,
    outstanding: bool,
    stats: ControllerStats,
}

impl<R: FtmRadio, C: Clock> FtmController<R, C> {
    pub fn new(radio: R, clock: C) -> Self {
        Self {
            radio,
            clock,
            config: SessionConfig::default(),
            state: ControllerState::Idle,
            mode: RequestMode::Continuous,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            requested_at_ms: 0,
            outstanding: false,
            stats: ControllerStats::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_mode(&mut self, mode: RequestMode) {
        self.mode = mode;
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    /// Configure, check the peer and issue the first request
    pub fn start(&mut self, config: SessionConfig) -> RangingResult<()> {
        self.configure(config)?;
        if !self.radio.is_peer_ranging_capable() {
            warn!("Peer is not an FTM responder; ranging requests will likely time out");
        }
        self.request_measurement()
    }

    /// Apply session parameters for all following requests. Only allowed
    /// while idle; a rejection by the peer is logged and ignored.
    pub fn configure(&mut self, config: SessionConfig) -> RangingResult<()> {
        if self.state != ControllerState::Idle {
            return Err(RangingError::InvalidState(format!(
                "configure requires Idle, controller is {:?}",
                self.state
            )));
        }

        if let Err(status) = self.radio.configure_session(&config) {
            warn!(
                "Peer rejected FTM configuration {} ({:?}), continuing best-effort",
                config, status
            );
        } else {
            info!(
                "FTM configured: frames={} burst_period={}",
                config.frame_count.as_u8(),
                config.burst_period
            );
        }
        self.config = config;
        Ok(())
    }

    /// Issue one ranging request. Refused while a prior request is
    /// unacknowledged. A radio-level failure is only logged: no report will
    /// arrive and the timeout path takes over.
    pub fn request_measurement(&mut self) -> RangingResult<()> {
        if self.outstanding {
            return Err(RangingError::OutstandingRequest);
        }

        self.requested_at_ms = self.clock.now_ms();
        self.outstanding = true;
        self.stats.requests += 1;
        self.state = ControllerState::AwaitingReport;

        if let Err(status) = self.radio.request_measurement() {
            warn!("FTM request failed ({:?}), waiting for timeout", status);
        }
        Ok(())
    }

    /// Non-blocking tick: check for a report or a timeout
    pub fn poll(&mut self) -> PollOutcome {
        match self.state {
            ControllerState::Idle => PollOutcome::Idle,
            ControllerState::ReportReady => self.consume_report(),
            ControllerState::TimedOut => self.retry_after_timeout(),
            ControllerState::AwaitingReport => {
                if self.radio.is_report_available() {
                    self.state = ControllerState::ReportReady;
                    return self.consume_report();
                }

                let waited = self.clock.now_ms().saturating_sub(self.requested_at_ms);
                if waited >= self.timeout_ms {
                    self.state = ControllerState::TimedOut;
                    return self.retry_after_timeout();
                }

                PollOutcome::Pending
            }
        }
    }

    /// Return to Idle from any state, dropping any unread report
    pub fn end_session(&mut self) {
        if self.outstanding {
            self.acknowledge();
        }
        self.radio.end_session();
        self.state = ControllerState::Idle;
        debug!("FTM session ended");
    }

    /// End the session, apply `config` and restart ranging
    pub fn reconfigure(&mut self, config: SessionConfig) -> RangingResult<()> {
        self.end_session();
        self.configure(config)?;
        self.request_measurement()
    }

    fn consume_report(&mut self) -> PollOutcome {
        let now = self.clock.now_ms();
        let sample = RangingSample {
            distance_cm: self.radio.read_last_distance_cm(),
            rtt_ns: self.radio.read_last_rtt_ns(),
            timestamp_ms: now,
            elapsed_ms: now.saturating_sub(self.requested_at_ms),
        };
        let status = self.radio.last_status();

        self.acknowledge();
        self.stats.reports += 1;
        self.stats.consecutive_timeouts = 0;

        let failed_status = matches!(status, Some(s) if s != FtmStatus::Success);
        if failed_status || sample.is_invalid() {
            self.stats.invalid_readings += 1;
            debug!(
                "Discarding invalid FTM report (distance={} rtt={} status={:?})",
                sample.distance_cm, sample.rtt_ns, status
            );
            self.issue_next_request();
            return PollOutcome::Invalid { status };
        }

        match self.mode {
            RequestMode::Continuous => self.issue_next_request(),
            RequestMode::SingleShot => self.state = ControllerState::Idle,
        }
        PollOutcome::Sample(sample)
    }

    fn retry_after_timeout(&mut self) -> PollOutcome {
        self.stats.timeouts += 1;
        self.stats.consecutive_timeouts += 1;
        warn!(
            "No FTM report within {} ms, retrying (timeout #{}, {} in a row)",
            self.timeout_ms, self.stats.timeouts, self.stats.consecutive_timeouts
        );

        // Drain whatever the radio may still hold before re-requesting
        self.acknowledge();
        self.issue_next_request();
        PollOutcome::TimedOut {
            retries: self.stats.timeouts,
        }
    }

    fn acknowledge(&mut self) {
        self.radio.acknowledge_report();
        self.outstanding = false;
        self.stats.acknowledgements += 1;
    }

    fn issue_next_request(&mut self) {
        if let Err(e) = self.request_measurement() {
            warn!("Could not issue next FTM request: {}", e);
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn has_outstanding_request(&self) -> bool {
        self.outstanding
    }

    pub fn is_peer_ranging_capable(&self) -> bool {
        self.radio.is_peer_ranging_capable()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
