use log::debug;

use crate::clock::Clock;
use crate::ftm::radio::{FrameCount, FtmRadio, FtmStatus, SessionConfig};

/// Speed of light in centimetres per nanosecond
const LIGHT_CM_PER_NS: f64 = 29.979_245_8;

/// Highest burst period the simulated peer accepts (100 ms units)
const MAX_ACCEPTED_BURST_PERIOD: u8 = 100;

/// Parameters a peer falls back to after rejecting a configuration
const FALLBACK_CONFIG: SessionConfig = SessionConfig {
    frame_count: FrameCount::Frames32,
    burst_period: 4,
};

#[derive(Clone, Copy, Debug)]
struct Exchange {
    ready_at_ms: u64,
    distance_cm: u32,
    rtt_ns: u32,
    status: FtmStatus,
}

/// Host-side stand-in for an 802.11mc responder and the initiator's driver.
///
/// Readings are the true distance plus a constant bias plus deterministic
/// jitter that shrinks with more frames per burst. Reports become available
/// after a latency derived from the session parameters.
pub struct SimulatedResponder<C: Clock> {
    clock: C,
    true_distance_cm: f64,
    bias_cm: f64,
    jitter_cm: f64,
    base_latency_ms: u64,
    invalid_every: Option<u64>,
    responsive: bool,
    capable: bool,
    explicit_status: bool,
    config: SessionConfig,
    pending: Option<Exchange>,
    last: Option<Exchange>,
    exchanges: u64,
}

impl<C: Clock> SimulatedResponder<C> {
    pub fn new(clock: C, true_distance_cm: f64) -> Self {
        Self {
            clock,
            true_distance_cm,
            bias_cm: 0.0,
            jitter_cm: 0.0,
            base_latency_ms: 20,
            invalid_every: None,
            responsive: true,
            capable: true,
            explicit_status: false,
            config: SessionConfig::default(),
            pending: None,
            last: None,
            exchanges: 0,
        }
    }

    pub fn with_bias_cm(mut self, bias_cm: f64) -> Self {
        self.bias_cm = bias_cm;
        self
    }

    pub fn with_jitter_cm(mut self, jitter_cm: f64) -> Self {
        self.jitter_cm = jitter_cm.abs();
        self
    }

    pub fn with_base_latency_ms(mut self, latency_ms: u64) -> Self {
        self.base_latency_ms = latency_ms;
        self
    }

    /// Every `n`th exchange reports distance 0 and RTT 0
    pub fn with_invalid_every(mut self, n: u64) -> Self {
        self.invalid_every = if n == 0 { None } else { Some(n) };
        self
    }

    /// Report an explicit `FtmStatus` alongside each reading
    pub fn with_explicit_status(mut self) -> Self {
        self.explicit_status = true;
        self
    }

    /// Peer accepts requests but never answers
    pub fn unresponsive(mut self) -> Self {
        self.responsive = false;
        self
    }

    pub fn not_ranging_capable(mut self) -> Self {
        self.capable = false;
        self
    }

    /// Move the responder, e.g. between sweep distances
    pub fn set_true_distance_cm(&mut self, distance_cm: f64) {
        self.true_distance_cm = distance_cm.max(0.0);
    }

    pub fn set_responsive(&mut self, responsive: bool) {
        self.responsive = responsive;
    }

    pub fn true_distance_cm(&self) -> f64 {
        self.true_distance_cm
    }

    pub fn active_config(&self) -> SessionConfig {
        self.config
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Coarse model: more frames and longer burst spacing take longer
    fn latency_ms(&self) -> u64 {
        let frames = self.config.frame_count.as_u8() as u64;
        self.base_latency_ms + frames / 2 + self.config.burst_period as u64 * 5
    }

    fn jitter(&self) -> f64 {
        let t = self.exchanges as f64;
        let frames = match self.config.frame_count.as_u8() {
            0 => 16.0,
            n => n as f64,
        };
        let scale = (16.0 / frames).sqrt();
        self.jitter_cm * scale * ((t * 1.7).sin() * 0.7 + (t * 0.31).cos() * 0.3)
    }

    fn next_exchange(&self, now: u64) -> Exchange {
        let ready_at_ms = now + self.latency_ms();
        let invalid = self
            .invalid_every
            .map(|n| self.exchanges % n == 0)
            .unwrap_or(false);

        if invalid {
            return Exchange {
                ready_at_ms,
                distance_cm: 0,
                rtt_ns: 0,
                status: FtmStatus::Fail,
            };
        }

        let measured = (self.true_distance_cm + self.bias_cm + self.jitter()).max(0.0);
        let rtt = (2.0 * measured / LIGHT_CM_PER_NS).round();
        Exchange {
            ready_at_ms,
            distance_cm: measured.round() as u32,
            rtt_ns: rtt as u32,
            status: FtmStatus::Success,
        }
    }

    fn ready_exchange(&self) -> Option<&Exchange> {
        let now = self.clock.now_ms();
        self.pending.as_ref().filter(|e| now >= e.ready_at_ms)
    }

    fn latest(&self) -> Option<&Exchange> {
        self.ready_exchange().or(self.last.as_ref())
    }
}

impl<C: Clock> FtmRadio for SimulatedResponder<C> {
    fn configure_session(&mut self, config: &SessionConfig) -> Result<(), FtmStatus> {
        if !self.capable {
            return Err(FtmStatus::Unsupported);
        }
        if config.burst_period > MAX_ACCEPTED_BURST_PERIOD {
            self.config = FALLBACK_CONFIG;
            return Err(FtmStatus::ConfRejected);
        }
        self.config = *config;
        Ok(())
    }

    fn is_peer_ranging_capable(&self) -> bool {
        self.capable
    }

    fn request_measurement(&mut self) -> Result<(), FtmStatus> {
        if !self.capable {
            return Err(FtmStatus::Unsupported);
        }
        if !self.responsive {
            self.pending = None;
            return Ok(());
        }

        let exchange = self.next_exchange(self.clock.now_ms());
        self.exchanges += 1;
        debug!(
            "sim exchange #{} ready at {} ms: {} cm / {} ns",
            self.exchanges, exchange.ready_at_ms, exchange.distance_cm, exchange.rtt_ns
        );
        self.pending = Some(exchange);
        Ok(())
    }

    fn is_report_available(&self) -> bool {
        self.ready_exchange().is_some()
    }

    fn read_last_distance_cm(&self) -> u32 {
        self.latest().map(|e| e.distance_cm).unwrap_or(0)
    }

    fn read_last_rtt_ns(&self) -> u32 {
        self.latest().map(|e| e.rtt_ns).unwrap_or(0)
    }

    fn last_status(&self) -> Option<FtmStatus> {
        if !self.explicit_status {
            return None;
        }
        self.latest().map(|e| e.status)
    }

    fn acknowledge_report(&mut self) {
        if self.ready_exchange().is_some() {
            self.last = self.pending.take();
        } else {
            // Late report for an abandoned request
            self.pending = None;
        }
    }

    fn end_session(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_report_arrives_after_latency() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock.clone(), 250.0).with_base_latency_ms(10);
        sim.configure_session(&SessionConfig::new(FrameCount::Frames16, 2))
            .unwrap();
        sim.request_measurement().unwrap();

        // 10 + 16/2 + 2*5 = 28 ms
        clock.advance(27);
        assert!(!sim.is_report_available());
        clock.advance(1);
        assert!(sim.is_report_available());
        assert_eq!(sim.read_last_distance_cm(), 250);
        // 2 * 250 / 29.98 = 16.7 ns
        assert_eq!(sim.read_last_rtt_ns(), 17);

        sim.acknowledge_report();
        assert!(!sim.is_report_available());
        assert_eq!(sim.read_last_distance_cm(), 250);
    }

    #[test]
    fn test_bias_is_added() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock.clone(), 100.0).with_bias_cm(12.0);
        sim.request_measurement().unwrap();
        clock.advance(1_000);
        assert_eq!(sim.read_last_distance_cm(), 112);
    }

    #[test]
    fn test_invalid_every_nth_exchange() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock.clone(), 100.0)
            .with_invalid_every(3)
            .with_explicit_status();

        let mut readings = Vec::new();
        for _ in 0..6 {
            sim.request_measurement().unwrap();
            clock.advance(1_000);
            readings.push((sim.read_last_distance_cm(), sim.last_status()));
            sim.acknowledge_report();
        }
        assert_eq!(readings[0], (0, Some(FtmStatus::Fail)));
        assert_eq!(readings[1], (100, Some(FtmStatus::Success)));
        assert_eq!(readings[3], (0, Some(FtmStatus::Fail)));
    }

    #[test]
    fn test_unresponsive_peer_never_reports() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock.clone(), 100.0).unresponsive();
        sim.request_measurement().unwrap();
        clock.advance(60_000);
        assert!(!sim.is_report_available());
    }

    #[test]
    fn test_out_of_range_burst_is_rejected_with_fallback() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock, 100.0);
        let result = sim.configure_session(&SessionConfig::new(FrameCount::Frames64, 200));
        assert_eq!(result, Err(FtmStatus::ConfRejected));
        assert_eq!(sim.active_config(), FALLBACK_CONFIG);
    }

    #[test]
    fn test_incapable_peer_rejects_requests() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock, 100.0).not_ranging_capable();
        assert!(!sim.is_peer_ranging_capable());
        assert_eq!(sim.request_measurement(), Err(FtmStatus::Unsupported));
    }

    #[test]
    fn test_acknowledge_before_ready_drops_exchange() {
        let clock = ManualClock::new(0);
        let mut sim = SimulatedResponder::new(clock.clone(), 100.0);
        sim.request_measurement().unwrap();
        sim.acknowledge_report();
        clock.advance(1_000);
        assert!(!sim.is_report_available());
    }

    #[test]
    fn test_jitter_shrinks_with_more_frames() {
        let clock = ManualClock::new(0);
        let spread = |frames: FrameCount| {
            let mut sim = SimulatedResponder::new(clock.clone(), 500.0).with_jitter_cm(40.0);
            sim.configure_session(&SessionConfig::new(frames, 0)).unwrap();
            let mut max_dev: f64 = 0.0;
            for _ in 0..200 {
                sim.request_measurement().unwrap();
                clock.advance(1_000);
                let d = sim.read_last_distance_cm() as f64;
                max_dev = max_dev.max((d - 500.0).abs());
                sim.acknowledge_report();
            }
            max_dev
        };
        assert!(spread(FrameCount::Frames64) < spread(FrameCount::Frames16));
    }
}
