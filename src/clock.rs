use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond time source for timeouts and sample timestamps
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall-independent clock backed by `Instant`, zeroed at construction
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock. Clones share the same counter, so a test can
/// hand one clone to the controller and keep another to drive time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Format elapsed milliseconds as `MM:SS:mmm`
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let minutes = elapsed_ms / 60_000;
    let seconds = (elapsed_ms % 60_000) / 1000;
    let millis = elapsed_ms % 1000;
    format!("{:02}:{:02}:{:03}", minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();
        handle.advance(250);
        assert_eq!(clock.now_ms(), 350);
        handle.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00:000");
        assert_eq!(format_elapsed(1_234), "00:01:234");
        assert_eq!(format_elapsed(61_005), "01:01:005");
        assert_eq!(format_elapsed(3_599_999), "59:59:999");
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
