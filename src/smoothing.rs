/// Default smoothing window for distance readings
pub const DEFAULT_WINDOW: usize = 5;

/// Moving-average filter for FTM distance readings
///
/// Fixed-capacity ring buffer with a running sum, so every update is O(1).
/// Window size trade-offs: 3 reacts quickly, 5 is a good balance, 10 smooths
/// heavily at the cost of lag.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    buffer: Vec<f32>,
    index: usize,
    count: usize,
    sum: f32,
}

impl MovingAverage {
    /// Create a filter averaging over `window_size` samples (minimum 1)
    pub fn new(window_size: usize) -> Self {
        let size = window_size.max(1);
        MovingAverage {
            buffer: vec![0.0; size],
            index: 0,
            count: 0,
            sum: 0.0,
        }
    }

    /// Add a sample and return the updated average
    pub fn add_sample(&mut self, value: f32) -> f32 {
        // Slot is still 0.0 until the window has wrapped once
        self.sum -= self.buffer[self.index];
        self.buffer[self.index] = value;
        self.sum += value;

        self.index = (self.index + 1) % self.buffer.len();
        if self.count < self.buffer.len() {
            self.count += 1;
        }

        self.average()
    }

    /// Current average, or 0 when no samples have been added
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }

    /// Samples currently held (saturates at the window size)
    pub fn sample_count(&self) -> usize {
        self.count
    }

    /// True once a full window has been collected
    pub fn is_ready(&self) -> bool {
        self.count >= self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Clear all samples, keeping the capacity
    pub fn reset(&mut self) {
        self.index = 0;
        self.count = 0;
        self.sum = 0.0;
        self.buffer.iter_mut().for_each(|slot| *slot = 0.0);
    }

    /// Most recently added raw sample, or 0 when empty
    pub fn last_sample(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        // index points at the next write slot
        let last = if self.index == 0 {
            self.buffer.len() - 1
        } else {
            self.index - 1
        };
        self.buffer[last]
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
