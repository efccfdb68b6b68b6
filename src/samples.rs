//! Fixed-capacity rolling sample window.
//!
//! Tracks the running average and maximum of the most recent N samples. The
//! average divides by the window *capacity*, not the fill count, so a peer
//! that has only reported a handful of latency samples is treated as fast
//! until the window warms up, so commands flow immediately to fresh peers
//! instead of waiting a full window for a trustworthy average.

/// Rolling window over `u32` samples with running average and max.
#[derive(Debug, Clone)]
pub(crate) struct SampleWindow {
    samples: Vec<u32>,
    offset: usize,
    filled: usize,
    average: u32,
    max: u32,
}

impl SampleWindow {
    /// Number of latency samples tracked per peer.
    pub(crate) const LATENCY_CAPACITY: usize = 128;

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)],
            offset: 0,
            filled: 0,
            average: 0,
            max: 0,
        }
    }

    pub(crate) fn push(&mut self, value: u32) {
        let capacity = self.samples.len();
        self.samples[self.offset] = value;
        self.offset = (self.offset + 1) % capacity;
        if self.filled < capacity {
            self.filled += 1;
        }
        self.recompute();
    }

    pub(crate) fn average(&self) -> u32 {
        self.average
    }

    pub(crate) fn max(&self) -> u32 {
        self.max
    }

    fn recompute(&mut self) {
        let capacity = self.samples.len();
        let mut sum: u64 = 0;
        let mut max = 0u32;
        for i in 0..self.filled {
            let sample = self.samples[(self.offset + capacity - self.filled + i) % capacity];
            sum += u64::from(sample);
            if sample > max {
                max = sample;
            }
        }
        self.average = (sum / capacity as u64) as u32;
        self.max = max;
    }
}

// #########
// # TESTS #
// #########
