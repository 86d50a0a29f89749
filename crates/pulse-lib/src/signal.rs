use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
}

/// One brightness reading from the frame source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    /// Monotonic position in the session, starting at 0.
    pub sequence_index: u64,
}

/// Rolling window of the most recent samples, oldest first.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    next_index: u64,
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            next_index: 0,
        }
    }

    /// Append one sample, evicting the oldest entries beyond capacity.
    pub fn append(&mut self, value: f64) {
        self.samples.push_back(Sample {
            value,
            sequence_index: self.next_index,
        });
        self.next_index += 1;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.next_index = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of samples appended since the last clear.
    pub fn total_appended(&self) -> u64 {
        self.next_index
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Arithmetic mean of every buffered value, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f64>() / self.samples.len() as f64
    }

    /// Snapshot of the newest `len` values (fewer when the buffer is shorter).
    pub fn latest(&self, len: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(len);
        self.samples.iter().skip(skip).map(|s| s.value).collect()
    }
}

/// Rescale a window into [0, 1] using its own extremes.
pub fn normalize(window: &[f64]) -> Vec<f64> {
    if window.is_empty() {
        return Vec::new();
    }
    let min = window.iter().copied().fold(f64::INFINITY, f64::min);
    let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 {
        return vec![0.0; window.len()];
    }
    window.iter().map(|v| (v - min) / range).collect()
}
