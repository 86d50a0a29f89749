use crate::detectors::ppg::PeakSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimateMethod {
    /// Mean peak-to-peak interval.
    Intervals,
    /// Peak count over the window duration.
    PeakDensity,
}

/// Raw, not yet validated, rate for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmEstimate {
    pub bpm: i64,
    pub method: EstimateMethod,
    pub peak_count: usize,
}

impl BpmEstimate {
    pub fn is_within(&self, min_bpm: u32, max_bpm: u32) -> bool {
        self.bpm >= i64::from(min_bpm) && self.bpm <= i64::from(max_bpm)
    }
}

/// Convert peaks to beats per minute.
///
/// With at least `min_intervals` intervals the mean interval is used; otherwise
/// the rate falls back to peak density over the whole window. Returns `None`
/// only when the window has no duration.
pub fn estimate_bpm(
    peaks: &PeakSet,
    window_len: usize,
    fs: f64,
    min_intervals: usize,
) -> Option<BpmEstimate> {
    if window_len == 0 || fs <= 0.0 {
        return None;
    }
    let peak_count = peaks.peak_count();
    let intervals = &peaks.peak_intervals;
    if intervals.len() >= min_intervals && !intervals.is_empty() {
        let avg = intervals.iter().sum::<usize>() as f64 / intervals.len() as f64;
        let bpm = (60.0 / (avg / fs)).round() as i64;
        return Some(BpmEstimate {
            bpm,
            method: EstimateMethod::Intervals,
            peak_count,
        });
    }
    let duration_s = window_len as f64 / fs;
    let bpm = ((peak_count as f64 / duration_s) * 60.0).round() as i64;
    Some(BpmEstimate {
        bpm,
        method: EstimateMethod::PeakDensity,
        peak_count,
    })
}

/// Outcome of blending a new estimate with the recent history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedBpm {
    pub median: u32,
    pub mean: u32,
    pub fused: u32,
}

/// Blend `bpm` with `history`: weighted lower-middle median and rounded mean.
pub fn fuse_bpm(history: &[u32], bpm: u32, median_weight: f64) -> FusedBpm {
    let mut all: Vec<u32> = history.to_vec();
    all.push(bpm);
    all.sort_unstable();
    let median = all[all.len() / 2];
    let sum: u64 = history.iter().map(|&v| u64::from(v)).sum::<u64>() + u64::from(bpm);
    let mean = (sum as f64 / (history.len() + 1) as f64).round() as u32;
    let fused =
        (median_weight * f64::from(median) + (1.0 - median_weight) * f64::from(mean)).round() as u32;
    FusedBpm {
        median,
        mean,
        fused,
    }
}

/// FIFO of recently accepted rates.
#[derive(Debug, Clone)]
pub struct BpmHistory {
    values: VecDeque<u32>,
    capacity: usize,
}

impl BpmHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Fuse `bpm` with the values held so far, then record it.
    pub fn accept(&mut self, bpm: u32, median_weight: f64) -> FusedBpm {
        let fused = fuse_bpm(self.values.make_contiguous(), bpm, median_weight);
        self.values.push_back(bpm);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
        fused
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> Vec<u32> {
        self.values.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
