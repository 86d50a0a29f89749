use crate::{
    config::EstimatorConfig,
    metrics::bpm::{estimate_bpm, BpmEstimate},
    signal::{normalize, TimeSeries},
};
use serde::{Deserialize, Serialize};

/// Systolic peaks found in one filtered window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakSet {
    /// Strictly increasing window indices.
    pub peak_indices: Vec<usize>,
    /// Consecutive differences of `peak_indices`, in samples.
    pub peak_intervals: Vec<usize>,
}

impl PeakSet {
    pub fn from_indices(peak_indices: Vec<usize>) -> Self {
        let peak_intervals = peak_indices.windows(2).map(|w| w[1] - w[0]).collect();
        Self {
            peak_indices,
            peak_intervals,
        }
    }

    pub fn peak_count(&self) -> usize {
        self.peak_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peak_indices.is_empty()
    }

    /// Intervals converted to seconds.
    pub fn intervals_s(&self, fs: f64) -> Vec<f64> {
        self.peak_intervals.iter().map(|&i| i as f64 / fs).collect()
    }
}

/// Every intermediate stage of one estimation cycle over a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub fs: f64,
    pub window: Vec<f64>,
    pub normalized: Vec<f64>,
    pub filtered: Vec<f64>,
    pub threshold: f64,
    pub peaks: PeakSet,
    pub estimate: Option<BpmEstimate>,
}

/// Single-pole exponential smoother, seeded with the first sample.
pub fn lowpass(data: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let Some(&first) = data.first() else {
        return out;
    };
    let mut prev = first;
    out.push(prev);
    for &x in &data[1..] {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}

/// Single-pole high-pass. Output starts at zero; inputs of length <= 1 pass through.
pub fn highpass(data: &[f64], alpha: f64) -> Vec<f64> {
    if data.len() <= 1 {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    out.push(0.0);
    let mut prev_filtered = 0.0;
    let mut prev_input = data[0];
    for &x in &data[1..] {
        prev_filtered = alpha * (prev_filtered + x - prev_input);
        out.push(prev_filtered);
        prev_input = x;
    }
    out
}

/// Low-pass then high-pass. The order matters: noise goes first, then baseline drift.
pub fn bandpass(data: &[f64], lp_alpha: f64, hp_alpha: f64) -> Vec<f64> {
    highpass(&lowpass(data, lp_alpha), hp_alpha)
}

/// Mean of the largest `top_fraction` of values, scaled. Zero when the fraction rounds to nothing.
pub fn adaptive_threshold(signal: &[f64], top_fraction: f64, scale: f64) -> f64 {
    let mut sorted = signal.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let take = (sorted.len() as f64 * top_fraction).floor() as usize;
    if take == 0 {
        return 0.0;
    }
    let mean = sorted[..take].iter().sum::<f64>() / take as f64;
    mean * scale
}

/// Peak detection with the default tuning.
pub fn find_peaks(signal: &[f64]) -> PeakSet {
    find_peaks_with_config(signal, &EstimatorConfig::default())
}

/// Local maxima over +/-2 samples that clear the adaptive threshold and the refractory gap.
pub fn find_peaks_with_config(signal: &[f64], cfg: &EstimatorConfig) -> PeakSet {
    if signal.len() < 5 {
        return PeakSet::default();
    }
    let threshold = adaptive_threshold(signal, cfg.top_fraction, cfg.threshold_scale);
    PeakSet::from_indices(pick_peaks(signal, threshold, cfg.refractory_samples))
}

fn pick_peaks(signal: &[f64], threshold: f64, refractory: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;
    for i in 2..signal.len() - 2 {
        let v = signal[i];
        let is_local_max = v > signal[i - 1]
            && v > signal[i - 2]
            && v > signal[i + 1]
            && v > signal[i + 2];
        if !is_local_max || v <= threshold {
            continue;
        }
        if last_peak.map_or(true, |last| i - last >= refractory) {
            peaks.push(i);
            last_peak = Some(i);
        }
    }
    peaks
}

/// Run normalize -> band-pass -> peaks -> raw estimate over one window.
pub fn analyze_window(window: &TimeSeries, cfg: &EstimatorConfig) -> PipelineSnapshot {
    let normalized = normalize(&window.data);
    let filtered = bandpass(&normalized, cfg.lp_alpha, cfg.hp_alpha);
    let threshold = if filtered.len() < 5 {
        0.0
    } else {
        adaptive_threshold(&filtered, cfg.top_fraction, cfg.threshold_scale)
    };
    let peaks = find_peaks_with_config(&filtered, cfg);
    let estimate = estimate_bpm(&peaks, filtered.len(), window.fs, cfg.min_intervals);
    PipelineSnapshot {
        fs: window.fs,
        window: window.data.clone(),
        normalized,
        filtered,
        threshold,
        peaks,
        estimate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(fs: f64, freq: f64, seconds: f64) -> Vec<f64> {
        let n = (fs * seconds) as usize;
        (0..n)
            .map(|i| 128.0 + 50.0 * (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn lowpass_seeds_with_first_sample() {
        let out = lowpass(&[10.0, 0.0, 0.0], 0.2);
        assert_eq!(out[0], 10.0);
        assert!((out[1] - 8.0).abs() < 1e-12);
        assert!((out[2] - 6.4).abs() < 1e-12);
    }

    #[test]
    fn highpass_passes_degenerate_input() {
        assert!(highpass(&[], 0.05).is_empty());
        assert_eq!(highpass(&[3.5], 0.05), vec![3.5]);
    }

    #[test]
    fn highpass_matches_recurrence() {
        let out = highpass(&[1.0, 2.0, 4.0], 0.5);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-12);
        assert!((out[2] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn bandpass_rejects_dc() {
        let out = bandpass(&[0.7; 64], 0.2, 0.05);
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|v| v.abs() < 1e-12));

        let step: Vec<f64> = (0..64).map(|i| if i < 8 { 0.0 } else { 1.0 }).collect();
        let out = bandpass(&step, 0.2, 0.05);
        assert!(out.last().unwrap().abs() < 1e-6);
    }

    #[test]
    fn short_signal_has_no_peaks() {
        for len in 0..5 {
            let peaks = find_peaks(&vec![1.0; len]);
            assert!(peaks.peak_indices.is_empty());
            assert!(peaks.peak_intervals.is_empty());
        }
        assert!(find_peaks(&[0.0, 1.0, 5.0, 1.0]).is_empty());
    }

    #[test]
    fn threshold_uses_top_fifth() {
        let signal: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        // top two values 10 and 9 -> mean 9.5 -> * 0.55
        assert!((adaptive_threshold(&signal, 0.2, 0.55) - 5.225).abs() < 1e-12);
    }

    #[test]
    fn rejects_peaks_under_threshold() {
        let signal = [0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let peaks = find_peaks(&signal);
        assert_eq!(peaks.peak_indices, vec![2]);
    }

    #[test]
    fn refractory_gap_is_enforced() {
        let cfg = EstimatorConfig {
            refractory_samples: 6,
            ..EstimatorConfig::default()
        };
        let signal = [
            0.0, 0.0, 5.0, 0.0, 0.0, 5.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let peaks = find_peaks_with_config(&signal, &cfg);
        assert_eq!(peaks.peak_indices, vec![2, 8]);

        let filtered = bandpass(&normalize(&sine(10.0, 2.9, 20.0)), 0.2, 0.05);
        let peaks = find_peaks(&filtered);
        assert!(peaks.peak_intervals.iter().all(|&gap| gap >= 3));
        assert!(peaks
            .peak_indices
            .windows(2)
            .all(|w| w[1] > w[0] && w[1] - w[0] >= 3));
    }

    #[test]
    fn sine_peaks_follow_period() {
        let filtered = bandpass(&normalize(&sine(10.0, 1.25, 15.0)), 0.2, 0.05);
        let peaks = find_peaks(&filtered);
        assert!(peaks.peak_count() >= 16, "found {:?}", peaks.peak_indices);
        let tail = &peaks.peak_intervals[2..];
        assert!(tail.iter().all(|&gap| gap == 8), "intervals {tail:?}");
    }

    #[test]
    fn analyze_window_reports_stages() {
        let window = TimeSeries {
            fs: 10.0,
            data: sine(10.0, 1.25, 15.0),
        };
        let snapshot = analyze_window(&window, &EstimatorConfig::default());
        assert_eq!(snapshot.normalized.len(), 150);
        assert_eq!(snapshot.filtered.len(), 150);
        assert!(snapshot.threshold > 0.0);
        let estimate = snapshot.estimate.expect("estimate");
        assert!((estimate.bpm - 75).abs() <= 2, "bpm {}", estimate.bpm);
    }
}
