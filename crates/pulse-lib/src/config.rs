use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Every tunable of the buffering, filtering, peak picking and fusion stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Nominal frame-source rate (Hz).
    pub sample_rate_hz: f64,
    /// Maximum number of samples kept in the rolling buffer.
    pub buffer_capacity: usize,
    /// Number of newest samples handed to the pipeline per cycle.
    pub window_len: usize,
    /// Samples required before the first estimation cycle.
    pub min_samples: usize,
    /// Minimum wall-clock spacing between two cycles (milliseconds).
    pub rate_limit_ms: u64,
    /// Buffer mean below which the sensor is considered uncovered.
    pub brightness_floor: f64,
    /// Smoothing factor of the low-pass stage.
    pub lp_alpha: f64,
    /// Smoothing factor of the high-pass stage.
    pub hp_alpha: f64,
    /// Fraction of the largest values averaged for the adaptive threshold.
    pub top_fraction: f64,
    /// Multiplier applied to the top-fraction mean.
    pub threshold_scale: f64,
    /// Minimum distance between accepted peaks (samples).
    pub refractory_samples: usize,
    /// Interval count at which the interval estimator is preferred.
    pub min_intervals: usize,
    /// Lowest BPM accepted as physiological.
    pub min_bpm: u32,
    /// Highest BPM accepted as physiological.
    pub max_bpm: u32,
    /// Accepted estimates kept for fusion.
    pub history_len: usize,
    /// Weight of the history median in the fused value; the mean gets the rest.
    pub median_weight: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10.0,
            buffer_capacity: 200,
            window_len: 150,
            min_samples: 50,
            rate_limit_ms: 1000,
            brightness_floor: 10.0,
            lp_alpha: 0.2,
            hp_alpha: 0.05,
            top_fraction: 0.2,
            threshold_scale: 0.55,
            refractory_samples: 3,
            min_intervals: 3,
            min_bpm: 40,
            max_bpm: 200,
            history_len: 5,
            median_weight: 0.7,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(f64),
    #[error("{name} must be at least 1")]
    ZeroLength { name: &'static str },
    #[error("window length {window} exceeds buffer capacity {capacity}")]
    WindowExceedsBuffer { window: usize, capacity: usize },
    #[error("{name} must lie in (0, 1], got {value}")]
    AlphaOutOfRange { name: &'static str, value: f64 },
    #[error("median weight must lie in [0, 1], got {0}")]
    InvalidMedianWeight(f64),
    #[error("BPM range {min}..={max} is empty")]
    EmptyBpmRange { min: u32, max: u32 },
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate_hz));
        }
        for (name, value) in [
            ("buffer_capacity", self.buffer_capacity),
            ("window_len", self.window_len),
            ("min_samples", self.min_samples),
            ("refractory_samples", self.refractory_samples),
            ("history_len", self.history_len),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLength { name });
            }
        }
        if self.window_len > self.buffer_capacity {
            return Err(ConfigError::WindowExceedsBuffer {
                window: self.window_len,
                capacity: self.buffer_capacity,
            });
        }
        for (name, value) in [
            ("lp_alpha", self.lp_alpha),
            ("hp_alpha", self.hp_alpha),
            ("top_fraction", self.top_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::AlphaOutOfRange { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.median_weight) {
            return Err(ConfigError::InvalidMedianWeight(self.median_weight));
        }
        if self.min_bpm > self.max_bpm {
            return Err(ConfigError::EmptyBpmRange {
                min: self.min_bpm,
                max: self.max_bpm,
            });
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: EstimatorConfig = toml::from_str(text).context("parsing estimator config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("serializing estimator config")
    }
}

/// Read and validate an estimator config; missing keys keep their defaults.
pub fn read_config(path: &Path) -> Result<EstimatorConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    EstimatorConfig::from_toml_str(&contents)
        .with_context(|| format!("loading config {}", path.display()))
}
