//! Stand-in frame source producing brightness samples the way a covered camera would.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSpec {
    /// Pulse rate the waveform is generated at.
    pub bpm: f64,
    pub baseline: f64,
    pub amplitude: f64,
    /// Half-width of the uniform noise added to every sample.
    pub noise: f64,
    pub fs: f64,
    pub seed: u64,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            bpm: 75.0,
            baseline: 128.0,
            amplitude: 50.0,
            noise: 10.0,
            fs: 10.0,
            seed: 0,
        }
    }
}

impl SimulationSpec {
    /// Ambient light only: dark, flat and slightly noisy.
    pub fn uncovered() -> Self {
        Self {
            baseline: 5.0,
            amplitude: 0.0,
            noise: 1.0,
            ..Self::default()
        }
    }
}

pub struct SimulatedSource {
    spec: SimulationSpec,
    rng: StdRng,
    index: u64,
}

impl SimulatedSource {
    pub fn new(spec: SimulationSpec) -> Self {
        Self {
            rng: StdRng::seed_from_u64(spec.seed),
            spec,
            index: 0,
        }
    }

    pub fn spec(&self) -> &SimulationSpec {
        &self.spec
    }

    /// Timestamp in seconds of the sample `next_sample` will produce.
    pub fn elapsed_s(&self) -> f64 {
        self.index as f64 / self.spec.fs
    }

    pub fn next_sample(&mut self) -> f64 {
        let t = self.elapsed_s();
        self.index += 1;
        let freq = self.spec.bpm / 60.0;
        let clean = self.spec.baseline + self.spec.amplitude * (2.0 * PI * freq * t).sin();
        let jitter = if self.spec.noise > 0.0 {
            self.rng.gen_range(-self.spec.noise..=self.spec.noise)
        } else {
            0.0
        };
        clean + jitter
    }

    pub fn take_seconds(&mut self, seconds: f64) -> Vec<f64> {
        let n = (seconds * self.spec.fs).round().max(0.0) as usize;
        (0..n).map(|_| self.next_sample()).collect()
    }
}

impl Iterator for SimulatedSource {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.next_sample())
    }
}
