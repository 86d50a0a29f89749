//! Recording session: owns the sample buffer, the BPM history and the last
//! published result, and decides on every sample whether a cycle runs.

use crate::{
    config::EstimatorConfig,
    detectors::ppg::{bandpass, find_peaks_with_config},
    metrics::bpm::{estimate_bpm, BpmHistory},
    signal::{normalize, SampleBuffer},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_NO_FINGER: &str = "place finger on sensor";
pub const STATUS_UNSTABLE: &str = "unstable data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Collecting,
    Estimating,
}

/// What the presentation layer reads after each sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub bpm: Option<u32>,
    pub status_message: String,
}

impl EstimationResult {
    fn status(message: impl Into<String>) -> Self {
        Self {
            bpm: None,
            status_message: message.into(),
        }
    }

    fn heart_rate(bpm: u32) -> Self {
        Self {
            bpm: Some(bpm),
            status_message: format!("Heart rate: {} bpm", bpm),
        }
    }
}

/// How a single estimation cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleOutcome {
    NoFinger,
    Accepted { bpm: u32 },
    Rejected { raw_bpm: i64 },
}

pub struct EstimatorSession {
    cfg: EstimatorConfig,
    buffer: SampleBuffer,
    history: BpmHistory,
    result: EstimationResult,
    recording: bool,
    has_accepted: bool,
    last_cycle: Option<Instant>,
    last_outcome: Option<CycleOutcome>,
    cycles: u64,
}

impl Default for EstimatorSession {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl EstimatorSession {
    pub fn new(cfg: EstimatorConfig) -> Self {
        Self {
            buffer: SampleBuffer::with_capacity(cfg.buffer_capacity),
            history: BpmHistory::with_capacity(cfg.history_len),
            result: EstimationResult::status(STATUS_IDLE),
            recording: false,
            has_accepted: false,
            last_cycle: None,
            last_outcome: None,
            cycles: 0,
            cfg,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.cfg
    }

    /// Reset buffer, history and result, and begin accepting samples.
    pub fn start_session(&mut self) {
        self.buffer.clear();
        self.history.clear();
        self.has_accepted = false;
        self.last_cycle = None;
        self.last_outcome = None;
        self.cycles = 0;
        self.recording = true;
        self.result = self.collecting_status();
        info!("recording session started");
    }

    /// Stop processing; further samples are ignored until the next start.
    pub fn stop_session(&mut self) {
        if self.recording {
            info!(
                "recording session stopped after {} samples, {} cycles",
                self.buffer.total_appended(),
                self.cycles
            );
        }
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn state(&self) -> SessionState {
        if !self.recording {
            SessionState::Idle
        } else if self.buffer.len() < self.cfg.min_samples {
            SessionState::Collecting
        } else {
            SessionState::Estimating
        }
    }

    pub fn estimation_result(&self) -> &EstimationResult {
        &self.result
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn history(&self) -> &BpmHistory {
        &self.history
    }

    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.last_outcome
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Feed one sample stamped with the wall clock.
    pub fn on_sample(&mut self, value: f64) -> bool {
        self.on_sample_at(value, Instant::now())
    }

    /// Feed one sample taken at `now`. Returns true when an estimation cycle ran.
    pub fn on_sample_at(&mut self, value: f64, now: Instant) -> bool {
        if !self.recording {
            return false;
        }
        self.buffer.append(value);
        if self.buffer.len() < self.cfg.min_samples {
            self.result = self.collecting_status();
            return false;
        }
        let due = self.last_cycle.map_or(true, |last| {
            now.saturating_duration_since(last) >= Duration::from_millis(self.cfg.rate_limit_ms)
        });
        if !due {
            return false;
        }
        self.last_cycle = Some(now);
        self.run_cycle();
        true
    }

    fn collecting_status(&self) -> EstimationResult {
        EstimationResult::status(format!(
            "collecting: {}/{}",
            self.buffer.len(),
            self.cfg.min_samples
        ))
    }

    fn run_cycle(&mut self) {
        self.cycles += 1;
        let mean = self.buffer.mean();
        if mean < self.cfg.brightness_floor {
            warn!(
                "mean brightness {:.2} below floor {:.2}",
                mean, self.cfg.brightness_floor
            );
            self.result = EstimationResult::status(STATUS_NO_FINGER);
            self.last_outcome = Some(CycleOutcome::NoFinger);
            return;
        }

        let window = self.buffer.latest(self.cfg.window_len);
        let filtered = bandpass(&normalize(&window), self.cfg.lp_alpha, self.cfg.hp_alpha);
        let peaks = find_peaks_with_config(&filtered, &self.cfg);
        let Some(estimate) = estimate_bpm(
            &peaks,
            filtered.len(),
            self.cfg.sample_rate_hz,
            self.cfg.min_intervals,
        ) else {
            return;
        };
        debug!(
            "cycle {}: window {} samples, {} peaks, raw {} bpm via {:?}",
            self.cycles,
            window.len(),
            estimate.peak_count,
            estimate.bpm,
            estimate.method
        );

        if !estimate.is_within(self.cfg.min_bpm, self.cfg.max_bpm) {
            warn!("rejecting implausible estimate of {} bpm", estimate.bpm);
            self.last_outcome = Some(CycleOutcome::Rejected {
                raw_bpm: estimate.bpm,
            });
            if !self.has_accepted {
                self.result = EstimationResult::status(STATUS_UNSTABLE);
            }
            return;
        }

        let bpm = estimate.bpm as u32;
        let fused = self.history.accept(bpm, self.cfg.median_weight);
        self.has_accepted = true;
        self.result = EstimationResult::heart_rate(fused.fused);
        self.last_outcome = Some(CycleOutcome::Accepted { bpm: fused.fused });
        info!(
            "heart rate {} bpm (raw {}, median {}, mean {})",
            fused.fused, bpm, fused.median, fused.mean
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    const STEP: Duration = Duration::from_millis(100);

    fn feed(session: &mut EstimatorSession, values: &[f64], start: Instant) -> usize {
        let mut cycles = 0;
        for (i, &v) in values.iter().enumerate() {
            if session.on_sample_at(v, start + STEP * i as u32) {
                cycles += 1;
            }
        }
        cycles
    }

    fn pulse(bpm: f64, seconds: f64) -> Vec<f64> {
        let freq = bpm / 60.0;
        (0..(seconds * 10.0) as usize)
            .map(|i| 128.0 + 50.0 * (2.0 * PI * freq * i as f64 / 10.0).sin())
            .collect()
    }

    #[test]
    fn idle_session_ignores_samples() {
        let mut session = EstimatorSession::default();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.on_sample(100.0));
        assert!(session.buffer().is_empty());
        assert_eq!(session.estimation_result().status_message, STATUS_IDLE);
    }

    #[test]
    fn reports_collection_progress() {
        let mut session = EstimatorSession::default();
        session.start_session();
        assert_eq!(
            session.estimation_result().status_message,
            "collecting: 0/50"
        );
        let cycles = feed(&mut session, &vec![120.0; 49], Instant::now());
        assert_eq!(cycles, 0);
        assert_eq!(session.cycles(), 0);
        assert_eq!(session.state(), SessionState::Collecting);
        let result = session.estimation_result();
        assert_eq!(result.status_message, "collecting: 49/50");
        assert_eq!(result.bpm, None);
    }

    #[test]
    fn dark_sensor_asks_for_finger() {
        let mut session = EstimatorSession::default();
        session.start_session();
        let cycles = feed(&mut session, &vec![5.0; 55], Instant::now());
        assert_eq!(cycles, 1);
        let result = session.estimation_result();
        assert_eq!(result.status_message, STATUS_NO_FINGER);
        assert_eq!(result.bpm, None);
        assert_eq!(session.last_outcome(), Some(CycleOutcome::NoFinger));
    }

    #[test]
    fn finger_removal_clears_bpm() {
        let mut session = EstimatorSession::default();
        session.start_session();
        let start = Instant::now();
        feed(&mut session, &pulse(75.0, 20.0), start);
        assert!(session.estimation_result().bpm.is_some());
        let later = start + Duration::from_secs(30);
        feed(&mut session, &vec![0.0; 200], later);
        assert_eq!(session.estimation_result().bpm, None);
        assert_eq!(
            session.estimation_result().status_message,
            STATUS_NO_FINGER
        );
    }

    #[test]
    fn sine_pulse_converges_to_75() {
        let mut session = EstimatorSession::default();
        session.start_session();
        feed(&mut session, &pulse(75.0, 20.0), Instant::now());
        assert_eq!(session.state(), SessionState::Estimating);
        let result = session.estimation_result();
        let bpm = result.bpm.expect("bpm");
        assert!((70..=80).contains(&bpm), "bpm {bpm}");
        assert_eq!(result.status_message, format!("Heart rate: {} bpm", bpm));
    }

    #[test]
    fn cycles_are_rate_limited() {
        let mut session = EstimatorSession::default();
        session.start_session();
        let start = Instant::now();
        // 200 samples at 10 Hz: first cycle at sample 50, then every 10th
        let cycles = feed(&mut session, &pulse(75.0, 20.0), start);
        assert_eq!(cycles, 16);

        // a burst with no time passing only runs once
        session.start_session();
        let cycles = feed_burst(&mut session, &pulse(75.0, 20.0), start);
        assert_eq!(cycles, 1);
    }

    fn feed_burst(session: &mut EstimatorSession, values: &[f64], at: Instant) -> usize {
        values
            .iter()
            .filter(|&&v| session.on_sample_at(v, at))
            .count()
    }

    #[test]
    fn flat_signal_reports_unstable() {
        let mut session = EstimatorSession::default();
        session.start_session();
        feed(&mut session, &vec![120.0; 80], Instant::now());
        let result = session.estimation_result();
        assert_eq!(result.status_message, STATUS_UNSTABLE);
        assert_eq!(result.bpm, None);
        assert!(session.history().is_empty());
    }

    #[test]
    fn rejected_cycle_keeps_last_value() {
        let mut session = EstimatorSession::default();
        session.start_session();
        let start = Instant::now();
        feed(&mut session, &pulse(75.0, 20.0), start);
        let before = session.estimation_result().clone();
        let history_len = session.history().len();

        // fill the window with a flat stretch before the next cycle is due
        let later = start + Duration::from_secs(20);
        assert_eq!(feed_burst(&mut session, &vec![128.0; 199], later), 0);
        assert!(session.on_sample_at(128.0, later + Duration::from_secs(1)));
        assert!(matches!(
            session.last_outcome(),
            Some(CycleOutcome::Rejected { .. })
        ));
        assert_eq!(session.estimation_result(), &before);
        assert_eq!(session.history().len(), history_len);
    }

    #[test]
    fn restart_resets_state() {
        let mut session = EstimatorSession::default();
        session.start_session();
        let start = Instant::now();
        feed(&mut session, &pulse(75.0, 20.0), start);
        session.stop_session();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.on_sample_at(128.0, start + Duration::from_secs(60)));

        session.start_session();
        assert!(session.buffer().is_empty());
        assert!(session.history().is_empty());
        assert_eq!(session.estimation_result().bpm, None);
        assert_eq!(session.cycles(), 0);
    }

    #[test]
    fn result_serializes_for_presentation() {
        let json = serde_json::to_value(EstimationResult::heart_rate(72)).unwrap();
        assert_eq!(json["bpm"], 72);
        assert_eq!(json["status_message"], "Heart rate: 72 bpm");
        let json = serde_json::to_value(EstimationResult::status(STATUS_NO_FINGER)).unwrap();
        assert!(json["bpm"].is_null());
    }

    #[test]
    fn noisy_input_never_leaves_physiological_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..20 {
            let mut session = EstimatorSession::default();
            session.start_session();
            let start = Instant::now();
            let bpm = rng.gen_range(20.0..260.0);
            let noise = rng.gen_range(0.0..80.0);
            let values: Vec<f64> = pulse(bpm, 30.0)
                .into_iter()
                .map(|v| v + rng.gen_range(-noise..=noise))
                .collect();
            for (i, &v) in values.iter().enumerate() {
                session.on_sample_at(v, start + STEP * i as u32);
                if let Some(out) = session.estimation_result().bpm {
                    assert!((40..=200).contains(&out), "round {round}: {out}");
                }
                assert!(session.history().len() <= 5);
                assert!(session
                    .history()
                    .values()
                    .iter()
                    .all(|v| (40..=200).contains(v)));
            }
        }
    }
}
