//! Low-band onset detection and tempo estimation.
//!
//! The detector tracks an exponential moving average and variance of the
//! low-band energy and fires when the energy clears `mean + 2.2 sigma`,
//! subject to a refractory gate. Beat timestamps feed a median-of-intervals
//! tempo estimate that is blended into a smoothed BPM.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::analysis::Rgba;

/// BPM reported before any tempo could be estimated.
pub const DEFAULT_BPM: f32 = 120.0;

const ENERGY_TIME_CONSTANT: f32 = 0.35;
const VARIANCE_TIME_CONSTANT: f32 = 0.55;
const THRESHOLD_SIGMAS: f32 = 2.2;
const VARIANCE_FLOOR: f32 = 1e-9;
/// Minimum spacing between two beats, roughly a 333 BPM ceiling.
const REFRACTORY_SECONDS: f64 = 0.18;
const MAX_INTERVAL_SECONDS: f64 = 1.20;
const MAX_BEAT_HISTORY: usize = 12;
const MIN_INTERVALS: usize = 3;
const BPM_BLEND: f32 = 0.22;

/// A detected onset, consumed at most once by the visual layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// How far the low-band energy cleared the threshold, in `[0, 1]`.
    pub strength: f32,
    /// Gradient colour of the dominant frequency at the time of the beat.
    pub color: Rgba,
    /// Stream time of the spectral frame that fired, in seconds.
    pub stream_time: f64,
}

/// Adaptive-threshold beat detector fed once per spectral frame.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    alpha_energy: f32,
    alpha_variance: f32,
    ema_energy: f32,
    ema_variance: f32,
    last_beat: Option<f64>,
    beat_times: VecDeque<f64>,
    intervals: Vec<f64>,
    bpm_smoothed: f32,
    tempo_estimated: bool,
}

impl BeatDetector {
    /// Creates a detector for frames spaced `frame_seconds` apart.
    pub fn new(frame_seconds: f32) -> Self {
        Self {
            alpha_energy: smoothing_alpha(frame_seconds, ENERGY_TIME_CONSTANT),
            alpha_variance: smoothing_alpha(frame_seconds, VARIANCE_TIME_CONSTANT),
            ema_energy: 0.0,
            ema_variance: 0.0,
            last_beat: None,
            beat_times: VecDeque::with_capacity(MAX_BEAT_HISTORY + 1),
            intervals: Vec::with_capacity(MAX_BEAT_HISTORY),
            bpm_smoothed: DEFAULT_BPM,
            tempo_estimated: false,
        }
    }

    pub fn bpm_smoothed(&self) -> f32 {
        self.bpm_smoothed
    }

    /// Whether at least one tempo estimate has been blended in.
    pub fn has_tempo(&self) -> bool {
        self.tempo_estimated
    }

    /// Current detection threshold.
    pub fn threshold(&self) -> f32 {
        self.ema_energy + THRESHOLD_SIGMAS * self.ema_variance.max(VARIANCE_FLOOR).sqrt()
    }

    /// Updates the running statistics with one frame's low-band energy taken
    /// at stream time `now` (seconds). Returns the beat strength in `[0, 1]`
    /// when this frame is a beat.
    pub fn process(&mut self, low_energy: f32, now: f64) -> Option<f32> {
        let diff = low_energy - self.ema_energy;
        self.ema_energy += diff * self.alpha_energy;
        self.ema_variance += (diff * diff - self.ema_variance) * self.alpha_variance;

        let threshold = self.threshold();
        if low_energy <= threshold {
            return None;
        }

        let gated = self
            .last_beat
            .map(|last| now - last <= REFRACTORY_SECONDS)
            .unwrap_or(false);
        if gated {
            return None;
        }

        self.last_beat = Some(now);
        let strength = ((low_energy - threshold) / (threshold + 1e-6)).clamp(0.0, 1.0);
        self.update_bpm(now);
        Some(strength)
    }

    fn update_bpm(&mut self, now: f64) {
        self.beat_times.push_back(now);
        while self.beat_times.len() > MAX_BEAT_HISTORY {
            self.beat_times.pop_front();
        }

        self.intervals.clear();
        self.intervals.extend(
            self.beat_times
                .iter()
                .zip(self.beat_times.iter().skip(1))
                .map(|(previous, next)| next - previous)
                .filter(|interval| *interval > REFRACTORY_SECONDS && *interval < MAX_INTERVAL_SECONDS),
        );

        if self.intervals.len() < MIN_INTERVALS {
            return;
        }

        self.intervals.sort_by(f64::total_cmp);
        let median = self.intervals[self.intervals.len() / 2];
        let bpm = (60.0 / median) as f32;
        self.bpm_smoothed += (bpm - self.bpm_smoothed) * BPM_BLEND;
        self.tempo_estimated = true;
        tracing::trace!(bpm, smoothed = self.bpm_smoothed, "tempo estimate updated");
    }
}

/// First-order smoothing coefficient `1 - e^(-dt / tau)`.
pub fn smoothing_alpha(dt: f32, tau: f32) -> f32 {
    1.0 - (-dt / tau).exp()
}
