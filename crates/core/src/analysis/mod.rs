//! Windowed spectral analysis with log-frequency banding.
//!
//! [`SpectralEngine`] owns the FFT analysis ring. Every hop of pushed samples
//! it windows the most recent `fft_size` samples, runs a forward real FFT and
//! reduces the spectrum to `bars_count` normalised bars, a dominant-frequency
//! scalar and the low-band energy consumed by the beat detector.

mod bins;
mod pipeline;

use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{ring::RingBuffer, AnalysisConfig, Result, SpectraError};

pub use bins::{tilt_weight, LogBinMap};
pub use pipeline::{analyse_reader, AnalysisSummary, BeatMark, FeaturePipeline};

const LOW_BAND_HZ: (f32, f32) = (30.0, 160.0);
const DB_FLOOR: f32 = -60.0;
const MAGNITUDE_EPSILON: f32 = 1e-8;

/// Linear RGBA colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Blend towards `other`; exact at `t == 0` and `t == 1`.
    pub fn lerp(self, other: Rgba, t: f32) -> Rgba {
        let s = 1.0 - t;
        Rgba {
            r: self.r * s + other.r * t,
            g: self.g * s + other.g * t,
            b: self.b * s + other.b * t,
            a: self.a * s + other.a * t,
        }
    }
}

const GRADIENT_LOW: Rgba = Rgba::new(0.40, 0.02, 0.02, 1.0);
const GRADIENT_MID: Rgba = Rgba::new(1.00, 0.90, 0.10, 1.0);
const GRADIENT_HIGH: Rgba = Rgba::new(0.10, 1.00, 0.25, 1.0);

/// Three-stop dark red, yellow, green gradient over `t` in `[0, 1]`.
pub fn spectrum_gradient(t: f32) -> Rgba {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    if t < 0.5 {
        GRADIENT_LOW.lerp(GRADIENT_MID, t / 0.5)
    } else {
        GRADIENT_MID.lerp(GRADIENT_HIGH, (t - 0.5) / 0.5)
    }
}

/// Symmetric Hann window of length `len`.
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len).map(|index| hann_value(index, len)).collect()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

/// Maps a weighted magnitude to a bar height: decibels, 60 dB range, clamped.
pub fn normalize_magnitude(magnitude: f32) -> f32 {
    let db = 20.0 * (magnitude + MAGNITUDE_EPSILON).log10();
    let norm = (db - DB_FLOOR) / -DB_FLOOR;
    if norm.is_nan() {
        0.0
    } else {
        norm.clamp(0.0, 1.0)
    }
}

/// Per-frame scalars produced alongside the bars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpectralFeatures {
    /// Magnitude-weighted mean bar position in `[0, 1]`.
    pub dominant: f32,
    /// Mean magnitude of the ~30-160 Hz bins.
    pub low_energy: f32,
}

/// FFT front end shared by both audio source variants.
pub struct SpectralEngine {
    sample_rate: u32,
    hop_size: usize,
    since_hop: usize,
    ring: RingBuffer<f32>,
    window: Vec<f32>,
    bins: LogBinMap,
    low_band: (usize, usize),
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectralEngine {
    /// Builds the engine for a stream at `sample_rate`. Fails with
    /// [`SpectraError::InvalidConfiguration`] when the FFT size is not a power
    /// of two or the bar layout does not fit the spectrum.
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SpectraError::invalid_config("sample rate must be non-zero"));
        }
        let bins = LogBinMap::new(config, sample_rate)?;

        let fft_size = config.fft_size;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            sample_rate,
            hop_size: config.hop_size(),
            since_hop: 0,
            ring: RingBuffer::new(fft_size),
            window: hann_window(fft_size),
            bins,
            low_band: low_band_bins(fft_size, sample_rate),
            plan,
            input,
            spectrum,
            scratch,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.ring.capacity()
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn bars_count(&self) -> usize {
        self.bins.len()
    }

    pub fn bins(&self) -> &LogBinMap {
        &self.bins
    }

    /// Seconds of audio between two spectral frames.
    pub fn frame_seconds(&self) -> f32 {
        self.hop_size as f32 / self.sample_rate as f32
    }

    /// Appends one mono sample. Returns `true` once a full hop has been
    /// accumulated and [`compute`](Self::compute) should run.
    #[inline]
    pub fn push(&mut self, sample: f32) -> bool {
        self.ring.push(sample);
        self.since_hop += 1;
        if self.since_hop >= self.hop_size {
            self.since_hop = 0;
            true
        } else {
            false
        }
    }

    /// Analyses the most recent `fft_size` samples and writes one bar per
    /// entry of `bars`.
    pub fn compute(&mut self, bars: &mut [f32]) -> Result<SpectralFeatures> {
        SpectraError::check_len("bars", self.bins.len(), bars.len())?;

        self.ring.copy_ordered(&mut self.input)?;
        for (sample, weight) in self.input.iter_mut().zip(&self.window) {
            *sample *= weight;
        }
        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let last = (bars.len() - 1) as f32;
        let mut dom_weight = 0.0;
        let mut dom_sum = 0.0;

        for (bar, (slot, (&bin, &weight))) in bars
            .iter_mut()
            .zip(self.bins.bin_index().iter().zip(self.bins.freq_weight()))
            .enumerate()
        {
            let magnitude = self.spectrum[bin - 1..=bin + 1]
                .iter()
                .map(|c| c.norm())
                .sum::<f32>()
                / 3.0;
            let norm = normalize_magnitude(magnitude * weight);
            *slot = norm;

            dom_weight += norm;
            dom_sum += norm * (bar as f32 / last);
        }

        Ok(SpectralFeatures {
            dominant: (dom_sum / (dom_weight + 1e-6)).clamp(0.0, 1.0),
            low_energy: self.low_band_energy(),
        })
    }

    fn low_band_energy(&self) -> f32 {
        let (start, end) = self.low_band;
        let energy =
            self.spectrum[start..end].iter().map(|c| c.norm()).sum::<f32>() / (end - start) as f32;
        if energy.is_finite() {
            energy
        } else {
            0.0
        }
    }
}

fn low_band_bins(fft_size: usize, sample_rate: u32) -> (usize, usize) {
    let nyquist = fft_size / 2;
    let to_bin = |hz: f32| (hz * fft_size as f32 / sample_rate as f32) as usize;
    let start = to_bin(LOW_BAND_HZ.0).clamp(1, nyquist - 1);
    let end = to_bin(LOW_BAND_HZ.1).clamp(start + 1, nyquist);
    (start, end)
}

impl fmt::Debug for SpectralEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralEngine")
            .field("sample_rate", &self.sample_rate)
            .field("fft_size", &self.ring.capacity())
            .field("hop_size", &self.hop_size)
            .field("bars", &self.bins.len())
            .field("low_band", &self.low_band)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_config() -> AnalysisConfig {
        AnalysisConfig {
            bars_count: 8,
            waveform_length: 256,
            fft_size: 256,
            min_frequency: 20.0,
            max_frequency: 2000.0,
            ..Default::default()
        }
    }

    fn push_all(engine: &mut SpectralEngine, samples: impl IntoIterator<Item = f32>) -> usize {
        samples.into_iter().filter(|s| engine.push(*s)).count()
    }

    #[test]
    fn rejects_non_power_of_two() {
        let config = AnalysisConfig {
            fft_size: 300,
            ..scenario_config()
        };
        let err = SpectralEngine::new(&config, 8_000).unwrap_err();
        assert!(matches!(err, SpectraError::InvalidConfiguration(_)));
    }

    #[test]
    fn silence_sits_on_the_floor() {
        let mut engine = SpectralEngine::new(&scenario_config(), 8_000).unwrap();
        assert_eq!(push_all(&mut engine, std::iter::repeat(0.0).take(256)), 4);

        let mut bars = [1.0; 8];
        let features = engine.compute(&mut bars).unwrap();
        assert!(bars.iter().all(|bar| bar.abs() < 1e-6));
        assert_eq!(features.low_energy, 0.0);
        assert!(features.dominant.is_finite());
    }

    #[test]
    fn pure_tone_peaks_in_its_bar() {
        let sample_rate = 8_000;
        let mut engine = SpectralEngine::new(&scenario_config(), sample_rate).unwrap();
        push_all(&mut engine, std::iter::repeat(0.0).take(256));

        let tone = (0..256).map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin());
        push_all(&mut engine, tone);

        let mut bars = [0.0; 8];
        engine.compute(&mut bars).unwrap();

        // The bar whose log-spaced range contains 440 Hz.
        let map = engine.bins();
        let expected = (0..8)
            .min_by(|&a, &b| {
                let da = (map.bar_frequency(a) / 440.0).ln().abs();
                let db = (map.bar_frequency(b) / 440.0).ln().abs();
                da.total_cmp(&db)
            })
            .unwrap();
        let loudest = (0..8)
            .max_by(|&a, &b| bars[a].total_cmp(&bars[b]))
            .unwrap();
        assert_eq!(loudest, expected, "bars {bars:?}");
        assert!(bars.iter().all(|bar| (0.0..=1.0).contains(bar)));
    }

    #[test]
    fn extreme_inputs_stay_in_bounds() {
        let mut engine = SpectralEngine::new(&scenario_config(), 44_100).unwrap();
        let mut bars = [0.0; 8];

        for value in [1e30_f32, -1e30, f32::MAX, f32::NAN, f32::INFINITY] {
            push_all(&mut engine, std::iter::repeat(value).take(256));
            let features = engine.compute(&mut bars).unwrap();
            assert!(bars.iter().all(|bar| (0.0..=1.0).contains(bar)), "{bars:?}");
            assert!(features.dominant.is_finite());
            assert!(features.low_energy.is_finite());
        }
    }

    #[test]
    fn compute_rejects_wrong_bar_count() {
        let mut engine = SpectralEngine::new(&scenario_config(), 8_000).unwrap();
        let mut bars = [0.0; 7];
        assert!(matches!(
            engine.compute(&mut bars),
            Err(SpectraError::SizeMismatch { buffer: "bars", .. })
        ));
    }

    #[test]
    fn low_band_is_inside_the_spectrum() {
        for (fft_size, sample_rate) in [(8, 8_000), (256, 8_000), (2048, 48_000), (8, 96_000)] {
            let (start, end) = low_band_bins(fft_size, sample_rate);
            assert!(start >= 1 && start < end && end <= fft_size / 2);
        }
    }

    #[test]
    fn gradient_hits_its_stops() {
        assert_eq!(spectrum_gradient(0.0), GRADIENT_LOW);
        assert_eq!(spectrum_gradient(0.5), GRADIENT_MID);
        assert_eq!(spectrum_gradient(1.0), GRADIENT_HIGH);
        assert_eq!(spectrum_gradient(f32::NAN), GRADIENT_LOW);
        assert_eq!(spectrum_gradient(0.25).a, 1.0);
    }

    #[test]
    fn hann_window_tapers_to_zero() {
        let window = hann_window(16);
        assert!(window[0].abs() < 1e-6);
        assert!(window[15].abs() < 1e-6);
        assert!(window.iter().all(|w| (0.0..=1.0).contains(w)));
    }
}
