use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, SpectraError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing fields fall back to their
    /// defaults, and the result is validated before it is returned.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.playback.validate()
    }
}

/// Parameters of the spectral analysis. Fixed for the lifetime of an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub bars_count: usize,
    pub waveform_length: usize,
    /// Must be a power of two.
    pub fft_size: usize,
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Published snapshots older than this read back as silence.
    pub stale_after_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bars_count: 420,
            waveform_length: 4096,
            fft_size: 2048,
            min_frequency: 20.0,
            max_frequency: 20_000.0,
            stale_after_ms: 200,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 8 || !self.fft_size.is_power_of_two() {
            return Err(SpectraError::invalid_config(format!(
                "fft_size must be a power of two of at least 8, got {}",
                self.fft_size
            )));
        }

        let max_bars = self.fft_size / 2 - 2;
        if self.bars_count < 2 || self.bars_count > max_bars {
            return Err(SpectraError::invalid_config(format!(
                "bars_count must be within [2, {max_bars}] for fft_size {}, got {}",
                self.fft_size, self.bars_count
            )));
        }

        if self.waveform_length == 0 {
            return Err(SpectraError::invalid_config(
                "waveform_length must be greater than zero",
            ));
        }

        if !(self.min_frequency.is_finite() && self.min_frequency > 0.0)
            || !(self.max_frequency.is_finite() && self.max_frequency > self.min_frequency)
        {
            return Err(SpectraError::invalid_config(format!(
                "frequency range {}..{} Hz is not a positive increasing range",
                self.min_frequency, self.max_frequency
            )));
        }

        Ok(())
    }

    /// Number of new samples between two spectral evaluations.
    pub fn hop_size(&self) -> usize {
        (self.fft_size / 8).max(64)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Parameters for the file playback variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Assumed delay between handing frames to the output and hearing them.
    pub output_latency_ms: u32,
    /// Seconds of decoded audio kept for position-based waveform lookups.
    pub history_seconds: u32,
    /// Gain applied before samples are both played and analysed.
    pub volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_latency_ms: 90,
            history_seconds: 20,
            volume: 0.9,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(SpectraError::invalid_config(format!(
                "volume must be a finite non-negative gain, got {}",
                self.volume
            )));
        }
        Ok(())
    }

    pub fn output_latency(&self) -> Duration {
        Duration::from_millis(u64::from(self.output_latency_ms))
    }
}
