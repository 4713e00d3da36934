use serde::{Deserialize, Serialize};

use crate::{AnalysisConfig, Result};

const TILT_EXPONENT: f32 = 0.40;
const TILT_REFERENCE_HZ: f32 = 1000.0;
const MIN_WEIGHT: f32 = 0.35;
const MAX_WEIGHT: f32 = 2.8;

/// Static mapping from output bar to the FFT bin it samples, plus the
/// frequency-tilt weight applied to that bar.
///
/// Bin indices are strictly increasing and stay within `[1, N/2 - 2]` so the
/// three-bin average around each index never leaves the spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBinMap {
    bin_index: Vec<usize>,
    freq_weight: Vec<f32>,
    bin_hz: f32,
}

impl LogBinMap {
    pub fn new(config: &AnalysisConfig, sample_rate: u32) -> Result<Self> {
        config.validate()?;

        let bars = config.bars_count;
        let fft_size = config.fft_size;
        let max_bin = fft_size / 2 - 2;
        let bin_hz = sample_rate.max(1) as f32 / fft_size as f32;
        let ratio = config.max_frequency / config.min_frequency;

        let mut bin_index: Vec<usize> = (0..bars)
            .map(|bar| {
                let t = bar as f32 / (bars - 1) as f32;
                let freq = config.min_frequency * ratio.powf(t);
                ((freq / bin_hz).round() as usize).clamp(1, max_bin)
            })
            .collect();

        for bar in 1..bars {
            if bin_index[bar] <= bin_index[bar - 1] {
                bin_index[bar] = bin_index[bar - 1] + 1;
            }
        }

        // Deduplication can push the top bars past the usable range; walk
        // back down keeping the sequence strictly increasing.
        if bin_index[bars - 1] > max_bin {
            bin_index[bars - 1] = max_bin;
            for bar in (0..bars - 1).rev() {
                if bin_index[bar] >= bin_index[bar + 1] {
                    bin_index[bar] = bin_index[bar + 1].saturating_sub(1);
                }
            }
            bin_index.iter_mut().for_each(|bin| *bin = (*bin).max(1));
        }

        let freq_weight = bin_index
            .iter()
            .map(|&bin| tilt_weight(bin as f32 * bin_hz))
            .collect();

        Ok(Self {
            bin_index,
            freq_weight,
            bin_hz,
        })
    }

    pub fn len(&self) -> usize {
        self.bin_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bin_index.is_empty()
    }

    pub fn bin_index(&self) -> &[usize] {
        &self.bin_index
    }

    pub fn freq_weight(&self) -> &[f32] {
        &self.freq_weight
    }

    /// Centre frequency in Hz sampled by `bar`.
    pub fn bar_frequency(&self, bar: usize) -> f32 {
        self.bin_index[bar] as f32 * self.bin_hz
    }
}

/// Weight compensating the natural low-frequency dominance of music.
pub fn tilt_weight(freq_hz: f32) -> f32 {
    (freq_hz / TILT_REFERENCE_HZ)
        .powf(TILT_EXPONENT)
        .clamp(MIN_WEIGHT, MAX_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bars_count: usize, fft_size: usize) -> AnalysisConfig {
        AnalysisConfig {
            bars_count,
            fft_size,
            ..Default::default()
        }
    }

    #[test]
    fn bins_are_strictly_increasing_and_in_range() {
        for fft_size in [8, 16, 64, 256, 1024, 2048, 4096] {
            let max_bin = fft_size / 2 - 2;
            for bars_count in [2, 3, 8, 32, 64, 420, max_bin] {
                if bars_count > max_bin {
                    continue;
                }
                for sample_rate in [8_000, 22_050, 44_100, 48_000, 96_000] {
                    let map = LogBinMap::new(&config(bars_count, fft_size), sample_rate).unwrap();
                    let bins = map.bin_index();
                    assert_eq!(bins.len(), bars_count);
                    assert!(
                        bins.windows(2).all(|pair| pair[0] < pair[1]),
                        "not increasing for fft {fft_size}, bars {bars_count}, sr {sample_rate}"
                    );
                    assert!(bins.iter().all(|&bin| (1..=max_bin).contains(&bin)));
                }
            }
        }
    }

    #[test]
    fn weights_are_clamped() {
        let map = LogBinMap::new(&config(420, 2048), 48_000).unwrap();
        assert!(map
            .freq_weight()
            .iter()
            .all(|w| (MIN_WEIGHT..=MAX_WEIGHT).contains(w)));
        assert_eq!(map.freq_weight()[0], MIN_WEIGHT);
    }

    #[test]
    fn tilt_is_unity_at_one_kilohertz() {
        assert!((tilt_weight(1000.0) - 1.0).abs() < 1e-6);
        assert_eq!(tilt_weight(1.0), MIN_WEIGHT);
        assert_eq!(tilt_weight(1_000_000.0), MAX_WEIGHT);
    }

    #[test]
    fn rejects_invalid_fft_size() {
        assert!(LogBinMap::new(&config(8, 300), 48_000).is_err());
    }
}
