use std::{
    fs::File,
    io::BufWriter,
    path::Path,
    sync::mpsc::{self, Sender},
};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{spectrum_gradient, SpectralEngine},
    audio::{downmix, FrameReader},
    beat::{BeatDetector, BeatEvent},
    publish::{snapshot_channel, SnapshotWriter},
    AnalysisConfig, Result,
};

const OFFLINE_BLOCK_FRAMES: usize = 1024;

/// Spectral analysis, beat detection and snapshot publication bundled into
/// the single component both audio source variants feed. It is owned by the
/// producer context and only ever touched from there.
pub struct FeaturePipeline {
    spectral: SpectralEngine,
    detector: BeatDetector,
    writer: SnapshotWriter,
    beats: Sender<BeatEvent>,
    frames_analysed: u64,
}

impl FeaturePipeline {
    pub fn new(
        config: &AnalysisConfig,
        sample_rate: u32,
        writer: SnapshotWriter,
        beats: Sender<BeatEvent>,
    ) -> Result<Self> {
        let spectral = SpectralEngine::new(config, sample_rate)?;
        let detector = BeatDetector::new(spectral.frame_seconds());
        tracing::debug!(
            sample_rate,
            fft_size = spectral.fft_size(),
            hop_size = spectral.hop_size(),
            bars = spectral.bars_count(),
            "feature pipeline ready"
        );

        Ok(Self {
            spectral,
            detector,
            writer,
            beats,
            frames_analysed: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.spectral.sample_rate()
    }

    pub fn frames_analysed(&self) -> u64 {
        self.frames_analysed
    }

    pub fn bpm_smoothed(&self) -> f32 {
        self.detector.bpm_smoothed()
    }

    /// Smoothed tempo, once enough beats have been seen to estimate one.
    pub fn tempo_estimate(&self) -> Option<f32> {
        self.detector
            .has_tempo()
            .then(|| self.detector.bpm_smoothed())
    }

    /// Feeds one mono sample; runs a spectral frame whenever a hop completes.
    #[inline]
    pub fn push_sample(&mut self, mono: f32) {
        self.frames_analysed += 1;
        if self.spectral.push(mono) {
            self.evaluate();
        }
    }

    fn evaluate(&mut self) {
        let frame = self.writer.back_mut();
        let features = match self.spectral.compute(&mut frame.bars) {
            Ok(features) => features,
            Err(err) => {
                tracing::warn!(%err, "dropping spectral frame");
                return;
            }
        };

        let now = self.frames_analysed as f64 / f64::from(self.spectral.sample_rate());
        if let Some(strength) = self.detector.process(features.low_energy, now) {
            let beat = BeatEvent {
                strength,
                color: spectrum_gradient(features.dominant),
                stream_time: now,
            };
            tracing::trace!(strength, time = now, "beat");
            // The consumer may already be gone during teardown.
            let _ = self.beats.send(beat);
        }

        frame.dominant = features.dominant;
        frame.bpm = self.detector.bpm_smoothed();
        self.writer.publish();
    }
}

impl std::fmt::Debug for FeaturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeaturePipeline")
            .field("spectral", &self.spectral)
            .field("frames_analysed", &self.frames_analysed)
            .field("bpm", &self.detector.bpm_smoothed())
            .finish()
    }
}

/// Beat position recorded by offline analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatMark {
    pub time: f64,
    pub strength: f32,
}

impl From<BeatEvent> for BeatMark {
    fn from(beat: BeatEvent) -> Self {
        Self {
            time: beat.stream_time,
            strength: beat.strength,
        }
    }
}

/// Summary of a whole stream analysed without an output device.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub duration_seconds: f32,
    pub tempo_bpm: Option<f32>,
    pub beats: Vec<BeatMark>,
}

impl AnalysisSummary {
    /// Writes the summary as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Runs the feature pipeline over everything `reader` yields.
pub fn analyse_reader(
    reader: &mut dyn FrameReader,
    config: &AnalysisConfig,
) -> Result<AnalysisSummary> {
    let format = reader.format();
    format.validate()?;

    let (writer, _snapshot) = snapshot_channel(config.bars_count, config.stale_after());
    let (tx, rx) = mpsc::channel();
    let mut pipeline = FeaturePipeline::new(config, format.sample_rate, writer, tx)?;

    let channels = usize::from(format.channels);
    let mut block = vec![0.0; channels * OFFLINE_BLOCK_FRAMES];
    let mut beats = Vec::new();

    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        for frame in block[..read].chunks_exact(channels) {
            pipeline.push_sample(downmix(frame).mono);
        }
        beats.extend(rx.try_iter().map(BeatMark::from));
    }

    let summary = AnalysisSummary {
        sample_rate: format.sample_rate,
        duration_seconds: pipeline.frames_analysed() as f32 / format.sample_rate as f32,
        tempo_bpm: pipeline.tempo_estimate(),
        beats,
    };
    tracing::info!(
        duration = summary.duration_seconds,
        beats = summary.beats.len(),
        tempo = ?summary.tempo_bpm,
        "offline analysis finished"
    );
    Ok(summary)
}
