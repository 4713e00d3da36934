use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver},
        Arc, Mutex, MutexGuard,
    },
};

use super::{downmix, AudioMode, AudioSource, StreamFormat};
use crate::{
    analysis::FeaturePipeline,
    beat::BeatEvent,
    publish::{snapshot_channel, SnapshotReader},
    ring::WaveRings,
    AnalysisConfig, Result, SpectraError,
};

/// Driver-facing half of a push source: a capture device that calls back
/// with interleaved PCM on its own thread.
pub trait CaptureBackend {
    /// Opens the device and reports the format it will deliver.
    fn open(&mut self) -> Result<StreamFormat>;

    /// Begins streaming into `writer` from the driver's thread.
    fn start(&mut self, writer: CaptureWriter) -> Result<()>;

    /// Tears the stream down. May race with an in-flight callback.
    fn stop(&mut self);
}

/// Producer handle owned by the capture callback. It is the only writer of
/// the waveform rings and the sole owner of the feature pipeline.
pub struct CaptureWriter {
    format: StreamFormat,
    rings: Arc<Mutex<WaveRings>>,
    pipeline: FeaturePipeline,
    active: Arc<AtomicBool>,
    scratch: Vec<f32>,
}

impl CaptureWriter {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Whether the owning [`LiveCapture`] still wants samples.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Consumes one chunk of interleaved float samples. A trailing partial
    /// frame is ignored.
    pub fn push_f32(&mut self, interleaved: &[f32]) {
        if !self.is_active() {
            return;
        }

        let channels = usize::from(self.format.channels);
        {
            let mut rings = self.rings.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("waveform rings poisoned, recovering");
                poisoned.into_inner()
            });
            for frame in interleaved.chunks_exact(channels) {
                let mix = downmix(frame);
                rings.push_frame(mix.mono, mix.left, mix.right);
            }
        }
        for frame in interleaved.chunks_exact(channels) {
            self.pipeline.push_sample(downmix(frame).mono);
        }
    }

    /// Consumes one chunk of interleaved signed 16-bit samples.
    pub fn push_i16(&mut self, interleaved: &[i16]) {
        let mut scratch = mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend(interleaved.iter().map(|sample| f32::from(*sample) / 32_768.0));
        self.push_f32(&scratch);
        self.scratch = scratch;
    }
}

impl std::fmt::Debug for CaptureWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureWriter")
            .field("format", &self.format)
            .field("pipeline", &self.pipeline)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Push-driven source: whatever the capture driver delivered last is what is
/// audible now, so the ring tail is displayed as-is.
pub struct LiveCapture<B: CaptureBackend> {
    config: AnalysisConfig,
    backend: B,
    rings: Arc<Mutex<WaveRings>>,
    snapshot: SnapshotReader,
    beats: Receiver<BeatEvent>,
    active: Arc<AtomicBool>,
    format: Option<StreamFormat>,
}

impl<B: CaptureBackend> LiveCapture<B> {
    pub fn new(config: AnalysisConfig, backend: B) -> Result<Self> {
        config.validate()?;
        let (_, snapshot) = snapshot_channel(config.bars_count, config.stale_after());
        let (_, beats) = mpsc::channel();

        Ok(Self {
            rings: Arc::new(Mutex::new(WaveRings::new(config.waveform_length))),
            config,
            backend,
            snapshot,
            beats,
            active: Arc::new(AtomicBool::new(false)),
            format: None,
        })
    }

    /// Format of the running stream, if started.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn is_running(&self) -> bool {
        self.format.is_some()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock_rings(&self) -> Result<MutexGuard<'_, WaveRings>> {
        self.rings
            .lock()
            .map_err(|_| SpectraError::msg("waveform rings have been poisoned"))
    }
}

impl<B: CaptureBackend> AudioSource for LiveCapture<B> {
    fn mode(&self) -> AudioMode {
        AudioMode::Live
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            self.stop();
        }

        let format = self.backend.open()?;
        format.validate()?;

        let (writer, snapshot) =
            snapshot_channel(self.config.bars_count, self.config.stale_after());
        let (beat_tx, beat_rx) = mpsc::channel();
        let pipeline = FeaturePipeline::new(&self.config, format.sample_rate, writer, beat_tx)?;

        self.lock_rings()?.clear();
        self.snapshot = snapshot;
        self.beats = beat_rx;
        // A fresh flag per session keeps writers from a previous start muted.
        self.active = Arc::new(AtomicBool::new(true));

        let writer = CaptureWriter {
            format,
            rings: self.rings.clone(),
            pipeline,
            active: self.active.clone(),
            scratch: Vec::new(),
        };

        if let Err(err) = self.backend.start(writer) {
            self.active.store(false, Ordering::Release);
            return Err(err);
        }

        self.format = Some(format);
        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "live capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.backend.stop();

        if self.format.take().is_some() {
            self.snapshot.reset();
            while self.beats.try_recv().is_ok() {}
            tracing::info!("live capture stopped");
        }
    }

    fn update(&mut self, _dt: f32) {}

    fn copy_bars(&self, dest: &mut [f32]) -> Result<()> {
        self.snapshot.copy_bars(dest)
    }

    fn copy_waveform(&self, dest: &mut [f32]) -> Result<()> {
        SpectraError::check_len("waveform", self.config.waveform_length, dest.len())?;
        if self.snapshot.is_stale() {
            dest.fill(0.0);
            return Ok(());
        }
        self.lock_rings()?.copy_waveform(dest)
    }

    fn copy_stereo(&self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        SpectraError::check_len("left", self.config.waveform_length, left.len())?;
        SpectraError::check_len("right", self.config.waveform_length, right.len())?;
        if self.snapshot.is_stale() {
            left.fill(0.0);
            right.fill(0.0);
            return Ok(());
        }
        self.lock_rings()?.copy_stereo(left, right)
    }

    fn try_dequeue_beat(&self) -> Option<BeatEvent> {
        self.beats.try_recv().ok()
    }

    fn bpm_smoothed(&self) -> f32 {
        self.snapshot.bpm()
    }
}

impl<B: CaptureBackend> Drop for LiveCapture<B> {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl<B: CaptureBackend> std::fmt::Debug for LiveCapture<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCapture")
            .field("format", &self.format)
            .field("bars", &self.config.bars_count)
            .field("waveform_length", &self.config.waveform_length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{f32::consts::PI, thread, time::Duration};

    use super::*;
    use crate::beat::DEFAULT_BPM;

    /// Hands the writer back to the test instead of a driver thread.
    #[derive(Default)]
    struct ManualBackend {
        format: Option<StreamFormat>,
        writer: Arc<Mutex<Option<CaptureWriter>>>,
        stops: usize,
    }

    impl ManualBackend {
        fn with_format(sample_rate: u32, channels: u16) -> Self {
            Self {
                format: Some(StreamFormat {
                    sample_rate,
                    channels,
                }),
                ..Default::default()
            }
        }

        fn push(&self, samples: &[f32]) {
            if let Some(writer) = self.writer.lock().unwrap().as_mut() {
                writer.push_f32(samples);
            }
        }
    }

    impl CaptureBackend for ManualBackend {
        fn open(&mut self) -> Result<StreamFormat> {
            self.format
                .ok_or_else(|| SpectraError::unavailable("no capture device"))
        }

        fn start(&mut self, writer: CaptureWriter) -> Result<()> {
            *self.writer.lock().unwrap() = Some(writer);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
            self.writer.lock().unwrap().take();
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            bars_count: 8,
            waveform_length: 256,
            fft_size: 256,
            min_frequency: 20.0,
            max_frequency: 2000.0,
            stale_after_ms: 200,
        }
    }

    fn started(backend: ManualBackend) -> LiveCapture<ManualBackend> {
        let mut capture = LiveCapture::new(config(), backend).unwrap();
        capture.start().unwrap();
        capture
    }

    #[test]
    fn start_fails_without_device() {
        let mut capture = LiveCapture::new(config(), ManualBackend::default()).unwrap();
        let err = capture.start().unwrap_err();
        assert!(matches!(err, SpectraError::SourceUnavailable(_)));
        assert!(!capture.is_running());
    }

    #[test]
    fn silence_then_tone() {
        let capture = started(ManualBackend::with_format(8_000, 1));
        let mut bars = [1.0; 8];

        capture.backend().push(&[0.0; 256]);
        capture.copy_bars(&mut bars).unwrap();
        assert!(bars.iter().all(|bar| bar.abs() < 1e-6 && !bar.is_nan()));

        let tone: Vec<f32> = (0..256)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 8_000.0).sin())
            .collect();
        capture.backend().push(&tone);
        capture.copy_bars(&mut bars).unwrap();

        let loudest = (0..8).max_by(|&a, &b| bars[a].total_cmp(&bars[b])).unwrap();
        // 440 Hz falls in the sixth log-spaced bar between 20 Hz and 2 kHz.
        assert_eq!(loudest, 5, "bars {bars:?}");
    }

    #[test]
    fn copy_bars_with_wrong_length_is_a_size_mismatch() {
        let capture = started(ManualBackend::with_format(8_000, 1));
        let mut bars = [0.0; 9];
        assert!(matches!(
            capture.copy_bars(&mut bars),
            Err(SpectraError::SizeMismatch { buffer: "bars", .. })
        ));

        let mut wave = [0.0; 10];
        assert!(matches!(
            capture.copy_waveform(&mut wave),
            Err(SpectraError::SizeMismatch { buffer: "waveform", .. })
        ));
    }

    #[test]
    fn waveform_and_stereo_follow_the_ring_tail() {
        let capture = started(ManualBackend::with_format(8_000, 2));
        let frames: Vec<f32> = (0..300)
            .flat_map(|i| [i as f32, -(i as f32)])
            .collect();
        capture.backend().push(&frames);

        let mut wave = [1.0; 256];
        let mut left = [0.0; 256];
        let mut right = [0.0; 256];
        capture.copy_waveform(&mut wave).unwrap();
        capture.copy_stereo(&mut left, &mut right).unwrap();

        assert_eq!(left[0], 44.0);
        assert_eq!(left[255], 299.0);
        assert_eq!(right[255], -299.0);
        assert!(wave.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn stale_source_reads_as_silence() {
        let mut config = config();
        config.stale_after_ms = 20;
        let mut capture = LiveCapture::new(config, ManualBackend::with_format(8_000, 1)).unwrap();
        capture.start().unwrap();

        capture.backend().push(&[0.5; 256]);
        let mut wave = [0.0; 256];
        capture.copy_waveform(&mut wave).unwrap();
        assert_eq!(wave[255], 0.5);

        thread::sleep(Duration::from_millis(60));
        let mut bars = [1.0; 8];
        capture.copy_bars(&mut bars).unwrap();
        capture.copy_waveform(&mut wave).unwrap();
        assert_eq!(bars, [0.0; 8]);
        assert!(wave.iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn sixteen_bit_chunks_are_scaled() {
        let capture = started(ManualBackend::with_format(8_000, 1));
        if let Some(writer) = capture.backend().writer.lock().unwrap().as_mut() {
            writer.push_i16(&[16_384; 256]);
        }
        let mut wave = [0.0; 256];
        capture.copy_waveform(&mut wave).unwrap();
        assert!(wave.iter().all(|sample| *sample == 0.5));
    }

    #[test]
    fn stop_mutes_writers_and_resets_state() {
        let mut capture = started(ManualBackend::with_format(8_000, 1));
        let writer_slot = capture.backend().writer.clone();
        capture.backend().push(&[0.5; 256]);

        // Keep a writer alive past stop, as a late driver callback would.
        let late_writer = writer_slot.lock().unwrap().take();
        capture.stop();
        assert_eq!(capture.backend().stops, 1);
        assert_eq!(capture.bpm_smoothed(), DEFAULT_BPM);

        let mut late_writer = late_writer.unwrap();
        assert!(!late_writer.is_active());
        late_writer.push_f32(&[1.0; 256]);

        let mut bars = [1.0; 8];
        capture.copy_bars(&mut bars).unwrap();
        assert_eq!(bars, [0.0; 8]);
        assert!(capture.try_dequeue_beat().is_none());
    }

    #[test]
    fn bass_hits_are_queued_as_beats() {
        let sample_rate = 8_000;
        let capture = started(ManualBackend::with_format(sample_rate, 1));
        let period = sample_rate as usize / 2;
        let burst = sample_rate as usize / 40;

        for start in (0..sample_rate as usize * 4).step_by(period) {
            let chunk: Vec<f32> = (0..period)
                .map(|i| {
                    if i < burst {
                        let t = (start + i) as f32 / sample_rate as f32;
                        (2.0 * PI * 80.0 * t).sin()
                    } else {
                        0.0
                    }
                })
                .collect();
            capture.backend().push(&chunk);
        }

        let beats: Vec<BeatEvent> = std::iter::from_fn(|| capture.try_dequeue_beat()).collect();
        assert!(beats.len() >= 4, "beats {}", beats.len());
        assert!(beats
            .iter()
            .all(|beat| (0.0..=1.0).contains(&beat.strength) && beat.color.a == 1.0));
        assert!(capture.try_dequeue_beat().is_none());
    }
}
