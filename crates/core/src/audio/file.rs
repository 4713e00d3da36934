use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, Receiver},
        Arc, Mutex, MutexGuard,
    },
};

use super::{downmix, AudioMode, AudioSource, FrameReader, StreamFormat, WavFrameReader};
use crate::{
    analysis::FeaturePipeline,
    beat::BeatEvent,
    publish::{snapshot_channel, SnapshotReader},
    ring::WaveRings,
    timeline::PlaybackClock,
    AnalysisConfig, AppConfig, PlaybackConfig, Result, SpectraError,
};

/// A reader this close to its end counts as finished.
const END_SLACK_FRAMES: u64 = 8;
/// Extra history kept beyond one display window.
const HISTORY_MARGIN_FRAMES: usize = 1024;

/// Output device that pulls decoded audio through a [`PlaybackTap`].
pub trait OutputSink {
    /// Opens the output for `tap`'s format. The stream starts paused.
    fn start(&mut self, tap: PlaybackTap) -> Result<()>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Tears the stream down and drops the tap. May race with a pull.
    fn stop(&mut self);
}

/// State shared between the tap (producer) and the ingest (consumer).
#[derive(Debug)]
struct IngestShared {
    rings: Mutex<WaveRings>,
    frames_produced: AtomicU64,
    reader_position: AtomicU64,
    total_frames: Option<u64>,
    exhausted: AtomicBool,
    suppress_end: AtomicBool,
    end_signaled: AtomicBool,
    ended: AtomicBool,
}

impl IngestShared {
    fn new(capacity: usize, total_frames: Option<u64>) -> Self {
        Self {
            rings: Mutex::new(WaveRings::new(capacity)),
            frames_produced: AtomicU64::new(0),
            reader_position: AtomicU64::new(0),
            total_frames,
            exhausted: AtomicBool::new(false),
            suppress_end: AtomicBool::new(false),
            end_signaled: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Raises the track-ended signal once, unless playback was stopped on
    /// purpose or the reader is not actually at its end.
    fn finish_if_complete(&self) {
        if self.suppress_end.load(Ordering::Acquire) {
            return;
        }

        let complete = match self.total_frames {
            Some(total) => self.reader_position.load(Ordering::Acquire) + END_SLACK_FRAMES >= total,
            None => self.exhausted.load(Ordering::Acquire),
        };
        if complete && !self.end_signaled.swap(true, Ordering::AcqRel) {
            self.ended.store(true, Ordering::Release);
            tracing::info!(
                position = self.reader_position.load(Ordering::Relaxed),
                "track finished"
            );
        }
    }
}

/// Pull-side hook handed to the output device. Every sample it returns is
/// also written to the waveform history and analysed, in playback order.
pub struct PlaybackTap {
    reader: Box<dyn FrameReader>,
    pipeline: FeaturePipeline,
    shared: Arc<IngestShared>,
    format: StreamFormat,
    volume: f32,
}

impl PlaybackTap {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.frames_produced.load(Ordering::Acquire)
    }

    /// Fills `out` with interleaved samples for the output and returns how
    /// many were written. Zero means the track is over; the caller should
    /// pad with silence.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = usize::from(self.format.channels);
        let read = match self.reader.read(out) {
            Ok(read) => read - read % channels,
            Err(err) => {
                tracing::warn!(%err, "decoder failed, treating as end of stream");
                0
            }
        };
        self.shared
            .reader_position
            .store(self.reader.position(), Ordering::Release);

        if read == 0 {
            self.shared.exhausted.store(true, Ordering::Release);
            self.shared.finish_if_complete();
            return 0;
        }

        let out = &mut out[..read];
        if self.volume != 1.0 {
            out.iter_mut().for_each(|sample| *sample *= self.volume);
        }

        {
            let mut rings = self.shared.rings.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("waveform history poisoned, recovering");
                poisoned.into_inner()
            });
            for frame in out.chunks_exact(channels) {
                let mix = downmix(frame);
                rings.push_frame(mix.mono, mix.left, mix.right);
            }
        }
        for frame in out.chunks_exact(channels) {
            self.pipeline.push_sample(downmix(frame).mono);
        }

        self.shared
            .frames_produced
            .fetch_add((read / channels) as u64, Ordering::AcqRel);
        read
    }

    /// Called by the sink when its transport stopped by itself.
    pub fn output_stopped(&self) {
        self.shared.finish_if_complete();
    }
}

impl std::fmt::Debug for PlaybackTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackTap")
            .field("format", &self.format)
            .field("volume", &self.volume)
            .field("frames_produced", &self.frames_produced())
            .finish()
    }
}

/// Pull-driven source playing one track at a time. Visuals follow the frame
/// estimated to be audible, not the frame most recently decoded.
pub struct FileIngest<S: OutputSink> {
    analysis: AnalysisConfig,
    playback: PlaybackConfig,
    sink: S,
    shared: Option<Arc<IngestShared>>,
    snapshot: SnapshotReader,
    beats: Receiver<BeatEvent>,
    clock: Option<PlaybackClock>,
    play_position: u64,
    playing: bool,
    track_name: Option<String>,
    path: Option<PathBuf>,
}

impl<S: OutputSink> FileIngest<S> {
    pub fn new(config: &AppConfig, sink: S) -> Result<Self> {
        config.validate()?;
        let analysis = config.analysis.clone();
        let (_, snapshot) = snapshot_channel(analysis.bars_count, analysis.stale_after());
        let (_, beats) = mpsc::channel();

        Ok(Self {
            analysis,
            playback: config.playback.clone(),
            sink,
            shared: None,
            snapshot,
            beats,
            clock: None,
            play_position: 0,
            playing: false,
            track_name: None,
            path: None,
        })
    }

    /// Decodes the WAV file at `path` and loads it as the current track.
    pub fn load_path(&mut self, path: impl AsRef<Path>, autoplay: bool) -> Result<()> {
        let path = path.as_ref();
        let reader = WavFrameReader::open(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.load_track(Box::new(reader), name, autoplay)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Replaces the current track with `reader`. The output starts paused
    /// unless `autoplay` is set.
    pub fn load_track(
        &mut self,
        reader: Box<dyn FrameReader>,
        name: impl Into<String>,
        autoplay: bool,
    ) -> Result<()> {
        self.stop();
        self.path = None;

        let format = reader.format();
        format.validate()?;

        let history = (format.sample_rate as usize * self.playback.history_seconds as usize)
            .max(self.analysis.waveform_length + HISTORY_MARGIN_FRAMES);
        let shared = Arc::new(IngestShared::new(history, reader.total_frames()));

        let (writer, snapshot) =
            snapshot_channel(self.analysis.bars_count, self.analysis.stale_after());
        let (beat_tx, beat_rx) = mpsc::channel();
        let pipeline = FeaturePipeline::new(&self.analysis, format.sample_rate, writer, beat_tx)?;

        let tap = PlaybackTap {
            reader,
            pipeline,
            shared: shared.clone(),
            format,
            volume: self.playback.volume,
        };
        self.sink.start(tap)?;

        let clock = PlaybackClock::new(format.sample_rate, self.playback.output_latency());
        tracing::debug!(
            history_frames = history,
            latency_frames = clock.latency_frames(),
            "playback tap armed"
        );

        let name = name.into();
        tracing::info!(
            track = %name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "track loaded"
        );

        self.shared = Some(shared);
        self.snapshot = snapshot;
        self.beats = beat_rx;
        self.clock = Some(clock);
        self.play_position = 0;
        self.playing = false;
        self.track_name = Some(name);

        if autoplay {
            self.play()?;
        }
        Ok(())
    }

    pub fn play(&mut self) -> Result<()> {
        if self.shared.is_none() {
            return Err(SpectraError::unavailable("no track loaded"));
        }
        self.sink.resume();
        self.playing = true;
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.shared.is_some() {
            self.sink.pause();
        }
        self.playing = false;
    }

    /// Reloads the current file from its beginning and plays it.
    pub fn restart(&mut self) -> Result<()> {
        match self.path.clone() {
            Some(path) => self.load_path(path, true),
            None => Err(SpectraError::unavailable(
                "only tracks loaded from a path can be restarted",
            )),
        }
    }

    pub fn track_name(&self) -> Option<&str> {
        self.track_name.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// True once after the current track played to its end.
    pub fn consume_track_ended(&self) -> bool {
        self.shared
            .as_ref()
            .map(|shared| shared.ended.swap(false, Ordering::AcqRel))
            .unwrap_or(false)
    }

    /// Estimated audible frame as of the last [`update`](AudioSource::update).
    pub fn play_position(&self) -> u64 {
        self.play_position
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared
            .as_ref()
            .map(|shared| shared.frames_produced.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn lock_rings<'a>(&self, shared: &'a IngestShared) -> Result<MutexGuard<'a, WaveRings>> {
        shared
            .rings
            .lock()
            .map_err(|_| SpectraError::msg("waveform history has been poisoned"))
    }
}

impl<S: OutputSink> AudioSource for FileIngest<S> {
    fn mode(&self) -> AudioMode {
        AudioMode::File
    }

    fn start(&mut self) -> Result<()> {
        self.play()
    }

    fn stop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        // Must be visible before the sink reports its transport stopped.
        shared.suppress_end.store(true, Ordering::Release);
        self.sink.stop();

        while self.beats.try_recv().is_ok() {}
        self.snapshot.reset();
        self.clock = None;
        self.play_position = 0;
        self.playing = false;
        let track = self.track_name.take();
        tracing::info!(track = ?track, "playback stopped");
    }

    fn update(&mut self, dt: f32) {
        if let (Some(clock), Some(shared)) = (self.clock.as_mut(), self.shared.as_ref()) {
            let produced = shared.frames_produced.load(Ordering::Acquire);
            self.play_position = clock.advance(dt, produced, self.playing);
        }
    }

    fn copy_bars(&self, dest: &mut [f32]) -> Result<()> {
        self.snapshot.copy_bars(dest)
    }

    fn copy_waveform(&self, dest: &mut [f32]) -> Result<()> {
        SpectraError::check_len("waveform", self.analysis.waveform_length, dest.len())?;
        match &self.shared {
            Some(shared) if !self.snapshot.is_stale() => {
                self.lock_rings(shared)?
                    .copy_waveform_ending_at(self.play_position as i64, dest);
            }
            _ => dest.fill(0.0),
        }
        Ok(())
    }

    fn copy_stereo(&self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        SpectraError::check_len("left", self.analysis.waveform_length, left.len())?;
        SpectraError::check_len("right", self.analysis.waveform_length, right.len())?;
        match &self.shared {
            Some(shared) if !self.snapshot.is_stale() => {
                self.lock_rings(shared)?
                    .copy_stereo_ending_at(self.play_position as i64, left, right);
            }
            _ => {
                left.fill(0.0);
                right.fill(0.0);
            }
        }
        Ok(())
    }

    fn try_dequeue_beat(&self) -> Option<BeatEvent> {
        self.beats.try_recv().ok()
    }

    fn bpm_smoothed(&self) -> f32 {
        self.snapshot.bpm()
    }
}

impl<S: OutputSink> Drop for FileIngest<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: OutputSink> std::fmt::Debug for FileIngest<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIngest")
            .field("track", &self.track_name)
            .field("playing", &self.playing)
            .field("play_position", &self.play_position)
            .finish()
    }
}
