//! Core library for the Spectra audio analysis engine.
//!
//! The crate turns a stream of interleaved PCM into what a music visualiser
//! draws every frame: log-frequency spectrum bars, a waveform and stereo
//! window, beat events and a smoothed tempo. Samples either arrive pushed by
//! a capture driver ([`LiveCapture`]) or are pulled by an output device
//! through a tap ([`FileIngest`]); both feed the same
//! [`FeaturePipeline`](analysis::FeaturePipeline) and are read through the
//! [`AudioSource`] trait from the update loop.

pub mod analysis;
pub mod audio;
pub mod beat;
pub mod config;
pub mod error;
pub mod publish;
pub mod ring;
pub mod timeline;

pub use analysis::{
    analyse_reader, spectrum_gradient, AnalysisSummary, BeatMark, FeaturePipeline, LogBinMap,
    Rgba, SpectralEngine,
};
pub use audio::{
    AudioMode, AudioSource, CaptureBackend, CaptureWriter, FileIngest, FrameReader, LiveCapture,
    OutputSink, PlaybackTap, SampleBufferReader, StreamFormat, WavFrameReader,
};
pub use beat::{BeatDetector, BeatEvent, DEFAULT_BPM};
pub use config::{AnalysisConfig, AppConfig, PlaybackConfig};
pub use error::{Result, SpectraError};
pub use publish::{snapshot_channel, SnapshotReader, SnapshotWriter, SpectrumFrame};
pub use ring::{RingBuffer, WaveRings};
pub use timeline::PlaybackClock;
