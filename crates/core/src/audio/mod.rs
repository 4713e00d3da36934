//! Audio source adapters.
//!
//! Both variants share the [`FeaturePipeline`](crate::analysis::FeaturePipeline)
//! and expose the same [`AudioSource`] surface to the update loop. They only
//! differ in how samples arrive:
//!
//! * [`LiveCapture`] is pushed to by a capture driver callback.
//! * [`FileIngest`] taps the samples an output device pulls from a
//!   [`FrameReader`] and keeps the visuals aligned with what is audible
//!   through a [`PlaybackClock`](crate::PlaybackClock).

mod file;
mod live;
mod reader;

use crate::{beat::BeatEvent, Result, SpectraError};

pub use file::{FileIngest, OutputSink, PlaybackTap};
pub use live::{CaptureBackend, CaptureWriter, LiveCapture};
pub use reader::{FrameReader, SampleBufferReader, WavFrameReader};

/// Mode enum describes how the audio subsystem receives samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// Push-driven capture of the system output or an input device.
    Live,
    /// Pull-driven playback of a decoded file.
    File,
}

/// Shape of an interleaved PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(SpectraError::invalid_config(format!(
                "stream format needs a sample rate and at least one channel, got {} Hz x {}",
                self.sample_rate, self.channels
            )));
        }
        Ok(())
    }
}

/// One interleaved frame reduced to the signals the engine stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Downmix {
    pub mono: f32,
    pub left: f32,
    pub right: f32,
}

/// Reduces an interleaved frame to left, right and mono. Mono input is
/// duplicated; channels beyond the second are blended into the centre.
pub fn downmix(frame: &[f32]) -> Downmix {
    let (mut left, mut right) = match frame {
        [] => (0.0, 0.0),
        [mono] => (*mono, *mono),
        [left, right, ..] => (*left, *right),
    };

    if frame.len() > 2 {
        let extra = frame[2..].iter().sum::<f32>() / (frame.len() - 2) as f32;
        let mid = ((left + right) * 0.5 + extra) * 0.5;
        left = (left + mid) * 0.5;
        right = (right + mid) * 0.5;
    }

    Downmix {
        mono: (left + right) * 0.5,
        left,
        right,
    }
}

/// Capability set shared by both source variants, as seen from the
/// consumer (render/update) context.
pub trait AudioSource {
    fn mode(&self) -> AudioMode;

    /// Starts delivering audio. Fails with
    /// [`SpectraError::SourceUnavailable`] when the device or decoder cannot
    /// be opened.
    fn start(&mut self) -> Result<()>;

    /// Stops delivery. Safe while a producer callback is in flight.
    fn stop(&mut self);

    /// Per-tick housekeeping; `dt` is in seconds.
    fn update(&mut self, dt: f32);

    fn copy_bars(&self, dest: &mut [f32]) -> Result<()>;

    fn copy_waveform(&self, dest: &mut [f32]) -> Result<()>;

    fn copy_stereo(&self, left: &mut [f32], right: &mut [f32]) -> Result<()>;

    /// Next queued beat, if any. Never blocks.
    fn try_dequeue_beat(&self) -> Option<BeatEvent>;

    fn bpm_smoothed(&self) -> f32;
}
