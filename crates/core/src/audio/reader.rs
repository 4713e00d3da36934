use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use super::StreamFormat;
use crate::{Result, SpectraError};

/// Decoded, interleaved float PCM pulled on demand by the playback tap.
pub trait FrameReader: Send {
    fn format(&self) -> StreamFormat;

    /// Fills `buf` with interleaved samples and returns how many were
    /// written, always a whole number of frames. Zero means end of stream.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize>;

    /// Frames read so far.
    fn position(&self) -> u64;

    /// Length of the stream in frames, when known.
    fn total_frames(&self) -> Option<u64>;
}

/// Reader over samples that are already in memory.
#[derive(Debug, Clone)]
pub struct SampleBufferReader {
    format: StreamFormat,
    samples: Vec<f32>,
    cursor: usize,
}

impl SampleBufferReader {
    /// `samples` are interleaved; a trailing partial frame is dropped.
    pub fn new(format: StreamFormat, mut samples: Vec<f32>) -> Self {
        let channels = usize::from(format.channels.max(1));
        samples.truncate(samples.len() - samples.len() % channels);
        Self {
            format,
            samples,
            cursor: 0,
        }
    }

    fn channels(&self) -> usize {
        usize::from(self.format.channels.max(1))
    }
}

impl FrameReader for SampleBufferReader {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        let channels = self.channels();
        let wanted = buf.len() - buf.len() % channels;
        let count = wanted.min(self.samples.len() - self.cursor);
        buf[..count].copy_from_slice(&self.samples[self.cursor..self.cursor + count]);
        self.cursor += count;
        Ok(count)
    }

    fn position(&self) -> u64 {
        (self.cursor / self.channels()) as u64
    }

    fn total_frames(&self) -> Option<u64> {
        Some((self.samples.len() / self.channels()) as u64)
    }
}

/// WAV decoder backed by `hound`. Integer formats are scaled to `[-1, 1)`.
pub struct WavFrameReader<R: Read> {
    reader: hound::WavReader<R>,
    format: StreamFormat,
    sample_format: hound::SampleFormat,
    int_scale: f32,
    position: u64,
    total: u64,
}

impl WavFrameReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path).map_err(|err| {
            SpectraError::unavailable(format!("cannot open {}: {err}", path.display()))
        })?;
        Self::from_hound(reader)
    }
}

impl<R: Read> WavFrameReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let reader = hound::WavReader::new(reader)
            .map_err(|err| SpectraError::unavailable(format!("cannot decode WAV stream: {err}")))?;
        Self::from_hound(reader)
    }

    fn from_hound(reader: hound::WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let format = StreamFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        };
        format.validate()?;

        let int_scale = match spec.sample_format {
            hound::SampleFormat::Int => 1.0 / (1_u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32,
            hound::SampleFormat::Float => 1.0,
        };

        Ok(Self {
            total: u64::from(reader.duration()),
            reader,
            format,
            sample_format: spec.sample_format,
            int_scale,
            position: 0,
        })
    }
}

impl<R: Read + Send> FrameReader for WavFrameReader<R> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
        let channels = usize::from(self.format.channels);
        let wanted = buf.len() - buf.len() % channels;
        let mut filled = 0;

        match self.sample_format {
            hound::SampleFormat::Float => {
                for (slot, sample) in buf[..wanted].iter_mut().zip(self.reader.samples::<f32>()) {
                    *slot = sample?;
                    filled += 1;
                }
            }
            hound::SampleFormat::Int => {
                let scale = self.int_scale;
                for (slot, sample) in buf[..wanted].iter_mut().zip(self.reader.samples::<i32>()) {
                    *slot = sample? as f32 * scale;
                    filled += 1;
                }
            }
        }

        let filled = filled - filled % channels;
        self.position += (filled / channels) as u64;
        Ok(filled)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }
}

impl<R: Read> std::fmt::Debug for WavFrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFrameReader")
            .field("format", &self.format)
            .field("position", &self.position)
            .field("total", &self.total)
            .finish()
    }
}
