//! Real audio devices through `cpal`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use spectra_core::{
    CaptureBackend, CaptureWriter, OutputSink, PlaybackTap, Result, SpectraError, StreamFormat,
};

fn stream_error(err: cpal::StreamError) {
    tracing::warn!(%err, "audio stream error");
}

/// Default input device, e.g. a PulseAudio monitor source for system audio.
#[derive(Default)]
pub struct CpalCapture {
    device: Option<cpal::Device>,
    config: Option<cpal::SupportedStreamConfig>,
    stream: Option<cpal::Stream>,
}

impl CaptureBackend for CpalCapture {
    fn open(&mut self) -> Result<StreamFormat> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| SpectraError::unavailable("no audio input device found"))?;
        let config = device
            .default_input_config()
            .map_err(|err| SpectraError::unavailable(format!("no supported input config: {err}")))?;

        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!(device = %name, sample_rate = config.sample_rate().0, "opened input device");

        let format = StreamFormat {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        };
        self.device = Some(device);
        self.config = Some(config);
        Ok(format)
    }

    fn start(&mut self, mut writer: CaptureWriter) -> Result<()> {
        let (Some(device), Some(config)) = (self.device.as_ref(), self.config.as_ref()) else {
            return Err(SpectraError::unavailable("input device was not opened"));
        };

        let stream_config: cpal::StreamConfig = config.clone().into();
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| writer.push_f32(data),
                stream_error,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| writer.push_i16(data),
                stream_error,
                None,
            ),
            other => {
                return Err(SpectraError::unavailable(format!(
                    "unsupported input sample format {other:?}"
                )))
            }
        }
        .map_err(|err| SpectraError::unavailable(format!("failed to build input stream: {err}")))?;

        stream
            .play()
            .map_err(|err| SpectraError::unavailable(format!("failed to start capture: {err}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "pausing input stream failed");
            }
        }
    }
}

/// Default output device pulling float PCM through the playback tap.
#[derive(Default)]
pub struct CpalOutput {
    stream: Option<cpal::Stream>,
}

impl OutputSink for CpalOutput {
    fn start(&mut self, mut tap: PlaybackTap) -> Result<()> {
        self.stop();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SpectraError::unavailable("no audio output device found"))?;

        let format = tap.format();
        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let written = tap.read(data);
                    data[written..].fill(0.0);
                },
                stream_error,
                None,
            )
            .map_err(|err| SpectraError::unavailable(format!("failed to build output stream: {err}")))?;

        if let Err(err) = stream.pause() {
            tracing::debug!(%err, "output stream cannot start paused");
        }
        self.stream = Some(stream);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.pause() {
                tracing::warn!(%err, "failed to pause output");
            }
        }
    }

    fn resume(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.play() {
                tracing::warn!(%err, "failed to resume output");
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "pausing output stream failed");
            }
        }
    }
}
