//! Device stand-ins used when the binary is built without `cpal`.

use std::{
    f32::consts::TAU,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use spectra_core::{CaptureBackend, CaptureWriter, OutputSink, PlaybackTap, Result, StreamFormat};

const SAMPLE_RATE: u32 = 48_000;
const CHUNK: Duration = Duration::from_millis(10);
const KICK_PERIOD_SECONDS: f32 = 0.5;
const KICK_SECONDS: f32 = 0.08;

/// Capture backend that synthesises a chord over a 120 BPM kick on its own
/// thread, calling the writer the way a driver callback would.
#[derive(Debug, Default)]
pub struct SignalGenerator {
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl CaptureBackend for SignalGenerator {
    fn open(&mut self) -> Result<StreamFormat> {
        Ok(StreamFormat {
            sample_rate: SAMPLE_RATE,
            channels: 2,
        })
    }

    fn start(&mut self, mut writer: CaptureWriter) -> Result<()> {
        self.stop();

        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let handle = thread::spawn(move || {
            let frames = (SAMPLE_RATE as f32 * CHUNK.as_secs_f32()) as usize;
            let mut chunk = vec![0.0_f32; frames * 2];
            let mut frame_index = 0_u64;
            let started = Instant::now();

            while flag.load(Ordering::Acquire) {
                for slot in chunk.chunks_exact_mut(2) {
                    let t = frame_index as f32 / SAMPLE_RATE as f32;
                    let (left, right) = synth(t);
                    slot[0] = left;
                    slot[1] = right;
                    frame_index += 1;
                }
                writer.push_f32(&chunk);

                let due = CHUNK.mul_f64(frame_index as f64 / frames as f64);
                if let Some(wait) = due.checked_sub(started.elapsed()) {
                    thread::sleep(wait);
                }
            }
        });

        self.running = Some((alive, handle));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((alive, handle)) = self.running.take() {
            alive.store(false, Ordering::Release);
            if handle.join().is_err() {
                tracing::warn!("signal generator thread panicked");
            }
        }
    }
}

/// One stereo frame at time `t`: a quiet A-major chord panned apart and a
/// decaying 55 Hz kick every half second.
fn synth(t: f32) -> (f32, f32) {
    let chord = [220.0_f32, 277.18, 329.63].map(|freq| (TAU * freq * t).sin());

    let phase = t % KICK_PERIOD_SECONDS;
    let kick = if phase < KICK_SECONDS {
        (TAU * 55.0 * phase).sin() * (1.0 - phase / KICK_SECONDS)
    } else {
        0.0
    };

    let left = 0.12 * (chord[0] + 0.5 * chord[1]) + 0.6 * kick;
    let right = 0.12 * (chord[2] + 0.5 * chord[1]) + 0.6 * kick;
    (left, right)
}

/// Output sink that pulls from the tap in real time on its own thread and
/// keeps `latency` worth of audio queued ahead of the virtual speaker.
#[derive(Debug)]
pub struct PacedOutput {
    latency: Duration,
    paused: Arc<AtomicBool>,
    running: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl PacedOutput {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            paused: Arc::new(AtomicBool::new(true)),
            running: None,
        }
    }
}

impl OutputSink for PacedOutput {
    fn start(&mut self, mut tap: PlaybackTap) -> Result<()> {
        self.stop();
        self.paused.store(true, Ordering::Release);

        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let paused = self.paused.clone();
        let latency = self.latency;

        let handle = thread::spawn(move || {
            let format = tap.format();
            let channels = usize::from(format.channels);
            let rate = f64::from(format.sample_rate);
            let queued_frames = (latency.as_secs_f64() * rate).round() as u64;
            let mut block = vec![0.0_f32; 512 * channels];
            let mut played = 0.0_f64;
            let mut last = Instant::now();

            while flag.load(Ordering::Acquire) {
                thread::sleep(CHUNK / 2);
                let now = Instant::now();
                let dt = (now - last).as_secs_f64();
                last = now;
                if paused.load(Ordering::Acquire) {
                    continue;
                }

                played += dt * rate;
                let wanted = played as u64 + queued_frames;
                while tap.frames_produced() < wanted {
                    if tap.read(&mut block) == 0 {
                        tap.output_stopped();
                        return;
                    }
                }
            }
        });

        self.running = Some((alive, handle));
        Ok(())
    }

    fn pause(&mut self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        self.paused.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        if let Some((alive, handle)) = self.running.take() {
            alive.store(false, Ordering::Release);
            if handle.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

impl Drop for PacedOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Drop for SignalGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
