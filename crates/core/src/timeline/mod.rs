use std::time::Duration;

/// Time constant of the pull towards the latency-compensated target.
const PULL_TIME_CONSTANT: f64 = 0.080;

/// Estimates which frame of a pulled stream is audible right now.
///
/// The output pipeline buffers roughly `latency` worth of audio, so the frame
/// being heard lags the frames handed to it. Each tick the estimate
/// dead-reckons forward at the sample rate while playing, is pulled towards
/// `produced - latency_frames`, and is finally clamped so it never claims to
/// show audio that has not been produced yet.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    sample_rate: f64,
    latency_frames: u64,
    position: f64,
    initialized: bool,
}

impl PlaybackClock {
    pub fn new(sample_rate: u32, latency: Duration) -> Self {
        let sample_rate = f64::from(sample_rate);
        Self {
            sample_rate,
            latency_frames: (sample_rate * latency.as_secs_f64()).round() as u64,
            position: 0.0,
            initialized: false,
        }
    }

    pub fn latency_frames(&self) -> u64 {
        self.latency_frames
    }

    /// Smoothed position in frames.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Frame expected to be audible once `produced` frames were handed out.
    pub fn target_frames(&self, produced: u64) -> u64 {
        produced.saturating_sub(self.latency_frames)
    }

    /// Advances the estimate by `dt` seconds and returns the rounded position.
    pub fn advance(&mut self, dt: f32, produced: u64, playing: bool) -> u64 {
        let target = self.target_frames(produced) as f64;
        let dt = if dt.is_finite() && dt > 0.0 {
            f64::from(dt)
        } else {
            0.0
        };

        if !self.initialized {
            self.initialized = true;
            self.position = target;
        } else {
            if playing {
                self.position += dt * self.sample_rate;
            }

            let pull = 1.0 - (-dt / PULL_TIME_CONSTANT).exp();
            self.position += (target - self.position) * pull;
            self.position = self.position.clamp(0.0, target);
        }

        self.position.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    const RATE: u32 = 48_000;

    fn clock() -> PlaybackClock {
        PlaybackClock::new(RATE, Duration::from_millis(90))
    }

    #[test]
    fn latency_is_rounded_to_frames() {
        assert_eq!(clock().latency_frames(), 4_320);
        assert_eq!(
            PlaybackClock::new(44_100, Duration::from_millis(90)).latency_frames(),
            3_969
        );
    }

    #[test]
    fn target_never_goes_negative() {
        let clock = clock();
        assert_eq!(clock.target_frames(0), 0);
        assert_eq!(clock.target_frames(4_000), 0);
        assert_eq!(clock.target_frames(5_000), 680);
    }

    #[test]
    fn first_tick_snaps_to_target() {
        let mut clock = clock();
        assert_eq!(clock.advance(0.016, 10_000, true), 10_000 - 4_320);
    }

    #[test]
    fn never_runs_ahead_of_target() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut clock = clock();
        let mut produced = 0_u64;

        for _ in 0..5_000 {
            if rng.gen_bool(0.7) {
                produced += rng.gen_range(0..4_096);
            }
            let dt = match rng.gen_range(0..10) {
                0 => 0.0,
                1 => -0.01,
                2 => f32::NAN,
                3 => rng.gen_range(0.1..1.0),
                _ => rng.gen_range(0.001..0.05),
            };
            let playing = rng.gen_bool(0.8);

            let rounded = clock.advance(dt, produced, playing);
            let target = clock.target_frames(produced);
            assert!(target <= produced.saturating_sub(clock.latency_frames()));
            assert!(clock.position() >= 0.0);
            assert!(clock.position() <= target as f64);
            assert!(rounded <= target);
        }
    }

    #[test]
    fn tracks_steady_production_smoothly() {
        let mut clock = clock();
        let dt = 1.0 / 60.0;
        let per_tick = (RATE as f32 * dt) as u64;
        let mut produced = 20_000;
        let mut last = clock.advance(dt, produced, true);

        for _ in 0..600 {
            produced += per_tick;
            let position = clock.advance(dt, produced, true);
            assert!(position >= last, "position went backwards");
            let target = clock.target_frames(produced);
            assert!(target - position <= per_tick);
            last = position;
        }
    }

    #[test]
    fn paused_clock_settles_on_target() {
        let mut clock = clock();
        clock.advance(0.016, 10_000, true);
        for _ in 0..200 {
            clock.advance(0.016, 30_000, false);
        }
        assert_eq!(clock.advance(0.016, 30_000, false), 30_000 - 4_320);
    }
}
