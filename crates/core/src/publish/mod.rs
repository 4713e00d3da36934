//! Double-buffered publication of spectrum frames.
//!
//! The producer fills the back frame it owns and publishes it by swapping it
//! with the shared front frame under a lock held only for the swap. Readers
//! copy the front frame out; they never see a frame that is still being
//! written.

use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{beat::DEFAULT_BPM, Result, SpectraError};

/// One spectral evaluation ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    /// Normalised bar heights in `[0, 1]`.
    pub bars: Vec<f32>,
    /// Dominant-frequency position in `[0, 1]`.
    pub dominant: f32,
    pub bpm: f32,
    published_at: Option<Instant>,
}

impl SpectrumFrame {
    pub fn silent(bars_count: usize) -> Self {
        Self {
            bars: vec![0.0; bars_count],
            dominant: 0.0,
            bpm: DEFAULT_BPM,
            published_at: None,
        }
    }

    pub fn published_at(&self) -> Option<Instant> {
        self.published_at
    }
}

#[derive(Debug)]
struct Shared {
    front: Mutex<SpectrumFrame>,
    stale_after: Duration,
}

/// Producer half. Owned by the producer context.
#[derive(Debug)]
pub struct SnapshotWriter {
    back: SpectrumFrame,
    shared: Arc<Shared>,
}

/// Consumer half. Cheap to clone; every copy observes the same front frame.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    shared: Arc<Shared>,
}

/// Creates a connected writer/reader pair for frames of `bars_count` bars.
/// Frames older than `stale_after` read back as silence.
pub fn snapshot_channel(bars_count: usize, stale_after: Duration) -> (SnapshotWriter, SnapshotReader) {
    let shared = Arc::new(Shared {
        front: Mutex::new(SpectrumFrame::silent(bars_count)),
        stale_after,
    });
    (
        SnapshotWriter {
            back: SpectrumFrame::silent(bars_count),
            shared: shared.clone(),
        },
        SnapshotReader { shared },
    )
}

impl SnapshotWriter {
    /// The frame being prepared. Its contents are whatever was published two
    /// swaps ago and should be overwritten completely.
    pub fn back_mut(&mut self) -> &mut SpectrumFrame {
        &mut self.back
    }

    /// Makes the back frame visible to readers.
    pub fn publish(&mut self) {
        self.back.published_at = Some(Instant::now());
        // A reader that panicked mid-copy must not stall the audio thread.
        let mut front = self
            .shared
            .front
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        mem::swap(&mut *front, &mut self.back);
    }
}

impl SnapshotReader {
    pub fn bars_count(&self) -> usize {
        self.lock().map(|front| front.bars.len()).unwrap_or(0)
    }

    /// Copies the published bars into `dest`, or zeroes `dest` when nothing
    /// fresh has been published.
    pub fn copy_bars(&self, dest: &mut [f32]) -> Result<()> {
        let front = self.lock()?;
        SpectraError::check_len("bars", front.bars.len(), dest.len())?;
        if self.is_fresh(front.published_at) {
            dest.copy_from_slice(&front.bars);
        } else {
            dest.fill(0.0);
        }
        Ok(())
    }

    /// Full copy of the current front frame.
    pub fn snapshot(&self) -> Result<SpectrumFrame> {
        Ok(self.lock()?.clone())
    }

    pub fn bpm(&self) -> f32 {
        self.lock().map(|front| front.bpm).unwrap_or(DEFAULT_BPM)
    }

    pub fn last_published(&self) -> Option<Instant> {
        self.lock().ok().and_then(|front| front.published_at)
    }

    /// True when no frame has been published within the staleness window.
    pub fn is_stale(&self) -> bool {
        !self.is_fresh(self.last_published())
    }

    /// Returns the front frame to silence and the default BPM.
    pub fn reset(&self) {
        if let Ok(mut front) = self.lock() {
            let bars_count = front.bars.len();
            *front = SpectrumFrame::silent(bars_count);
        }
    }

    fn is_fresh(&self, published_at: Option<Instant>) -> bool {
        published_at
            .map(|at| at.elapsed() <= self.shared.stale_after)
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SpectrumFrame>> {
        self.shared
            .front
            .lock()
            .map_err(|_| SpectraError::msg("spectrum snapshot has been poisoned"))
    }
}
