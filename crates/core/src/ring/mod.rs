//! Fixed-capacity circular sample stores.
//!
//! [`RingBuffer`] keeps the last `capacity` values in push order and also
//! counts how many values were ever written, which lets callers address its
//! contents by absolute position (frame number since the last reset) as well
//! as by "most recent N".

use crate::{Result, SpectraError};

/// Fixed-capacity circular store of time-ordered samples.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    cursor: usize,
    written: u64,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates a ring holding `capacity` values, all initialised to
    /// `T::default()`. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity.max(1)],
            cursor: 0,
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Index the next push writes to. Always within `[0, capacity)`.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total number of values pushed since creation or the last clear.
    pub fn written(&self) -> u64 {
        self.written
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.data[self.cursor] = value;
        self.cursor += 1;
        if self.cursor == self.data.len() {
            self.cursor = 0;
        }
        self.written += 1;
    }

    /// Copies the whole ring into `dest` oldest first. `dest` must be exactly
    /// `capacity` long.
    pub fn copy_ordered(&self, dest: &mut [T]) -> Result<()> {
        SpectraError::check_len("ring", self.data.len(), dest.len())?;
        let (newer, older) = self.data.split_at(self.cursor);
        dest[..older.len()].copy_from_slice(older);
        dest[older.len()..].copy_from_slice(newer);
        Ok(())
    }

    /// Absolute position of the oldest value still held, or `None` when
    /// nothing has been written yet.
    pub fn oldest(&self) -> Option<u64> {
        (self.written > 0).then(|| self.written.saturating_sub(self.data.len() as u64))
    }

    /// Absolute position of the newest value, or `None` when empty.
    pub fn newest(&self) -> Option<u64> {
        self.written.checked_sub(1)
    }

    /// Reads the value at absolute position `position`, clamped into the
    /// `[oldest, newest]` range still held by the ring. Before anything has
    /// been written this yields `T::default()`.
    pub fn at_clamped(&self, position: i64) -> T {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) => {
                let position = position.clamp(oldest as i64, newest as i64) as u64;
                self.data[(position % self.data.len() as u64) as usize]
            }
            _ => T::default(),
        }
    }

    /// Fills `dest` with the values at absolute positions
    /// `[end - dest.len(), end)`, clamping out-of-range positions to the
    /// nearest value still held.
    pub fn copy_window(&self, end: i64, dest: &mut [T]) {
        let start = end - dest.len() as i64;
        for (offset, slot) in dest.iter_mut().enumerate() {
            *slot = self.at_clamped(start + offset as i64);
        }
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|value| *value = T::default());
        self.cursor = 0;
        self.written = 0;
    }
}

/// Mono waveform plus stereo left/right rings, always written together so the
/// three stay aligned frame for frame.
#[derive(Debug, Clone)]
pub struct WaveRings {
    mono: RingBuffer<f32>,
    left: RingBuffer<f32>,
    right: RingBuffer<f32>,
}

impl WaveRings {
    pub fn new(capacity: usize) -> Self {
        Self {
            mono: RingBuffer::new(capacity),
            left: RingBuffer::new(capacity),
            right: RingBuffer::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mono.capacity()
    }

    pub fn written(&self) -> u64 {
        self.mono.written()
    }

    #[inline]
    pub fn push_frame(&mut self, mono: f32, left: f32, right: f32) {
        self.mono.push(mono);
        self.left.push(left);
        self.right.push(right);
    }

    /// Latest `capacity` mono samples in chronological order.
    pub fn copy_waveform(&self, dest: &mut [f32]) -> Result<()> {
        SpectraError::check_len("waveform", self.capacity(), dest.len())?;
        self.mono.copy_ordered(dest)
    }

    /// Latest `capacity` left/right samples in chronological order.
    pub fn copy_stereo(&self, left: &mut [f32], right: &mut [f32]) -> Result<()> {
        SpectraError::check_len("left", self.capacity(), left.len())?;
        SpectraError::check_len("right", self.capacity(), right.len())?;
        self.left.copy_ordered(left)?;
        self.right.copy_ordered(right)
    }

    /// Mono samples for the frames ending (exclusively) at absolute frame `end`.
    pub fn copy_waveform_ending_at(&self, end: i64, dest: &mut [f32]) {
        self.mono.copy_window(end, dest);
    }

    /// Stereo samples for the frames ending (exclusively) at absolute frame `end`.
    pub fn copy_stereo_ending_at(&self, end: i64, left: &mut [f32], right: &mut [f32]) {
        self.left.copy_window(end, left);
        self.right.copy_window(end, right);
    }

    pub fn clear(&mut self) {
        self.mono.clear();
        self.left.clear();
        self.right.clear();
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn copy_ordered_returns_last_capacity_values() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let capacity = rng.gen_range(1..64);
            let pushes = rng.gen_range(capacity..capacity * 5);
            let mut ring = RingBuffer::new(capacity);
            let values: Vec<u32> = (0..pushes as u32).collect();
            for value in &values {
                ring.push(*value);
            }

            let mut dest = vec![0; capacity];
            ring.copy_ordered(&mut dest).unwrap();
            assert_eq!(dest, values[pushes - capacity..]);
            assert!(ring.cursor() < capacity);
        }
    }

    #[test]
    fn copy_ordered_before_fill_starts_with_defaults() {
        let mut ring = RingBuffer::new(4);
        ring.push(1.0_f32);
        ring.push(2.0);

        let mut dest = [9.0; 4];
        ring.copy_ordered(&mut dest).unwrap();
        assert_eq!(dest, [0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn copy_ordered_rejects_wrong_length() {
        let ring = RingBuffer::<f32>::new(4);
        let mut dest = [0.0; 3];
        assert!(matches!(
            ring.copy_ordered(&mut dest),
            Err(SpectraError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn window_clamps_to_held_range() {
        let mut ring = RingBuffer::new(4);
        for value in 1..=6 {
            ring.push(value as f32);
        }
        // Holds absolute frames 2..=5 with values 3..=6.
        assert_eq!(ring.oldest(), Some(2));
        assert_eq!(ring.newest(), Some(5));

        let mut dest = [0.0; 6];
        ring.copy_window(4, &mut dest);
        assert_eq!(dest, [3.0, 3.0, 3.0, 3.0, 3.0, 4.0]);

        ring.copy_window(9, &mut dest);
        assert_eq!(dest, [4.0, 5.0, 6.0, 6.0, 6.0, 6.0]);
    }

    #[test]
    fn window_on_empty_ring_is_silent() {
        let ring = RingBuffer::<f32>::new(8);
        let mut dest = [1.0; 4];
        ring.copy_window(100, &mut dest);
        assert_eq!(dest, [0.0; 4]);
    }

    #[test]
    fn wave_rings_stay_aligned() {
        let mut rings = WaveRings::new(3);
        for i in 0..5 {
            let i = i as f32;
            rings.push_frame(i, i * 10.0, i * 100.0);
        }

        let mut mono = [0.0; 3];
        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        rings.copy_waveform(&mut mono).unwrap();
        rings.copy_stereo(&mut left, &mut right).unwrap();
        assert_eq!(mono, [2.0, 3.0, 4.0]);
        assert_eq!(left, [20.0, 30.0, 40.0]);
        assert_eq!(right, [200.0, 300.0, 400.0]);

        rings.clear();
        assert_eq!(rings.written(), 0);
    }
}
