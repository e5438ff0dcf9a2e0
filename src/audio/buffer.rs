//! Rolling sample buffer backed by a circular write cursor

use super::CaptureError;

/// Fixed-length window over the most recent audio history.
///
/// Logically the buffer is shifted left by each chunk and the chunk lands in
/// the trailing slots. Physically only the write cursor moves, so `advance`
/// costs O(chunk) and consumers rebuild the time-ordered view from two
/// contiguous segments.
pub struct RollingBuffer {
    samples: Vec<i16>,
    write_pos: usize,
    total_written: u64,
}

impl RollingBuffer {
    /// Create a zero-filled buffer of `capacity` samples
    pub fn new(capacity: usize) -> Result<Self, CaptureError> {
        if capacity == 0 {
            return Err(CaptureError::ConfigurationError(
                "rolling buffer capacity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            samples: vec![0; capacity],
            write_pos: 0,
            total_written: 0,
        })
    }

    /// Number of samples held; constant for the buffer's lifetime
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples written since construction
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Drop the oldest `chunk.len()` samples and append `chunk` at the end
    pub fn advance(&mut self, chunk: &[i16]) -> Result<(), CaptureError> {
        let capacity = self.samples.len();
        if chunk.len() > capacity {
            return Err(CaptureError::ConfigurationError(format!(
                "chunk of {} samples exceeds rolling buffer of {}",
                chunk.len(),
                capacity
            )));
        }

        let first = chunk.len().min(capacity - self.write_pos);
        self.samples[self.write_pos..self.write_pos + first].copy_from_slice(&chunk[..first]);
        let rest = chunk.len() - first;
        self.samples[..rest].copy_from_slice(&chunk[first..]);

        self.write_pos = (self.write_pos + chunk.len()) % capacity;
        self.total_written += chunk.len() as u64;
        Ok(())
    }

    /// Time-ordered view as two segments: oldest part first, then newest
    pub fn as_slices(&self) -> (&[i16], &[i16]) {
        let (newer, older) = self.samples.split_at(self.write_pos);
        (older, newer)
    }

    /// Sample at logical position `index` (0 = oldest)
    pub fn get(&self, index: usize) -> Option<i16> {
        if index >= self.samples.len() {
            return None;
        }
        let idx = (self.write_pos + index) % self.samples.len();
        Some(self.samples[idx])
    }

    /// Copy the buffer out in time order
    pub fn to_vec(&self) -> Vec<i16> {
        let (older, newer) = self.as_slices();
        let mut out = Vec::with_capacity(self.samples.len());
        out.extend_from_slice(older);
        out.extend_from_slice(newer);
        out
    }

    /// Time-ordered copy with every sample multiplied by `gain`
    pub fn scaled(&self, gain: f32) -> Vec<f32> {
        let (older, newer) = self.as_slices();
        older
            .iter()
            .chain(newer.iter())
            .map(|&s| s as f32 * gain)
            .collect()
    }
}
