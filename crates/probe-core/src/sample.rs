//! Sample buffer types shared across the capture pipeline.

/// A single audio sample. Audio blocks carry 32-bit float samples end to end
/// (device → ring → analyzer), matching the data model's "32-bit float"
/// requirement for the audio block.
pub type Sample = f32;

/// A two-dimensional contiguous sample region shaped `(frames, channels)`.
///
/// Owned by the buffer pool (`probe-audio::pool`), loaned to the callback,
/// handed through the ring to the analyzer, and returned to the pool on
/// consume. Storage is a single flat `Vec<Sample>` in frame-major order:
/// `data[frame * channels + channel]`.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    data: Vec<Sample>,
    frames: usize,
    channels: usize,
}

impl AudioBlock {
    /// Allocate a zeroed block with the given shape.
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; frames * channels],
            frames,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.data
    }

    /// Resize in place to a new shape, reusing the allocation when it is
    /// already large enough. Called by the pool, never on the callback's
    /// allocation-free success path.
    pub fn resize(&mut self, frames: usize, channels: usize) {
        let len = frames * channels;
        if self.data.len() < len {
            self.data.resize(len, 0.0);
        }
        self.frames = frames;
        self.channels = channels;
    }

    /// Zero the active region without shrinking the allocation.
    pub fn clear(&mut self) {
        self.data[..self.frames * self.channels].fill(0.0);
    }

    /// Read one channel as a contiguous owned copy.
    pub fn channel(&self, ch: usize) -> Vec<Sample> {
        debug_assert!(ch < self.channels);
        (0..self.frames).map(|f| self.data[f * self.channels + ch]).collect()
    }

    /// Overwrite one channel's column from a slice of matching length.
    pub fn set_channel(&mut self, ch: usize, values: &[Sample]) {
        debug_assert!(ch < self.channels);
        debug_assert_eq!(values.len(), self.frames);
        for (f, &v) in values.iter().enumerate() {
            self.data[f * self.channels + ch] = v;
        }
    }

    /// Copy frame-interleaved samples from `src` into this block's active
    /// region, growing neither the block's declared shape nor its storage.
    pub fn copy_from_interleaved(&mut self, src: &[Sample]) {
        let len = (self.frames * self.channels).min(src.len());
        self.data[..len].copy_from_slice(&src[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_is_zeroed() {
        let b = AudioBlock::new(4, 2);
        assert!(b.as_slice().iter().all(|&s| s == 0.0));
        assert_eq!(b.frames(), 4);
        assert_eq!(b.channels(), 2);
    }

    #[test]
    fn channel_round_trip() {
        let mut b = AudioBlock::new(3, 2);
        b.set_channel(1, &[1.0, 2.0, 3.0]);
        assert_eq!(b.channel(1), vec![1.0, 2.0, 3.0]);
        assert_eq!(b.channel(0), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn resize_reuses_allocation_when_large_enough() {
        let mut b = AudioBlock::new(8, 2);
        let cap = b.as_slice().len();
        b.resize(4, 2);
        assert_eq!(b.as_slice().len().max(cap), cap);
        assert_eq!(b.frames(), 4);
    }
}
