//! MFCC feature frames and the append-only feature store
//!
//! A [`FeatureFrame`] is immutable once produced. A [`FeatureSequence`] only
//! ever grows; DTW consumers receive non-owning [`FeatureView`] slices so the
//! store can be shared under a read lock while a session keeps appending.

use serde::{Deserialize, Serialize};

/// Mono audio sample, float in [-1, 1]
pub type Sample = f32;

/// FNV-1a 64-bit offset basis
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// One extracted MFCC frame with its energy and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// MFCC coefficients, length = configured coefficient count
    pub coeffs: Vec<f32>,
    /// Log of the summed power spectrum
    pub energy: f32,
    /// Frame start time in seconds from session start
    pub timestamp: f64,
}

/// Append-only sequence of feature frames with a running fingerprint
#[derive(Debug, Clone)]
pub struct FeatureSequence {
    frames: Vec<FeatureFrame>,
    /// FNV-1a over every coefficient appended so far, in order
    fingerprint: u64,
}

impl Default for FeatureSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureSequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            fingerprint: FNV_OFFSET,
        }
    }

    /// Create an empty sequence with room for `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            fingerprint: FNV_OFFSET,
        }
    }

    /// Append a frame, folding its coefficients into the fingerprint
    pub fn push(&mut self, frame: FeatureFrame) {
        for &c in &frame.coeffs {
            self.fingerprint = fnv1a_fold(self.fingerprint, &c.to_le_bytes());
        }
        self.frames.push(frame);
    }

    /// Number of frames appended so far
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frames have been appended
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Borrow a frame by index
    pub fn frame(&self, index: usize) -> Option<&FeatureFrame> {
        self.frames.get(index)
    }

    /// All frames as a slice
    pub fn frames(&self) -> &[FeatureFrame] {
        &self.frames
    }

    /// Non-owning view over the whole sequence
    pub fn view(&self) -> FeatureView<'_> {
        FeatureView {
            frames: &self.frames,
        }
    }

    /// FNV-1a hash of the concatenated coefficients, for cache keying
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Consume the sequence, keeping the frames
    pub fn into_frames(self) -> Vec<FeatureFrame> {
        self.frames
    }
}

/// Fold bytes into a running FNV-1a hash
fn fnv1a_fold(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Compute the FNV-1a fingerprint of a finished frame list
///
/// Matches the running fingerprint a [`FeatureSequence`] maintains, so a
/// sequence rebuilt from disk hashes identically.
pub fn fingerprint_frames(frames: &[FeatureFrame]) -> u64 {
    let mut hash = FNV_OFFSET;
    for frame in frames {
        for &c in &frame.coeffs {
            hash = fnv1a_fold(hash, &c.to_le_bytes());
        }
    }
    hash
}

/// Borrowed, read-only view of a feature sequence
#[derive(Debug, Clone, Copy)]
pub struct FeatureView<'a> {
    frames: &'a [FeatureFrame],
}

impl<'a> FeatureView<'a> {
    /// View over a plain frame slice
    pub fn from_frames(frames: &'a [FeatureFrame]) -> Self {
        Self { frames }
    }

    /// Number of frames in view
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the view is empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Coefficients of frame `index`
    pub fn coeffs(&self, index: usize) -> &'a [f32] {
        &self.frames[index].coeffs
    }

    /// Energy of frame `index`
    pub fn energy(&self, index: usize) -> f32 {
        self.frames[index].energy
    }

    /// Underlying frames
    pub fn frames(&self) -> &'a [FeatureFrame] {
        self.frames
    }
}
