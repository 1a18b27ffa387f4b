//! Master-call feature records
//!
//! A [`MasterFeatureRecord`] is the analyzed reference a user recording is
//! scored against. Records are immutable after load and shared by reference
//! (`Arc`) across sessions; the cache never mutates a published record.

use serde::{Deserialize, Serialize};

use crate::feature::{FeatureFrame, FeatureView, fingerprint_frames};

/// Current `.mfc` schema version
pub const MFC_VERSION: u16 = 2;

/// Extractor parameters a feature record was produced with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorParams {
    /// Sample rate the features were extracted at
    pub sample_rate: u32,
    /// Analysis window length in samples
    pub frame_size: u32,
    /// Stride between windows in samples
    pub hop_size: u32,
    /// MFCC coefficients per frame
    pub mfcc_coeffs: u32,
    /// Mel filters in the filterbank
    pub n_filters: u32,
}

/// Enhanced-analyzer summary persisted alongside the MFCC frames
///
/// Field order mirrors the on-disk enhanced profile block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancedProfile {
    /// Median F0 of voiced frames in Hz
    pub pitch_median_hz: f32,
    /// Pitch track confidence in [0, 1]
    pub pitch_conf: f32,
    /// Mean spectral centroid in Hz
    pub centroid_hz: f32,
    /// Mean spectral spread in Hz
    pub spread_hz: f32,
    /// High-frequency noise ratio in [0, 1]
    pub rasp: f32,
    /// Centroid normalized by Nyquist, in [0, 1]
    pub brightness: f32,
    /// Harmonic peak / inter-harmonic valley ratio, mapped to [0, 1]
    pub resonance: f32,
    /// Pairwise beating estimate, in [0, 1]
    pub roughness: f32,
    /// Dominant tempo in BPM
    pub tempo_bpm: f32,
    /// Tempo periodicity confidence in [0, 1]
    pub tempo_conf: f32,
}

/// Analyzed reference recording, immutable after load
#[derive(Debug, Clone)]
pub struct MasterFeatureRecord {
    /// Caller-facing identifier for the reference call
    pub call_id: String,
    /// Parameters the features were extracted with
    pub params: ExtractorParams,
    /// MFCC frames of the reference
    pub frames: Vec<FeatureFrame>,
    /// FNV-1a fingerprint of the concatenated coefficients
    pub fingerprint: u64,
    /// Schema version of the record's container
    pub version: u16,
    /// Optional pitch/harmonic/cadence summary; absent in old caches
    pub enhanced: Option<EnhancedProfile>,
}

impl MasterFeatureRecord {
    /// Build a record from freshly extracted frames, computing the fingerprint
    pub fn from_frames(
        call_id: impl Into<String>,
        params: ExtractorParams,
        frames: Vec<FeatureFrame>,
        enhanced: Option<EnhancedProfile>,
    ) -> Self {
        let fingerprint = fingerprint_frames(&frames);
        Self {
            call_id: call_id.into(),
            params,
            frames,
            fingerprint,
            version: MFC_VERSION,
            enhanced,
        }
    }

    /// Non-owning view of the reference frames for alignment
    pub fn view(&self) -> FeatureView<'_> {
        FeatureView::from_frames(&self.frames)
    }

    /// Whether the record's extraction parameters match a session's
    pub fn params_match(&self, other: &ExtractorParams) -> bool {
        self.params == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExtractorParams {
        ExtractorParams {
            sample_rate: 44_100,
            frame_size: 512,
            hop_size: 256,
            mfcc_coeffs: 13,
            n_filters: 26,
        }
    }

    fn frames() -> Vec<FeatureFrame> {
        vec![FeatureFrame {
            coeffs: vec![1.0; 13],
            energy: -2.0,
            timestamp: 0.0,
        }]
    }

    #[test]
    fn from_frames_fingerprints() {
        let record = MasterFeatureRecord::from_frames("elk_bugle", params(), frames(), None);
        assert_eq!(record.fingerprint, fingerprint_frames(&record.frames));
        assert_eq!(record.version, MFC_VERSION);
    }

    #[test]
    fn params_match_is_exact() {
        let record = MasterFeatureRecord::from_frames("elk_bugle", params(), frames(), None);
        assert!(record.params_match(&params()));

        let other = ExtractorParams {
            hop_size: 128,
            ..params()
        };
        assert!(!record.params_match(&other));
    }
}
