//! Similarity reports
//!
//! The stable, caller-facing result of a scoring pass. A report is always
//! well-formed: every score lives in [0, 1] and `overall` is zero whenever
//! `readiness` is false or no component carried confidence.

use serde::{Deserialize, Serialize};

/// Per-dimension similarity breakdown, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    /// DTW alignment of MFCC sequences
    pub mfcc_dtw: f32,
    /// Median-F0 agreement in cents
    pub pitch: f32,
    /// Tonal-quality vector cosine
    pub harmonic: f32,
    /// Tempo agreement
    pub cadence: f32,
    /// Energy envelope agreement along the alignment path
    pub energy: f32,
}

/// One step of the DTW alignment path: (user frame, master frame)
pub type AlignmentStep = (u32, u32);

/// Result of scoring a session against its master call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    /// Blended score in [0, 1]; zero unless `readiness`
    pub overall: f32,
    /// Per-dimension breakdown
    pub components: ComponentScores,
    /// Blended analyzer confidence in [0, 1]
    pub confidence: f32,
    /// Bounded DTW alignment path, when one was traced
    pub alignment_path: Option<Vec<AlignmentStep>>,
    /// Whether enough user data was processed to trust the score
    pub readiness: bool,
}

impl SimilarityReport {
    /// A well-formed "not enough data yet" report
    pub fn not_ready() -> Self {
        Self::default()
    }
}
