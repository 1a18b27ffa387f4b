//! cf-sim: Similarity engine
//!
//! DTW alignment of MFCC sequences (banded, with a free-ends subsequence
//! variant for short user takes), component scores for pitch, harmonic,
//! cadence, and energy evidence, and the confidence-weighted blend that
//! produces a [`cf_core::SimilarityReport`].

pub mod dtw;
pub mod fusion;

pub use dtw::{DtwAlignment, DtwConfig, DtwEngine};
pub use fusion::{BlendWeights, FusionConfig, Scorer, UserEvidence};
