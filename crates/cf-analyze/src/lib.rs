//! cf-analyze: Enhanced per-session analyzers
//!
//! Optional analyzers that run alongside MFCC extraction and feed the
//! similarity fusion:
//!
//! - **Pitch** (YIN): per-frame F0 with confidence and a vibrato flag
//! - **Harmonic**: spectral centroid/spread and a tonal-quality vector
//! - **Cadence**: spectral-flux onsets and a dominant tempo
//!
//! Analyzers never fail the pipeline: on audio they cannot interpret they
//! report zero confidence instead of an error. Each exports a compact
//! *profile*; raw per-frame sequences stay available to callers but the
//! fusion only consumes profiles.

pub mod cadence;
pub mod harmonic;
pub mod pitch;

pub use cadence::{CadenceAnalyzer, CadenceConfig, CadenceProfile};
pub use harmonic::{HarmonicAnalyzer, HarmonicConfig, HarmonicProfile};
pub use pitch::{PitchConfig, PitchProfile, PitchReading, PitchTracker};

use cf_core::Sample;

/// Analyzer that consumes the same framed audio as the MFCC extractor
pub trait FrameAnalyzer {
    /// Observe one `frame_size` window starting at `timestamp` seconds
    fn process_frame(&mut self, frame: &[Sample], timestamp: f64);

    /// Drop accumulated state
    fn reset(&mut self);
}

/// Analyzer that can collapse its accumulated state into a profile
pub trait Finalizable {
    /// Profile type handed to the similarity fusion
    type Profile;

    /// Summarize everything observed so far; leaves state intact so a
    /// streaming session can snapshot repeatedly
    fn profile(&self) -> Self::Profile;
}
