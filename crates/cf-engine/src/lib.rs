//! cf-engine: Session-based audio similarity engine
//!
//! The caller-facing crate of the CallForge core. An [`Engine`] owns
//! sessions, the master-call cache, the transport buffer pool, and the
//! worker pool; each session streams mono audio through VAD gating, MFCC
//! extraction, and the enhanced analyzers, then scores itself against a
//! shared, immutable master record.
//!
//! ```rust,ignore
//! use cf_engine::Engine;
//!
//! let engine = Engine::new();
//! let session = engine.create_session(44_100, 512, 256, 13)?;
//! engine.load_master_call(session, "elk_bugle")?;
//! engine.process_chunk(session, &samples)?;
//! let report = engine.finalize(session)?;
//! println!("similarity: {:.2}", report.overall);
//! ```

mod cache;
mod chain;
mod engine;
mod framer;
mod session;
mod workers;

pub use chain::{AnalysisChain, ChainStats, extract_master_record};
pub use engine::Engine;
pub use framer::Framer;
pub use session::{SessionId, SessionState, SessionStats};

// The report and configuration types callers need alongside the engine.
pub use cf_core::{
    ComponentScores, EngineConfig, EngineError, EngineResult, EnhancedProfile, FeatureFrame,
    MasterFeatureRecord, SessionConfig, SimilarityReport, VadConfig,
};
// Read-back types surfaced by the engine's query methods.
pub use cf_analyze::PitchReading;
pub use cf_dsp::viz::{LevelSnapshot, WaveformBucket};
