//! cf-dsp: DSP kernels for the CallForge analysis pipeline
//!
//! - MFCC extraction (pre-emphasis, Hamming window, real FFT, mel
//!   filterbank, DCT-II) with all scratch preallocated
//! - Energy-gate voice activity detection
//! - Visualization helpers: level metering, waveform overview, spectrogram
//!
//! Frame-rate code here never allocates after construction; that property
//! is pinned by `tests/alloc_discipline.rs`.

pub mod mel;
pub mod mfcc;
pub mod vad;
pub mod viz;
pub mod window;

pub use mel::MelFilterbank;
pub use mfcc::MfccExtractor;
pub use vad::{VadState, VoiceGate};
