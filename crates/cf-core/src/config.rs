//! Session and engine configuration
//!
//! All tunables the analysis pipeline exposes live here, with documented
//! defaults. Validation happens once at session/engine creation; invalid
//! combinations return [`EngineError::InvalidParams`] instead of being
//! silently clamped.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Default number of MFCC coefficients per frame
pub const DEFAULT_MFCC_COEFFS: usize = 13;
/// Default number of triangular mel filters
pub const DEFAULT_MEL_FILTERS: usize = 26;
/// Default minimum user frames before a score is trusted
pub const DEFAULT_MIN_FEATURE_FRAMES: usize = 10;

/// Per-session analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sample rate in Hz; fixed at creation, mono only
    pub sample_rate: u32,
    /// Analysis window length in samples; must be a power of two
    pub frame_size: usize,
    /// Stride between successive windows; must not exceed `frame_size`
    pub hop_size: usize,
    /// MFCC coefficients kept per frame
    pub mfcc_coeffs: usize,
    /// Triangular mel filters in the filterbank
    pub n_filters: usize,
    /// Lower mel filterbank edge in Hz
    pub mel_low_hz: f32,
    /// Upper mel filterbank edge in Hz; `None` means Nyquist
    pub mel_high_hz: Option<f32>,
    /// Minimum user frames before `readiness` can be true
    pub min_feature_frames: usize,
    /// Voice activity gating parameters
    pub vad: VadConfig,
    /// Ring buffer capacity in chunks of `frame_size` samples
    pub ring_chunks: usize,
    /// Upper bound on chunks drained per worker invocation
    pub max_drain_per_call: usize,
    /// Drain on the shared worker pool; disable for caller-pumped hosts
    /// (single-threaded embeddings) that call `drain_session` themselves
    pub auto_drain: bool,
    /// Enable the YIN pitch tracker
    pub enable_pitch: bool,
    /// Enable the harmonic/tonal-quality analyzer
    pub enable_harmonic: bool,
    /// Enable the cadence/tempo analyzer
    pub enable_cadence: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 512,
            hop_size: 256,
            mfcc_coeffs: DEFAULT_MFCC_COEFFS,
            n_filters: DEFAULT_MEL_FILTERS,
            mel_low_hz: 0.0,
            mel_high_hz: None,
            min_feature_frames: DEFAULT_MIN_FEATURE_FRAMES,
            vad: VadConfig::default(),
            ring_chunks: 128,
            max_drain_per_call: 32,
            auto_drain: true,
            enable_pitch: true,
            enable_harmonic: true,
            enable_cadence: true,
        }
    }
}

impl SessionConfig {
    /// Validate parameter constraints
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::invalid_params("sample rate must be positive"));
        }
        if self.frame_size == 0 || !self.frame_size.is_power_of_two() {
            return Err(EngineError::invalid_params(format!(
                "frame size {} is not a positive power of two",
                self.frame_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(EngineError::invalid_params(format!(
                "hop size {} must be in 1..={}",
                self.hop_size, self.frame_size
            )));
        }
        if self.mfcc_coeffs == 0 || self.mfcc_coeffs > self.n_filters {
            return Err(EngineError::invalid_params(format!(
                "mfcc coefficient count {} must be in 1..={}",
                self.mfcc_coeffs, self.n_filters
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if let Some(high) = self.mel_high_hz {
            if high <= self.mel_low_hz || high > nyquist {
                return Err(EngineError::invalid_params(format!(
                    "mel band {}..{} Hz invalid for Nyquist {} Hz",
                    self.mel_low_hz, high, nyquist
                )));
            }
        }
        if self.ring_chunks == 0 {
            return Err(EngineError::invalid_params("ring capacity must be positive"));
        }
        if self.max_drain_per_call == 0 {
            return Err(EngineError::invalid_params("max drain must be positive"));
        }
        Ok(())
    }

    /// Upper mel edge after resolving the Nyquist default
    pub fn mel_high(&self) -> f32 {
        self.mel_high_hz
            .unwrap_or(self.sample_rate as f32 / 2.0)
    }

    /// Duration of one hop in seconds
    pub fn hop_seconds(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }
}

/// Energy-gate voice activity detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Gate the pipeline at all; disabled forwards every frame
    pub enabled: bool,
    /// Mean-square energy threshold on mono float samples
    pub energy_threshold: f32,
    /// Sustained above-threshold time before a candidate becomes voiced
    pub min_voiced_ms: f32,
    /// Time below threshold before hangover collapses back to silence
    pub hangover_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 0.01,
            min_voiced_ms: 40.0,
            hangover_ms: 100.0,
        }
    }
}

/// Engine-wide resource limits and collaborator paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently live sessions
    pub max_sessions: usize,
    /// Master-cache record cap before LRU eviction
    pub cache_capacity: usize,
    /// Directory searched for `<call_id>.mfc` (and `<call_id>.wav` fallback)
    pub master_dir: std::path::PathBuf,
    /// Worker threads draining session rings; `None` = hardware threads capped at 8
    pub worker_threads: Option<usize>,
    /// Wall-clock cap on deferred finalize work in milliseconds
    pub finalize_cap_ms: u64,
    /// Samples per pooled transport buffer (ring slot granularity)
    pub pool_chunk_samples: usize,
    /// Buffers pre-allocated at engine creation
    pub pool_initial_buffers: usize,
    /// Hard cap on pool growth
    pub pool_max_buffers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            cache_capacity: 64,
            master_dir: std::path::PathBuf::from("."),
            worker_threads: None,
            finalize_cap_ms: 2_000,
            pool_chunk_samples: 512,
            pool_initial_buffers: 256,
            pool_max_buffers: 32_768,
        }
    }
}

impl EngineConfig {
    /// Validate engine-level constraints
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_sessions == 0 {
            return Err(EngineError::invalid_params("session cap must be positive"));
        }
        if self.cache_capacity == 0 {
            return Err(EngineError::invalid_params("cache capacity must be positive"));
        }
        if let Some(workers) = self.worker_threads {
            if workers == 0 {
                return Err(EngineError::invalid_params("worker count must be positive"));
            }
        }
        if self.pool_chunk_samples == 0 || self.pool_max_buffers == 0 {
            return Err(EngineError::invalid_params("pool dimensions must be positive"));
        }
        if self.pool_initial_buffers > self.pool_max_buffers {
            return Err(EngineError::invalid_params(format!(
                "initial pool size {} exceeds cap {}",
                self.pool_initial_buffers, self.pool_max_buffers
            )));
        }
        Ok(())
    }
}
