//! cf-core: Shared types for the CallForge analysis core
//!
//! Foundational types used across the workspace: the sample alias, session
//! and engine configuration, the unified error taxonomy, feature frames and
//! the append-only feature store, master-call records, and similarity
//! reports.

mod config;
mod error;
mod feature;
mod master;
mod report;

pub use config::*;
pub use error::*;
pub use feature::*;
pub use master::*;
pub use report::*;

/// Reject chunks containing non-finite samples
///
/// Callers must downmix to mono and normalize to [-1, 1] before submitting;
/// the core only gates on NaN/Inf, which would poison every downstream
/// accumulator.
pub fn validate_samples(samples: &[Sample]) -> EngineResult<()> {
    for (i, &s) in samples.iter().enumerate() {
        if !s.is_finite() {
            return Err(EngineError::invalid_audio(format!(
                "non-finite sample at index {i}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_finite_samples() {
        assert!(validate_samples(&[0.0, 0.5, -1.0, 1.0]).is_ok());
        assert!(validate_samples(&[]).is_ok());
    }

    #[test]
    fn rejects_nan_and_inf() {
        assert!(matches!(
            validate_samples(&[0.0, f32::NAN]),
            Err(EngineError::InvalidAudio { .. })
        ));
        assert!(validate_samples(&[f32::INFINITY]).is_err());
        assert!(validate_samples(&[f32::NEG_INFINITY]).is_err());
    }
}
