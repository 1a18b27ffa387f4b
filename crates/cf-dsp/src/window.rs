//! Analysis window functions
//!
//! Windows are precomputed once at session creation and applied by
//! element-wise multiply on the hot path.

/// Precomputed Hamming window of length `size`
pub fn hamming(size: usize) -> Vec<f32> {
    let denom = (size.saturating_sub(1)).max(1) as f32;
    (0..size)
        .map(|n| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * n as f32 / denom).cos())
        .collect()
}

/// Precomputed Hann window of length `size`
pub fn hann(size: usize) -> Vec<f32> {
    let denom = (size.saturating_sub(1)).max(1) as f32;
    (0..size)
        .map(|n| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / denom).cos()))
        .collect()
}
