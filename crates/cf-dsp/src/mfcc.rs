//! MFCC extraction
//!
//! Pre-emphasis → Hamming window → real FFT → power spectrum → mel
//! filterbank → natural log → orthonormal DCT-II, keeping the first
//! `mfcc_coeffs` coefficients. The window, filterbank, and DCT table are
//! precomputed at construction; extraction itself never allocates, so
//! repeated runs over the same audio are bit-identical.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use cf_core::{EngineError, EngineResult, Sample, SessionConfig};

use crate::mel::MelFilterbank;
use crate::window;

/// Pre-emphasis coefficient applied before windowing
pub const PRE_EMPHASIS: f32 = 0.97;
/// Floor applied to filterbank outputs before the log
const LOG_FLOOR: f32 = 1e-10;

/// Precomputed orthonormal DCT-II, truncated to the kept coefficients
#[derive(Debug, Clone)]
struct DctTable {
    /// Row-major `[n_coeffs][n_filters]` cosine table with scaling folded in
    table: Vec<f32>,
    n_in: usize,
    n_out: usize,
}

impl DctTable {
    fn new(n_in: usize, n_out: usize) -> Self {
        let mut table = Vec::with_capacity(n_in * n_out);
        let scale0 = (1.0 / n_in as f32).sqrt();
        let scale = (2.0 / n_in as f32).sqrt();
        for k in 0..n_out {
            let s = if k == 0 { scale0 } else { scale };
            for i in 0..n_in {
                let angle =
                    std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2 * n_in) as f32;
                table.push(s * angle.cos());
            }
        }
        Self { table, n_in, n_out }
    }

    fn apply(&self, input: &[f32], out: &mut [f32]) {
        debug_assert_eq!(input.len(), self.n_in);
        debug_assert_eq!(out.len(), self.n_out);
        for (k, slot) in out.iter_mut().enumerate() {
            let row = &self.table[k * self.n_in..(k + 1) * self.n_in];
            *slot = row.iter().zip(input.iter()).map(|(&c, &x)| c * x).sum();
        }
    }
}

/// MFCC extractor with all scratch preallocated
pub struct MfccExtractor {
    frame_size: usize,
    n_coeffs: usize,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    dct: DctTable,
    fft: Arc<dyn RealToComplex<f32>>,
    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    mel_energies: Vec<f32>,
}

impl MfccExtractor {
    /// Build an extractor for a validated session configuration
    pub fn new(config: &SessionConfig) -> EngineResult<Self> {
        config.validate()?;

        let frame_size = config.frame_size;
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        let power_len = frame_size / 2 + 1;

        let filterbank = MelFilterbank::new(
            config.n_filters,
            frame_size,
            config.sample_rate,
            config.mel_low_hz,
            config.mel_high(),
        );

        Ok(Self {
            frame_size,
            n_coeffs: config.mfcc_coeffs,
            window: window::hamming(frame_size),
            filterbank,
            dct: DctTable::new(config.n_filters, config.mfcc_coeffs),
            fft_input: fft.make_input_vec(),
            fft_output: fft.make_output_vec(),
            fft_scratch: fft.make_scratch_vec(),
            power: vec![0.0; power_len],
            mel_energies: vec![0.0; config.n_filters],
            fft,
        })
    }

    /// Window length this extractor was built for
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Coefficients produced per frame
    pub fn n_coeffs(&self) -> usize {
        self.n_coeffs
    }

    /// Extract coefficients from one frame, returning the log energy
    ///
    /// `frame` must hold exactly `frame_size` finite samples; `coeffs_out`
    /// must hold `n_coeffs` slots. No allocation occurs here.
    pub fn extract(&mut self, frame: &[Sample], coeffs_out: &mut [f32]) -> EngineResult<f32> {
        if frame.len() != self.frame_size {
            return Err(EngineError::invalid_audio(format!(
                "frame length {} does not match window {}",
                frame.len(),
                self.frame_size
            )));
        }
        if coeffs_out.len() != self.n_coeffs {
            return Err(EngineError::invalid_audio(format!(
                "output length {} does not match coefficient count {}",
                coeffs_out.len(),
                self.n_coeffs
            )));
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(EngineError::invalid_audio("non-finite sample in frame"));
        }

        // Pre-emphasis with x[-1] = 0, fused with the window multiply.
        self.fft_input[0] = frame[0] * self.window[0];
        for n in 1..self.frame_size {
            self.fft_input[n] = (frame[n] - PRE_EMPHASIS * frame[n - 1]) * self.window[n];
        }

        self.fft
            .process_with_scratch(&mut self.fft_input, &mut self.fft_output, &mut self.fft_scratch)
            .map_err(|e| EngineError::internal(format!("fft backend: {e}")))?;

        let mut total_power = 0.0f32;
        for (p, c) in self.power.iter_mut().zip(self.fft_output.iter()) {
            *p = c.re * c.re + c.im * c.im;
            total_power += *p;
        }

        self.filterbank.apply(&self.power, &mut self.mel_energies);
        for e in &mut self.mel_energies {
            *e = e.max(LOG_FLOOR).ln();
        }

        self.dct.apply(&self.mel_energies, coeffs_out);

        Ok(total_power.max(LOG_FLOOR).ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn produces_configured_coefficient_count() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let frame = sine(440.0, 44_100, 512);
        let mut coeffs = vec![0.0; 13];
        let energy = extractor.extract(&frame, &mut coeffs).unwrap();
        assert!(energy.is_finite());
        assert!(coeffs.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn extraction_is_deterministic() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let frame = sine(880.0, 44_100, 512);

        let mut a = vec![0.0; 13];
        let mut b = vec![0.0; 13];
        let ea = extractor.extract(&frame, &mut a).unwrap();
        let eb = extractor.extract(&frame, &mut b).unwrap();

        assert_eq!(a, b, "coefficients must be bit-identical across runs");
        assert_eq!(ea.to_bits(), eb.to_bits());
    }

    #[test]
    fn two_extractors_agree() {
        let frame = sine(440.0, 44_100, 512);
        let mut first = MfccExtractor::new(&config()).unwrap();
        let mut second = MfccExtractor::new(&config()).unwrap();

        let mut a = vec![0.0; 13];
        let mut b = vec![0.0; 13];
        first.extract(&frame, &mut a).unwrap();
        second.extract(&frame, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_wrong_length() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let mut coeffs = vec![0.0; 13];
        assert!(matches!(
            extractor.extract(&[0.0; 100], &mut coeffs),
            Err(EngineError::InvalidAudio { .. })
        ));
    }

    #[test]
    fn rejects_nan() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let mut frame = vec![0.0f32; 512];
        frame[77] = f32::NAN;
        let mut coeffs = vec![0.0; 13];
        assert!(extractor.extract(&frame, &mut coeffs).is_err());
    }

    #[test]
    fn different_pitches_differ_in_coefficients() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let low = sine(440.0, 44_100, 512);
        let high = sine(3_520.0, 44_100, 512);

        let mut a = vec![0.0; 13];
        let mut b = vec![0.0; 13];
        extractor.extract(&low, &mut a).unwrap();
        extractor.extract(&high, &mut b).unwrap();

        let dist: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt();
        assert!(dist > 1.0, "distinct spectra should separate, got {dist}");
    }

    #[test]
    fn silence_has_floor_energy() {
        let mut extractor = MfccExtractor::new(&config()).unwrap();
        let mut coeffs = vec![0.0; 13];
        let energy = extractor.extract(&vec![0.0; 512], &mut coeffs).unwrap();
        assert_relative_eq!(energy, (1e-10f32).ln(), epsilon = 1e-3);
    }
}
