//! Harmonic and tonal-quality analysis
//!
//! Runs its own STFT (default 4096 samples, 75% overlap) independent of the
//! MFCC frame clock. Per window it measures spectral centroid and spread
//! plus a four-component tonal-quality vector: rasp, brightness, resonance,
//! roughness. Confidence tracks the harmonic signal-to-noise ratio.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use cf_core::Sample;
use cf_dsp::window;

use crate::Finalizable;

/// Windows quieter than this mean-square are skipped entirely
const SILENCE_FLOOR: f32 = 1e-8;
/// Spectral peaks considered for the roughness estimate
const MAX_ROUGHNESS_PEAKS: usize = 8;
/// Harmonics sampled for the resonance ratio
const MAX_HARMONICS: usize = 8;

/// Harmonic analyzer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicConfig {
    /// STFT size in samples; must be a power of two
    pub fft_size: usize,
    /// Hop between windows; `fft_size / 4` gives the default 75% overlap
    pub hop_size: usize,
    /// Energy above this frequency counts toward rasp
    pub rasp_cutoff_hz: f32,
    /// Fundamental search range for the resonance ratio, in Hz
    pub min_fundamental_hz: f32,
    /// Upper end of the fundamental search range
    pub max_fundamental_hz: f32,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            fft_size: 4_096,
            hop_size: 1_024,
            rasp_cutoff_hz: 4_000.0,
            min_fundamental_hz: 80.0,
            max_fundamental_hz: 2_000.0,
        }
    }
}

/// Averaged harmonic summary consumed by the similarity fusion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HarmonicProfile {
    /// Mean spectral centroid in Hz
    pub centroid_hz: f32,
    /// Mean spectral spread in Hz
    pub spread_hz: f32,
    /// High-frequency noise ratio, [0, 1]
    pub rasp: f32,
    /// Centroid normalized by Nyquist, [0, 1]
    pub brightness: f32,
    /// Harmonic-peak to inter-harmonic-valley ratio, mapped to [0, 1]
    pub resonance: f32,
    /// Pairwise beating estimate, [0, 1]
    pub roughness: f32,
    /// Harmonic SNR mapped to [0, 1]; 0 when nothing was analyzed
    pub confidence: f32,
}

impl HarmonicProfile {
    /// Tonal-quality vector in fusion order, each component clipped to [0, 1]
    pub fn tonal_vector(&self) -> [f32; 4] {
        [
            self.rasp.clamp(0.0, 1.0),
            self.brightness.clamp(0.0, 1.0),
            self.resonance.clamp(0.0, 1.0),
            self.roughness.clamp(0.0, 1.0),
        ]
    }
}

/// Streaming harmonic analyzer
pub struct HarmonicAnalyzer {
    sample_rate: u32,
    config: HarmonicConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    win: Vec<f32>,
    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    /// Accumulates raw samples until one hop worth of windows is available
    pending: Vec<f32>,
    windows_analyzed: usize,
    centroid_sum: f64,
    spread_sum: f64,
    rasp_sum: f64,
    resonance_sum: f64,
    roughness_sum: f64,
    snr_sum: f64,
}

impl HarmonicAnalyzer {
    /// Analyzer for mono audio at `sample_rate`
    pub fn new(config: HarmonicConfig, sample_rate: u32) -> Self {
        let fft_size = config.fft_size.next_power_of_two();
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            sample_rate,
            win: window::hann(fft_size),
            fft_input: fft.make_input_vec(),
            fft_output: fft.make_output_vec(),
            fft_scratch: fft.make_scratch_vec(),
            power: vec![0.0; fft_size / 2 + 1],
            pending: Vec::with_capacity(fft_size * 2),
            windows_analyzed: 0,
            centroid_sum: 0.0,
            spread_sum: 0.0,
            rasp_sum: 0.0,
            resonance_sum: 0.0,
            roughness_sum: 0.0,
            snr_sum: 0.0,
            config: HarmonicConfig { fft_size, ..config },
            fft,
        }
    }

    /// Feed raw (ungated) mono samples
    pub fn process_block(&mut self, samples: &[Sample]) {
        self.pending.extend_from_slice(samples);
        let fft_size = self.config.fft_size;
        let hop = self.config.hop_size.clamp(1, fft_size);
        while self.pending.len() >= fft_size {
            self.analyze_window();
            self.pending.drain(..hop);
        }
    }

    /// Drop all accumulated state
    pub fn reset(&mut self) {
        self.pending.clear();
        self.windows_analyzed = 0;
        self.centroid_sum = 0.0;
        self.spread_sum = 0.0;
        self.rasp_sum = 0.0;
        self.resonance_sum = 0.0;
        self.roughness_sum = 0.0;
        self.snr_sum = 0.0;
    }

    fn analyze_window(&mut self) {
        let fft_size = self.config.fft_size;
        let window_slice = &self.pending[..fft_size];

        let mean_square =
            window_slice.iter().map(|&s| s * s).sum::<f32>() / fft_size as f32;
        if mean_square < SILENCE_FLOOR {
            return;
        }

        for (slot, (&s, &w)) in self
            .fft_input
            .iter_mut()
            .zip(window_slice.iter().zip(self.win.iter()))
        {
            *slot = s * w;
        }
        if self
            .fft
            .process_with_scratch(&mut self.fft_input, &mut self.fft_output, &mut self.fft_scratch)
            .is_err()
        {
            return;
        }

        let mut total = 0.0f32;
        for (p, c) in self.power.iter_mut().zip(self.fft_output.iter()) {
            *p = c.re * c.re + c.im * c.im;
            total += *p;
        }
        if total <= 0.0 {
            return;
        }

        let bin_hz = self.sample_rate as f32 / fft_size as f32;
        let nyquist = self.sample_rate as f32 / 2.0;

        // Magnitude-weighted centroid and spread.
        let mut mag_sum = 0.0f32;
        let mut weighted = 0.0f32;
        for (i, &p) in self.power.iter().enumerate() {
            let m = p.sqrt();
            mag_sum += m;
            weighted += m * i as f32 * bin_hz;
        }
        let centroid = if mag_sum > 0.0 { weighted / mag_sum } else { 0.0 };

        let mut spread_acc = 0.0f32;
        for (i, &p) in self.power.iter().enumerate() {
            let m = p.sqrt();
            let d = i as f32 * bin_hz - centroid;
            spread_acc += m * d * d;
        }
        let spread = if mag_sum > 0.0 {
            (spread_acc / mag_sum).sqrt()
        } else {
            0.0
        };

        // Rasp: high-frequency power fraction.
        let cutoff_bin = ((self.config.rasp_cutoff_hz.min(nyquist) / bin_hz) as usize)
            .min(self.power.len() - 1);
        let hf: f32 = self.power[cutoff_bin..].iter().sum();
        let rasp = (hf / total).clamp(0.0, 1.0);

        let (resonance, snr) = self.resonance_and_snr(bin_hz, total);
        let roughness = self.roughness(bin_hz);

        self.centroid_sum += centroid as f64;
        self.spread_sum += spread as f64;
        self.rasp_sum += rasp as f64;
        self.resonance_sum += resonance as f64;
        self.roughness_sum += roughness as f64;
        self.snr_sum += snr as f64;
        self.windows_analyzed += 1;
    }

    /// Peak/valley ratio around the strongest in-range fundamental, plus the
    /// harmonic SNR used for confidence
    fn resonance_and_snr(&self, bin_hz: f32, total: f32) -> (f32, f32) {
        let min_bin = (self.config.min_fundamental_hz / bin_hz).max(1.0) as usize;
        let max_bin =
            ((self.config.max_fundamental_hz / bin_hz) as usize).min(self.power.len() - 2);
        if min_bin >= max_bin {
            return (0.0, 0.0);
        }

        let mut f0_bin = min_bin;
        let mut f0_power = 0.0f32;
        for i in min_bin..=max_bin {
            if self.power[i] > f0_power {
                f0_power = self.power[i];
                f0_bin = i;
            }
        }
        if f0_power <= 0.0 {
            return (0.0, 0.0);
        }

        let mut peak_sum = 0.0f32;
        let mut valley_sum = 0.0f32;
        let mut harmonic_energy = 0.0f32;
        let mut counted = 0usize;
        for k in 1..=MAX_HARMONICS {
            let peak_bin = f0_bin * k;
            let valley_bin = f0_bin * k + f0_bin / 2;
            if valley_bin >= self.power.len() {
                break;
            }
            // Let the peak drift a bin either side.
            let lo = peak_bin.saturating_sub(1);
            let hi = (peak_bin + 1).min(self.power.len() - 1);
            let peak = self.power[lo..=hi].iter().cloned().fold(0.0f32, f32::max);
            peak_sum += peak;
            valley_sum += self.power[valley_bin];
            harmonic_energy += peak;
            counted += 1;
        }
        if counted == 0 {
            return (0.0, 0.0);
        }

        let ratio = peak_sum / valley_sum.max(1e-12);
        let resonance = ratio / (1.0 + ratio);

        let noise = (total - harmonic_energy).max(1e-12);
        let snr = harmonic_energy / noise;
        (resonance.clamp(0.0, 1.0), (snr / (1.0 + snr)).clamp(0.0, 1.0))
    }

    /// Plomp–Levelt-style pairwise beating over the strongest peaks
    fn roughness(&self, bin_hz: f32) -> f32 {
        // Local maxima, strongest first.
        let mut peaks: Vec<(f32, f32)> = Vec::with_capacity(MAX_ROUGHNESS_PEAKS * 4);
        for i in 1..self.power.len() - 1 {
            if self.power[i] > self.power[i - 1] && self.power[i] > self.power[i + 1] {
                peaks.push((i as f32 * bin_hz, self.power[i].sqrt()));
            }
        }
        peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        peaks.truncate(MAX_ROUGHNESS_PEAKS);

        if peaks.len() < 2 {
            return 0.0;
        }

        let mut dissonance = 0.0f32;
        let mut weight = 0.0f32;
        for i in 0..peaks.len() {
            for j in (i + 1)..peaks.len() {
                let (f1, a1) = peaks[i];
                let (f2, a2) = peaks[j];
                let fmin = f1.min(f2);
                let df = (f1 - f2).abs();
                let s = 0.24 / (0.021 * fmin + 19.0);
                let d = (-3.5 * s * df).exp() - (-5.75 * s * df).exp();
                dissonance += a1 * a2 * d.max(0.0);
                weight += a1 * a2;
            }
        }
        if weight <= 0.0 {
            return 0.0;
        }
        // The dissonance kernel peaks near 0.18; rescale so a fully beating
        // pair approaches 1.
        (dissonance / weight / 0.18).clamp(0.0, 1.0)
    }
}

impl Finalizable for HarmonicAnalyzer {
    type Profile = HarmonicProfile;

    fn profile(&self) -> HarmonicProfile {
        if self.windows_analyzed == 0 {
            return HarmonicProfile::default();
        }
        let n = self.windows_analyzed as f64;
        let nyquist = self.sample_rate as f32 / 2.0;
        let centroid_hz = (self.centroid_sum / n) as f32;
        HarmonicProfile {
            centroid_hz,
            spread_hz: (self.spread_sum / n) as f32,
            rasp: (self.rasp_sum / n) as f32,
            brightness: (centroid_hz / nyquist).clamp(0.0, 1.0),
            resonance: (self.resonance_sum / n) as f32,
            roughness: (self.roughness_sum / n) as f32,
            confidence: (self.snr_sum / n) as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;

    fn analyzer() -> HarmonicAnalyzer {
        HarmonicAnalyzer::new(HarmonicConfig::default(), SR)
    }

    fn tone_with_harmonics(f0: f32, seconds: f32) -> Vec<f32> {
        let n = (SR as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let w = 2.0 * std::f32::consts::PI * f0 * t;
                0.5 * w.sin() + 0.25 * (2.0 * w).sin() + 0.12 * (3.0 * w).sin()
            })
            .collect()
    }

    #[test]
    fn silence_yields_zero_confidence() {
        let mut a = analyzer();
        a.process_block(&vec![0.0; SR as usize]);
        let profile = a.profile();
        assert_eq!(profile.confidence, 0.0);
        assert_eq!(profile.centroid_hz, 0.0);
    }

    #[test]
    fn harmonic_tone_is_confident_and_resonant() {
        let mut a = analyzer();
        a.process_block(&tone_with_harmonics(440.0, 1.0));
        let profile = a.profile();
        assert!(profile.confidence > 0.3, "snr conf {}", profile.confidence);
        assert!(profile.resonance > 0.5, "resonance {}", profile.resonance);
        // Centroid sits between the fundamental and the top harmonic.
        assert!(profile.centroid_hz > 300.0 && profile.centroid_hz < 2_000.0);
    }

    #[test]
    fn brightness_tracks_centroid() {
        let mut low = analyzer();
        low.process_block(&tone_with_harmonics(220.0, 0.5));
        let mut high = analyzer();
        high.process_block(&tone_with_harmonics(1_760.0, 0.5));
        assert!(high.profile().brightness > low.profile().brightness);
    }

    #[test]
    fn tonal_vector_is_clipped() {
        let mut a = analyzer();
        a.process_block(&tone_with_harmonics(440.0, 0.5));
        for v in a.profile().tonal_vector() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn overlap_advances_by_hop() {
        let mut a = analyzer();
        // 4096 + 3 × 1024 samples → 4 windows at 75% overlap.
        a.process_block(&tone_with_harmonics(440.0, (4_096.0 + 3.0 * 1_024.0) / SR as f32));
        assert_eq!(a.windows_analyzed, 4);
    }

    #[test]
    fn reset_clears_accumulators() {
        let mut a = analyzer();
        a.process_block(&tone_with_harmonics(440.0, 0.5));
        a.reset();
        assert_eq!(a.profile(), HarmonicProfile::default());
    }
}
