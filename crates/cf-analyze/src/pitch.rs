//! YIN pitch tracking
//!
//! Cumulative-mean-normalized difference over the lag range implied by the
//! configured frequency bounds, first-minimum-below-threshold selection,
//! parabolic refinement. The lag range dictates the analysis window: the
//! tracker keeps its own rolling window of `2 · (sr / min_freq)` samples,
//! fed from the framed audio stream, so the configured floor is honored
//! even when the MFCC frame is shorter than one period. Quiet or aperiodic
//! frames yield `is_voiced = false, confidence = 0` rather than an error.

use serde::{Deserialize, Serialize};

use cf_core::{EngineError, EngineResult, Sample};

use crate::{Finalizable, FrameAnalyzer};

/// Pitch tracker tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitchConfig {
    /// Lowest detectable fundamental in Hz
    pub min_freq: f32,
    /// Highest detectable fundamental in Hz
    pub max_freq: f32,
    /// CMND threshold for the first-minimum search
    pub threshold: f32,
    /// Short-term F0 variance (cents²) above which vibrato is flagged
    pub vibrato_variance_floor: f32,
    /// Voiced readings per vibrato variance window
    pub vibrato_window: usize,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            min_freq: 80.0,
            max_freq: 2_000.0,
            threshold: 0.2,
            vibrato_variance_floor: 400.0,
            vibrato_window: 10,
        }
    }
}

/// Per-frame pitch output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchReading {
    /// Estimated fundamental in Hz; 0 when unvoiced
    pub frequency_hz: f32,
    /// 1 − CMND minimum, in [0, 1]; 0 when unvoiced
    pub confidence: f32,
    /// Whether a periodic fundamental was found
    pub is_voiced: bool,
    /// Frame start time in seconds
    pub timestamp: f64,
}

impl PitchReading {
    fn unvoiced(timestamp: f64) -> Self {
        Self {
            frequency_hz: 0.0,
            confidence: 0.0,
            is_voiced: false,
            timestamp,
        }
    }
}

/// Pitch contour summary consumed by the similarity fusion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchProfile {
    /// Median F0 of voiced frames in Hz; 0 when nothing was voiced
    pub median_f0_hz: f32,
    /// Median per-frame confidence scaled by the voiced ratio
    pub confidence: f32,
    /// Fraction of frames that were voiced
    pub voiced_ratio: f32,
    /// Whether short-term F0 variance exceeded the configured floor
    pub vibrato: bool,
}

/// Streaming YIN tracker
pub struct PitchTracker {
    sample_rate: u32,
    hop_size: usize,
    /// Lag span the difference function covers; `min_freq` fits by
    /// construction
    half_window: usize,
    config: PitchConfig,
    diff_buffer: Vec<f32>,
    cmnd_buffer: Vec<f32>,
    /// Rolling analysis window rebuilt from the framed stream
    window: Vec<Sample>,
    /// Timestamp of the previous frame, for contiguity tracking
    last_timestamp: Option<f64>,
    readings: Vec<PitchReading>,
}

impl PitchTracker {
    /// Tracker fed one `hop_size`-strided frame at a time
    ///
    /// Fails with `InvalidParams` when the frequency range is empty,
    /// non-positive, or exceeds Nyquist.
    pub fn new(config: PitchConfig, sample_rate: u32, hop_size: usize) -> EngineResult<Self> {
        if config.min_freq <= 0.0 || config.max_freq <= config.min_freq {
            return Err(EngineError::invalid_params(format!(
                "pitch range {}..{} Hz is empty",
                config.min_freq, config.max_freq
            )));
        }
        if config.max_freq > sample_rate as f32 / 2.0 {
            return Err(EngineError::invalid_params(format!(
                "pitch ceiling {} Hz exceeds Nyquist for {} Hz",
                config.max_freq, sample_rate
            )));
        }
        if hop_size == 0 {
            return Err(EngineError::invalid_params("pitch hop must be positive"));
        }

        // One full period of the floor frequency must fit in the lag range.
        let max_lag = (sample_rate as f32 / config.min_freq).ceil() as usize + 1;
        let half_window = max_lag + 1;

        Ok(Self {
            sample_rate,
            hop_size,
            half_window,
            diff_buffer: vec![0.0; half_window],
            cmnd_buffer: vec![0.0; half_window],
            window: Vec::with_capacity(half_window * 4),
            last_timestamp: None,
            readings: Vec::new(),
            config,
        })
    }

    /// Samples the detector needs before it can report a fundamental
    pub fn window_len(&self) -> usize {
        self.half_window * 2
    }

    /// Per-frame readings collected so far
    pub fn readings(&self) -> &[PitchReading] {
        &self.readings
    }

    /// Run YIN over the trailing analysis window of `samples`
    ///
    /// Returns `None` until `window_len()` samples are available.
    pub fn detect(&mut self, samples: &[Sample]) -> Option<(f32, f32)> {
        let needed = self.window_len();
        if self.half_window < 2 || samples.len() < needed {
            return None;
        }
        let frame = &samples[samples.len() - needed..];

        self.difference_function(frame);
        self.cumulative_mean_normalized_difference();

        let min_tau = (self.sample_rate as f32 / self.config.max_freq) as usize;
        let max_tau =
            ((self.sample_rate as f32 / self.config.min_freq) as usize).min(self.half_window - 1);
        if min_tau >= max_tau {
            return None;
        }

        let mut best_tau = 0;
        let mut best_value = f32::MAX;

        let mut tau = min_tau.max(1);
        while tau < max_tau {
            if self.cmnd_buffer[tau] < self.config.threshold {
                // Walk down to the bottom of this dip.
                while tau + 1 < max_tau && self.cmnd_buffer[tau + 1] < self.cmnd_buffer[tau] {
                    tau += 1;
                }
                best_tau = tau;
                best_value = self.cmnd_buffer[tau];
                break;
            }
            tau += 1;
        }

        if best_tau == 0 {
            // No dip under threshold; fall back to the absolute minimum.
            for tau in min_tau.max(1)..max_tau {
                if self.cmnd_buffer[tau] < best_value {
                    best_tau = tau;
                    best_value = self.cmnd_buffer[tau];
                }
            }
        }

        if best_tau == 0 || best_value > 0.5 {
            return None;
        }

        let tau_refined = self.parabolic_interpolation(best_tau);
        let frequency = self.sample_rate as f32 / tau_refined;
        let confidence = (1.0 - best_value).clamp(0.0, 1.0);
        Some((frequency, confidence))
    }

    fn difference_function(&mut self, frame: &[Sample]) {
        for tau in 0..self.half_window {
            let mut sum = 0.0f32;
            for j in 0..self.half_window {
                let diff = frame[j] - frame[j + tau];
                sum += diff * diff;
            }
            self.diff_buffer[tau] = sum;
        }
    }

    fn cumulative_mean_normalized_difference(&mut self) {
        self.cmnd_buffer[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..self.diff_buffer.len() {
            running_sum += self.diff_buffer[tau];
            if running_sum > 0.0 {
                self.cmnd_buffer[tau] = self.diff_buffer[tau] * tau as f32 / running_sum;
            } else {
                self.cmnd_buffer[tau] = 1.0;
            }
        }
    }

    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        if tau == 0 || tau >= self.cmnd_buffer.len() - 1 {
            return tau as f32;
        }
        let s0 = self.cmnd_buffer[tau - 1];
        let s1 = self.cmnd_buffer[tau];
        let s2 = self.cmnd_buffer[tau + 1];
        let adjustment = (s2 - s0) / (2.0 * (2.0 * s1 - s0 - s2));
        if adjustment.is_finite() {
            tau as f32 + adjustment
        } else {
            tau as f32
        }
    }

    /// Fold a frame into the rolling window, honoring the hop overlap
    fn accumulate(&mut self, frame: &[Sample], timestamp: f64) {
        let hop_seconds = self.hop_size as f64 / self.sample_rate as f64;
        let contiguous = self
            .last_timestamp
            .map(|t| (timestamp - t - hop_seconds).abs() < hop_seconds * 0.5)
            .unwrap_or(false);

        if contiguous && frame.len() >= self.hop_size {
            // Overlapping frames advance by one hop; only the fresh tail is
            // new signal.
            self.window
                .extend_from_slice(&frame[frame.len() - self.hop_size..]);
        } else {
            // Gate gap or first frame: the stream is not contiguous here.
            self.window.clear();
            self.window.extend_from_slice(frame);
        }

        let cap = self.window_len();
        if self.window.len() > cap {
            let excess = self.window.len() - cap;
            self.window.drain(..excess);
        }
    }

    fn vibrato_detected(&self, voiced_cents: &[f32]) -> bool {
        let window = self.config.vibrato_window.max(2);
        if voiced_cents.len() < window {
            return false;
        }
        voiced_cents.windows(window).any(|w| {
            let mean = w.iter().sum::<f32>() / w.len() as f32;
            let variance =
                w.iter().map(|c| (c - mean) * (c - mean)).sum::<f32>() / w.len() as f32;
            variance > self.config.vibrato_variance_floor
        })
    }
}

impl FrameAnalyzer for PitchTracker {
    fn process_frame(&mut self, frame: &[Sample], timestamp: f64) {
        let detected = if frame.len() >= self.window_len() {
            // The frame alone covers the lag range.
            self.window.clear();
            self.detect(frame)
        } else {
            self.accumulate(frame, timestamp);
            if self.window.len() >= self.window_len() {
                let window = std::mem::take(&mut self.window);
                let result = self.detect(&window);
                self.window = window;
                result
            } else {
                None
            }
        };
        self.last_timestamp = Some(timestamp);

        let reading = match detected {
            Some((frequency_hz, confidence)) => PitchReading {
                frequency_hz,
                confidence,
                is_voiced: true,
                timestamp,
            },
            None => PitchReading::unvoiced(timestamp),
        };
        self.readings.push(reading);
    }

    fn reset(&mut self) {
        self.readings.clear();
        self.window.clear();
        self.last_timestamp = None;
    }
}

impl Finalizable for PitchTracker {
    type Profile = PitchProfile;

    fn profile(&self) -> PitchProfile {
        let voiced: Vec<&PitchReading> =
            self.readings.iter().filter(|r| r.is_voiced).collect();
        if voiced.is_empty() {
            return PitchProfile::default();
        }

        let mut freqs: Vec<f32> = voiced.iter().map(|r| r.frequency_hz).collect();
        freqs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_f0_hz = freqs[freqs.len() / 2];

        let mut confs: Vec<f32> = voiced.iter().map(|r| r.confidence).collect();
        confs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median_conf = confs[confs.len() / 2];

        let voiced_ratio = voiced.len() as f32 / self.readings.len() as f32;

        let cents: Vec<f32> = voiced
            .iter()
            .map(|r| 1200.0 * (r.frequency_hz / median_f0_hz).log2())
            .collect();

        PitchProfile {
            median_f0_hz,
            confidence: (median_conf * voiced_ratio.sqrt()).clamp(0.0, 1.0),
            voiced_ratio,
            vibrato: self.vibrato_detected(&cents),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;
    const FRAME: usize = 2_048;
    const HOP: usize = 256;

    fn tracker() -> PitchTracker {
        PitchTracker::new(PitchConfig::default(), SR, HOP).unwrap()
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    #[test]
    fn rejects_bad_ranges() {
        let empty = PitchConfig {
            min_freq: 500.0,
            max_freq: 100.0,
            ..Default::default()
        };
        assert!(PitchTracker::new(empty, SR, HOP).is_err());

        let above_nyquist = PitchConfig {
            max_freq: 30_000.0,
            ..Default::default()
        };
        assert!(PitchTracker::new(above_nyquist, SR, HOP).is_err());
        assert!(PitchTracker::new(PitchConfig::default(), SR, 0).is_err());
    }

    #[test]
    fn detects_440_hz() {
        let mut tracker = tracker();
        let frame = sine(440.0, FRAME);
        let (freq, conf) = tracker.detect(&frame).expect("pitch in a pure tone");
        assert!((freq - 440.0).abs() < 5.0, "expected ~440 Hz, got {freq}");
        assert!(conf > 0.8, "expected confident reading, got {conf}");
    }

    #[test]
    fn octave_apart_tones_detected_apart() {
        let mut tracker = tracker();
        let (low, _) = tracker.detect(&sine(440.0, FRAME)).unwrap();
        let (high, _) = tracker.detect(&sine(880.0, FRAME)).unwrap();
        let cents = 1200.0 * (high / low).log2();
        assert!((cents - 1200.0).abs() < 50.0, "expected ~1200 cents, got {cents}");
    }

    #[test]
    fn floor_frequency_tracked_through_short_frames() {
        // 100 Hz has a 441-sample period: longer than a 512-sample frame's
        // half window, so only the rolling window can resolve it.
        let mut tracker = tracker();
        let signal = sine(100.0, SR as usize);
        let hop_seconds = HOP as f64 / SR as f64;

        let mut start = 0;
        let mut index = 0u64;
        while start + 512 <= signal.len() {
            tracker.process_frame(&signal[start..start + 512], index as f64 * hop_seconds);
            start += HOP;
            index += 1;
        }

        let profile = tracker.profile();
        assert!(
            (profile.median_f0_hz - 100.0).abs() < 5.0,
            "expected ~100 Hz, got {}",
            profile.median_f0_hz
        );
        assert!(profile.voiced_ratio > 0.9, "ratio {}", profile.voiced_ratio);
    }

    #[test]
    fn timestamp_gap_resets_the_window() {
        let mut tracker = tracker();
        let signal = sine(100.0, SR as usize);
        let hop_seconds = HOP as f64 / SR as f64;

        for i in 0..8usize {
            tracker.process_frame(&signal[i * HOP..i * HOP + 512], i as f64 * hop_seconds);
        }
        assert!(
            tracker.readings().last().unwrap().is_voiced,
            "window should be full after eight contiguous frames"
        );

        // Jump well past one hop: the stream is discontinuous.
        tracker.process_frame(&signal[..512], 10.0);
        assert!(
            !tracker.readings().last().unwrap().is_voiced,
            "a gated gap must force the window to refill"
        );
    }

    #[test]
    fn silence_is_unvoiced_with_zero_confidence() {
        let mut tracker = tracker();
        tracker.process_frame(&vec![0.0; FRAME], 0.0);
        let reading = tracker.readings()[0];
        assert!(!reading.is_voiced);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn profile_medians_voiced_frames() {
        let mut tracker = tracker();
        let frame = sine(440.0, FRAME);
        for i in 0..20 {
            tracker.process_frame(&frame, i as f64 * 0.01);
        }
        // Mix in silence; the median must stay on the tone.
        tracker.process_frame(&vec![0.0; FRAME], 0.2);

        let profile = tracker.profile();
        assert!((profile.median_f0_hz - 440.0).abs() < 5.0);
        assert!(profile.voiced_ratio > 0.9);
        assert!(profile.confidence > 0.5);
        assert!(!profile.vibrato, "steady tone must not flag vibrato");
    }

    #[test]
    fn wide_wobble_flags_vibrato() {
        let mut tracker = tracker();
        // Alternate between tones a half step apart (~100 cents).
        let a = sine(440.0, FRAME);
        let b = sine(466.16, FRAME);
        for i in 0..24 {
            let frame = if i % 2 == 0 { &a } else { &b };
            tracker.process_frame(frame, i as f64 * 0.01);
        }
        assert!(tracker.profile().vibrato);
    }

    #[test]
    fn empty_tracker_profiles_to_zero() {
        let tracker = tracker();
        let profile = tracker.profile();
        assert_eq!(profile.median_f0_hz, 0.0);
        assert_eq!(profile.confidence, 0.0);
        assert!(!profile.vibrato);
    }

    #[test]
    fn reset_clears_readings() {
        let mut tracker = tracker();
        tracker.process_frame(&sine(440.0, FRAME), 0.0);
        tracker.reset();
        assert!(tracker.readings().is_empty());
    }
}
