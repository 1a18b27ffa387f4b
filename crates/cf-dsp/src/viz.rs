//! Visualization-facing summaries
//!
//! Cheap, UI-oriented views of a session's audio: peak/RMS level metering,
//! a bucketed waveform overview, and a one-shot spectrogram. None of these
//! feed the similarity score; they exist for collaborator rendering.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use cf_core::{EngineError, EngineResult, Sample};

use crate::window;

/// Default fallback when a meter is given a nonsensical sample rate
const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;

// ── Level metering ──────────────────────────────────────────────────

/// Instantaneous level readout
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    /// Current peak, linear
    pub peak: f32,
    /// Held peak, linear
    pub held_peak: f32,
    /// Windowed RMS, linear
    pub rms: f32,
}

impl LevelSnapshot {
    /// Current peak in dBFS
    pub fn peak_db(&self) -> f32 {
        20.0 * self.peak.max(1e-10).log10()
    }

    /// Windowed RMS in dBFS
    pub fn rms_db(&self) -> f32 {
        20.0 * self.rms.max(1e-10).log10()
    }
}

/// Peak-with-hold plus windowed RMS meter
#[derive(Debug, Clone)]
pub struct LevelMeter {
    current_peak: f32,
    held_peak: f32,
    hold_samples: usize,
    hold_counter: usize,
    release_coeff: f32,
    sum_squares: f64,
    rms_buffer: Vec<f32>,
    write_pos: usize,
}

impl LevelMeter {
    /// Meter with a 2 s peak hold and `window_ms` RMS window
    pub fn new(sample_rate: u32, window_ms: f32) -> Self {
        let sr = if sample_rate > 0 {
            sample_rate as f32
        } else {
            DEFAULT_SAMPLE_RATE
        };
        let window = if window_ms.is_finite() {
            window_ms.clamp(1.0, 1000.0)
        } else {
            300.0
        };
        let window_samples = ((window * 0.001 * sr) as usize).max(1);
        Self {
            current_peak: 0.0,
            held_peak: 0.0,
            hold_samples: (sr * 2.0) as usize,
            hold_counter: 0,
            release_coeff: (-1.0 / (0.3 * sr)).exp(),
            sum_squares: 0.0,
            rms_buffer: vec![0.0; window_samples],
            write_pos: 0,
        }
    }

    /// Feed a block of samples
    pub fn process_block(&mut self, samples: &[Sample]) {
        for &sample in samples {
            let abs = sample.abs();

            if abs > self.current_peak {
                self.current_peak = abs;
            } else {
                self.current_peak *= self.release_coeff;
            }

            if abs > self.held_peak {
                self.held_peak = abs;
                self.hold_counter = 0;
            } else {
                self.hold_counter += 1;
                if self.hold_counter >= self.hold_samples {
                    self.held_peak *= self.release_coeff;
                }
            }

            let squared = sample * sample;
            self.sum_squares -= self.rms_buffer[self.write_pos] as f64;
            self.sum_squares += squared as f64;
            self.rms_buffer[self.write_pos] = squared;
            self.write_pos = (self.write_pos + 1) % self.rms_buffer.len();
        }
    }

    /// Current readout
    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            peak: self.current_peak,
            held_peak: self.held_peak,
            rms: (self.sum_squares.max(0.0) / self.rms_buffer.len() as f64).sqrt() as f32,
        }
    }

    /// Clear all meter state
    pub fn reset(&mut self) {
        self.current_peak = 0.0;
        self.held_peak = 0.0;
        self.hold_counter = 0;
        self.sum_squares = 0.0;
        self.rms_buffer.fill(0.0);
        self.write_pos = 0;
    }
}

// ── Waveform overview ───────────────────────────────────────────────

/// One overview bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformBucket {
    /// Minimum sample in the bucket
    pub min: f32,
    /// Maximum sample in the bucket
    pub max: f32,
    /// RMS of the bucket
    pub rms: f32,
}

/// Streaming min/max/RMS overview builder
///
/// Buckets are fixed-duration; the summary grows as audio streams in, so a
/// UI can render a scrolling overview without retaining PCM.
#[derive(Debug, Clone)]
pub struct WaveformSummary {
    samples_per_bucket: usize,
    buckets: Vec<WaveformBucket>,
    cur_min: f32,
    cur_max: f32,
    cur_sum_squares: f64,
    cur_count: usize,
}

impl WaveformSummary {
    /// Builder with `bucket_ms` milliseconds of audio per bucket
    pub fn new(sample_rate: u32, bucket_ms: f32) -> Self {
        let sr = if sample_rate > 0 {
            sample_rate as f32
        } else {
            DEFAULT_SAMPLE_RATE
        };
        let samples_per_bucket = ((bucket_ms.max(1.0) * 0.001 * sr) as usize).max(1);
        Self {
            samples_per_bucket,
            buckets: Vec::new(),
            cur_min: f32::MAX,
            cur_max: f32::MIN,
            cur_sum_squares: 0.0,
            cur_count: 0,
        }
    }

    /// Feed a block of samples
    pub fn process_block(&mut self, samples: &[Sample]) {
        for &sample in samples {
            self.cur_min = self.cur_min.min(sample);
            self.cur_max = self.cur_max.max(sample);
            self.cur_sum_squares += (sample * sample) as f64;
            self.cur_count += 1;

            if self.cur_count == self.samples_per_bucket {
                self.flush_bucket();
            }
        }
    }

    fn flush_bucket(&mut self) {
        self.buckets.push(WaveformBucket {
            min: self.cur_min,
            max: self.cur_max,
            rms: (self.cur_sum_squares / self.cur_count as f64).sqrt() as f32,
        });
        self.cur_min = f32::MAX;
        self.cur_max = f32::MIN;
        self.cur_sum_squares = 0.0;
        self.cur_count = 0;
    }

    /// Completed buckets so far
    pub fn buckets(&self) -> &[WaveformBucket] {
        &self.buckets
    }

    /// Completed buckets, including a partial trailing bucket if any
    pub fn finish(mut self) -> Vec<WaveformBucket> {
        if self.cur_count > 0 {
            self.flush_bucket();
        }
        self.buckets
    }
}

// ── Spectrogram ─────────────────────────────────────────────────────

/// STFT magnitude grid in dB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrogram {
    /// One row per analysis frame, `fft_size / 2 + 1` bins each
    pub rows: Vec<Vec<f32>>,
    /// Hz covered by one bin
    pub bin_hz: f32,
    /// Seconds covered by one row
    pub hop_seconds: f32,
}

/// One-shot spectrogram over a PCM buffer
///
/// `fft_size` must be a power of two; `hop` must be in `1..=fft_size`.
pub fn spectrogram(
    samples: &[Sample],
    sample_rate: u32,
    fft_size: usize,
    hop: usize,
) -> EngineResult<Spectrogram> {
    if fft_size == 0 || !fft_size.is_power_of_two() {
        return Err(EngineError::invalid_params(format!(
            "spectrogram fft size {fft_size} is not a power of two"
        )));
    }
    if hop == 0 || hop > fft_size {
        return Err(EngineError::invalid_params(format!(
            "spectrogram hop {hop} must be in 1..={fft_size}"
        )));
    }

    let mut planner = RealFftPlanner::new();
    let fft: Arc<dyn RealToComplex<f32>> = planner.plan_fft_forward(fft_size);
    let win = window::hann(fft_size);
    let mut input = fft.make_input_vec();
    let mut output = fft.make_output_vec();
    let mut scratch = fft.make_scratch_vec();

    let mut rows = Vec::new();
    let mut start = 0;
    while start + fft_size <= samples.len() {
        for (slot, (&s, &w)) in input
            .iter_mut()
            .zip(samples[start..start + fft_size].iter().zip(win.iter()))
        {
            *slot = s * w;
        }
        fft.process_with_scratch(&mut input, &mut output, &mut scratch)
            .map_err(|e| EngineError::internal(format!("fft backend: {e}")))?;

        let row: Vec<f32> = output
            .iter()
            .map(|c: &Complex<f32>| {
                let mag = (c.re * c.re + c.im * c.im).sqrt();
                20.0 * mag.max(1e-10).log10()
            })
            .collect();
        rows.push(row);
        start += hop;
    }

    Ok(Spectrogram {
        rows,
        bin_hz: sample_rate as f32 / fft_size as f32,
        hop_seconds: hop as f32 / sample_rate as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn level_meter_tracks_peak_and_rms() {
        let mut meter = LevelMeter::new(44_100, 300.0);
        meter.process_block(&vec![0.5; 44_100]);
        let snap = meter.snapshot();
        assert!(snap.peak >= 0.5);
        assert_relative_eq!(snap.rms, 0.5, epsilon = 0.01);
        assert!(snap.peak_db() > -7.0);
    }

    #[test]
    fn level_meter_reset_clears() {
        let mut meter = LevelMeter::new(44_100, 300.0);
        meter.process_block(&[1.0; 100]);
        meter.reset();
        let snap = meter.snapshot();
        assert_eq!(snap.peak, 0.0);
        assert_eq!(snap.rms, 0.0);
    }

    #[test]
    fn waveform_buckets_capture_extrema() {
        // 10 ms buckets at 1 kHz rate → 10 samples per bucket.
        let mut wf = WaveformSummary::new(1_000, 10.0);
        let mut block = vec![0.1f32; 10];
        block[3] = -0.8;
        block[7] = 0.9;
        wf.process_block(&block);

        let buckets = wf.buckets();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].min, -0.8);
        assert_eq!(buckets[0].max, 0.9);
    }

    #[test]
    fn waveform_finish_flushes_partial() {
        let mut wf = WaveformSummary::new(1_000, 10.0);
        wf.process_block(&[0.5; 5]);
        assert!(wf.buckets().is_empty());
        let buckets = wf.finish();
        assert_eq!(buckets.len(), 1);
        assert_relative_eq!(buckets[0].rms, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn spectrogram_peaks_at_tone_bin() {
        let sr = 16_000u32;
        let samples: Vec<f32> = (0..sr as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / sr as f32).sin())
            .collect();

        let spec = spectrogram(&samples, sr, 1024, 512).unwrap();
        assert!(!spec.rows.is_empty());

        let tone_bin = (1_000.0 / spec.bin_hz).round() as usize;
        let row = &spec.rows[spec.rows.len() / 2];
        assert!(row[tone_bin] > row[tone_bin + 20]);
    }

    #[test]
    fn spectrogram_rejects_bad_params() {
        assert!(spectrogram(&[0.0; 64], 16_000, 1000, 100).is_err());
        assert!(spectrogram(&[0.0; 64], 16_000, 1024, 0).is_err());
        assert!(spectrogram(&[0.0; 64], 16_000, 1024, 2048).is_err());
    }
}
