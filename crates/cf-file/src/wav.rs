//! Mono WAV read/write
//!
//! Thin wrapper over `hound` for the two places the core touches PCM on
//! disk: baking a master cache from a raw recording, and tests. Integer
//! sources are normalized to float; multi-channel files are downmixed.

use std::path::Path;

use cf_core::{EngineError, EngineResult, Sample};

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct WavAudio {
    /// Mono samples in [-1, 1]
    pub samples: Vec<Sample>,
    /// Source sample rate in Hz
    pub sample_rate: u32,
}

impl WavAudio {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file, downmixing to mono
pub fn read_wav_mono(path: &Path) -> EngineResult<WavAudio> {
    let mut reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            EngineError::NotFound(path.display().to_string())
        }
        other => EngineError::corrupt(format!("cannot open {}: {other}", path.display())),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(EngineError::corrupt("wav declares zero channels"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| v as f32 / max)
                        .map_err(|e| EngineError::corrupt(format!("wav decode: {e}")))
                })
                .collect::<EngineResult<Vec<f32>>>()?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| EngineError::corrupt(format!("wav decode: {e}"))))
            .collect::<EngineResult<Vec<f32>>>()?,
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        log::debug!(
            "downmixing {} channels from {}",
            channels,
            path.display()
        );
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(WavAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono float samples as a 32-bit float WAV
///
/// Float output keeps feature extraction over the round-tripped file
/// bit-identical to extraction over the in-memory samples.
pub fn write_wav_mono(path: &Path, samples: &[Sample], sample_rate: u32) -> EngineResult<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| EngineError::corrupt(format!("cannot create {}: {e}", path.display())))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| EngineError::corrupt(format!("wav write: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| EngineError::corrupt(format!("wav finalize: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn float_wav_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples = sine(440.0, 44_100, 44_100);

        write_wav_mono(&path, &samples, 44_100).unwrap();
        let audio = read_wav_mono(&path).unwrap();

        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.samples.len(), samples.len());
        for (a, b) in audio.samples.iter().zip(samples.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn int16_wav_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(i16::MAX).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(i16::MIN).unwrap();
        writer.finalize().unwrap();

        let audio = read_wav_mono(&path).unwrap();
        assert!(audio.samples[0] > 0.99 && audio.samples[0] <= 1.0);
        assert_eq!(audio.samples[1], 0.0);
        assert_eq!(audio.samples[2], -1.0);
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(0.4f32).unwrap();
            writer.write_sample(0.8f32).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_wav_mono(&path).unwrap();
        assert_eq!(audio.samples.len(), 10);
        for &s in &audio.samples {
            assert!((s - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn missing_wav_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_wav_mono(&dir.path().join("nope.wav")),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn duration_accounts_for_rate() {
        let audio = WavAudio {
            samples: vec![0.0; 22_050],
            sample_rate: 44_100,
        };
        assert!((audio.duration() - 0.5).abs() < 1e-9);
    }
}
