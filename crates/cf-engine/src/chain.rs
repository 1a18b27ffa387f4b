//! Per-session analysis chain
//!
//! One chain owns everything between raw samples and scored evidence:
//! framer → VAD gate → MFCC extractor → feature store, with the enhanced
//! analyzers riding alongside. The offline master-bake path runs the exact
//! same chain over a whole buffer, so streamed and baked features agree
//! sample for sample.

use cf_analyze::{
    CadenceAnalyzer, CadenceConfig, Finalizable, FrameAnalyzer, HarmonicAnalyzer, HarmonicConfig,
    PitchConfig, PitchReading, PitchTracker,
};
use cf_core::{
    EngineResult, EnhancedProfile, ExtractorParams, FeatureFrame, FeatureSequence, FeatureView,
    Sample, SessionConfig,
};
use cf_dsp::viz::{LevelMeter, LevelSnapshot, WaveformBucket, WaveformSummary};
use cf_dsp::{MfccExtractor, VoiceGate};

use crate::framer::Framer;

/// Waveform overview bucket duration
const WAVEFORM_BUCKET_MS: f32 = 20.0;
/// Level meter RMS window
const LEVEL_WINDOW_MS: f32 = 300.0;

/// Streaming statistics exposed to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChainStats {
    /// Every sample accepted, including gated silence
    pub total_samples: u64,
    /// Every window seen by the gate
    pub total_frames: u64,
    /// Windows forwarded past the gate (equals the feature count)
    pub voiced_frames: u64,
    /// Seconds of audio accepted
    pub duration_seconds: f64,
}

/// Full per-session pipeline state
pub struct AnalysisChain {
    config: SessionConfig,
    framer: Framer,
    gate: VoiceGate,
    extractor: MfccExtractor,
    pitch: Option<PitchTracker>,
    harmonic: Option<HarmonicAnalyzer>,
    cadence: Option<CadenceAnalyzer>,
    features: FeatureSequence,
    meter: LevelMeter,
    waveform: WaveformSummary,
    coeff_scratch: Vec<f32>,
    stats: ChainStats,
}

impl AnalysisChain {
    /// Build a chain for a validated configuration
    pub fn new(config: SessionConfig) -> EngineResult<Self> {
        let extractor = MfccExtractor::new(&config)?;
        let pitch = if config.enable_pitch {
            Some(PitchTracker::new(
                PitchConfig::default(),
                config.sample_rate,
                config.hop_size,
            )?)
        } else {
            None
        };
        let harmonic = config
            .enable_harmonic
            .then(|| HarmonicAnalyzer::new(HarmonicConfig::default(), config.sample_rate));
        let cadence = config
            .enable_cadence
            .then(|| CadenceAnalyzer::new(CadenceConfig::default(), config.sample_rate));

        Ok(Self {
            framer: Framer::new(config.frame_size, config.hop_size),
            gate: VoiceGate::new(config.vad.clone(), config.sample_rate, config.hop_size),
            coeff_scratch: vec![0.0; config.mfcc_coeffs],
            features: FeatureSequence::new(),
            meter: LevelMeter::new(config.sample_rate, LEVEL_WINDOW_MS),
            waveform: WaveformSummary::new(config.sample_rate, WAVEFORM_BUCKET_MS),
            pitch,
            harmonic,
            cadence,
            extractor,
            stats: ChainStats::default(),
            config,
        })
    }

    /// Configuration this chain runs with
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Extraction parameters for master compatibility checks
    pub fn params(&self) -> ExtractorParams {
        ExtractorParams {
            sample_rate: self.config.sample_rate,
            frame_size: self.config.frame_size as u32,
            hop_size: self.config.hop_size as u32,
            mfcc_coeffs: self.config.mfcc_coeffs as u32,
            n_filters: self.config.n_filters as u32,
        }
    }

    /// Feed one chunk of already-validated samples through the pipeline
    pub fn process(&mut self, samples: &[Sample]) -> EngineResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        self.stats.total_samples += samples.len() as u64;
        self.stats.duration_seconds =
            self.stats.total_samples as f64 / self.config.sample_rate as f64;

        self.meter.process_block(samples);
        self.waveform.process_block(samples);

        // Harmonic and cadence listen to the raw stream: onsets and spectral
        // texture need the silence context the gate removes.
        if let Some(harmonic) = self.harmonic.as_mut() {
            harmonic.process_block(samples);
        }
        if let Some(cadence) = self.cadence.as_mut() {
            cadence.process_block(samples);
        }

        let hop_seconds = self.config.hop_seconds();
        let gate = &mut self.gate;
        let extractor = &mut self.extractor;
        let mut pitch = self.pitch.as_mut();
        let features = &mut self.features;
        let coeffs = &mut self.coeff_scratch;
        let stats = &mut self.stats;

        let mut result = Ok(());
        self.framer.push(samples, |frame, index| {
            if result.is_err() {
                return;
            }
            stats.total_frames += 1;
            if !gate.offer(frame) {
                return;
            }
            let timestamp = index as f64 * hop_seconds;
            match extractor.extract(frame, coeffs) {
                Ok(energy) => {
                    features.push(FeatureFrame {
                        coeffs: coeffs.clone(),
                        energy,
                        timestamp,
                    });
                    stats.voiced_frames += 1;
                    if let Some(tracker) = pitch.as_deref_mut() {
                        tracker.process_frame(frame, timestamp);
                    }
                }
                Err(e) => result = Err(e),
            }
        });
        result
    }

    /// Extracted features so far
    pub fn features(&self) -> FeatureView<'_> {
        self.features.view()
    }

    /// Number of feature frames extracted
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Fingerprint of the features extracted so far
    pub fn fingerprint(&self) -> u64 {
        self.features.fingerprint()
    }

    /// Take the feature store out of a finished chain
    pub fn into_features(self) -> FeatureSequence {
        self.features
    }

    /// Per-frame pitch readings, when the tracker is enabled
    pub fn pitch_readings(&self) -> &[PitchReading] {
        self.pitch.as_ref().map(|p| p.readings()).unwrap_or(&[])
    }

    /// Streaming statistics
    pub fn stats(&self) -> ChainStats {
        self.stats
    }

    /// Current level meter readout
    pub fn level(&self) -> LevelSnapshot {
        self.meter.snapshot()
    }

    /// Completed waveform overview buckets
    pub fn waveform(&self) -> &[WaveformBucket] {
        self.waveform.buckets()
    }

    /// Summarize the enhanced analyzers, if any ran
    ///
    /// Returns the profile plus the harmonic SNR confidence, which has no
    /// slot in the persisted profile block.
    pub fn enhanced_profile(&self) -> (Option<EnhancedProfile>, f32) {
        if self.pitch.is_none() && self.harmonic.is_none() && self.cadence.is_none() {
            return (None, 0.0);
        }

        let pitch = self.pitch.as_ref().map(|p| p.profile()).unwrap_or_default();
        let harmonic = self
            .harmonic
            .as_ref()
            .map(|h| h.profile())
            .unwrap_or_default();
        let cadence = self
            .cadence
            .as_ref()
            .map(|c| c.profile())
            .unwrap_or_default();

        let profile = EnhancedProfile {
            pitch_median_hz: pitch.median_f0_hz,
            pitch_conf: pitch.confidence,
            centroid_hz: harmonic.centroid_hz,
            spread_hz: harmonic.spread_hz,
            rasp: harmonic.rasp,
            brightness: harmonic.brightness,
            resonance: harmonic.resonance,
            roughness: harmonic.roughness,
            tempo_bpm: cadence.tempo_bpm,
            tempo_conf: cadence.confidence,
        };
        (Some(profile), harmonic.confidence)
    }
}

/// Run the full chain over a finished recording and build a master record
///
/// This is the cache-bake path: identical semantics to streaming the same
/// PCM through a session, so a user imitating the reference against itself
/// scores as a perfect match.
pub fn extract_master_record(
    call_id: &str,
    samples: &[Sample],
    sample_rate: u32,
    base: &SessionConfig,
) -> EngineResult<cf_core::MasterFeatureRecord> {
    cf_core::validate_samples(samples)?;
    let config = SessionConfig {
        sample_rate,
        ..base.clone()
    };
    let mut chain = AnalysisChain::new(config)?;
    chain.process(samples)?;

    if chain.feature_count() == 0 {
        return Err(cf_core::EngineError::invalid_audio(format!(
            "recording for '{call_id}' has no voiced content"
        )));
    }

    let params = chain.params();
    let (enhanced, _) = chain.enhanced_profile();
    let frames = chain.into_features().into_frames();
    Ok(cf_core::MasterFeatureRecord::from_frames(
        call_id, params, frames, enhanced,
    ))
}
