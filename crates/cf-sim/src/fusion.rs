//! Multi-evidence similarity fusion
//!
//! Blends the MFCC/DTW alignment with pitch, harmonic, cadence, and energy
//! evidence into one [`SimilarityReport`]. Components only contribute while
//! their confidence clears the floor; when the master predates a component
//! (old cache version) its term drops out and the weights renormalize.

use serde::{Deserialize, Serialize};

use cf_core::{
    EngineError, EngineResult, EnhancedProfile, FeatureView, MasterFeatureRecord,
    SimilarityReport,
};

use crate::dtw::{DtwAlignment, DtwConfig, DtwEngine};

/// Component weights for the blended score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlendWeights {
    /// MFCC/DTW alignment weight
    pub mfcc: f32,
    /// Median-F0 agreement weight
    pub pitch: f32,
    /// Tonal-quality cosine weight
    pub harmonic: f32,
    /// Tempo agreement weight
    pub cadence: f32,
    /// Energy-envelope agreement weight
    pub energy: f32,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            mfcc: 0.5,
            pitch: 0.2,
            harmonic: 0.15,
            cadence: 0.1,
            energy: 0.05,
        }
    }
}

/// Fusion tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Component weights
    pub weights: BlendWeights,
    /// DTW tunables
    pub dtw: DtwConfig,
    /// Components below this confidence are excluded from the blend
    pub confidence_floor: f32,
    /// Cadence needs this much confidence on both sides to contribute
    pub cadence_conf_floor: f32,
    /// Run the subsequence search when `m < ratio · n`
    pub subsequence_ratio: f32,
    /// A path shorter than this fraction of its basis is degenerate
    pub degenerate_path_ratio: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: BlendWeights::default(),
            dtw: DtwConfig::default(),
            confidence_floor: 0.1,
            cadence_conf_floor: 0.5,
            subsequence_ratio: 0.5,
            degenerate_path_ratio: 0.5,
        }
    }
}

/// Everything the session knows about the user side at scoring time
#[derive(Debug, Clone, Copy)]
pub struct UserEvidence<'a> {
    /// The user's MFCC sequence
    pub features: FeatureView<'a>,
    /// Summary built from the session's enhanced analyzers, if any ran
    pub enhanced: Option<EnhancedProfile>,
    /// Harmonic analyzer SNR confidence; the persisted profile block has no
    /// slot for it, so it travels alongside
    pub harmonic_conf: f32,
}

/// Stateful scorer with pooled DTW matrices
pub struct Scorer {
    config: FusionConfig,
    dtw: DtwEngine,
}

impl Scorer {
    /// Scorer with the given tunables
    pub fn new(config: FusionConfig) -> Self {
        let dtw = DtwEngine::new(config.dtw.clone());
        Self { config, dtw }
    }

    /// Score a user recording against a master record
    ///
    /// Never fails for "not enough user data": that case yields a
    /// well-formed report with `readiness = false` and `overall = 0`.
    pub fn score(
        &mut self,
        user: UserEvidence<'_>,
        master: &MasterFeatureRecord,
        min_feature_frames: usize,
    ) -> EngineResult<SimilarityReport> {
        let n = master.frames.len();
        if n == 0 {
            return Err(EngineError::corrupt(format!(
                "master '{}' has no frames",
                master.call_id
            )));
        }
        let m = user.features.len();
        if m == 0 {
            return Ok(SimilarityReport::not_ready());
        }

        let master_view = master.view();
        let full = self.dtw.align(user.features, master_view)?;

        // Short user against long master: also search for the best embedding
        // and keep whichever alignment is tighter.
        let mut best = full;
        let mut subsequence = false;
        if (m as f32) < self.config.subsequence_ratio * n as f32 {
            let relaxed = self.dtw.align_subsequence(user.features, master_view)?;
            if relaxed.normalized_distance < best.normalized_distance {
                best = relaxed;
                subsequence = true;
            }
        }

        let gamma = self.config.dtw.gamma;
        let sim_dtw = best.similarity(gamma);
        let sim_energy = energy_similarity(&best, user.features, master_view, gamma);

        let mut report = SimilarityReport {
            components: Default::default(),
            overall: 0.0,
            confidence: 0.0,
            alignment_path: Some(best.path.clone()),
            readiness: false,
        };
        report.components.mfcc_dtw = sim_dtw;
        report.components.energy = sim_energy;

        // Component confidences; zero excludes a term from the blend.
        let mut conf_pitch = 0.0f32;
        let mut conf_harmonic = 0.0f32;
        let mut conf_cadence = 0.0f32;

        if let (Some(u), Some(mast)) = (user.enhanced.as_ref(), master.enhanced.as_ref()) {
            if u.pitch_median_hz > 0.0 && mast.pitch_median_hz > 0.0 {
                report.components.pitch = pitch_similarity(u.pitch_median_hz, mast.pitch_median_hz);
                conf_pitch = u.pitch_conf.min(mast.pitch_conf);
            }

            report.components.harmonic = tonal_similarity(u, mast);
            conf_harmonic = user.harmonic_conf;

            if u.tempo_conf >= self.config.cadence_conf_floor
                && mast.tempo_conf >= self.config.cadence_conf_floor
            {
                report.components.cadence = cadence_similarity(u.tempo_bpm, mast.tempo_bpm);
                conf_cadence = u.tempo_conf.min(mast.tempo_conf);
            }
        }

        let w = &self.config.weights;
        let floor = self.config.confidence_floor;
        let terms: [(f32, f32, f32); 5] = [
            (w.mfcc, 1.0, report.components.mfcc_dtw),
            (w.pitch, conf_pitch, report.components.pitch),
            (w.harmonic, conf_harmonic, report.components.harmonic),
            (w.cadence, conf_cadence, report.components.cadence),
            (w.energy, 1.0, report.components.energy),
        ];

        let mut num = 0.0f32;
        let mut den = 0.0f32;
        let mut conf_num = 0.0f32;
        let mut conf_den = 0.0f32;
        for &(weight, conf, sim) in &terms {
            if conf > floor {
                num += weight * conf * sim;
                den += weight * conf;
                conf_num += weight * conf;
                conf_den += weight;
            }
        }

        report.confidence = if conf_den > 0.0 {
            (conf_num / conf_den).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // Degeneracy basis: the full grid, or the user length when the score
        // came from an embedded match.
        let basis = if subsequence { m } else { m.max(n) };
        let degenerate =
            (best.path_len as f32) < self.config.degenerate_path_ratio * basis as f32;
        report.readiness = m >= min_feature_frames && !degenerate;

        if report.readiness && den > 0.0 {
            report.overall = (num / den).clamp(0.0, 1.0);
        }

        Ok(report)
    }
}

/// `1 − min(1, |Δcents| / 1200)` with the master median as reference
fn pitch_similarity(user_hz: f32, master_hz: f32) -> f32 {
    let cents = 1200.0 * (user_hz / master_hz).log2();
    (1.0 - (cents.abs() / 1200.0).min(1.0)).clamp(0.0, 1.0)
}

/// Cosine similarity of the clipped tonal-quality vectors
fn tonal_similarity(user: &EnhancedProfile, master: &EnhancedProfile) -> f32 {
    let u = [
        user.rasp.clamp(0.0, 1.0),
        user.brightness.clamp(0.0, 1.0),
        user.resonance.clamp(0.0, 1.0),
        user.roughness.clamp(0.0, 1.0),
    ];
    let m = [
        master.rasp.clamp(0.0, 1.0),
        master.brightness.clamp(0.0, 1.0),
        master.resonance.clamp(0.0, 1.0),
        master.roughness.clamp(0.0, 1.0),
    ];
    let dot: f32 = u.iter().zip(m.iter()).map(|(a, b)| a * b).sum();
    let nu: f32 = u.iter().map(|a| a * a).sum::<f32>().sqrt();
    let nm: f32 = m.iter().map(|a| a * a).sum::<f32>().sqrt();
    if nu <= 0.0 || nm <= 0.0 {
        return 0.0;
    }
    (dot / (nu * nm)).clamp(0.0, 1.0)
}

/// `1 − min(1, |Δtempo| / 60)`
fn cadence_similarity(user_bpm: f32, master_bpm: f32) -> f32 {
    (1.0 - ((user_bpm - master_bpm).abs() / 60.0).min(1.0)).clamp(0.0, 1.0)
}

/// Mean energy gap along the alignment path, mapped like the DTW distance
fn energy_similarity(
    alignment: &DtwAlignment,
    user: FeatureView<'_>,
    master: FeatureView<'_>,
    gamma: f32,
) -> f32 {
    if alignment.path.is_empty() {
        return 0.0;
    }
    let mut acc = 0.0f32;
    for &(i, j) in &alignment.path {
        acc += (user.energy(i as usize) - master.energy(j as usize)).abs();
    }
    let mean = acc / alignment.path.len() as f32;
    (-gamma * mean).exp().clamp(0.0, 1.0)
}
