//! Dynamic time warping over MFCC sequences
//!
//! Standard three-neighbor recurrence with Euclidean local cost, constrained
//! to a Sakoe–Chiba band around the scaled diagonal. The cost matrix is
//! pooled and reused across calls so steady-state alignment does not
//! allocate. A relaxed variant frees the start and end columns on the master
//! side for short-user subsequence search.

use serde::{Deserialize, Serialize};

use cf_core::{AlignmentStep, EngineError, EngineResult, FeatureView};

/// DTW tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtwConfig {
    /// Minimum band half-width in frames
    pub band_floor: usize,
    /// Band half-width as a fraction of the longer sequence
    pub band_ratio: f32,
    /// Exponential mapping rate applied to the per-coefficient average
    /// step distance: `sim = exp(-gamma * d̄ / dims)`
    pub gamma: f32,
    /// Alignment paths longer than this are downsampled
    pub max_path_steps: usize,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            band_floor: 20,
            band_ratio: 0.1,
            gamma: 0.5,
            max_path_steps: 4_096,
        }
    }
}

/// Result of one alignment pass
#[derive(Debug, Clone)]
pub struct DtwAlignment {
    /// Accumulated cost divided by traced path length
    pub normalized_distance: f32,
    /// Coefficients per compared vector
    pub dims: usize,
    /// Steps in the traced path before downsampling
    pub path_len: usize,
    /// (user, master) index pairs, bounded by `max_path_steps`
    pub path: Vec<AlignmentStep>,
}

impl DtwAlignment {
    /// Map the normalized distance to a similarity in [0, 1]
    ///
    /// The per-step distance is spread over the coefficient count first, so
    /// the mapping stays comparable across coefficient configurations and
    /// the default `gamma` separates like from unlike audio instead of
    /// saturating at zero.
    pub fn similarity(&self, gamma: f32) -> f32 {
        let per_coeff = self.normalized_distance / self.dims.max(1) as f32;
        (-gamma * per_coeff).exp().clamp(0.0, 1.0)
    }
}

/// DTW engine with a pooled cost matrix
pub struct DtwEngine {
    config: DtwConfig,
    /// Flat `(m + 1) × (n + 1)` accumulated-cost matrix, reused across calls
    cost: Vec<f32>,
    /// Scratch for the traced path, reused across calls
    trace: Vec<AlignmentStep>,
}

impl DtwEngine {
    /// Engine with the given tunables
    pub fn new(config: DtwConfig) -> Self {
        Self {
            config,
            cost: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Tunables in use
    pub fn config(&self) -> &DtwConfig {
        &self.config
    }

    /// Band half-width for sequence lengths `m` and `n`
    fn band_width(&self, m: usize, n: usize) -> usize {
        let longest = m.max(n);
        let ratio = (self.config.band_ratio * longest as f32).ceil() as usize;
        self.config.band_floor.max(ratio).max(m.abs_diff(n))
    }

    /// Full alignment: both endpoints pinned
    pub fn align(&mut self, user: FeatureView<'_>, master: FeatureView<'_>) -> EngineResult<DtwAlignment> {
        self.run(user, master, false)
    }

    /// Subsequence alignment: master start and end columns are free
    pub fn align_subsequence(
        &mut self,
        user: FeatureView<'_>,
        master: FeatureView<'_>,
    ) -> EngineResult<DtwAlignment> {
        self.run(user, master, true)
    }

    fn run(
        &mut self,
        user: FeatureView<'_>,
        master: FeatureView<'_>,
        free_master_ends: bool,
    ) -> EngineResult<DtwAlignment> {
        let m = user.len();
        let n = master.len();
        if m == 0 || n == 0 {
            return Err(EngineError::InsufficientData {
                have: m.min(n),
                need: 1,
            });
        }

        let width = (n + 1) * (m + 1);
        self.cost.clear();
        self.cost.resize(width, f32::INFINITY);
        let cols = n + 1;
        let idx = |i: usize, j: usize| i * cols + j;

        self.cost[idx(0, 0)] = 0.0;
        if free_master_ends {
            for j in 1..=n {
                self.cost[idx(0, j)] = 0.0;
            }
        }

        let band = if free_master_ends { n } else { self.band_width(m, n) };

        for i in 1..=m {
            // Center the band on the scaled diagonal.
            let center = i * n / m;
            let j_lo = center.saturating_sub(band).max(1);
            let j_hi = (center + band).min(n);
            let coeffs_u = user.coeffs(i - 1);
            for j in j_lo..=j_hi {
                let d = euclidean(coeffs_u, master.coeffs(j - 1));
                let prev = self.cost[idx(i - 1, j)]
                    .min(self.cost[idx(i, j - 1)])
                    .min(self.cost[idx(i - 1, j - 1)]);
                if prev.is_finite() {
                    self.cost[idx(i, j)] = d + prev;
                }
            }
        }

        // End column: pinned at n, or the cheapest column in the last row.
        let mut end_j = n;
        if free_master_ends {
            let mut best = f32::INFINITY;
            for j in 1..=n {
                let c = self.cost[idx(m, j)];
                if c < best {
                    best = c;
                    end_j = j;
                }
            }
        }
        let total = self.cost[idx(m, end_j)];
        if !total.is_finite() {
            return Err(EngineError::internal(format!(
                "dtw band left no feasible path for {m}x{n}"
            )));
        }

        // Backtrace by cheapest predecessor.
        self.trace.clear();
        let (mut i, mut j) = (m, end_j);
        while i > 0 {
            self.trace.push(((i - 1) as u32, (j - 1) as u32));
            if j == 1 && !free_master_ends {
                i -= 1;
                continue;
            }
            if free_master_ends && i == 1 {
                break;
            }
            let diag = self.cost[idx(i - 1, j - 1)];
            let up = self.cost[idx(i - 1, j)];
            let left = if j > 1 { self.cost[idx(i, j - 1)] } else { f32::INFINITY };
            if diag <= up && diag <= left {
                i -= 1;
                j -= 1;
            } else if up <= left {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        self.trace.reverse();

        let path_len = self.trace.len().max(1);
        let normalized_distance = total / path_len as f32;

        Ok(DtwAlignment {
            normalized_distance,
            dims: user.coeffs(0).len(),
            path_len,
            path: downsample_path(&self.trace, self.config.max_path_steps),
        })
    }
}

/// Euclidean distance between coefficient vectors
fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Uniformly thin a path to at most `cap` steps
fn downsample_path(path: &[AlignmentStep], cap: usize) -> Vec<AlignmentStep> {
    if path.len() <= cap {
        return path.to_vec();
    }
    let stride = path.len() as f64 / cap as f64;
    (0..cap)
        .map(|k| path[(k as f64 * stride) as usize])
        .collect()
}
