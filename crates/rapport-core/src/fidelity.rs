//! Primary fidelity between a reference vector and a combined representation.
//!
//! When the combined vector is longer than the reference it is projected back
//! down: evenly divisible lengths are chunk-averaged (marginalizing over the
//! extra entities folded into it), other lengths are truncated. A shorter
//! combined vector falls back to a coefficient-weighted cosine against each
//! target's own vector. Every path terminates with a value in [0, 1].

use serde::{Deserialize, Serialize};

use crate::constants::{NEUTRAL_FIDELITY, NORM_FLOOR, WEIGHT_EPSILON};
use crate::entanglement::CombinedRepresentation;
use crate::vector::{dot, norm, normalized, padded_cosine, unit_clamp};

/// Which reconciliation path produced a fidelity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ProjectionPath {
    /// Same dimensionality, direct inner product.
    Direct,
    /// Combined vector reshaped into `chunks` blocks and averaged.
    ChunkAverage { chunks: usize },
    /// Combined vector cut to the reference length.
    Truncated,
    /// Combined vector shorter than the reference.
    WeightedCosine,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FidelityOutcome {
    pub fidelity: f64,
    pub path: ProjectionPath,
    /// True when some step had no usable direction and the neutral value stood in.
    pub neutral: bool,
}

impl FidelityOutcome {
    fn scored(fidelity: f64, path: ProjectionPath) -> Self {
        Self {
            fidelity: unit_clamp(fidelity),
            path,
            neutral: false,
        }
    }

    fn neutral(path: ProjectionPath) -> Self {
        tracing::debug!(?path, "no signal in projection, using neutral fidelity");
        Self {
            fidelity: NEUTRAL_FIDELITY,
            path,
            neutral: true,
        }
    }
}

/// `clamp(⟨a, b⟩², 0, 1)` for equal-length inputs. `None` when either side
/// is below `NORM_FLOOR`.
pub fn direct_fidelity(a: &[f64], b: &[f64]) -> Option<f64> {
    if norm(a) < NORM_FLOOR || norm(b) < NORM_FLOOR {
        return None;
    }
    let ip = dot(a, b);
    Some(unit_clamp(ip * ip))
}

/// Element-wise mean of `v` split into consecutive blocks of `width`.
/// `v.len()` must be a multiple of `width`.
pub fn chunk_average(v: &[f64], width: usize) -> Vec<f64> {
    let chunks = v.len() / width;
    let mut out = vec![0.0; width];
    for chunk in v.chunks_exact(width) {
        for (acc, x) in out.iter_mut().zip(chunk) {
            *acc += x;
        }
    }
    for x in &mut out {
        *x /= chunks as f64;
    }
    out
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CompatibilityScorer;

impl CompatibilityScorer {
    pub fn score(&self, reference: &[f64], combined: &CombinedRepresentation) -> FidelityOutcome {
        let d_ref = reference.len();
        let d_comb = combined.vector.len();

        let outcome = if d_ref == 0 {
            FidelityOutcome::neutral(ProjectionPath::Direct)
        } else if d_ref == d_comb {
            Self::project(reference, Some(combined.vector.clone()), ProjectionPath::Direct)
        } else if d_comb > d_ref && d_comb % d_ref == 0 {
            let path = ProjectionPath::ChunkAverage {
                chunks: d_comb / d_ref,
            };
            let projected = normalized(&chunk_average(&combined.vector, d_ref));
            Self::project(reference, projected, path)
        } else if d_comb > d_ref {
            let projected = normalized(&combined.vector[..d_ref]);
            Self::project(reference, projected, ProjectionPath::Truncated)
        } else {
            Self::weighted_cosine(reference, combined)
        };

        tracing::debug!(
            d_ref,
            d_comb,
            path = ?outcome.path,
            fidelity = outcome.fidelity,
            "primary fidelity"
        );
        outcome
    }

    fn project(
        reference: &[f64],
        projected: Option<Vec<f64>>,
        path: ProjectionPath,
    ) -> FidelityOutcome {
        match projected.and_then(|p| direct_fidelity(reference, &p)) {
            Some(f) => FidelityOutcome::scored(f, path),
            None => FidelityOutcome::neutral(path),
        }
    }

    /// Σ c_i² · cos(ref, target_i) / Σ c_i², cosines clamped to [0, 1].
    fn weighted_cosine(reference: &[f64], combined: &CombinedRepresentation) -> FidelityOutcome {
        let mut weighted = 0.0;
        let mut total = 0.0;
        let mut substituted = false;

        for (c, component) in combined.coefficients.iter().zip(&combined.components) {
            let w = c * c;
            if w < WEIGHT_EPSILON {
                continue;
            }
            let cos = match padded_cosine(reference, component) {
                Some(cos) => unit_clamp(cos),
                None => {
                    substituted = true;
                    NEUTRAL_FIDELITY
                }
            };
            weighted += w * cos;
            total += w;
        }

        if total < WEIGHT_EPSILON {
            return FidelityOutcome::neutral(ProjectionPath::WeightedCosine);
        }
        let mut outcome = FidelityOutcome::scored(weighted / total, ProjectionPath::WeightedCosine);
        outcome.neutral = substituted;
        outcome
    }
}
