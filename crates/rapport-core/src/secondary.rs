//! Pluggable secondary estimators.
//!
//! Estimators add optional, named scores on top of the primary fidelity. A
//! failing estimator is dropped from the result; it never aborts a match.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::entity::EntityState;
use crate::error::EstimatorError;
use crate::vector::{padded_cosine, unit_clamp};

pub const KNOT_ESTIMATOR: &str = "knot";
pub const SATISFACTION_ESTIMATOR: &str = "predicted_satisfaction";

/// Dimension value at or above which a dimension counts as a strong interest.
const STRONG_INTEREST: f64 = 0.5;

/// Whether an estimator's score takes part in weighted aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Contributes the structural term of the aggregate.
    Structural,
    /// Reported only.
    Predictive,
}

/// Everything an estimator may look at.
pub struct EstimatorContext<'a> {
    pub reference: &'a EntityState,
    pub targets: &'a [EntityState],
    pub primary_fidelity: f64,
    pub location: Option<f64>,
    pub timing: Option<f64>,
}

pub trait SecondaryEstimator: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> EstimatorKind;
    /// Score in [0, 1]. Non-finite results are treated as failures by the runner.
    fn estimate(&self, ctx: &EstimatorContext<'_>) -> Result<f64, EstimatorError>;
}

/// Successful estimator scores plus the names of the ones that failed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecondaryScores {
    pub scores: BTreeMap<String, f64>,
    pub structural: Vec<f64>,
    pub failed: Vec<String>,
}

impl SecondaryScores {
    /// Mean of the successful structural scores, if any.
    pub fn structural_score(&self) -> Option<f64> {
        if self.structural.is_empty() {
            None
        } else {
            Some(unit_clamp(
                self.structural.iter().sum::<f64>() / self.structural.len() as f64,
            ))
        }
    }
}

/// Run every estimator, keeping successes and recording failures.
pub fn run_estimators(
    estimators: &[Box<dyn SecondaryEstimator>],
    ctx: &EstimatorContext<'_>,
) -> SecondaryScores {
    let mut out = SecondaryScores::default();
    for estimator in estimators {
        let name = estimator.name().to_string();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| estimator.estimate(ctx))) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(estimator = %name, "estimator panicked");
                out.failed.push(name);
                continue;
            }
        };
        match outcome {
            Ok(score) if score.is_finite() => {
                let score = unit_clamp(score);
                if estimator.kind() == EstimatorKind::Structural {
                    out.structural.push(score);
                }
                out.scores.insert(name, score);
            }
            Ok(score) => {
                tracing::warn!(estimator = %name, "estimator returned non-finite score {score}");
                out.failed.push(name);
            }
            Err(e) => {
                tracing::warn!(estimator = %name, "dropping estimator: {e}");
                out.failed.push(name);
            }
        }
    }
    out
}

/// Structural ("knot-style") compatibility approximated by the mean
/// key-aligned vibe cosine between the reference and each other target.
#[derive(Clone, Copy, Debug, Default)]
pub struct KnotStyleEstimator;

impl SecondaryEstimator for KnotStyleEstimator {
    fn name(&self) -> &str {
        KNOT_ESTIMATOR
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Structural
    }

    fn estimate(&self, ctx: &EstimatorContext<'_>) -> Result<f64, EstimatorError> {
        let reference = ctx.reference.state_vector.vibe_map();
        if reference.is_empty() {
            return Err(EstimatorError::Failed("reference has no vibe segment".into()));
        }

        let sims: Vec<f64> = ctx
            .targets
            .iter()
            .filter(|t| t.entity_id != ctx.reference.entity_id)
            .filter_map(|t| {
                let target = t.state_vector.vibe_map();
                if target.is_empty() {
                    return None;
                }
                let (a, b) = aligned(&reference, &target);
                padded_cosine(&a, &b).map(unit_clamp)
            })
            .collect();

        if sims.is_empty() {
            return Err(EstimatorError::Failed("no target shares a vibe segment".into()));
        }
        Ok(sims.iter().sum::<f64>() / sims.len() as f64)
    }
}

/// Predicts satisfaction before any interaction has happened, from primary
/// fidelity, vibe agreement, location/timing presence and shared interests.
#[derive(Clone, Copy, Debug)]
pub struct PredictiveSatisfactionEstimator {
    pub primary_weight: f64,
    pub vibe_weight: f64,
    pub presence_weight: f64,
    pub interest_weight: f64,
}

impl Default for PredictiveSatisfactionEstimator {
    fn default() -> Self {
        Self {
            primary_weight: 0.40,
            vibe_weight: 0.25,
            presence_weight: 0.15,
            interest_weight: 0.20,
        }
    }
}

impl SecondaryEstimator for PredictiveSatisfactionEstimator {
    fn name(&self) -> &str {
        SATISFACTION_ESTIMATOR
    }

    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Predictive
    }

    fn estimate(&self, ctx: &EstimatorContext<'_>) -> Result<f64, EstimatorError> {
        if ctx.targets.is_empty() {
            return Err(EstimatorError::Failed("no targets".into()));
        }
        let presence =
            (ctx.location.is_some() as u8 + ctx.timing.is_some() as u8) as f64 / 2.0;
        let score = self.primary_weight * ctx.primary_fidelity
            + self.vibe_weight * vibe_alignment(ctx)
            + self.presence_weight * presence
            + self.interest_weight * interest_overlap(ctx);
        Ok(unit_clamp(score))
    }
}

/// Mean over targets of the mean `1 − |Δ|` across shared vibe keys.
/// 0.5 when nothing is shared.
fn vibe_alignment(ctx: &EstimatorContext<'_>) -> f64 {
    let reference = ctx.reference.state_vector.vibe_map();
    let per_target: Vec<f64> = ctx
        .targets
        .iter()
        .filter_map(|t| {
            let target = t.state_vector.vibe_map();
            let diffs: Vec<f64> = reference
                .iter()
                .filter_map(|(k, a)| target.get(k).map(|b| 1.0 - (a - b).abs()))
                .collect();
            (!diffs.is_empty()).then(|| diffs.iter().sum::<f64>() / diffs.len() as f64)
        })
        .collect();
    if per_target.is_empty() {
        0.5
    } else {
        unit_clamp(per_target.iter().sum::<f64>() / per_target.len() as f64)
    }
}

/// Jaccard overlap between the reference's strong dimensions and the union
/// of strong dimensions across targets.
fn interest_overlap(ctx: &EstimatorContext<'_>) -> f64 {
    let reference = strong_dimensions(ctx.reference);
    let targets: BTreeSet<String> = ctx.targets.iter().flat_map(strong_dimensions).collect();
    let union = reference.union(&targets).count();
    if union == 0 {
        return 0.0;
    }
    reference.intersection(&targets).count() as f64 / union as f64
}

fn strong_dimensions(state: &EntityState) -> BTreeSet<String> {
    state
        .state_vector
        .named_dimensions()
        .into_iter()
        .filter(|(_, v)| *v >= STRONG_INTEREST)
        .map(|(k, _)| k)
        .collect()
}

/// Vectors over the union of both key sets, missing keys as 0.
fn aligned(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> (Vec<f64>, Vec<f64>) {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    keys.into_iter()
        .map(|k| {
            (
                a.get(k).copied().unwrap_or(0.0),
                b.get(k).copied().unwrap_or(0.0),
            )
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SegmentInputs, assemble_vector};
    use crate::entity::EntityType;
    use crate::providers::DimensionMap;
    use approx::assert_abs_diff_eq;

    fn dims(pairs: &[(&str, f64)]) -> DimensionMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn entity(id: &str, personality: &[(&str, f64)], vibe: &[(&str, f64)]) -> EntityState {
        let inputs = SegmentInputs {
            personality: dims(personality),
            vibe: dims(vibe),
            ..SegmentInputs::default()
        };
        EntityState::new(id, EntityType::Event, assemble_vector(&inputs).unwrap())
    }

    fn ctx<'a>(reference: &'a EntityState, targets: &'a [EntityState]) -> EstimatorContext<'a> {
        EstimatorContext {
            reference,
            targets,
            primary_fidelity: 0.8,
            location: None,
            timing: None,
        }
    }

    struct Broken;

    impl SecondaryEstimator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn kind(&self) -> EstimatorKind {
            EstimatorKind::Structural
        }
        fn estimate(&self, _: &EstimatorContext<'_>) -> Result<f64, EstimatorError> {
            Err(EstimatorError::Failed("boom".into()))
        }
    }

    struct NotANumber;

    impl SecondaryEstimator for NotANumber {
        fn name(&self) -> &str {
            "nan"
        }
        fn kind(&self) -> EstimatorKind {
            EstimatorKind::Predictive
        }
        fn estimate(&self, _: &EstimatorContext<'_>) -> Result<f64, EstimatorError> {
            Ok(f64::NAN)
        }
    }

    struct Panicky;

    impl SecondaryEstimator for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn kind(&self) -> EstimatorKind {
            EstimatorKind::Structural
        }
        fn estimate(&self, _: &EstimatorContext<'_>) -> Result<f64, EstimatorError> {
            panic!("estimator bug")
        }
    }

    #[test]
    fn test_panicking_estimator_dropped() {
        let r = entity("r", &[], &[("calm", 0.7)]);
        let t = vec![entity("t", &[], &[("calm", 0.6)])];
        let estimators: Vec<Box<dyn SecondaryEstimator>> =
            vec![Box::new(Panicky), Box::new(KnotStyleEstimator)];
        let out = run_estimators(&estimators, &ctx(&r, &t));
        assert_eq!(out.failed, vec!["panicky".to_string()]);
        assert!(out.scores.contains_key(KNOT_ESTIMATOR));
        assert_eq!(out.structural.len(), 1);
    }

    #[test]
    fn test_knot_identical_vibes() {
        let r = entity("r", &[], &[("calm", 0.7), ("social", 0.2)]);
        let t = vec![entity("t", &[("x", 0.1)], &[("calm", 0.7), ("social", 0.2)])];
        let score = KnotStyleEstimator.estimate(&ctx(&r, &t)).unwrap();
        assert_abs_diff_eq!(score, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_knot_key_alignment() {
        // disjoint keys → orthogonal after alignment
        let r = entity("r", &[], &[("calm", 0.7)]);
        let t = vec![entity("t", &[], &[("loud", 0.7)])];
        let score = KnotStyleEstimator.estimate(&ctx(&r, &t)).unwrap();
        assert_abs_diff_eq!(score, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_knot_skips_reference_in_targets() {
        let r = entity("r", &[], &[("calm", 0.9)]);
        let t = vec![r.clone(), entity("t", &[], &[("loud", 0.4)])];
        let score = KnotStyleEstimator.estimate(&ctx(&r, &t)).unwrap();
        assert_abs_diff_eq!(score, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_knot_fails_without_vibe() {
        let r = entity("r", &[("openness", 0.4)], &[]);
        let t = vec![entity("t", &[], &[("calm", 0.5)])];
        assert!(KnotStyleEstimator.estimate(&ctx(&r, &t)).is_err());
    }

    #[test]
    fn test_satisfaction_blend() {
        let r = entity("r", &[("openness", 0.9)], &[("calm", 0.6)]);
        let t = vec![entity("t", &[("openness", 0.8)], &[("calm", 0.4)])];
        let mut c = ctx(&r, &t);
        c.timing = Some(0.7);
        let score = PredictiveSatisfactionEstimator::default().estimate(&c).unwrap();
        // primary 0.8, vibe 1 − 0.2 = 0.8, presence 0.5,
        // strong dims: ref {openness, vibe:calm}, targets {openness} → 1/2
        let expected = 0.40 * 0.8 + 0.25 * 0.8 + 0.15 * 0.5 + 0.20 * 0.5;
        assert_abs_diff_eq!(score, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_runner_drops_failures() {
        let r = entity("r", &[], &[("calm", 0.7)]);
        let t = vec![entity("t", &[], &[("calm", 0.7)])];
        let estimators: Vec<Box<dyn SecondaryEstimator>> = vec![
            Box::new(Broken),
            Box::new(KnotStyleEstimator),
            Box::new(NotANumber),
        ];
        let out = run_estimators(&estimators, &ctx(&r, &t));
        assert_eq!(out.failed, vec!["broken".to_string(), "nan".to_string()]);
        assert_eq!(out.scores.len(), 1);
        assert!(out.scores.contains_key(KNOT_ESTIMATOR));
        assert_abs_diff_eq!(out.structural_score().unwrap(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_structural_score_without_structural_success() {
        let out = SecondaryScores::default();
        assert!(out.structural_score().is_none());
    }
}
