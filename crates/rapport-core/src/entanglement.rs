//! Combining several target states into one representation.
//!
//! Each target gets a coefficient `c_i` with `Σ c_i² = 1`. Targets whose
//! vectors all have the same length are superposed (weighted element-wise sum,
//! renormalized); otherwise the coefficient-scaled vectors are concatenated and
//! the scorer's projection step deals with the extra dimensions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{COEFFICIENT_TOLERANCE, WEIGHT_EPSILON};
use crate::entity::{EntityState, EntityType};
use crate::error::{MatchError, Result};
use crate::time::Timestamp;
use crate::vector::normalized;

/// How per-target coefficients are chosen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum WeightingPolicy {
    /// `c_i = 1/√N`.
    #[default]
    Equal,
    /// Raw weight per entity type; types not listed weigh 1.0.
    TypePriority { priorities: BTreeMap<EntityType, f64> },
    /// Exponential decay on target age with the given half-life.
    Recency { half_life_hours: f64 },
}

impl WeightingPolicy {
    /// Type priorities used when none are configured.
    pub fn default_type_priority() -> Self {
        WeightingPolicy::TypePriority {
            priorities: BTreeMap::from([
                (EntityType::Agent, 1.0),
                (EntityType::Event, 1.0),
                (EntityType::ExpertEntity, 0.9),
                (EntityType::Venue, 0.8),
                (EntityType::BusinessEntity, 0.7),
            ]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            WeightingPolicy::Equal => Ok(()),
            WeightingPolicy::TypePriority { priorities } => {
                match priorities.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
                    Some((t, w)) => Err(MatchError::InvalidConfig(format!(
                        "weighting: priority for {t} must be finite and non-negative, got {w}"
                    ))),
                    None => Ok(()),
                }
            }
            WeightingPolicy::Recency { half_life_hours } => {
                if half_life_hours.is_finite() && *half_life_hours > 0.0 {
                    Ok(())
                } else {
                    Err(MatchError::InvalidConfig(format!(
                        "weighting: half_life_hours must be positive, got {half_life_hours}"
                    )))
                }
            }
        }
    }

    fn raw_weight(&self, state: &EntityState, now: Timestamp) -> f64 {
        let w = match self {
            WeightingPolicy::Equal => 1.0,
            WeightingPolicy::TypePriority { priorities } => {
                priorities.get(&state.entity_type).copied().unwrap_or(1.0)
            }
            WeightingPolicy::Recency { half_life_hours } => {
                if *half_life_hours <= 0.0 {
                    1.0
                } else {
                    let age = now.hours_since(state.created_at);
                    (-age / half_life_hours).exp2()
                }
            }
        };
        if w.is_finite() { w.max(0.0) } else { 0.0 }
    }
}

/// How the combined vector was formed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMode {
    /// All non-empty targets had the same length.
    Superposed,
    /// Lengths differed; coefficient-scaled vectors laid end to end.
    Concatenated,
    /// No target contributed a value.
    Empty,
}

/// Joint representation of all targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedRepresentation {
    pub vector: Vec<f64>,
    /// One per target, in input order. Squares sum to 1 unless every target was empty.
    pub coefficients: Vec<f64>,
    /// Each target's own vector, in input order.
    pub components: Vec<Vec<f64>>,
    pub mode: CombinationMode,
    /// `target:<id>` for every target whose vector was empty.
    pub degraded: Vec<String>,
}

impl CombinedRepresentation {
    /// Build directly from a literal vector, e.g. a precomputed aggregate.
    pub fn from_parts(vector: Vec<f64>, coefficients: Vec<f64>, components: Vec<Vec<f64>>) -> Self {
        Self {
            vector,
            coefficients,
            components,
            mode: CombinationMode::Concatenated,
            degraded: Vec::new(),
        }
    }

    pub fn coefficient_square_sum(&self) -> f64 {
        self.coefficients.iter().map(|c| c * c).sum()
    }
}

#[derive(Clone, Debug, Default)]
pub struct EntanglementCombiner {
    policy: WeightingPolicy,
}

impl EntanglementCombiner {
    pub fn new(policy: WeightingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WeightingPolicy {
        &self.policy
    }

    /// Combine `targets` as of `now` (used by recency weighting).
    pub fn combine(&self, targets: &[EntityState], now: Timestamp) -> CombinedRepresentation {
        let components: Vec<Vec<f64>> = targets
            .iter()
            .map(|t| t.state_vector.values.clone())
            .collect();

        let mut degraded = Vec::new();
        for t in targets.iter().filter(|t| t.state_vector.is_empty()) {
            degraded.push(format!("target:{}", t.entity_id));
        }

        let coefficients = self.coefficients(targets, now);

        let lengths: Vec<usize> = components
            .iter()
            .filter(|c| !c.is_empty())
            .map(Vec::len)
            .collect();

        let (vector, mode) = match lengths.first() {
            None => (Vec::new(), CombinationMode::Empty),
            Some(&len) if lengths.iter().all(|&l| l == len) => {
                let mut sum = vec![0.0; len];
                for (c, v) in coefficients.iter().zip(&components) {
                    if v.is_empty() {
                        continue;
                    }
                    for (acc, x) in sum.iter_mut().zip(v) {
                        *acc += c * x;
                    }
                }
                // Below NORM_FLOOR the raw sum is kept; the scorer treats it as no signal.
                let vector = normalized(&sum).unwrap_or(sum);
                (vector, CombinationMode::Superposed)
            }
            Some(_) => {
                let vector = coefficients
                    .iter()
                    .zip(&components)
                    .flat_map(|(c, v)| v.iter().map(move |x| c * x))
                    .collect();
                (vector, CombinationMode::Concatenated)
            }
        };

        tracing::debug!(
            targets = targets.len(),
            dim = vector.len(),
            ?mode,
            "combined target states"
        );

        CombinedRepresentation {
            vector,
            coefficients,
            components,
            mode,
            degraded,
        }
    }

    /// Policy coefficients with empty targets zeroed and Σc² forced to 1.
    fn coefficients(&self, targets: &[EntityState], now: Timestamp) -> Vec<f64> {
        let mut weights: Vec<f64> = targets
            .iter()
            .map(|t| {
                if t.state_vector.is_empty() {
                    0.0
                } else {
                    self.policy.raw_weight(t, now)
                }
            })
            .collect();

        let mut total: f64 = weights.iter().sum();
        if total < WEIGHT_EPSILON {
            // Policy produced nothing usable; fall back to equal weights.
            weights = targets
                .iter()
                .map(|t| if t.state_vector.is_empty() { 0.0 } else { 1.0 })
                .collect();
            total = weights.iter().sum();
        }
        if total < WEIGHT_EPSILON {
            return vec![0.0; targets.len()];
        }

        let mut coefficients: Vec<f64> = weights.iter().map(|w| (w / total).sqrt()).collect();
        renormalize(&mut coefficients);
        coefficients
    }
}

/// Rescale so Σc² = 1 when it has drifted beyond `COEFFICIENT_TOLERANCE`.
pub fn renormalize(coefficients: &mut [f64]) {
    let sq: f64 = coefficients.iter().map(|c| c * c).sum();
    if sq < WEIGHT_EPSILON || (sq - 1.0).abs() <= COEFFICIENT_TOLERANCE {
        return;
    }
    tracing::debug!(square_sum = sq, "renormalizing combination coefficients");
    let n = sq.sqrt();
    for c in coefficients.iter_mut() {
        *c /= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StateVector;
    use approx::assert_abs_diff_eq;

    fn state(id: &str, kind: EntityType, values: Vec<f64>) -> EntityState {
        EntityState::new(id, kind, StateVector::from_values(values))
    }

    #[test]
    fn test_equal_coefficients() {
        let targets = vec![
            state("a", EntityType::Event, vec![1.0, 0.0]),
            state("b", EntityType::Event, vec![0.0, 1.0]),
            state("c", EntityType::Event, vec![1.0, 1.0]),
            state("d", EntityType::Event, vec![0.5, 0.2]),
        ];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        for c in &combined.coefficients {
            assert_abs_diff_eq!(*c, 0.5, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(combined.coefficient_square_sum(), 1.0, epsilon = 1e-12);
        assert_eq!(combined.mode, CombinationMode::Superposed);
    }

    #[test]
    fn test_superposition_is_unit_length() {
        let targets = vec![
            state("a", EntityType::Event, vec![1.0, 0.0]),
            state("b", EntityType::Event, vec![0.0, 1.0]),
        ];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        let s = 1.0 / 2f64.sqrt();
        assert_abs_diff_eq!(combined.vector[0], s, epsilon = 1e-12);
        assert_abs_diff_eq!(combined.vector[1], s, epsilon = 1e-12);
    }

    #[test]
    fn test_single_target_passes_through() {
        let targets = vec![state("a", EntityType::Venue, vec![0.3; 10])];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        assert_eq!(combined.coefficients, vec![1.0]);
        for (a, b) in combined.vector.iter().zip(&targets[0].state_vector.values) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_mixed_lengths_concatenate() {
        let targets = vec![
            state("a", EntityType::Event, vec![1.0, 0.0, 0.0]),
            state("b", EntityType::Venue, vec![0.0, 1.0]),
        ];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        assert_eq!(combined.mode, CombinationMode::Concatenated);
        assert_eq!(combined.vector.len(), 5);
        let s = 1.0 / 2f64.sqrt();
        assert_abs_diff_eq!(combined.vector[0], s, epsilon = 1e-12);
        assert_abs_diff_eq!(combined.vector[4], s, epsilon = 1e-12);
        // unit components scaled by coefficients keep unit norm overall
        assert_abs_diff_eq!(crate::vector::norm(&combined.vector), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_target_zeroed_and_reported() {
        let targets = vec![
            state("a", EntityType::Event, vec![1.0, 0.0]),
            EntityState::new("ghost", EntityType::Event, StateVector::default()),
            state("b", EntityType::Event, vec![0.0, 1.0]),
        ];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        assert_eq!(combined.coefficients.len(), 3);
        assert_eq!(combined.coefficients[1], 0.0);
        assert_abs_diff_eq!(combined.coefficient_square_sum(), 1.0, epsilon = 1e-12);
        assert_eq!(combined.degraded, vec!["target:ghost".to_string()]);
        assert_eq!(combined.mode, CombinationMode::Superposed);
    }

    #[test]
    fn test_all_targets_empty() {
        let targets = vec![EntityState::new("x", EntityType::Event, StateVector::default())];
        let combined = EntanglementCombiner::default().combine(&targets, Timestamp(0));
        assert_eq!(combined.mode, CombinationMode::Empty);
        assert!(combined.vector.is_empty());
        assert_eq!(combined.coefficients, vec![0.0]);
    }

    #[test]
    fn test_type_priority_weights() {
        let policy = WeightingPolicy::default_type_priority();
        let targets = vec![
            state("ev", EntityType::Event, vec![1.0, 0.0]),
            state("biz", EntityType::BusinessEntity, vec![0.0, 1.0]),
        ];
        let combined = EntanglementCombiner::new(policy).combine(&targets, Timestamp(0));
        let c = &combined.coefficients;
        assert_abs_diff_eq!(c[0] * c[0], 1.0 / 1.7, epsilon = 1e-12);
        assert_abs_diff_eq!(c[1] * c[1], 0.7 / 1.7, epsilon = 1e-12);
    }

    #[test]
    fn test_recency_prefers_fresh_targets() {
        let policy = WeightingPolicy::Recency { half_life_hours: 24.0 };
        let hour = 3_600_000;
        let now = Timestamp(48 * hour);
        let targets = vec![
            state("old", EntityType::Event, vec![1.0, 0.0]).at(Timestamp(0)),
            state("new", EntityType::Event, vec![0.0, 1.0]).at(now),
        ];
        let combined = EntanglementCombiner::new(policy).combine(&targets, now);
        let c = &combined.coefficients;
        // old target is two half-lives old: raw weights 0.25 vs 1.0
        assert_abs_diff_eq!(c[0] * c[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(c[1] * c[1], 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_priorities_fall_back_to_equal() {
        let policy = WeightingPolicy::TypePriority {
            priorities: BTreeMap::from([(EntityType::Event, 0.0)]),
        };
        let targets = vec![
            state("a", EntityType::Event, vec![1.0]),
            state("b", EntityType::Event, vec![1.0]),
        ];
        let combined = EntanglementCombiner::new(policy).combine(&targets, Timestamp(0));
        let s = 1.0 / 2f64.sqrt();
        assert_abs_diff_eq!(combined.coefficients[0], s, epsilon = 1e-12);
    }

    #[test]
    fn test_renormalize_fixes_drift() {
        let mut c = vec![0.8, 0.8];
        renormalize(&mut c);
        let sq: f64 = c.iter().map(|x| x * x).sum();
        assert_abs_diff_eq!(sq, 1.0, epsilon = 1e-12);

        let mut within = vec![0.7072, 0.7072];
        renormalize(&mut within);
        assert_eq!(within, vec![0.7072, 0.7072]);
    }

    #[test]
    fn test_policy_serde_tagged() {
        let json = r#"{"policy":"recency","half_life_hours":12.0}"#;
        let p: WeightingPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(p, WeightingPolicy::Recency { half_life_hours: 12.0 });
    }

    #[test]
    fn test_policy_validation() {
        assert!(WeightingPolicy::Equal.validate().is_ok());
        assert!(WeightingPolicy::default_type_priority().validate().is_ok());
        assert!(WeightingPolicy::Recency { half_life_hours: 0.0 }.validate().is_err());
        let bad = WeightingPolicy::TypePriority {
            priorities: BTreeMap::from([(EntityType::Venue, f64::NAN)]),
        };
        assert!(bad.validate().is_err());
    }
}
