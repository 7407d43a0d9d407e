//! Weighted blend of the primary, location, timing and structural terms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::builder::{TERM_LOCATION, TERM_TIMING};
use crate::drift::{BehaviorPhase, nudge_factor};
use crate::error::{MatchError, Result};
use crate::fidelity::{FidelityOutcome, ProjectionPath};
use crate::secondary::SecondaryScores;
use crate::vector::unit_clamp;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Weight per aggregation term.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermWeights {
    pub primary: f64,
    pub location: f64,
    pub timing: f64,
    pub structural: f64,
}

impl Default for TermWeights {
    fn default() -> Self {
        Self::base()
    }
}

impl TermWeights {
    /// Used when no structural estimator produced a score.
    pub fn base() -> Self {
        Self {
            primary: 0.5,
            location: 0.3,
            timing: 0.2,
            structural: 0.0,
        }
    }

    /// Used when a structural score is present.
    pub fn with_structural() -> Self {
        Self {
            primary: 0.4,
            location: 0.25,
            timing: 0.2,
            structural: 0.15,
        }
    }

    fn values(&self) -> [f64; 4] {
        [self.primary, self.location, self.timing, self.structural]
    }

    pub fn sum(&self) -> f64 {
        self.values().iter().sum()
    }

    pub fn validate(&self, section: &str) -> Result<()> {
        if self.values().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(MatchError::InvalidConfig(format!(
                "{section}: weights must be finite and non-negative"
            )));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(MatchError::InvalidConfig(format!(
                "{section}: weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationWeights {
    pub base: TermWeights,
    pub structural: TermWeights,
}

impl Default for AggregationWeights {
    fn default() -> Self {
        Self {
            base: TermWeights::base(),
            structural: TermWeights::with_structural(),
        }
    }
}

impl AggregationWeights {
    pub fn validate(&self) -> Result<()> {
        self.base.validate("weights.base")?;
        self.structural.validate("weights.structural")?;
        if self.base.structural != 0.0 {
            return Err(MatchError::InvalidConfig(
                "weights.base: structural weight must be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one match. Carries only the caller-supplied identifiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub compatibility: f64,
    pub primary_fidelity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_compatibility: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_compatibility: Option<f64>,
    pub secondary_scores: BTreeMap<String, f64>,
    pub degraded_terms: Vec<String>,
    pub entity_count: usize,
    pub projection: ProjectionPath,
    /// Effective weights after redistribution; absent terms are 0.
    pub weights: TermWeights,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_phase: Option<BehaviorPhase>,
    pub drift_adjustment: f64,
}

impl CompatibilityResult {
    /// Record a degraded term once, keeping first-seen order.
    pub fn note_degraded(&mut self, term: impl Into<String>) {
        let term = term.into();
        if !self.degraded_terms.contains(&term) {
            self.degraded_terms.push(term);
        }
    }
}

/// Per-term scores handed to the aggregator.
#[derive(Clone, Debug)]
pub struct TermScores {
    pub primary: FidelityOutcome,
    pub location: Option<f64>,
    pub timing: Option<f64>,
    pub secondary: SecondaryScores,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreAggregator {
    weights: AggregationWeights,
    max_nudge: f64,
}

impl ScoreAggregator {
    pub fn new(weights: AggregationWeights, max_nudge: f64) -> Self {
        Self { weights, max_nudge }
    }

    /// Weights for the terms that are present, scaled to sum to 1.
    pub fn effective_weights(
        &self,
        location: bool,
        timing: bool,
        structural: bool,
    ) -> TermWeights {
        let table = if structural {
            self.weights.structural
        } else {
            self.weights.base
        };
        let mut w = TermWeights {
            primary: table.primary,
            location: if location { table.location } else { 0.0 },
            timing: if timing { table.timing } else { 0.0 },
            structural: if structural { table.structural } else { 0.0 },
        };
        let sum = w.sum();
        if sum <= 0.0 {
            // Only the primary term remains and it was configured to 0.
            return TermWeights {
                primary: 1.0,
                location: 0.0,
                timing: 0.0,
                structural: 0.0,
            };
        }
        w.primary /= sum;
        w.location /= sum;
        w.timing /= sum;
        w.structural /= sum;
        w
    }

    pub fn aggregate(
        &self,
        terms: &TermScores,
        drift_phase: Option<BehaviorPhase>,
    ) -> CompatibilityResult {
        let primary = unit_clamp(terms.primary.fidelity);
        let location = terms.location.map(unit_clamp);
        let timing = terms.timing.map(unit_clamp);
        let structural = terms.secondary.structural_score();

        let w = self.effective_weights(location.is_some(), timing.is_some(), structural.is_some());
        let blended = w.primary * primary
            + w.location * location.unwrap_or(0.0)
            + w.timing * timing.unwrap_or(0.0)
            + w.structural * structural.unwrap_or(0.0);

        let drift_adjustment = nudge_factor(drift_phase, primary, self.max_nudge);
        let compatibility = unit_clamp(blended * drift_adjustment);

        let mut result = CompatibilityResult {
            compatibility,
            primary_fidelity: primary,
            location_compatibility: location,
            timing_compatibility: timing,
            secondary_scores: terms.secondary.scores.clone(),
            degraded_terms: Vec::new(),
            entity_count: 0,
            projection: terms.primary.path,
            weights: w,
            drift_phase,
            drift_adjustment,
        };
        if location.is_none() {
            result.note_degraded(TERM_LOCATION);
        }
        if timing.is_none() {
            result.note_degraded(TERM_TIMING);
        }
        for name in &terms.secondary.failed {
            result.note_degraded(format!("secondary:{name}"));
        }
        result
    }
}
