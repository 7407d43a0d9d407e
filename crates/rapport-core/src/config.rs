//! Engine configuration. Every field has a default, so an empty TOML or JSON
//! document deserializes to the stock engine.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationWeights;
use crate::drift::DriftConfig;
use crate::entanglement::WeightingPolicy;
use crate::error::{MatchError, Result};
use crate::location_timing::DEFAULT_DECAY_KM;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Distance at which the proximity term has decayed to 1/e.
    pub decay_km: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            decay_km: DEFAULT_DECAY_KM,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub weights: AggregationWeights,
    pub drift: DriftConfig,
    pub location: LocationConfig,
    pub weighting: WeightingPolicy,
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.drift.validate()?;
        if !self.location.decay_km.is_finite() || self.location.decay_km <= 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "location.decay_km must be positive, got {}",
                self.location.decay_km
            )));
        }
        self.weighting.validate()
    }
}
