//! Behavior drift: how fast and how steadily an agent's state vector moves.
//!
//! Each observation compares the agent's current vector with the snapshot in
//! its most recent record. The resulting `(drift_rate, stability)` pair is
//! classified into a `BehaviorPhase`, which nudges the aggregate score.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_DRIFT_NUDGE;
use crate::error::{MatchError, ProviderError, Result};
use crate::time::Timestamp;
use crate::vector::{direction_change, unit_clamp, variance};

pub const DRIFT_PROVIDER: &str = "drift";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorPhase {
    Exploring,
    Settling,
    Settled,
}

impl BehaviorPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BehaviorPhase::Exploring => "exploring",
            BehaviorPhase::Settling => "settling",
            BehaviorPhase::Settled => "settled",
        }
    }
}

impl fmt::Display for BehaviorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exploring" => Ok(BehaviorPhase::Exploring),
            "settling" => Ok(BehaviorPhase::Settling),
            "settled" => Ok(BehaviorPhase::Settled),
            other => Err(format!("unknown behavior phase '{other}'")),
        }
    }
}

/// One observation of an agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    pub agent_id: String,
    pub timestamp: Timestamp,
    pub drift_rate: f64,
    pub stability: f64,
    pub phase: BehaviorPhase,
    /// The agent's state vector at observation time.
    pub snapshot: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub exploring_rate: f64,
    pub exploring_stability: f64,
    pub settled_rate: f64,
    pub settled_stability: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            exploring_rate: 0.10,
            exploring_stability: 0.70,
            settled_rate: 0.05,
            settled_stability: 0.80,
        }
    }
}

impl DriftThresholds {
    pub fn classify(&self, drift_rate: f64, stability: f64) -> BehaviorPhase {
        if drift_rate > self.exploring_rate && stability < self.exploring_stability {
            BehaviorPhase::Exploring
        } else if drift_rate < self.settled_rate && stability > self.settled_stability {
            BehaviorPhase::Settled
        } else {
            BehaviorPhase::Settling
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub thresholds: DriftThresholds,
    /// Observations in the stability window, the new one included.
    pub window: usize,
    /// Multiplier applied to the window variance before `1 − ·`.
    pub variance_scale: f64,
    /// Records needed before a phase is reported.
    pub min_history: usize,
    /// Largest multiplicative adjustment a phase may apply.
    pub max_nudge: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            thresholds: DriftThresholds::default(),
            window: 10,
            variance_scale: 4.0,
            min_history: 2,
            max_nudge: MAX_DRIFT_NUDGE,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, v) in [
            ("exploring_rate", t.exploring_rate),
            ("exploring_stability", t.exploring_stability),
            ("settled_rate", t.settled_rate),
            ("settled_stability", t.settled_stability),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(MatchError::InvalidConfig(format!(
                    "drift.thresholds.{name} must be in [0, 1], got {v}"
                )));
            }
        }
        if self.window == 0 {
            return Err(MatchError::InvalidConfig("drift.window must be at least 1".into()));
        }
        if !self.variance_scale.is_finite() || self.variance_scale < 0.0 {
            return Err(MatchError::InvalidConfig(format!(
                "drift.variance_scale must be finite and non-negative, got {}",
                self.variance_scale
            )));
        }
        if !(0.0..=MAX_DRIFT_NUDGE).contains(&self.max_nudge) {
            return Err(MatchError::InvalidConfig(format!(
                "drift.max_nudge must be in [0, {MAX_DRIFT_NUDGE}], got {}",
                self.max_nudge
            )));
        }
        Ok(())
    }
}

/// Multiplicative adjustment for a phase. Exploring agents get a boost for
/// novel matches, settled agents for consistent ones.
pub fn nudge_factor(phase: Option<BehaviorPhase>, primary: f64, max_nudge: f64) -> f64 {
    let primary = unit_clamp(primary);
    let max_nudge = max_nudge.clamp(0.0, MAX_DRIFT_NUDGE);
    match phase {
        Some(BehaviorPhase::Exploring) => 1.0 + max_nudge * (1.0 - primary),
        Some(BehaviorPhase::Settled) => 1.0 + max_nudge * primary,
        Some(BehaviorPhase::Settling) | None => 1.0,
    }
}

#[derive(Clone, Debug, Default)]
pub struct BehaviorDriftTracker {
    config: DriftConfig,
}

impl BehaviorDriftTracker {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Build the record for a new observation. `history` must be time-ordered,
    /// oldest first.
    pub fn observe(
        &self,
        agent_id: &str,
        snapshot: &[f64],
        at: Timestamp,
        history: &[DriftRecord],
    ) -> DriftRecord {
        let (drift_rate, stability) = match history.last() {
            None => (0.0, 1.0),
            Some(last) => {
                let change = direction_change(&last.snapshot, snapshot);
                let hours = at.hours_since(last.timestamp);
                let rate = unit_clamp(if hours > 0.0 { change / hours } else { change });

                let keep = self.config.window.saturating_sub(1).min(history.len());
                let mut window: Vec<f64> = history[history.len() - keep..]
                    .iter()
                    .map(|r| r.drift_rate)
                    .collect();
                window.push(rate);
                let stability = 1.0 - unit_clamp(variance(&window) * self.config.variance_scale);
                (rate, stability)
            }
        };

        let phase = self.config.thresholds.classify(drift_rate, stability);
        tracing::debug!(agent = agent_id, drift_rate, stability, %phase, "drift observation");

        DriftRecord {
            agent_id: agent_id.to_string(),
            timestamp: at,
            drift_rate,
            stability,
            phase,
            snapshot: snapshot.to_vec(),
        }
    }

    /// Phase of the latest record, once enough history exists.
    pub fn current_phase(&self, history: &[DriftRecord]) -> Option<BehaviorPhase> {
        if history.len() < self.config.min_history.max(1) {
            return None;
        }
        history
            .last()
            .map(|r| self.config.thresholds.classify(r.drift_rate, r.stability))
    }

    pub fn nudge(&self, phase: Option<BehaviorPhase>, primary: f64) -> f64 {
        nudge_factor(phase, primary, self.config.max_nudge)
    }
}

/// Persistence for per-agent drift history.
pub trait DriftStore: Send + Sync {
    /// Records for `agent_id`, oldest first.
    fn read(&self, agent_id: &str) -> std::result::Result<Vec<DriftRecord>, ProviderError>;
    fn append(&self, record: &DriftRecord) -> std::result::Result<(), ProviderError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDriftStore {
    records: Mutex<HashMap<String, Vec<DriftRecord>>>,
}

impl InMemoryDriftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DriftStore for InMemoryDriftStore {
    fn read(&self, agent_id: &str) -> std::result::Result<Vec<DriftRecord>, ProviderError> {
        let records = self
            .records
            .lock()
            .map_err(|_| ProviderError::unavailable(DRIFT_PROVIDER, "lock poisoned"))?;
        Ok(records.get(agent_id).cloned().unwrap_or_default())
    }

    fn append(&self, record: &DriftRecord) -> std::result::Result<(), ProviderError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ProviderError::unavailable(DRIFT_PROVIDER, "lock poisoned"))?;
        let history = records.entry(record.agent_id.clone()).or_default();
        history.push(record.clone());
        history.sort_by_key(|r| r.timestamp);
        Ok(())
    }
}
