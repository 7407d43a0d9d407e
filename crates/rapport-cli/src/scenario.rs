//! Scenario files: a set of named entities, a reference and a target group.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use rapport_core::{
    DimensionMap, EntityRef, EntityType, InMemoryProfiles, LocationDescriptor, Profile, Timestamp,
    TimingDescriptor, WeightingPolicy,
};

#[derive(Debug, Deserialize)]
pub struct ScenarioEntity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub personality: DimensionMap,
    #[serde(default)]
    pub vibe: DimensionMap,
    #[serde(default)]
    pub location: Option<LocationDescriptor>,
    #[serde(default)]
    pub timing: Option<TimingDescriptor>,
    #[serde(default)]
    pub observed_at_ms: Option<u64>,
    #[serde(default)]
    pub raw: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub entities: BTreeMap<String, ScenarioEntity>,
    pub reference: String,
    #[serde(default)]
    pub targets: Vec<String>,
    /// Per-scenario override of the configured weighting policy.
    #[serde(default)]
    pub weighting: Option<WeightingPolicy>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse scenario {}", path.display()))?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Every referenced id must be defined.
    fn check(&self) -> Result<()> {
        for id in std::iter::once(&self.reference).chain(&self.targets) {
            if !self.entities.contains_key(id) {
                bail!("scenario references unknown entity '{id}'");
            }
        }
        Ok(())
    }

    pub fn profiles(&self) -> InMemoryProfiles {
        let mut profiles = InMemoryProfiles::new();
        for (id, e) in &self.entities {
            profiles.insert(
                id.as_str(),
                Profile {
                    personality: e.personality.clone(),
                    vibe: e.vibe.clone(),
                    timing: e.timing.clone(),
                },
            );
        }
        profiles
    }

    pub fn entity_ref(&self, id: &str) -> Result<EntityRef> {
        let e = self
            .entities
            .get(id)
            .with_context(|| format!("unknown entity '{id}'"))?;
        Ok(EntityRef {
            id: id.to_string(),
            entity_type: e.entity_type,
            location: e.location.clone(),
            observed_at: e.observed_at_ms.map(Timestamp::from_millis),
            raw_characteristics: e.raw.clone(),
        })
    }

    pub fn reference_ref(&self) -> Result<EntityRef> {
        self.entity_ref(&self.reference)
    }

    pub fn target_refs(&self) -> Result<Vec<EntityRef>> {
        self.targets.iter().map(|id| self.entity_ref(id)).collect()
    }
}
