use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::constants::NORM_FLOOR;
use crate::encoding::LocationDescriptor;
use crate::time::Timestamp;
use crate::vector::norm;

/// Kind of entity taking part in a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Agent,
    Event,
    Venue,
    BusinessEntity,
    ExpertEntity,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Agent,
        EntityType::Event,
        EntityType::Venue,
        EntityType::BusinessEntity,
        EntityType::ExpertEntity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Agent => "agent",
            EntityType::Event => "event",
            EntityType::Venue => "venue",
            EntityType::BusinessEntity => "business_entity",
            EntityType::ExpertEntity => "expert_entity",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index ranges of the segments present in a `StateVector`.
///
/// Personality and vibe ranges are always set (possibly empty); location and
/// timing are `None` when the entity had no such data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentLayout {
    pub personality: Range<usize>,
    pub vibe: Range<usize>,
    pub location: Option<Range<usize>>,
    pub timing: Option<Range<usize>>,
}

/// Flattened numeric representation of one entity.
///
/// Segment order is personality, vibe, location, timing. Personality and vibe
/// values follow lexicographic key order so that vectors of comparable
/// entities line up element by element.
///
/// `values` is L2-normalized as a whole; `scale` is the norm that was divided
/// out (1.0 when the raw norm was below `NORM_FLOOR` and nothing was divided).
/// Segment accessors undo the scaling and return the encoded values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    pub values: Vec<f64>,
    pub layout: SegmentLayout,
    pub personality_keys: Vec<String>,
    pub vibe_keys: Vec<String>,
    pub scale: f64,
}

impl Default for StateVector {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            layout: SegmentLayout::default(),
            personality_keys: Vec::new(),
            vibe_keys: Vec::new(),
            scale: 1.0,
        }
    }
}

impl StateVector {
    /// A vector with no named segments, e.g. a literal test vector.
    /// All values form one unnamed personality block; the whole is normalized.
    pub fn from_values(values: Vec<f64>) -> Self {
        let len = values.len();
        Self::assemble(
            values,
            SegmentLayout {
                personality: 0..len,
                vibe: len..len,
                location: None,
                timing: None,
            },
            Vec::new(),
            Vec::new(),
        )
    }

    /// Normalize `raw` and attach the layout and key lists.
    pub fn assemble(
        raw: Vec<f64>,
        layout: SegmentLayout,
        personality_keys: Vec<String>,
        vibe_keys: Vec<String>,
    ) -> Self {
        let raw_norm = norm(&raw);
        let (values, scale) = if raw_norm >= NORM_FLOOR && raw_norm.is_finite() {
            (raw.iter().map(|x| x / raw_norm).collect(), raw_norm)
        } else {
            (raw, 1.0)
        };
        Self {
            values,
            layout,
            personality_keys,
            vibe_keys,
            scale,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    fn raw(&self, range: Range<usize>) -> Vec<f64> {
        self.values[range].iter().map(|x| x * self.scale).collect()
    }

    pub fn personality(&self) -> Vec<f64> {
        self.raw(self.layout.personality.clone())
    }

    pub fn vibe(&self) -> Vec<f64> {
        self.raw(self.layout.vibe.clone())
    }

    pub fn location(&self) -> Option<Vec<f64>> {
        self.layout.location.clone().map(|r| self.raw(r))
    }

    pub fn timing(&self) -> Option<Vec<f64>> {
        self.layout.timing.clone().map(|r| self.raw(r))
    }

    /// Vibe values keyed by dimension name.
    pub fn vibe_map(&self) -> BTreeMap<String, f64> {
        self.vibe_keys.iter().cloned().zip(self.vibe()).collect()
    }

    /// Personality and vibe values keyed by dimension name. Vibe keys are
    /// prefixed so the two namespaces never collide.
    pub fn named_dimensions(&self) -> BTreeMap<String, f64> {
        let mut out: BTreeMap<String, f64> = self
            .personality_keys
            .iter()
            .cloned()
            .zip(self.personality())
            .collect();
        for (k, v) in self.vibe_keys.iter().zip(self.vibe()) {
            out.insert(format!("vibe:{k}"), v);
        }
        out
    }
}

/// What a caller hands the engine for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub location: Option<LocationDescriptor>,
    /// When the entity's data was last refreshed. Used by recency weighting.
    #[serde(default)]
    pub observed_at: Option<Timestamp>,
    #[serde(default)]
    pub raw_characteristics: BTreeMap<String, String>,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            location: None,
            observed_at: None,
            raw_characteristics: BTreeMap::new(),
        }
    }

    pub fn with_location(mut self, location: LocationDescriptor) -> Self {
        self.location = Some(location);
        self
    }

    pub fn observed_at(mut self, ts: Timestamp) -> Self {
        self.observed_at = Some(ts);
        self
    }
}

/// Per-request snapshot of one entity. Never persisted by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub state_vector: StateVector,
    pub raw_characteristics: BTreeMap<String, String>,
    pub created_at: Timestamp,
}

impl EntityState {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        state_vector: StateVector,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            state_vector,
            raw_characteristics: BTreeMap::new(),
            created_at: Timestamp::default(),
        }
    }

    pub fn at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }
}
