//! Entity state assembly.
//!
//! Pulls personality, vibe, location and timing data through the injected
//! providers and flattens whatever is available into one `StateVector`.
//! Absent segments are left out rather than zero-filled so downstream stages
//! can tell "no data" from "all zeros".

use crate::constants::{LOCATION_DIM, TIMING_DIM};
use crate::encoding::{LocationStateEncoder, TimingStateEncoder};
use crate::entity::{EntityRef, EntityState, SegmentLayout, StateVector};
use crate::error::{MatchError, Result};
use crate::providers::{DimensionMap, Providers};
use crate::time::Timestamp;
use crate::vector::sanitize_unit;

pub const TERM_PERSONALITY: &str = "personality";
pub const TERM_VIBE: &str = "vibe";
pub const TERM_LOCATION: &str = "location";
pub const TERM_TIMING: &str = "timing";

/// Raw inputs for one state vector, already fetched.
#[derive(Clone, Debug, Default)]
pub struct SegmentInputs {
    pub personality: DimensionMap,
    pub vibe: DimensionMap,
    pub location: Option<[f64; LOCATION_DIM]>,
    pub timing: Option<[f64; TIMING_DIM]>,
}

/// A built entity plus the segments that could not be fetched.
#[derive(Clone, Debug)]
pub struct BuiltState {
    pub state: EntityState,
    pub degraded: Vec<&'static str>,
}

/// Flatten segment inputs. `None` when no segment is present at all.
pub fn assemble_vector(inputs: &SegmentInputs) -> Option<StateVector> {
    if inputs.personality.is_empty()
        && inputs.vibe.is_empty()
        && inputs.location.is_none()
        && inputs.timing.is_none()
    {
        return None;
    }

    // BTreeMap iteration is already in lexicographic key order.
    let personality_keys: Vec<String> = inputs.personality.keys().cloned().collect();
    let vibe_keys: Vec<String> = inputs.vibe.keys().cloned().collect();

    let mut raw: Vec<f64> = Vec::with_capacity(
        personality_keys.len() + vibe_keys.len() + LOCATION_DIM + TIMING_DIM,
    );
    raw.extend(inputs.personality.values().map(|v| sanitize_unit(*v)));
    let personality = 0..raw.len();
    raw.extend(inputs.vibe.values().map(|v| sanitize_unit(*v)));
    let vibe = personality.end..raw.len();

    let location = inputs.location.map(|sub| {
        let start = raw.len();
        raw.extend(sub);
        start..raw.len()
    });
    let timing = inputs.timing.map(|sub| {
        let start = raw.len();
        raw.extend(sub);
        start..raw.len()
    });

    Some(StateVector::assemble(
        raw,
        SegmentLayout {
            personality,
            vibe,
            location,
            timing,
        },
        personality_keys,
        vibe_keys,
    ))
}

pub struct EntityStateBuilder<'a> {
    providers: Providers<'a>,
}

impl<'a> EntityStateBuilder<'a> {
    pub fn new(providers: Providers<'a>) -> Self {
        Self { providers }
    }

    /// Fetch and flatten one entity. Provider failures drop the affected
    /// segment; only an entity with no segment at all is an error.
    pub fn build(&self, entity: &EntityRef, now: Timestamp) -> Result<BuiltState> {
        let mut degraded = Vec::new();
        let inputs = self.fetch(entity, &mut degraded);

        let vector = assemble_vector(&inputs).ok_or_else(|| {
            MatchError::InputValidation(format!(
                "entity '{}' ({}) has no derivable state segment",
                entity.id, entity.entity_type
            ))
        })?;

        Ok(BuiltState {
            state: EntityState {
                entity_id: entity.id.clone(),
                entity_type: entity.entity_type,
                state_vector: vector,
                raw_characteristics: entity.raw_characteristics.clone(),
                created_at: entity.observed_at.unwrap_or(now),
            },
            degraded,
        })
    }

    fn fetch(&self, entity: &EntityRef, degraded: &mut Vec<&'static str>) -> SegmentInputs {
        let id = entity.id.as_str();

        let personality = self.providers.personality.personality(id).unwrap_or_else(|e| {
            tracing::warn!(entity = id, "personality provider failed: {e}");
            degraded.push(TERM_PERSONALITY);
            DimensionMap::new()
        });

        let vibe = self.providers.vibe.vibe(id).unwrap_or_else(|e| {
            tracing::warn!(entity = id, "vibe provider failed: {e}");
            degraded.push(TERM_VIBE);
            DimensionMap::new()
        });

        let location = entity.location.as_ref().and_then(|descriptor| {
            match self.providers.location.resolve(descriptor) {
                Ok(resolved) => Some(LocationStateEncoder::encode(descriptor, &resolved)),
                Err(e) => {
                    tracing::warn!(entity = id, "location resolution failed: {e}");
                    degraded.push(TERM_LOCATION);
                    None
                }
            }
        });

        let timing = match self.providers.timing.timing(id) {
            Ok(descriptor) => descriptor.as_ref().map(TimingStateEncoder::encode),
            Err(e) => {
                tracing::warn!(entity = id, "timing provider failed: {e}");
                degraded.push(TERM_TIMING);
                None
            }
        };

        SegmentInputs {
            personality,
            vibe,
            location,
            timing,
        }
    }
}
