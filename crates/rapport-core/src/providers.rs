//! Injected data-provider contracts.
//!
//! The engine never performs I/O itself; everything it needs about an entity
//! comes through these traits. All of them are `Send + Sync` so one engine
//! can serve concurrent requests.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::encoding::{LocationDescriptor, ResolvedLocation, TimingDescriptor};
use crate::error::ProviderError;

pub type DimensionMap = BTreeMap<String, f64>;

pub trait PersonalityProvider: Send + Sync {
    fn personality(&self, entity_id: &str) -> Result<DimensionMap, ProviderError>;
}

pub trait VibeProvider: Send + Sync {
    fn vibe(&self, entity_id: &str) -> Result<DimensionMap, ProviderError>;
}

pub trait LocationResolver: Send + Sync {
    fn resolve(&self, descriptor: &LocationDescriptor) -> Result<ResolvedLocation, ProviderError>;
}

pub trait TimingPreferenceProvider: Send + Sync {
    /// `Ok(None)` when the entity has no scheduling preferences.
    fn timing(&self, entity_id: &str) -> Result<Option<TimingDescriptor>, ProviderError>;
}

/// Bundle of the providers `EntityStateBuilder` reads from.
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub personality: &'a dyn PersonalityProvider,
    pub vibe: &'a dyn VibeProvider,
    pub location: &'a dyn LocationResolver,
    pub timing: &'a dyn TimingPreferenceProvider,
}

/// Resolves descriptors that already carry coordinates. Address-only
/// descriptors are reported unavailable: there is no geocoder behind it.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoordinateResolver;

impl LocationResolver for CoordinateResolver {
    fn resolve(&self, descriptor: &LocationDescriptor) -> Result<ResolvedLocation, ProviderError> {
        match (descriptor.latitude, descriptor.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                let mut metadata = BTreeMap::new();
                if let Some(locality) = &descriptor.locality {
                    metadata.insert("locality".to_string(), locality.clone());
                }
                Ok(ResolvedLocation {
                    latitude: lat,
                    longitude: lon,
                    metadata,
                })
            }
            _ => Err(ProviderError::unavailable(
                "location",
                match &descriptor.address {
                    Some(addr) => format!("no coordinates for address '{addr}'"),
                    None => "descriptor has no coordinates".to_string(),
                },
            )),
        }
    }
}

/// Profile data for one entity as held by `InMemoryProfiles`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub personality: DimensionMap,
    #[serde(default)]
    pub vibe: DimensionMap,
    #[serde(default)]
    pub timing: Option<TimingDescriptor>,
}

/// Map-backed personality, vibe and timing provider.
/// Unknown ids yield empty maps and no timing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryProfiles {
    profiles: HashMap<String, Profile>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_id: impl Into<String>, profile: Profile) {
        self.profiles.insert(entity_id.into(), profile);
    }

    pub fn get(&self, entity_id: &str) -> Option<&Profile> {
        self.profiles.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl PersonalityProvider for InMemoryProfiles {
    fn personality(&self, entity_id: &str) -> Result<DimensionMap, ProviderError> {
        Ok(self
            .profiles
            .get(entity_id)
            .map(|p| p.personality.clone())
            .unwrap_or_default())
    }
}

impl VibeProvider for InMemoryProfiles {
    fn vibe(&self, entity_id: &str) -> Result<DimensionMap, ProviderError> {
        Ok(self
            .profiles
            .get(entity_id)
            .map(|p| p.vibe.clone())
            .unwrap_or_default())
    }
}

impl TimingPreferenceProvider for InMemoryProfiles {
    fn timing(&self, entity_id: &str) -> Result<Option<TimingDescriptor>, ProviderError> {
        Ok(self.profiles.get(entity_id).and_then(|p| p.timing.clone()))
    }
}
