//! Multi-entity compatibility engine.
//!
//! Turns people, events, venues and businesses into state vectors, folds a
//! group of targets into one weighted representation and scores a reference
//! entity against it. Location, timing and optional secondary estimators are
//! blended into one bounded score, nudged by the agent's behavior phase.
//!
//! Zero I/O. Profiles, geocoding, drift history and time all come in through
//! traits.

pub mod aggregate;
pub mod builder;
pub mod config;
pub mod constants;
pub mod drift;
pub mod encoding;
pub mod engine;
pub mod entanglement;
pub mod entity;
pub mod error;
pub mod fidelity;
pub mod location_timing;
pub mod locks;
pub mod providers;
pub mod secondary;
pub mod time;
pub mod vector;

pub use aggregate::{
    AggregationWeights, CompatibilityResult, ScoreAggregator, TermScores, TermWeights,
};
pub use builder::{BuiltState, EntityStateBuilder, SegmentInputs, assemble_vector};
pub use config::{LocationConfig, MatchConfig};
pub use constants::{MAX_DRIFT_NUDGE, NEUTRAL_FIDELITY, NORM_FLOOR};
pub use drift::{
    BehaviorDriftTracker, BehaviorPhase, DriftConfig, DriftRecord, DriftStore, DriftThresholds,
    InMemoryDriftStore,
};
pub use encoding::{
    AccessibilityCategory, LocationDescriptor, LocationStateEncoder, ResolvedLocation,
    TimingDescriptor, TimingStateEncoder,
};
pub use engine::{MatchEngine, MatchEngineBuilder, MatchOptions};
pub use entanglement::{
    CombinationMode, CombinedRepresentation, EntanglementCombiner, WeightingPolicy,
};
pub use entity::{EntityRef, EntityState, EntityType, SegmentLayout, StateVector};
pub use error::{EstimatorError, MatchError, ProviderError, Result};
pub use fidelity::{CompatibilityScorer, FidelityOutcome, ProjectionPath};
pub use location_timing::{LocationTimingCompatibility, LocationTimingScores};
pub use locks::AgentLocks;
pub use providers::{
    CoordinateResolver, DimensionMap, InMemoryProfiles, LocationResolver, PersonalityProvider,
    Profile, TimingPreferenceProvider, VibeProvider,
};
pub use secondary::{
    EstimatorContext, EstimatorKind, KnotStyleEstimator, PredictiveSatisfactionEstimator,
    SecondaryEstimator, SecondaryScores,
};
pub use time::{ManualClock, MonotonicClock, SystemClock, Timestamp};
