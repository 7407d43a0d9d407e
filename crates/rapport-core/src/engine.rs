//! The matching pipeline.
//!
//! build states → combine targets → primary fidelity → location/timing →
//! secondary estimators → aggregate (+ drift nudge under the agent's lock).
//!
//! All collaborators are injected at construction; the engine itself holds no
//! per-request state apart from the per-agent lock table.

use std::sync::Arc;

use crate::aggregate::{CompatibilityResult, ScoreAggregator, TermScores};
use crate::builder::EntityStateBuilder;
use crate::config::MatchConfig;
use crate::drift::{BehaviorDriftTracker, DRIFT_PROVIDER, DriftStore};
use crate::entanglement::{EntanglementCombiner, WeightingPolicy};
use crate::entity::{EntityRef, EntityState};
use crate::error::{MatchError, Result};
use crate::fidelity::CompatibilityScorer;
use crate::location_timing::LocationTimingCompatibility;
use crate::locks::AgentLocks;
use crate::providers::{
    CoordinateResolver, InMemoryProfiles, LocationResolver, PersonalityProvider, Providers,
    TimingPreferenceProvider, VibeProvider,
};
use crate::secondary::{
    EstimatorContext, KnotStyleEstimator, PredictiveSatisfactionEstimator, SecondaryEstimator,
    SecondaryScores, run_estimators,
};
use crate::time::{MonotonicClock, SystemClock, Timestamp};

/// Per-call switches.
#[derive(Clone, Debug, Default)]
pub struct MatchOptions {
    /// Anonymized agent id. Enables drift tracking when a drift store is set.
    pub agent_id: Option<String>,
    /// Overrides the configured weighting policy for this call.
    pub weighting: Option<WeightingPolicy>,
    pub skip_secondary: bool,
}

impl MatchOptions {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }
}

pub struct MatchEngine {
    personality: Arc<dyn PersonalityProvider>,
    vibe: Arc<dyn VibeProvider>,
    location: Arc<dyn LocationResolver>,
    timing: Arc<dyn TimingPreferenceProvider>,
    clock: Arc<dyn MonotonicClock>,
    drift_store: Option<Arc<dyn DriftStore>>,
    estimators: Vec<Box<dyn SecondaryEstimator>>,
    config: MatchConfig,
    tracker: BehaviorDriftTracker,
    locks: AgentLocks,
}

impl MatchEngine {
    pub fn builder() -> MatchEngineBuilder {
        MatchEngineBuilder::default()
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Score how well `reference` fits the group `targets`.
    ///
    /// Fails only on invalid input. Provider, estimator and drift-store
    /// failures show up in `degraded_terms` instead.
    pub fn match_entities(
        &self,
        reference: &EntityRef,
        targets: &[EntityRef],
        options: &MatchOptions,
    ) -> Result<CompatibilityResult> {
        if targets.is_empty() {
            return Err(MatchError::InputValidation(
                "at least one target entity is required".into(),
            ));
        }
        if let Some(policy) = &options.weighting {
            policy.validate()?;
        }

        let now = self.clock.now();
        let builder = EntityStateBuilder::new(self.providers());
        let mut degraded: Vec<String> = Vec::new();

        let reference_built = builder.build(reference, now)?;
        degraded.extend(reference_built.degraded.iter().map(|t| t.to_string()));
        let reference_state = reference_built.state;

        let mut target_states = Vec::with_capacity(targets.len());
        for target in targets {
            let built = builder.build(target, now)?;
            degraded.extend(built.degraded.iter().map(|t| t.to_string()));
            target_states.push(built.state);
        }

        let policy = options
            .weighting
            .clone()
            .unwrap_or_else(|| self.config.weighting.clone());
        let combined = EntanglementCombiner::new(policy).combine(&target_states, now);
        degraded.extend(combined.degraded.iter().cloned());

        let primary = CompatibilityScorer.score(reference_state.state_vector.as_slice(), &combined);
        let lt = LocationTimingCompatibility::new(self.config.location.decay_km)
            .score(&reference_state, &target_states);

        let secondary = if options.skip_secondary || self.estimators.is_empty() {
            SecondaryScores::default()
        } else {
            let ctx = EstimatorContext {
                reference: &reference_state,
                targets: &target_states,
                primary_fidelity: primary.fidelity,
                location: lt.location,
                timing: lt.timing,
            };
            run_estimators(&self.estimators, &ctx)
        };

        let terms = TermScores {
            primary,
            location: lt.location,
            timing: lt.timing,
            secondary,
        };
        let aggregator = ScoreAggregator::new(self.config.weights, self.config.drift.max_nudge);

        let mut result = match (&options.agent_id, &self.drift_store) {
            (Some(agent_id), Some(store)) => self.locks.with_agent(agent_id, || {
                self.aggregate_with_drift(
                    agent_id,
                    store.as_ref(),
                    &reference_state,
                    now,
                    &aggregator,
                    &terms,
                    &mut degraded,
                )
            }),
            _ => aggregator.aggregate(&terms, None),
        };

        // Provider failures first, then whatever the aggregator found absent.
        let absent = std::mem::take(&mut result.degraded_terms);
        for term in degraded.into_iter().chain(absent) {
            result.note_degraded(term);
        }
        result.entity_count = targets.len();

        tracing::debug!(
            reference = %reference.id,
            targets = targets.len(),
            compatibility = result.compatibility,
            degraded = ?result.degraded_terms,
            "match complete"
        );
        Ok(result)
    }

    /// Read drift history, aggregate with the resulting phase and append the
    /// new observation. Callers hold the agent's guard.
    #[allow(clippy::too_many_arguments)]
    fn aggregate_with_drift(
        &self,
        agent_id: &str,
        store: &dyn DriftStore,
        reference: &EntityState,
        now: Timestamp,
        aggregator: &ScoreAggregator,
        terms: &TermScores,
        degraded: &mut Vec<String>,
    ) -> CompatibilityResult {
        let history = match store.read(agent_id) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(agent = agent_id, "drift history unavailable: {e}");
                degraded.push(DRIFT_PROVIDER.to_string());
                return aggregator.aggregate(terms, None);
            }
        };

        // The phase comes from stored history only; this request's own
        // observation takes effect on the next one.
        let phase = self.tracker.current_phase(&history);
        let result = aggregator.aggregate(terms, phase);

        let record = self.tracker.observe(
            agent_id,
            reference.state_vector.as_slice(),
            now,
            &history,
        );

        if let Err(e) = store.append(&record) {
            tracing::warn!(agent = agent_id, "failed to record drift observation: {e}");
            degraded.push(DRIFT_PROVIDER.to_string());
        }
        result
    }

    fn providers(&self) -> Providers<'_> {
        Providers {
            personality: self.personality.as_ref(),
            vibe: self.vibe.as_ref(),
            location: self.location.as_ref(),
            timing: self.timing.as_ref(),
        }
    }
}

/// Assembles a `MatchEngine`. Unset collaborators default to empty in-memory
/// profiles, `CoordinateResolver`, `SystemClock`, no drift store and no
/// secondary estimators.
#[derive(Default)]
pub struct MatchEngineBuilder {
    personality: Option<Arc<dyn PersonalityProvider>>,
    vibe: Option<Arc<dyn VibeProvider>>,
    location: Option<Arc<dyn LocationResolver>>,
    timing: Option<Arc<dyn TimingPreferenceProvider>>,
    clock: Option<Arc<dyn MonotonicClock>>,
    drift_store: Option<Arc<dyn DriftStore>>,
    estimators: Vec<Box<dyn SecondaryEstimator>>,
    config: MatchConfig,
}

impl MatchEngineBuilder {
    /// Use one value for the personality, vibe and timing providers.
    pub fn profiles<P>(mut self, profiles: Arc<P>) -> Self
    where
        P: PersonalityProvider + VibeProvider + TimingPreferenceProvider + 'static,
    {
        self.personality = Some(profiles.clone());
        self.vibe = Some(profiles.clone());
        self.timing = Some(profiles);
        self
    }

    pub fn personality(mut self, provider: Arc<dyn PersonalityProvider>) -> Self {
        self.personality = Some(provider);
        self
    }

    pub fn vibe(mut self, provider: Arc<dyn VibeProvider>) -> Self {
        self.vibe = Some(provider);
        self
    }

    pub fn timing(mut self, provider: Arc<dyn TimingPreferenceProvider>) -> Self {
        self.timing = Some(provider);
        self
    }

    pub fn location_resolver(mut self, resolver: Arc<dyn LocationResolver>) -> Self {
        self.location = Some(resolver);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn MonotonicClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn drift_store(mut self, store: Arc<dyn DriftStore>) -> Self {
        self.drift_store = Some(store);
        self
    }

    pub fn estimator(mut self, estimator: Box<dyn SecondaryEstimator>) -> Self {
        self.estimators.push(estimator);
        self
    }

    /// Register the knot-style and predictive-satisfaction estimators.
    pub fn default_estimators(self) -> Self {
        self.estimator(Box::new(KnotStyleEstimator))
            .estimator(Box::new(PredictiveSatisfactionEstimator::default()))
    }

    pub fn config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<MatchEngine> {
        self.config.validate()?;
        let empty = Arc::new(InMemoryProfiles::new());
        Ok(MatchEngine {
            personality: self.personality.unwrap_or_else(|| empty.clone()),
            vibe: self.vibe.unwrap_or_else(|| empty.clone()),
            timing: self.timing.unwrap_or_else(|| empty.clone()),
            location: self
                .location
                .unwrap_or_else(|| Arc::new(CoordinateResolver)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            drift_store: self.drift_store,
            estimators: self.estimators,
            tracker: BehaviorDriftTracker::new(self.config.drift),
            config: self.config,
            locks: AgentLocks::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{BehaviorPhase, DriftRecord, DriftThresholds, InMemoryDriftStore};
    use crate::entity::EntityType;
    use crate::error::ProviderError;
    use crate::providers::{DimensionMap, Profile};
    use crate::time::ManualClock;

    fn dims(pairs: &[(&str, f64)]) -> DimensionMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn profiles() -> Arc<InMemoryProfiles> {
        let mut p = InMemoryProfiles::new();
        p.insert(
            "alice",
            Profile {
                personality: dims(&[("openness", 0.8), ("energy", 0.4)]),
                vibe: dims(&[("calm", 0.6)]),
                timing: None,
            },
        );
        p.insert(
            "jazz-night",
            Profile {
                personality: dims(&[("openness", 0.7), ("energy", 0.5)]),
                vibe: dims(&[("calm", 0.5)]),
                timing: None,
            },
        );
        Arc::new(p)
    }

    struct BrokenStore;

    impl DriftStore for BrokenStore {
        fn read(&self, _: &str) -> std::result::Result<Vec<DriftRecord>, ProviderError> {
            Err(ProviderError::unavailable("drift", "disk gone"))
        }
        fn append(&self, _: &DriftRecord) -> std::result::Result<(), ProviderError> {
            Err(ProviderError::unavailable("drift", "disk gone"))
        }
    }

    fn refs() -> (EntityRef, Vec<EntityRef>) {
        (
            EntityRef::new("alice", EntityType::Agent),
            vec![EntityRef::new("jazz-night", EntityType::Event)],
        )
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MatchEngine>();
    }

    #[test]
    fn test_empty_targets_rejected() {
        let engine = MatchEngine::builder().profiles(profiles()).build().unwrap();
        let (reference, _) = refs();
        let err = engine
            .match_entities(&reference, &[], &MatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, MatchError::InputValidation(_)));
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let engine = MatchEngine::builder().profiles(profiles()).build().unwrap();
        let (reference, _) = refs();
        let ghost = EntityRef::new("ghost", EntityType::Venue);
        let err = engine
            .match_entities(&reference, &[ghost], &MatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, MatchError::InputValidation(_)));
    }

    #[test]
    fn test_basic_match() {
        let engine = MatchEngine::builder()
            .profiles(profiles())
            .default_estimators()
            .build()
            .unwrap();
        let (reference, targets) = refs();
        let r = engine
            .match_entities(&reference, &targets, &MatchOptions::default())
            .unwrap();
        assert!(r.primary_fidelity > 0.9);
        assert!((0.0..=1.0).contains(&r.compatibility));
        assert_eq!(r.entity_count, 1);
        assert!(r.secondary_scores.contains_key("knot"));
        assert!(r.secondary_scores.contains_key("predicted_satisfaction"));
        assert_eq!(r.degraded_terms, vec!["location".to_string(), "timing".to_string()]);
        assert!(r.drift_phase.is_none());
    }

    #[test]
    fn test_drift_recorded_per_agent() {
        let store = Arc::new(InMemoryDriftStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
        let engine = MatchEngine::builder()
            .profiles(profiles())
            .drift_store(store.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        let (reference, targets) = refs();
        let options = MatchOptions::for_agent("anon-1");

        let first = engine.match_entities(&reference, &targets, &options).unwrap();
        assert!(first.drift_phase.is_none());
        assert_eq!(first.drift_adjustment, 1.0);

        // one stored record is not enough history yet
        clock.advance_hours(2);
        let second = engine.match_entities(&reference, &targets, &options).unwrap();
        assert!(second.drift_phase.is_none());

        clock.advance_hours(2);
        let third = engine.match_entities(&reference, &targets, &options).unwrap();
        // same vector every time: no drift, fully stable
        assert_eq!(third.drift_phase, Some(BehaviorPhase::Settled));
        assert!(third.drift_adjustment > 1.0);

        let history = store.read("anon-1").unwrap();
        assert_eq!(history.len(), 3);
        assert!(store.read("alice").unwrap().is_empty());
    }

    fn seed(store: &InMemoryDriftStore, agent: &str, rate: f64, stability: f64) {
        let phase = DriftThresholds::default().classify(rate, stability);
        for hour in 0..2u64 {
            store
                .append(&DriftRecord {
                    agent_id: agent.into(),
                    timestamp: Timestamp(hour * 3_600_000),
                    drift_rate: rate,
                    stability,
                    phase,
                    snapshot: vec![1.0, 0.0],
                })
                .unwrap();
        }
    }

    #[test]
    fn test_phase_read_before_append() {
        let store = Arc::new(InMemoryDriftStore::new());
        seed(&store, "anon-x", 0.15, 0.60);
        let engine = MatchEngine::builder()
            .profiles(profiles())
            .drift_store(store.clone())
            .clock(Arc::new(ManualClock::new(Timestamp(10 * 3_600_000))))
            .build()
            .unwrap();
        let (reference, targets) = refs();
        let r = engine
            .match_entities(&reference, &targets, &MatchOptions::for_agent("anon-x"))
            .unwrap();
        // the stored exploring record decides, not this request's observation
        assert_eq!(r.drift_phase, Some(BehaviorPhase::Exploring));
        assert_eq!(store.read("anon-x").unwrap().len(), 3);
    }

    #[test]
    fn test_lock_table_drains_after_one_shot_agents() {
        let engine = MatchEngine::builder()
            .profiles(profiles())
            .drift_store(Arc::new(InMemoryDriftStore::new()))
            .build()
            .unwrap();
        let (reference, targets) = refs();
        for i in 0..200 {
            let options = MatchOptions::for_agent(format!("anon-{i}"));
            engine.match_entities(&reference, &targets, &options).unwrap();
        }
        assert!(engine.locks.is_empty());
    }

    #[test]
    fn test_drift_store_failure_degrades() {
        let engine = MatchEngine::builder()
            .profiles(profiles())
            .drift_store(Arc::new(BrokenStore))
            .build()
            .unwrap();
        let (reference, targets) = refs();
        let r = engine
            .match_entities(&reference, &targets, &MatchOptions::for_agent("anon-2"))
            .unwrap();
        assert!(r.degraded_terms.contains(&"drift".to_string()));
        assert!(r.drift_phase.is_none());
    }

    #[test]
    fn test_invalid_weighting_override() {
        let engine = MatchEngine::builder().profiles(profiles()).build().unwrap();
        let (reference, targets) = refs();
        let options = MatchOptions {
            weighting: Some(WeightingPolicy::Recency { half_life_hours: -1.0 }),
            ..MatchOptions::default()
        };
        let err = engine.match_entities(&reference, &targets, &options).unwrap_err();
        assert!(matches!(err, MatchError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_config_rejected_at_build() {
        let mut config = MatchConfig::default();
        config.drift.max_nudge = 0.5;
        assert!(MatchEngine::builder().config(config).build().is_err());
    }
}
