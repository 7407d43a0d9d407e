//! Independent location and timing compatibility.
//!
//! Each term is scored only when the reference and at least one target carry
//! the sub-vector. Otherwise the term is absent, which is different from a
//! score of zero: the aggregator drops it and redistributes its weight.

use serde::{Deserialize, Serialize};

use crate::constants::KM_PER_DEGREE;
use crate::encoding::LocationStateEncoder;
use crate::entity::EntityState;
use crate::vector::unit_clamp;

/// Characteristic distance for location proximity when none is configured.
pub const DEFAULT_DECAY_KM: f64 = 50.0;

const PROXIMITY_WEIGHT: f64 = 0.6;
const ACCESSIBILITY_WEIGHT: f64 = 0.2;
const ALIGNMENT_WEIGHT: f64 = 0.2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationTimingScores {
    pub location: Option<f64>,
    pub timing: Option<f64>,
}

#[derive(Clone, Copy, Debug)]
pub struct LocationTimingCompatibility {
    decay_km: f64,
}

impl Default for LocationTimingCompatibility {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY_KM)
    }
}

impl LocationTimingCompatibility {
    pub fn new(decay_km: f64) -> Self {
        let decay_km = if decay_km.is_finite() && decay_km > 0.0 {
            decay_km
        } else {
            DEFAULT_DECAY_KM
        };
        Self { decay_km }
    }

    pub fn score(&self, reference: &EntityState, targets: &[EntityState]) -> LocationTimingScores {
        let v = &reference.state_vector;
        let location = v.location().and_then(|r| {
            mean(
                targets
                    .iter()
                    .filter_map(|t| t.state_vector.location())
                    .map(|t| self.location_similarity(&r, &t)),
            )
        });
        let timing = v.timing().and_then(|r| {
            mean(
                targets
                    .iter()
                    .filter_map(|t| t.state_vector.timing())
                    .map(|t| timing_similarity(&r, &t)),
            )
        });
        LocationTimingScores { location, timing }
    }

    /// Weighted blend of geographic proximity, accessibility agreement and
    /// vibe-alignment agreement over two encoded location sub-vectors.
    pub fn location_similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        let km = approx_distance_km(a, b);
        let proximity = (-km / self.decay_km).exp();
        let accessibility = 1.0 - (field(a, 2) - field(b, 2)).abs();
        let alignment = 1.0 - (field(a, 3) - field(b, 3)).abs();
        unit_clamp(
            PROXIMITY_WEIGHT * proximity
                + ACCESSIBILITY_WEIGHT * accessibility
                + ALIGNMENT_WEIGHT * alignment,
        )
    }
}

/// Mean of five per-field similarities over two encoded timing sub-vectors.
/// Time of day and weekday are compared on their cycles.
pub fn timing_similarity(a: &[f64], b: &[f64]) -> f64 {
    let hour = circular_similarity(field(a, 0) * 24.0, field(b, 0) * 24.0, 24.0);
    let day = circular_similarity(
        (field(a, 1) * 6.0).round(),
        (field(b, 1) * 6.0).round(),
        7.0,
    );
    let frequency = 1.0 - (field(a, 2) - field(b, 2)).abs();
    let duration = 1.0 - (field(a, 3) - field(b, 3)).abs();
    let alignment = 1.0 - (field(a, 4) - field(b, 4)).abs();
    unit_clamp((hour + day + frequency + duration + alignment) / 5.0)
}

/// 1 at equal positions, 0 at opposite points of a cycle of length `period`.
fn circular_similarity(x: f64, y: f64, period: f64) -> f64 {
    let d = (x - y).rem_euclid(period);
    let d = d.min(period - d);
    unit_clamp(1.0 - d / (period / 2.0))
}

/// Equirectangular distance between two encoded locations, longitude wrapped.
fn approx_distance_km(a: &[f64], b: &[f64]) -> f64 {
    let (lat_a, lon_a) = LocationStateEncoder::decode_coordinates(a);
    let (lat_b, lon_b) = LocationStateEncoder::decode_coordinates(b);
    let dlat = lat_a - lat_b;
    let mut dlon = (lon_a - lon_b).abs() % 360.0;
    if dlon > 180.0 {
        dlon = 360.0 - dlon;
    }
    let mean_lat = ((lat_a + lat_b) / 2.0).to_radians();
    let x = dlon * mean_lat.cos();
    (dlat * dlat + x * x).sqrt() * KM_PER_DEGREE
}

fn field(v: &[f64], i: usize) -> f64 {
    v.get(i).copied().unwrap_or(0.0)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    (n > 0).then(|| unit_clamp(sum / n as f64))
}
