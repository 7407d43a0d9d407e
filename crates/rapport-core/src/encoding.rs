//! Location and timing encoders.
//!
//! Both are pure functions from a descriptor to a short fixed-length
//! sub-vector with every element in [0, 1]. Resolution of addresses to
//! coordinates happens before encoding, through `LocationResolver`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{LOCATION_DIM, TIMING_DIM};
use crate::vector::sanitize_unit;

static URBAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(downtown|city\s+cent(?:er|re)|urban|metro)\b").unwrap());
static RURAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(rural|countryside|farm)\b").unwrap());

/// Accessibility assumed for suburban or unclassified places.
const SUBURBAN_ACCESSIBILITY: f64 = 0.5;

/// Alignment assumed when the caller has no opinion.
const DEFAULT_ALIGNMENT: f64 = 0.5;

/// Longest duration preference that still maps below 1.0 (8 hours).
const MAX_DURATION_MINUTES: f64 = 480.0;

/// Where an entity is, as the caller knows it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationDescriptor {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Free-form place text ("downtown Austin", "farm road 12").
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Explicit accessibility score in [0, 1]; overrides locality inference.
    #[serde(default)]
    pub accessibility: Option<f64>,
    #[serde(default)]
    pub vibe_alignment: Option<f64>,
}

impl LocationDescriptor {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Self::default()
        }
    }

    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = Some(locality.into());
        self
    }

    pub fn with_accessibility(mut self, accessibility: f64) -> Self {
        self.accessibility = Some(accessibility);
        self
    }

    pub fn with_vibe_alignment(mut self, alignment: f64) -> Self {
        self.vibe_alignment = Some(alignment);
        self
    }
}

/// Output of a `LocationResolver`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Scheduling preferences of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingDescriptor {
    /// Preferred hour of day, [0, 24).
    pub time_of_day_hour: f64,
    /// Preferred weekday, 0 = Monday .. 6 = Sunday.
    pub day_of_week: u8,
    /// Desired visits per week.
    pub frequency_per_week: f64,
    /// Desired duration in minutes.
    pub duration_minutes: f64,
    #[serde(default)]
    pub vibe_alignment: Option<f64>,
}

/// Categorical accessibility of a place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessibilityCategory {
    Urban,
    Suburban,
    Rural,
}

impl AccessibilityCategory {
    /// Classify free-form place text. Urban keywords win over rural ones.
    pub fn infer(text: &str) -> Self {
        if URBAN.is_match(text) {
            AccessibilityCategory::Urban
        } else if RURAL.is_match(text) {
            AccessibilityCategory::Rural
        } else {
            AccessibilityCategory::Suburban
        }
    }

    pub fn score(self) -> f64 {
        match self {
            AccessibilityCategory::Urban => 1.0,
            AccessibilityCategory::Suburban => SUBURBAN_ACCESSIBILITY,
            AccessibilityCategory::Rural => 0.0,
        }
    }
}

pub struct LocationStateEncoder;

impl LocationStateEncoder {
    /// `[lat, lon, accessibility, vibe_alignment]`, each in [0, 1].
    pub fn encode(
        descriptor: &LocationDescriptor,
        resolved: &ResolvedLocation,
    ) -> [f64; LOCATION_DIM] {
        let lat = sanitize_unit((resolved.latitude + 90.0) / 180.0);
        let lon = sanitize_unit((resolved.longitude + 180.0) / 360.0);
        let accessibility = match descriptor.accessibility {
            Some(score) => sanitize_unit(score),
            None => {
                let text = [descriptor.locality.as_deref(), descriptor.address.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                AccessibilityCategory::infer(&text).score()
            }
        };
        let alignment = sanitize_unit(descriptor.vibe_alignment.unwrap_or(DEFAULT_ALIGNMENT));
        [lat, lon, accessibility, alignment]
    }

    /// Inverse of the coordinate part of `encode`: (latitude, longitude) in degrees.
    pub fn decode_coordinates(sub: &[f64]) -> (f64, f64) {
        let lat = sub.first().copied().unwrap_or(0.5) * 180.0 - 90.0;
        let lon = sub.get(1).copied().unwrap_or(0.5) * 360.0 - 180.0;
        (lat, lon)
    }
}

pub struct TimingStateEncoder;

impl TimingStateEncoder {
    /// `[time_of_day, day_of_week, frequency, duration, vibe_alignment]`, each in [0, 1].
    pub fn encode(descriptor: &TimingDescriptor) -> [f64; TIMING_DIM] {
        let hour = if descriptor.time_of_day_hour.is_finite() {
            descriptor.time_of_day_hour.rem_euclid(24.0)
        } else {
            0.0
        };
        [
            sanitize_unit(hour / 24.0),
            sanitize_unit(f64::from(descriptor.day_of_week.min(6)) / 6.0),
            sanitize_unit(descriptor.frequency_per_week / 7.0),
            sanitize_unit(descriptor.duration_minutes / MAX_DURATION_MINUTES),
            sanitize_unit(descriptor.vibe_alignment.unwrap_or(DEFAULT_ALIGNMENT)),
        ]
    }
}
