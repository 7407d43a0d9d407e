/// Norm below which a vector carries no usable direction.
pub const NORM_FLOOR: f64 = 1e-4;

/// Fidelity substituted when a normalization step hits `NORM_FLOOR`.
pub const NEUTRAL_FIDELITY: f64 = 0.5;

/// Allowed deviation of Σc² from 1 before coefficients are renormalized.
pub const COEFFICIENT_TOLERANCE: f64 = 1e-3;

/// Weight sums below this are treated as zero.
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Location sub-vector: lat, lon, accessibility, vibe alignment.
pub const LOCATION_DIM: usize = 4;

/// Timing sub-vector: time of day, day of week, frequency, duration, vibe alignment.
pub const TIMING_DIM: usize = 5;

/// Upper bound on the drift nudge (10% multiplicative).
pub const MAX_DRIFT_NUDGE: f64 = 0.10;

/// Milliseconds per hour, for drift-rate time normalization.
pub const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Kilometres per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;
