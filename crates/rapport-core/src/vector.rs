//! Plain real-vector algebra used by every scoring stage.
//!
//! All helpers are total: mismatched lengths, empty inputs and near-zero
//! norms are handled explicitly instead of producing NaN.

use crate::constants::NORM_FLOOR;

/// Dot product over the common prefix of `a` and `b`.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Unit-length copy of `v`, or `None` when the norm is below `NORM_FLOOR`.
pub fn normalized(v: &[f64]) -> Option<Vec<f64>> {
    let n = norm(v);
    if n < NORM_FLOOR || !n.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / n).collect())
}

/// Copy of `v` extended with zeros to `len`. Longer inputs are returned whole.
pub fn zero_padded(v: &[f64], len: usize) -> Vec<f64> {
    let mut out = v.to_vec();
    if out.len() < len {
        out.resize(len, 0.0);
    }
    out
}

/// Cosine similarity with the shorter input zero-padded to the longer length.
/// `None` when either side has no usable direction.
pub fn padded_cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    let len = a.len().max(b.len());
    let na = norm(a);
    let nb = norm(b);
    if len == 0 || na < NORM_FLOOR || nb < NORM_FLOOR {
        return None;
    }
    let a = zero_padded(a, len);
    let b = zero_padded(b, len);
    Some((dot(&a, &b) / (na * nb)).clamp(-1.0, 1.0))
}

/// Euclidean distance between the unit directions of `a` and `b`, halved so
/// the result lies in [0, 1]. A side without direction counts as maximally far
/// from one with direction, and identical to another directionless side.
pub fn direction_change(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().max(b.len());
    match (normalized(&zero_padded(a, len)), normalized(&zero_padded(b, len))) {
        (Some(ua), Some(ub)) => {
            let d: f64 = ua
                .iter()
                .zip(&ub)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt();
            (d / 2.0).clamp(0.0, 1.0)
        }
        (None, None) => 0.0,
        _ => 1.0,
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn unit_clamp(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

/// Replace non-finite values with 0 and clamp to [0, 1].
pub fn sanitize_unit(x: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }
}

/// Population variance. Zero for fewer than two samples.
pub fn variance(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n
}
