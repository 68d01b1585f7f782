//! Cubic-Hermite keyframe curves.
//!
//! Keys carry authored in/out tangents. Evaluation interpolates with the
//! stored tangents and never re-derives them, so identical key data yields
//! bitwise-identical results.

use serde::{Deserialize, Serialize};

/// A single Hermite keyframe with authored tangents.
///
/// Tangents are slopes in value per unit time; they are scaled by the segment
/// duration during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveKey {
    /// Key time
    pub time: f32,
    /// Key value
    pub value: f32,
    /// Incoming tangent
    #[serde(default)]
    pub in_tangent: f32,
    /// Outgoing tangent
    #[serde(default)]
    pub out_tangent: f32,
}

impl CurveKey {
    /// Create a key with explicit tangents
    pub fn new(time: f32, value: f32, in_tangent: f32, out_tangent: f32) -> Self {
        Self {
            time,
            value,
            in_tangent,
            out_tangent,
        }
    }

    /// Create a key with flat tangents
    pub fn flat(time: f32, value: f32) -> Self {
        Self::new(time, value, 0.0, 0.0)
    }
}

/// Borrowed view over an ordered run of keyframes.
#[derive(Debug, Clone, Copy)]
pub struct KeyframeCurve<'a> {
    keys: &'a [CurveKey],
}

impl<'a> KeyframeCurve<'a> {
    /// Wrap a key slice. Keys must be sorted ascending by time.
    pub fn new(keys: &'a [CurveKey]) -> Self {
        Self { keys }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the curve holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Evaluate at `t`, clamping to the endpoint values outside the key range.
    pub fn evaluate(&self, t: f32) -> f32 {
        let keys = self.keys;
        let Some(first) = keys.first() else {
            return 0.0;
        };
        if t <= first.time {
            return first.value;
        }
        let last = keys[keys.len() - 1];
        if t >= last.time {
            return last.value;
        }

        // Key runs are tiny; a linear scan beats a binary search here.
        let mut hi = 1;
        while keys[hi].time < t {
            hi += 1;
        }
        let k0 = keys[hi - 1];
        let k1 = keys[hi];

        let dt = k1.time - k0.time;
        if dt <= 0.0 {
            return k1.value;
        }
        let u = (t - k0.time) / dt;
        hermite(k0.value, k0.out_tangent * dt, k1.value, k1.in_tangent * dt, u)
    }
}

fn hermite(p0: f32, m0: f32, p1: f32, m1: f32, u: f32) -> f32 {
    let u2 = u * u;
    let u3 = u2 * u;
    let h00 = 2.0 * u3 - 3.0 * u2 + 1.0;
    let h10 = u3 - 2.0 * u2 + u;
    let h01 = -2.0 * u3 + 3.0 * u2;
    let h11 = u3 - u2;
    h00 * p0 + h10 * m0 + h01 * p1 + h11 * m1
}
