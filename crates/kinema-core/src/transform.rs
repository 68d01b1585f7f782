//! Bone-pose math shared by bone sampling and root-motion extraction.
//!
//! Rotation blending is a weighted quaternion sum followed by normalization.
//! Slerp produces a visibly different cross-fade ramp and is not offered.

use glam::{Quat, Vec3, Vec4};

/// Local transform of a single bone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    /// Local translation
    pub translation: Vec3,
    /// Local rotation (unit quaternion)
    pub rotation: Quat,
    /// Local scale (per-axis)
    pub scale: Vec3,
}

impl BonePose {
    /// Identity pose: zero translation, identity rotation, unit scale
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a new pose from its components
    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    /// Create a pose with a uniform scale factor
    pub fn with_uniform_scale(translation: Vec3, rotation: Quat, scale: f32) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::splat(scale),
        }
    }

    /// Check that every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    /// Replace non-finite components with their neutral values.
    ///
    /// Returns `true` when anything was replaced.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;
        if !self.translation.is_finite() {
            self.translation = Vec3::ZERO;
            changed = true;
        }
        if !self.rotation.is_finite() {
            self.rotation = Quat::IDENTITY;
            changed = true;
        }
        if !self.scale.is_finite() {
            self.scale = Vec3::ONE;
            changed = true;
        }
        changed
    }
}

impl Default for BonePose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Weighted accumulator blending several bone poses into one.
///
/// Quaternion contributions are kept in the hemisphere of the running sum
/// (quaternions double-cover rotations), summed, and normalized once at the
/// end when more than one pose contributed.
#[derive(Debug, Clone, Copy)]
pub struct PoseAccumulator {
    translation: Vec3,
    rotation: Vec4,
    scale: Vec3,
    contributors: u32,
}

impl PoseAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec4::ZERO,
            scale: Vec3::ZERO,
            contributors: 0,
        }
    }

    /// Number of poses accumulated so far
    pub fn contributors(&self) -> u32 {
        self.contributors
    }

    /// Add a weighted pose contribution
    pub fn accumulate(&mut self, pose: &BonePose, weight: f32) {
        let mut q = Vec4::new(
            pose.rotation.x,
            pose.rotation.y,
            pose.rotation.z,
            pose.rotation.w,
        );
        if self.contributors > 0 && q.dot(self.rotation) < 0.0 {
            q = -q;
        }
        self.translation += pose.translation * weight;
        self.rotation += q * weight;
        self.scale += pose.scale * weight;
        self.contributors += 1;
    }

    /// Finish accumulation. Returns `None` when nothing contributed.
    pub fn finish(&self) -> Option<BonePose> {
        if self.contributors == 0 {
            return None;
        }

        let rotation = if self.contributors > 1 {
            let length = self.rotation.length();
            if length > f32::EPSILON {
                let q = self.rotation / length;
                Quat::from_xyzw(q.x, q.y, q.z, q.w)
            } else {
                Quat::IDENTITY
            }
        } else {
            Quat::from_xyzw(
                self.rotation.x,
                self.rotation.y,
                self.rotation.z,
                self.rotation.w,
            )
        };

        Some(BonePose {
            translation: self.translation,
            rotation,
            scale: self.scale,
        })
    }
}

impl Default for PoseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
