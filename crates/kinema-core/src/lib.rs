//! # Kinema Core
//!
//! Shared primitives for the Kinema animation runtime:
//! - **Transforms**: bone poses and weighted pose accumulation
//! - **Curves**: cubic-Hermite keyframe curves for authored blend ramps
//! - **Rings**: fixed-capacity slot storage with stable IDs

pub mod curve;
pub mod ring;
pub mod transform;

pub use curve::{CurveKey, KeyframeCurve};
pub use ring::{CapacityError, SlotRing, INVALID_ID};
pub use transform::{BonePose, PoseAccumulator};

pub use glam::{Quat, Vec2, Vec3, Vec4};
