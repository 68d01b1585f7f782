//! Clip-library interface and an in-memory fixture implementation.
//!
//! The runtime consumes clips through [`ClipLibrary`]; the library outlives
//! every entity that references it. Clip handles are plain `u16` indices, so
//! a bad handle costs a skipped contribution, never a dangling pointer.

use glam::{Quat, Vec3};
use kinema_core::transform::BonePose;

/// An authored clip event at a normalized time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipEvent {
    /// Event time as a fraction of the clip duration, in `[0, 1]`
    pub normalized_time: f32,
    /// Opaque event identifier handed back to the caller
    pub event_id: u32,
}

impl ClipEvent {
    /// Create an event at a normalized time
    pub fn new(normalized_time: f32, event_id: u32) -> Self {
        Self {
            normalized_time,
            event_id,
        }
    }
}

/// Read-only source of skeletal clip data (external collaborator).
///
/// `sample` must be pure over `(clip, time, bone)` and handle clamping
/// internally; rotations are unit quaternions.
pub trait ClipLibrary {
    /// Sample a bone's local pose at a clip-local time in seconds
    fn sample(&self, clip: u16, time: f32, bone: u16) -> BonePose;

    /// Duration of a clip in seconds
    fn duration(&self, clip: u16) -> f32;

    /// The clip's immutable event table
    fn event_table(&self, clip: u16) -> &[ClipEvent];

    /// Whether the handle resolves to a loaded clip
    fn is_valid(&self, clip: u16) -> bool;
}

/// Procedural clip description for [`FixtureClipLibrary`].
#[derive(Debug, Clone)]
pub struct FixtureClip {
    /// Clip duration in seconds
    pub duration: f32,
    /// Root (bone 0) translation per second
    pub root_velocity: Vec3,
    /// Event table sorted by normalized time
    pub events: Vec<ClipEvent>,
}

impl FixtureClip {
    /// A stationary clip of the given duration
    pub fn new(duration: f32) -> Self {
        Self {
            duration,
            root_velocity: Vec3::ZERO,
            events: Vec::new(),
        }
    }

    /// Move the root linearly over the clip
    pub fn with_root_velocity(mut self, velocity: Vec3) -> Self {
        self.root_velocity = velocity;
        self
    }

    /// Append an event at a normalized time
    pub fn with_event(mut self, normalized_time: f32, event_id: u32) -> Self {
        self.events.push(ClipEvent::new(normalized_time, event_id));
        self
    }
}

/// Deterministic in-memory clip library for tests, benches and demos.
///
/// Bone 0 translates linearly at the clip's root velocity; every other bone
/// holds a fixed pose derived from its index, which makes blended output easy
/// to predict in tests.
#[derive(Debug, Clone, Default)]
pub struct FixtureClipLibrary {
    clips: Vec<FixtureClip>,
}

impl FixtureClipLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip, returning its handle
    pub fn add(&mut self, clip: FixtureClip) -> u16 {
        let index = self.clips.len() as u16;
        self.clips.push(clip);
        index
    }

    /// Number of registered clips
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    /// Whether the library holds no clips
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

impl ClipLibrary for FixtureClipLibrary {
    fn sample(&self, clip: u16, time: f32, bone: u16) -> BonePose {
        let Some(clip) = self.clips.get(clip as usize) else {
            return BonePose::IDENTITY;
        };
        let time = time.clamp(0.0, clip.duration.max(0.0));
        if bone == 0 {
            BonePose::new(clip.root_velocity * time, Quat::IDENTITY, Vec3::ONE)
        } else {
            BonePose::new(Vec3::new(bone as f32, 0.0, 0.0), Quat::IDENTITY, Vec3::ONE)
        }
    }

    fn duration(&self, clip: u16) -> f32 {
        self.clips.get(clip as usize).map_or(0.0, |c| c.duration)
    }

    fn event_table(&self, clip: u16) -> &[ClipEvent] {
        self.clips.get(clip as usize).map_or(&[], |c| &c.events)
    }

    fn is_valid(&self, clip: u16) -> bool {
        (clip as usize) < self.clips.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_clamped_and_pure() {
        let mut library = FixtureClipLibrary::new();
        let clip = library.add(FixtureClip::new(2.0).with_root_velocity(Vec3::new(1.0, 0.0, 0.0)));

        let pose = library.sample(clip, 0.5, 0);
        assert_eq!(pose.translation, Vec3::new(0.5, 0.0, 0.0));

        // Past the end the pose clamps to the final frame.
        let end = library.sample(clip, 10.0, 0);
        assert_eq!(end.translation, Vec3::new(2.0, 0.0, 0.0));

        assert_eq!(
            library.sample(clip, 0.5, 0),
            library.sample(clip, 0.5, 0)
        );
    }

    #[test]
    fn test_invalid_handle_degrades_to_identity() {
        let library = FixtureClipLibrary::new();
        assert!(!library.is_valid(0));
        assert_eq!(library.sample(0, 1.0, 0), BonePose::IDENTITY);
        assert_eq!(library.duration(0), 0.0);
        assert!(library.event_table(0).is_empty());
    }
}
