//! Skeleton output interfaces.
//!
//! The bone sampler only writes local transforms; applying them to a real
//! skeleton hierarchy is the consumer's job.

use kinema_core::transform::BonePose;

use crate::world::Entity;

/// Per-entity consumer of blended local bone transforms.
pub trait SkeletonSink {
    /// Number of bones the sampler should produce
    fn bone_count(&self) -> u16;

    /// Store one bone's blended local pose
    fn write_local(&mut self, bone: u16, pose: BonePose);

    /// Called once per tick after every bone write
    fn finalize(&mut self);
}

/// Entity-keyed skeleton runtime used by the batched tick.
///
/// Implementations must tolerate concurrent calls for distinct entities; the
/// runtime never issues concurrent calls for the same entity.
pub trait SkeletonRuntime: Sync {
    /// Number of bones an entity's skeleton holds
    fn bone_count(&self, entity: Entity) -> u16;

    /// Store one bone's blended local pose
    fn write_local(&self, entity: Entity, bone: u16, pose: BonePose);

    /// Called once per entity per tick after every bone write
    fn finalize(&self, entity: Entity);
}

/// Adapter presenting one entity's slice of a [`SkeletonRuntime`] as a
/// [`SkeletonSink`].
pub(crate) struct EntitySink<'a, S: SkeletonRuntime> {
    pub runtime: &'a S,
    pub entity: Entity,
}

impl<S: SkeletonRuntime> SkeletonSink for EntitySink<'_, S> {
    fn bone_count(&self) -> u16 {
        self.runtime.bone_count(self.entity)
    }

    fn write_local(&mut self, bone: u16, pose: BonePose) {
        self.runtime.write_local(self.entity, bone, pose);
    }

    fn finalize(&mut self) {
        self.runtime.finalize(self.entity);
    }
}

/// Records local poses in memory.
///
/// The default sink for tests and for callers without a full skeleton
/// runtime; poses written last tick stay readable until the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseBuffer {
    poses: Vec<BonePose>,
    finalize_count: u32,
}

impl PoseBuffer {
    /// Create a buffer for the given bone count
    pub fn new(bone_count: u16) -> Self {
        Self {
            poses: vec![BonePose::IDENTITY; bone_count as usize],
            finalize_count: 0,
        }
    }

    /// The recorded pose of one bone
    pub fn pose(&self, bone: u16) -> BonePose {
        self.poses
            .get(bone as usize)
            .copied()
            .unwrap_or(BonePose::IDENTITY)
    }

    /// All recorded poses
    pub fn poses(&self) -> &[BonePose] {
        &self.poses
    }

    /// How many ticks have finalized into this buffer
    pub fn finalize_count(&self) -> u32 {
        self.finalize_count
    }
}

impl SkeletonSink for PoseBuffer {
    fn bone_count(&self) -> u16 {
        self.poses.len() as u16
    }

    fn write_local(&mut self, bone: u16, pose: BonePose) {
        if let Some(slot) = self.poses.get_mut(bone as usize) {
            *slot = pose;
        }
    }

    fn finalize(&mut self) {
        self.finalize_count += 1;
    }
}
