//! # Kinema Runtime
//!
//! Data-oriented runtime for baked animation state-machine graphs.
//!
//! Each entity owns fixed-capacity rings of animation states and clip
//! samplers plus typed parameter stores; the shared [`kinema_graph`] blob is
//! read-only. A tick runs the per-entity pipeline in a fixed order:
//! transition evaluation, state instantiation, cross-fade blending, per-kind
//! sampler updates, bone sampling, root-motion extraction and event emission.
//! Entities never share mutable state, so the batched
//! [`world::AnimatorWorld::par_tick`] fans the same pipeline out across a
//! thread pool.
//!
//! The hot path never panics and never allocates: capacity misses and bad
//! numbers degrade the tick and bump per-entity [`state::Diagnostics`]
//! counters.

pub mod blender;
pub mod clips;
pub mod evaluator;
pub mod events;
pub mod factory;
pub mod params;
pub mod root_motion;
pub mod sampling;
pub mod scrub;
pub mod skeleton;
pub mod state;
pub mod updaters;
pub mod world;

pub use clips::{ClipEvent, ClipLibrary, FixtureClip, FixtureClipLibrary};
pub use events::AnimationEvent;
pub use params::ParameterStore;
pub use scrub::{ScrubCommand, TimelineSection};
pub use skeleton::{PoseBuffer, SkeletonRuntime, SkeletonSink};
pub use state::{AnimationState, ClipSampler, Diagnostics, RootMotionDelta};
pub use world::{AnimatorWorld, Entity, TickReport};

use kinema_graph::{Blend2DAlgorithm, GraphError};
use thiserror::Error;

/// Errors surfaced by the runtime API.
///
/// The per-tick pipeline itself never returns these; it degrades and counts.
/// They are raised at the caller-facing surface: entity construction,
/// parameter access, and scrub installation.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("ring capacity exceeded while reserving {0}")]
    OutOfCapacity(&'static str),

    #[error("invalid {kind} parameter index {index} (store holds {len})")]
    InvalidParameterIndex {
        kind: &'static str,
        index: u16,
        len: u16,
    },

    #[error("stale or destroyed entity handle")]
    InvalidEntity,

    #[error("scrub timeline holds no sections")]
    EmptyTimeline,

    #[error("scrub timeline references state {0} outside the graph")]
    InvalidTimelineState(u16),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// How the bounded event ring sheds writes once full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOverflowPolicy {
    /// Discard the incoming event, retaining the oldest queued ones
    #[default]
    DropNewest,
    /// Overwrite the oldest queued event
    DropOldest,
}

/// Rotation blending mode.
///
/// Cross-fades sum weighted quaternions and normalize the result; slerp
/// changes the authored cross-fade curve visibly and is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationBlend {
    #[default]
    QuaternionSumNormalize,
}

/// Runtime tuning options, fixed at world creation.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum co-live animation states per entity
    pub max_concurrent_blends: usize,
    /// Maximum co-live clip samplers per entity
    pub max_active_clips: usize,
    /// Bounded per-entity event ring size
    pub max_event_queue: usize,
    /// Algorithm for 2D blend states that do not pin one
    pub blend_2d_algorithm: Blend2DAlgorithm,
    /// Rotation blending mode
    pub rotation_blend: RotationBlend,
    /// How the event ring sheds writes once full
    pub event_overflow: EventOverflowPolicy,
    /// Drop a sampler's root-motion contribution on the tick its loop wrapped
    pub loop_wrap_suppresses_root_delta: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_blends: 8,
            max_active_clips: 32,
            max_event_queue: 32,
            blend_2d_algorithm: Blend2DAlgorithm::InverseDistance,
            rotation_blend: RotationBlend::QuaternionSumNormalize,
            event_overflow: EventOverflowPolicy::default(),
            loop_wrap_suppresses_root_delta: true,
        }
    }
}
