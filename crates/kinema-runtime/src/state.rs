//! Per-entity mutable animation state and the tick pipeline.
//!
//! An entity's whole runtime footprint lives here: the animation-state and
//! clip-sampler rings, per-kind auxiliary records, parameter stores, the
//! state-machine reference, the event ring and diagnostics counters. All
//! capacities are fixed at creation; nothing allocates afterwards.

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Quat, Vec3};
use kinema_core::ring::{SlotRing, INVALID_ID};
use kinema_graph::{StateGraph, TransitionRef, NO_INDEX};
use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::events::EventRing;
use crate::params::ParameterStore;
use crate::scrub::ScrubController;
use crate::skeleton::SkeletonSink;
use crate::world::TickReport;
use crate::{blender, evaluator, events, factory, root_motion, sampling, scrub, updaters};
use crate::{RuntimeConfig, RuntimeResult};

/// One live authored state; may span several clip samplers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnimationState {
    /// Elapsed state time in seconds (wraps at the loop duration)
    pub time: f32,
    /// Blend weight in `[0, 1]`
    pub weight: f32,
    /// Effective playback speed, fixed at instantiation
    pub speed: f32,
    /// Whether clip time wraps
    pub looping: bool,
    /// First sampler of this state's contiguous block
    pub start_sampler: u8,
    /// Number of samplers in the block
    pub clip_count: u8,
}

/// Playback slot for a single clip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipSampler {
    /// Clip handle in the external library
    pub clip: u16,
    /// Clip time at the previous tick
    pub prev_time: f32,
    /// Current clip time
    pub time: f32,
    /// Contribution weight in `[0, 1]`
    pub weight: f32,
}

/// Links an animation state to its state record, per state kind.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateKindRec {
    pub anim_state: u8,
    pub state_index: u16,
}

/// Where the state machine believes it is.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateMachineRef {
    /// Flattened state index, or [`NO_INDEX`] before the first tick
    pub current_state: u16,
    /// Animation state instantiated for that state, or [`INVALID_ID`]
    pub current_anim_state: u8,
}

impl StateMachineRef {
    pub fn invalid() -> Self {
        Self {
            current_state: NO_INDEX,
            current_anim_state: INVALID_ID,
        }
    }
}

/// A transition published by the evaluator, awaiting the blender.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingTransition {
    pub target: u8,
    pub duration: f32,
    /// Source edge; `None` for the initial default-state entry
    pub transition: Option<TransitionRef>,
}

/// A transition the blender is currently cross-fading.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveTransition {
    pub target: u8,
    pub duration: f32,
    pub transition: Option<TransitionRef>,
}

/// Root translation/rotation accumulated over one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootMotionDelta {
    /// Root translation over the tick
    pub translation: Vec3,
    /// Root rotation over the tick
    pub rotation: Quat,
}

impl Default for RootMotionDelta {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Observability counters; the hot path degrades and counts, never panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Transitions dropped because a ring reservation failed
    pub dropped_transitions: u32,
    /// Events discarded by the bounded event ring
    pub event_overflow: u32,
    /// Non-finite values clamped to neutral
    pub nan_clamps: u32,
    /// Sampler contributions skipped over an invalid clip handle
    pub missing_clips: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct EntityFlags: u8 {
        /// Editor preview owns the sampler ring; evaluation is bypassed
        const SCRUB_ACTIVE = 1;
    }
}

/// The full mutable state of one animated entity.
pub(crate) struct CharacterState {
    pub graph: Arc<StateGraph>,
    pub config: RuntimeConfig,
    pub params: ParameterStore,
    pub anim_states: SlotRing<AnimationState>,
    pub samplers: SlotRing<ClipSampler>,
    pub singles: SmallVec<[StateKindRec; 8]>,
    pub linears: SmallVec<[StateKindRec; 8]>,
    pub directionals: SmallVec<[StateKindRec; 8]>,
    pub machine: StateMachineRef,
    /// Animation state that currently owns playback, as seen by the blender
    pub animation_current: u8,
    pub pending: Option<PendingTransition>,
    pub active: Option<ActiveTransition>,
    pub events: EventRing,
    pub flags: EntityFlags,
    pub scrub: Option<ScrubController>,
    pub root_delta: RootMotionDelta,
    pub diagnostics: Diagnostics,
}

impl CharacterState {
    /// Validate the graph and size every ring. No state is instantiated;
    /// the first tick enters the graph's default state.
    pub fn new(graph: Arc<StateGraph>, config: RuntimeConfig) -> RuntimeResult<Self> {
        graph.validate()?;
        let params = ParameterStore::for_graph(&graph);
        let anim_states = SlotRing::with_capacity(config.max_concurrent_blends);
        let samplers = SlotRing::with_capacity(config.max_active_clips);
        let events = EventRing::with_capacity(config.max_event_queue, config.event_overflow);
        Ok(Self {
            graph,
            config,
            params,
            anim_states,
            samplers,
            singles: SmallVec::new(),
            linears: SmallVec::new(),
            directionals: SmallVec::new(),
            machine: StateMachineRef::invalid(),
            animation_current: INVALID_ID,
            pending: None,
            active: None,
            events,
            flags: EntityFlags::empty(),
            scrub: None,
            root_delta: RootMotionDelta::default(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Run the per-entity pipeline for one tick.
    pub fn tick<L: ClipLibrary, S: SkeletonSink>(
        &mut self,
        dt: f32,
        clips: &L,
        sink: &mut S,
    ) -> TickReport {
        let mut report = TickReport::default();

        let dt = if dt.is_finite() {
            dt
        } else {
            self.diagnostics.nan_clamps += 1;
            0.0
        };

        if self.flags.contains(EntityFlags::SCRUB_ACTIVE) {
            scrub::apply(self, clips);
        } else {
            if let Some(fired) = evaluator::evaluate(self) {
                match factory::instantiate(self, fired.to_state) {
                    Ok(id) => {
                        self.machine.current_state = fired.to_state;
                        self.machine.current_anim_state = id;
                        self.pending = Some(PendingTransition {
                            target: id,
                            duration: fired.duration,
                            transition: fired.transition,
                        });
                        report.transition_fired = true;
                        report.new_state_index = Some(fired.to_state);
                    }
                    Err(_) => self.diagnostics.dropped_transitions += 1,
                }
            }
            blender::blend(self, dt);
            updaters::update_all(self, clips, dt);
        }

        sampling::sample_bones(self, clips, sink);
        root_motion::extract(self, clips);
        events::emit(self, clips, &mut report.events);

        report.root_delta = self.root_delta;
        report
    }

    /// Release every live state and sampler and forget playback position.
    /// The next tick re-enters the default state.
    pub fn reset_playback(&mut self) {
        let live: SmallVec<[(u8, u8, u8); 8]> = self
            .anim_states
            .iter()
            .map(|(_, id, s)| (id, s.start_sampler, s.clip_count))
            .collect();
        for (id, start, count) in live {
            self.samplers.release_block(start, count as usize);
            self.anim_states.release(id);
        }
        self.singles.clear();
        self.linears.clear();
        self.directionals.clear();
        self.machine = StateMachineRef::invalid();
        self.animation_current = INVALID_ID;
        self.pending = None;
        self.active = None;
        self.root_delta = RootMotionDelta::default();
    }
}
