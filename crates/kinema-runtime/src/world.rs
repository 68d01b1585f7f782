//! Entity handles and the batched animator world.
//!
//! The world owns every entity's [`state`] exclusively; the graph blob and
//! clip library are shared read-only. Ticking one entity is a plain method
//! call; ticking the whole population fans out over rayon, one entity per
//! task, because no stage shares mutable data across entities.

use std::sync::Arc;

use kinema_graph::StateGraph;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::events::AnimationEvent;
use crate::scrub::{ScrubCommand, TimelineSection};
use crate::skeleton::{EntitySink, SkeletonRuntime, SkeletonSink};
use crate::state::{CharacterState, Diagnostics, RootMotionDelta};
use crate::{scrub, RuntimeConfig, RuntimeError, RuntimeResult};

/// Entity identifier with a generation counter for stable references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Create an entity handle from its raw parts
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the entity index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the entity generation
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Create a null entity (invalid reference)
    pub fn null() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }

    /// Check if this is a null entity
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::null()
    }
}

/// Result of one entity tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// A transition fired during evaluation this tick
    pub transition_fired: bool,
    /// Destination state index when a transition fired
    pub new_state_index: Option<u16>,
    /// Events emitted this tick, in firing order.
    ///
    /// Capped at the inline capacity so a tick never allocates; events past
    /// the cap stay queued in the entity's ring (read them with
    /// [`AnimatorWorld::drain_events`]) and bump the overflow counter.
    pub events: SmallVec<[AnimationEvent; 8]>,
    /// Root-motion delta for this tick
    pub root_delta: RootMotionDelta,
}

struct EntityEntry {
    generation: u32,
    state: Option<Box<CharacterState>>,
}

/// Owns every animated entity and drives the per-tick pipeline.
pub struct AnimatorWorld {
    config: RuntimeConfig,
    entries: Vec<EntityEntry>,
    free_indices: Vec<u32>,
}

impl AnimatorWorld {
    /// Create an empty world with the given configuration
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            free_indices: Vec::new(),
        }
    }

    /// Get the world configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create an entity bound to a shared graph.
    ///
    /// The graph is validated here; a bad blob rejects the entity outright.
    /// No animation state is instantiated until the first tick.
    pub fn create_entity(&mut self, graph: Arc<StateGraph>) -> RuntimeResult<Entity> {
        let state = Box::new(CharacterState::new(graph, self.config.clone())?);

        let entity = if let Some(index) = self.free_indices.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation += 1;
            entry.state = Some(state);
            Entity::new(index, entry.generation)
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(EntityEntry {
                generation: 0,
                state: Some(state),
            });
            Entity::new(index, 0)
        };
        log::debug!("created animator entity {}", entity.index());
        Ok(entity)
    }

    /// Destroy an entity, releasing its rings. Returns `false` for stale
    /// handles.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        let Some(entry) = self.entries.get_mut(entity.index() as usize) else {
            return false;
        };
        if entry.generation != entity.generation() || entry.state.is_none() {
            return false;
        }
        entry.state = None;
        self.free_indices.push(entity.index());
        true
    }

    /// Check whether a handle refers to a live entity
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.state(entity).is_ok()
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.entries.iter().filter(|e| e.state.is_some()).count()
    }

    /// Set a bool parameter on an entity
    pub fn set_bool_parameter(
        &mut self,
        entity: Entity,
        index: u16,
        value: bool,
    ) -> RuntimeResult<()> {
        self.state_mut(entity)?.params.set_bool(index, value)
    }

    /// Set an int parameter on an entity
    pub fn set_int_parameter(
        &mut self,
        entity: Entity,
        index: u16,
        value: i32,
    ) -> RuntimeResult<()> {
        self.state_mut(entity)?.params.set_int(index, value)
    }

    /// Set a float parameter on an entity
    pub fn set_float_parameter(
        &mut self,
        entity: Entity,
        index: u16,
        value: f32,
    ) -> RuntimeResult<()> {
        self.state_mut(entity)?.params.set_float(index, value)
    }

    /// Read a bool parameter
    pub fn bool_parameter(&self, entity: Entity, index: u16) -> RuntimeResult<bool> {
        self.state(entity)?.params.bool(index)
    }

    /// Read an int parameter
    pub fn int_parameter(&self, entity: Entity, index: u16) -> RuntimeResult<i32> {
        self.state(entity)?.params.int(index)
    }

    /// Read a float parameter
    pub fn float_parameter(&self, entity: Entity, index: u16) -> RuntimeResult<f32> {
        self.state(entity)?.params.float(index)
    }

    /// The state-machine's current state index, once the first tick ran
    pub fn current_state(&self, entity: Entity) -> RuntimeResult<Option<u16>> {
        let state = self.state(entity)?;
        Ok((state.machine.current_state != kinema_graph::NO_INDEX)
            .then_some(state.machine.current_state))
    }

    /// Per-entity diagnostics counters
    pub fn diagnostics(&self, entity: Entity) -> RuntimeResult<Diagnostics> {
        Ok(self.state(entity)?.diagnostics)
    }

    /// The root-motion delta of the entity's most recent tick
    pub fn root_delta(&self, entity: Entity) -> RuntimeResult<RootMotionDelta> {
        Ok(self.state(entity)?.root_delta)
    }

    /// Drain queued events in firing order.
    ///
    /// This is an API-boundary accessor, not part of the tick pipeline: it
    /// allocates a `Vec` sized to the queue instead of touching per-entity
    /// storage.
    pub fn drain_events(&mut self, entity: Entity) -> RuntimeResult<Vec<AnimationEvent>> {
        let state = self.state_mut(entity)?;
        let mut drained = Vec::with_capacity(state.events.len());
        while let Some(event) = state.events.pop() {
            drained.push(event);
        }
        Ok(drained)
    }

    /// Install a scrub timeline, taking the entity out of normal playback
    pub fn install_scrub_timeline(
        &mut self,
        entity: Entity,
        sections: Vec<TimelineSection>,
    ) -> RuntimeResult<()> {
        scrub::install(self.state_mut(entity)?, sections)
    }

    /// Advance the scrub timeline position
    pub fn advance_scrub(&mut self, entity: Entity, dt: f32) -> RuntimeResult<()> {
        scrub::advance(self.state_mut(entity)?, dt);
        Ok(())
    }

    /// Apply a scrub playback command
    pub fn scrub_command(&mut self, entity: Entity, command: ScrubCommand) -> RuntimeResult<()> {
        scrub::command(self.state_mut(entity)?, command);
        Ok(())
    }

    /// Remove the scrub timeline; normal playback resumes next tick
    pub fn remove_scrub(&mut self, entity: Entity) -> RuntimeResult<()> {
        scrub::remove(self.state_mut(entity)?);
        Ok(())
    }

    /// Tick one entity through the full pipeline.
    pub fn tick<L: ClipLibrary, S: SkeletonSink>(
        &mut self,
        entity: Entity,
        dt: f32,
        clips: &L,
        skeleton: &mut S,
    ) -> RuntimeResult<TickReport> {
        Ok(self.state_mut(entity)?.tick(dt, clips, skeleton))
    }

    /// Tick every live entity in parallel.
    ///
    /// Each entity's pipeline runs sequentially on one worker; entities are
    /// distributed across the pool. Reports are not collected: read events,
    /// root deltas and diagnostics through the per-entity accessors.
    pub fn par_tick<L, S>(&mut self, dt: f32, clips: &L, skeletons: &S)
    where
        L: ClipLibrary + Sync,
        S: SkeletonRuntime,
    {
        self.entries
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, entry)| {
                if let Some(state) = entry.state.as_mut() {
                    let entity = Entity::new(index as u32, entry.generation);
                    let mut sink = EntitySink {
                        runtime: skeletons,
                        entity,
                    };
                    let _ = state.tick(dt, clips, &mut sink);
                }
            });
    }

    fn state(&self, entity: Entity) -> RuntimeResult<&CharacterState> {
        self.entries
            .get(entity.index() as usize)
            .filter(|entry| entry.generation == entity.generation())
            .and_then(|entry| entry.state.as_deref())
            .ok_or(RuntimeError::InvalidEntity)
    }

    fn state_mut(&mut self, entity: Entity) -> RuntimeResult<&mut CharacterState> {
        self.entries
            .get_mut(entity.index() as usize)
            .filter(|entry| entry.generation == entity.generation())
            .and_then(|entry| entry.state.as_deref_mut())
            .ok_or(RuntimeError::InvalidEntity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clips::{FixtureClip, FixtureClipLibrary};
    use crate::skeleton::PoseBuffer;
    use glam::Vec3;
    use kinema_graph::{
        bake, AuthorAnyTransition, AuthorCondition, AuthorGraph, AuthorLinearEntry,
        AuthorParameter, AuthorState, AuthorTransition, ParameterKind,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn single_state_graph(clip: u16) -> Arc<StateGraph> {
        let author = AuthorGraph {
            states: vec![AuthorState::single("idle", clip)],
            default_state: "idle".into(),
            ..Default::default()
        };
        Arc::new(bake(&author, None).unwrap().graph)
    }

    #[test]
    fn test_entity_lifecycle_and_recycling() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let graph = single_state_graph(0);

        let a = world.create_entity(graph.clone()).unwrap();
        assert!(world.is_alive(a));
        assert_eq!(world.entity_count(), 1);

        assert!(world.destroy_entity(a));
        assert!(!world.is_alive(a));
        assert!(!world.destroy_entity(a));

        let b = world.create_entity(graph).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert!(!world.is_alive(a));
        assert!(world.is_alive(b));
    }

    #[test]
    fn test_invalid_graph_rejects_entity_creation() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let graph = Arc::new(StateGraph::default());
        assert!(world.create_entity(graph).is_err());
        assert_eq!(world.entity_count(), 0);
    }

    /// Scenario: one looping 1-second state, 30 ticks of 0.1s.
    #[test]
    fn test_idle_loop_wraps_thrice_without_events() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        let entity = world.create_entity(single_state_graph(0)).unwrap();
        let mut sink = PoseBuffer::new(1);

        let mut wraps = 0;
        let mut total_events = 0;
        for _ in 0..30 {
            let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
            total_events += report.events.len();
            let state = world.state(entity).unwrap();
            let (_, _, sampler) = state.samplers.iter().next().unwrap();
            if sampler.time < sampler.prev_time {
                wraps += 1;
            }
            assert_eq!(sampler.weight, 1.0);
        }

        assert_eq!(wraps, 3);
        assert_eq!(total_events, 0);

        // 3.0 seconds of playback wraps back to (approximately) zero.
        let state = world.state(entity).unwrap();
        let anim = state
            .anim_states
            .get(state.machine.current_anim_state)
            .unwrap();
        assert!(anim.time.abs() < 1e-5, "time = {}", anim.time);
    }

    fn crossfade_graph() -> Arc<StateGraph> {
        let author = AuthorGraph {
            parameters: vec![AuthorParameter::new("go", ParameterKind::Bool)],
            states: vec![
                AuthorState::single("a", 0).with_transition(
                    AuthorTransition::to("b")
                        .with_duration(0.25)
                        .with_condition(AuthorCondition::bool_true("go")),
                ),
                AuthorState::single("b", 1),
            ],
            default_state: "a".into(),
            ..Default::default()
        };
        Arc::new(bake(&author, None).unwrap().graph)
    }

    /// Scenario: cross-fade A to B over 0.25s at dt = 0.05.
    #[test]
    fn test_crossfade_completes_and_reclaims_source() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        clips.add(FixtureClip::new(1.0));
        let entity = world.create_entity(crossfade_graph()).unwrap();
        let mut sink = PoseBuffer::new(1);

        for _ in 0..5 {
            world.tick(entity, 0.05, &clips, &mut sink).unwrap();
        }
        world.set_bool_parameter(entity, 0, true).unwrap();

        // The fade fires on the next tick and completes 5 ticks later
        // (0.25s / 0.05s); every intermediate tick keeps the weight sum at 1.
        let mut fired_at = None;
        for tick in 0..10 {
            let report = world.tick(entity, 0.05, &clips, &mut sink).unwrap();
            if report.transition_fired {
                assert_eq!(report.new_state_index, Some(1));
                fired_at = Some(tick);
            }
            let state = world.state(entity).unwrap();
            let sum: f32 = state.anim_states.iter().map(|(_, _, s)| s.weight).sum();
            assert!((sum - 1.0).abs() < 1e-5, "tick {tick}: sum = {sum}");
        }
        assert_eq!(fired_at, Some(0));

        // Steady state: only B remains, at full weight, one sampler live.
        let state = world.state(entity).unwrap();
        assert_eq!(world.current_state(entity).unwrap(), Some(1));
        assert_eq!(state.anim_states.len(), 1);
        assert_eq!(state.samplers.len(), 1);
        let (_, id, anim) = state.anim_states.iter().next().unwrap();
        assert_eq!(id, state.animation_current);
        assert_eq!(anim.weight, 1.0);
    }

    /// Scenario: any-state transition on exit time alone.
    #[test]
    fn test_exit_time_any_state_fires_at_half_second() {
        let author = AuthorGraph {
            states: vec![
                AuthorState::single("idle", 0),
                AuthorState::single("jump", 1),
            ],
            any_transitions: vec![AuthorAnyTransition {
                transition: AuthorTransition::to("jump")
                    .with_duration(0.1)
                    .with_exit_time(0.5),
                allow_self: false,
            }],
            default_state: "idle".into(),
            ..Default::default()
        };
        let graph = Arc::new(bake(&author, None).unwrap().graph);

        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        clips.add(FixtureClip::new(1.0));
        let entity = world.create_entity(graph).unwrap();
        let mut sink = PoseBuffer::new(1);

        // Tick 0 enters idle; idle reaches time 0.5 after five more ticks,
        // so the any-state edge fires on tick 5.
        let mut fired_at = None;
        for tick in 0..8 {
            let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
            if report.transition_fired && report.new_state_index == Some(1) {
                fired_at = Some(tick);
                break;
            }
        }
        assert_eq!(fired_at, Some(5));

        // Jump becomes current and idle decays away.
        for _ in 0..5 {
            world.tick(entity, 0.1, &clips, &mut sink).unwrap();
        }
        assert_eq!(world.current_state(entity).unwrap(), Some(1));
        let state = world.state(entity).unwrap();
        assert_eq!(state.anim_states.len(), 1);

        // The jump state must not immediately re-fire into itself.
        let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
        assert!(!report.transition_fired);
    }

    /// Scenario: 1D blend tree queried exactly at its upper threshold.
    #[test]
    fn test_linear_blend_at_exact_threshold() {
        let author = AuthorGraph {
            parameters: vec![AuthorParameter::new("blend", ParameterKind::Float)],
            states: vec![AuthorState::linear1d(
                "move",
                "blend",
                vec![
                    AuthorLinearEntry::new(0.0, 0),
                    AuthorLinearEntry {
                        threshold: 1.0,
                        clip: 1,
                        speed: 2.0,
                    },
                ],
            )],
            default_state: "move".into(),
            ..Default::default()
        };
        let graph = Arc::new(bake(&author, None).unwrap().graph);

        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        clips.add(FixtureClip::new(3.0));
        let entity = world.create_entity(graph).unwrap();
        world.set_float_parameter(entity, 0, 1.0).unwrap();
        let mut sink = PoseBuffer::new(1);

        world.tick(entity, 0.1, &clips, &mut sink).unwrap();

        let state = world.state(entity).unwrap();
        let anim = state
            .anim_states
            .get(state.machine.current_anim_state)
            .copied()
            .unwrap();
        let block = state.samplers.block(anim.start_sampler, 2).unwrap();
        assert_eq!(block[0].weight, 0.0);
        assert_eq!(block[1].weight, 1.0);

        // loop duration collapses to clip 1's duration over its speed:
        // 3.0 / 2.0, so clip 1 advances at dt * 3.0 / 1.5 = 2 * dt.
        assert!((block[1].time - 0.2).abs() < 1e-5);
    }

    /// Scenario: a self-targeting any-state edge with allow_self = false
    /// never resets the state.
    #[test]
    fn test_suppressed_self_transition_keeps_time() {
        let author = AuthorGraph {
            parameters: vec![AuthorParameter::new("go", ParameterKind::Bool)],
            states: vec![AuthorState::single("idle", 0)],
            any_transitions: vec![AuthorAnyTransition {
                transition: AuthorTransition::to("idle")
                    .with_condition(AuthorCondition::bool_true("go")),
                allow_self: false,
            }],
            default_state: "idle".into(),
            ..Default::default()
        };
        let graph = Arc::new(bake(&author, None).unwrap().graph);

        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(10.0));
        let entity = world.create_entity(graph).unwrap();
        world.set_bool_parameter(entity, 0, true).unwrap();
        let mut sink = PoseBuffer::new(1);

        for tick in 0..20 {
            let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
            assert!(tick == 0 || !report.transition_fired, "tick {tick}");
        }

        let state = world.state(entity).unwrap();
        let anim = state
            .anim_states
            .get(state.machine.current_anim_state)
            .unwrap();
        assert!((anim.time - 2.0).abs() < 1e-4, "time = {}", anim.time);
    }

    /// Scenario: a loop wrap contributes no root delta.
    #[test]
    fn test_loop_wrap_emits_zero_root_delta() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        // 1 metre forward over the 1-second loop.
        clips.add(FixtureClip::new(1.0).with_root_velocity(Vec3::new(0.0, 0.0, 1.0)));
        let entity = world.create_entity(single_state_graph(0)).unwrap();
        let mut sink = PoseBuffer::new(1);

        let mut accumulated = 0.0;
        let mut wrap_ticks = 0;
        for _ in 0..30 {
            let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
            let state = world.state(entity).unwrap();
            let (_, _, sampler) = state.samplers.iter().next().unwrap();
            if sampler.time < sampler.prev_time {
                wrap_ticks += 1;
                assert_eq!(report.root_delta, RootMotionDelta::default());
            } else {
                assert!(report.root_delta.translation.z > 0.0);
            }
            accumulated += report.root_delta.translation.z;
        }

        assert_eq!(wrap_ticks, 3);
        // Forward travel accumulates only on non-wrap ticks.
        assert!((accumulated - 2.7).abs() < 1e-3, "travel = {accumulated}");
    }

    #[test]
    fn test_events_fire_once_per_crossing() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(
            FixtureClip::new(1.0)
                .with_event(0.5, 7)
                .with_event(1.0, 8),
        );
        let entity = world.create_entity(single_state_graph(0)).unwrap();
        let mut sink = PoseBuffer::new(1);

        let mut footfalls = 0;
        let mut loop_ends = 0;
        for _ in 0..20 {
            let report = world.tick(entity, 0.1, &clips, &mut sink).unwrap();
            for event in &report.events {
                match event.event_id {
                    7 => footfalls += 1,
                    8 => loop_ends += 1,
                    other => panic!("unexpected event {other}"),
                }
            }
        }

        // Two full loops: the 0.5 event twice, the end event on each wrap.
        assert_eq!(footfalls, 2);
        assert_eq!(loop_ends, 2);

        let drained = world.drain_events(entity).unwrap();
        assert_eq!(drained.len(), 4);
        assert!(world.drain_events(entity).unwrap().is_empty());
    }

    #[test]
    fn test_determinism_across_identical_runs() {
        let run = || {
            let mut world = AnimatorWorld::new(RuntimeConfig::default());
            let mut clips = FixtureClipLibrary::new();
            clips.add(FixtureClip::new(1.0).with_root_velocity(Vec3::new(0.3, 0.0, 1.0)));
            clips.add(FixtureClip::new(2.0).with_root_velocity(Vec3::new(0.0, 0.0, 2.0)));
            let entity = world.create_entity(crossfade_graph()).unwrap();
            let mut sink = PoseBuffer::new(4);

            let mut poses = Vec::new();
            for tick in 0..60 {
                if tick == 10 {
                    world.set_bool_parameter(entity, 0, true).unwrap();
                }
                world.tick(entity, 0.033, &clips, &mut sink).unwrap();
                poses.extend_from_slice(sink.poses());
            }
            poses
        };

        let first = run();
        let second = run();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.translation.to_array(), b.translation.to_array());
            assert_eq!(a.rotation.to_array(), b.rotation.to_array());
            assert_eq!(a.scale.to_array(), b.scale.to_array());
        }
    }

    /// Repeated transitions must settle back to exactly the steady-state
    /// sampler count: nothing leaks.
    #[test]
    fn test_no_slot_leak_over_many_transitions() {
        let author = AuthorGraph {
            parameters: vec![AuthorParameter::new("go", ParameterKind::Bool)],
            states: vec![
                AuthorState::single("a", 0).with_transition(
                    AuthorTransition::to("b")
                        .with_duration(0.1)
                        .with_condition(AuthorCondition::bool_true("go")),
                ),
                AuthorState::single("b", 1).with_transition(
                    AuthorTransition::to("a")
                        .with_duration(0.1)
                        .with_condition(AuthorCondition::bool_false("go")),
                ),
            ],
            default_state: "a".into(),
            ..Default::default()
        };
        let graph = Arc::new(bake(&author, None).unwrap().graph);

        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        clips.add(FixtureClip::new(1.0));
        let entity = world.create_entity(graph).unwrap();
        let mut sink = PoseBuffer::new(1);

        for round in 0..10 {
            world
                .set_bool_parameter(entity, 0, round % 2 == 0)
                .unwrap();
            for _ in 0..20 {
                world.tick(entity, 0.05, &clips, &mut sink).unwrap();
            }
        }

        let state = world.state(entity).unwrap();
        assert_eq!(state.anim_states.len(), 1);
        assert_eq!(state.samplers.len(), 1);
        assert_eq!(state.diagnostics.dropped_transitions, 0);
    }

    struct CountingSkeletons {
        bones: u16,
        finalized: AtomicU32,
    }

    impl SkeletonRuntime for CountingSkeletons {
        fn bone_count(&self, _entity: Entity) -> u16 {
            self.bones
        }

        fn write_local(&self, _entity: Entity, _bone: u16, _pose: kinema_core::BonePose) {}

        fn finalize(&self, _entity: Entity) {
            self.finalized.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_par_tick_visits_every_entity() {
        let mut world = AnimatorWorld::new(RuntimeConfig::default());
        let mut clips = FixtureClipLibrary::new();
        clips.add(FixtureClip::new(1.0));
        let graph = single_state_graph(0);

        let entities: Vec<Entity> = (0..64)
            .map(|_| world.create_entity(graph.clone()).unwrap())
            .collect();

        let skeletons = CountingSkeletons {
            bones: 4,
            finalized: AtomicU32::new(0),
        };
        world.par_tick(0.1, &clips, &skeletons);

        assert_eq!(skeletons.finalized.load(Ordering::Relaxed), 64);
        for entity in entities {
            assert_eq!(world.current_state(entity).unwrap(), Some(0));
        }
    }
}
