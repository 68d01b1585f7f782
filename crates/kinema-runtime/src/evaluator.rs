//! Transition evaluation.
//!
//! Order is strict: any-state transitions first, then the current state's
//! outgoing list, then its exit group, each in declaration order, stopping at
//! the first edge that fires. At most one transition fires per entity per
//! tick; a destination whose own transitions are immediately true fires again
//! on the next tick, not this one.

use kinema_core::ring::INVALID_ID;
use kinema_graph::{
    Comparator, Condition, StateGraph, TransitionRecord, TransitionRef, TransitionSource, NO_INDEX,
};

use crate::params::ParameterStore;
use crate::state::CharacterState;

/// A transition the evaluator decided to take.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FiredTransition {
    pub to_state: u16,
    pub duration: f32,
    /// Source edge; `None` for the initial default-state entry
    pub transition: Option<TransitionRef>,
}

/// Whether the state machine should evaluate this tick.
///
/// It defers when something else owns playback: the machine only runs while
/// the blender's current animation state is the one it installed (or is the
/// target of its own in-flight transition), or before any state exists.
pub(crate) fn should_run(entity: &CharacterState) -> bool {
    entity.animation_current == INVALID_ID
        || entity.animation_current == entity.machine.current_anim_state
        || entity
            .pending
            .as_ref()
            .is_some_and(|p| p.target == entity.machine.current_anim_state)
        || entity
            .active
            .as_ref()
            .is_some_and(|a| a.target == entity.machine.current_anim_state)
}

/// Evaluate the entity's transitions against its parameter stores.
pub(crate) fn evaluate(entity: &CharacterState) -> Option<FiredTransition> {
    let graph = &entity.graph;

    // First tick: enter the default state with a zero-length blend.
    if entity.machine.current_state == NO_INDEX {
        return Some(FiredTransition {
            to_state: graph.default_state(),
            duration: 0.0,
            transition: None,
        });
    }

    if !should_run(entity) {
        return None;
    }

    let current = entity.machine.current_state;
    let record = graph.state(current);
    let state_time = entity
        .anim_states
        .get(entity.machine.current_anim_state)
        .map_or(0.0, |s| s.time);

    for (index, any) in graph.any_transitions().iter().enumerate() {
        if !any.allow_self && any.transition.to_state == current {
            continue;
        }
        if fires(graph, &any.transition, &entity.params, state_time) {
            return Some(FiredTransition {
                to_state: any.transition.to_state,
                duration: any.transition.duration,
                transition: Some(TransitionRef {
                    source: TransitionSource::AnyState,
                    index: index as u32,
                }),
            });
        }
    }

    let (base, outgoing) = graph.outgoing_with_base(record);
    for (offset, transition) in outgoing.iter().enumerate() {
        if fires(graph, transition, &entity.params, state_time) {
            return Some(FiredTransition {
                to_state: transition.to_state,
                duration: transition.duration,
                transition: Some(TransitionRef {
                    source: TransitionSource::State,
                    index: base + offset as u32,
                }),
            });
        }
    }

    if let Some((base, group)) = graph.exit_transitions_with_base(record) {
        for (offset, transition) in group.iter().enumerate() {
            if fires(graph, transition, &entity.params, state_time) {
                return Some(FiredTransition {
                    to_state: transition.to_state,
                    duration: transition.duration,
                    transition: Some(TransitionRef {
                        source: TransitionSource::Exit,
                        index: base + offset as u32,
                    }),
                });
            }
        }
    }

    None
}

/// Whether one edge fires given the current state time and parameters.
fn fires(
    graph: &StateGraph,
    transition: &TransitionRecord,
    params: &ParameterStore,
    state_time: f32,
) -> bool {
    // An edge with nothing to test never fires; an unconditional instant
    // transition would otherwise pin the machine to its destination.
    if transition.condition_count == 0 && !transition.has_exit_time {
        return false;
    }
    if transition.has_exit_time && state_time < transition.exit_time {
        return false;
    }
    graph
        .conditions(transition)
        .iter()
        .all(|condition| check(condition, params))
}

fn check(condition: &Condition, params: &ParameterStore) -> bool {
    match condition.comparator {
        Comparator::BoolTrue => params.bool_or(condition.parameter, false),
        Comparator::BoolFalse => !params.bool_or(condition.parameter, false),
        Comparator::IntEq => params.int_or(condition.parameter, 0) == condition.rhs as i32,
        Comparator::IntNe => params.int_or(condition.parameter, 0) != condition.rhs as i32,
        Comparator::IntGt => params.int_or(condition.parameter, 0) > condition.rhs as i32,
        Comparator::IntGe => params.int_or(condition.parameter, 0) >= condition.rhs as i32,
        Comparator::IntLt => params.int_or(condition.parameter, 0) < condition.rhs as i32,
        Comparator::IntLe => params.int_or(condition.parameter, 0) <= condition.rhs as i32,
        Comparator::FloatGt => params.float_or(condition.parameter, 0.0) > condition.rhs,
        Comparator::FloatLt => params.float_or(condition.parameter, 0.0) < condition.rhs,
    }
}
