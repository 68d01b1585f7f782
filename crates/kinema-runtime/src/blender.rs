//! Cross-fade weighting and sampler garbage collection.
//!
//! Per tick: reclaim states that finished fading last tick, accept the
//! pending transition, advance every animation state's time, ramp the
//! transition target's weight (linear or through the authored curve) and
//! redistribute the remainder across the other live states in proportion to
//! their current weights.

use smallvec::SmallVec;

use kinema_core::ring::INVALID_ID;

use crate::state::{ActiveTransition, CharacterState};

/// Run the blender stage for one tick.
pub(crate) fn blend(entity: &mut CharacterState, dt: f32) {
    collect(entity);
    accept(entity);

    for (_, _, state) in entity.anim_states.iter_mut() {
        state.time += dt * state.speed;
    }

    let Some(active) = entity.active else {
        return;
    };
    let Some(target_state) = entity.anim_states.get(active.target).copied() else {
        // The target fell out of the ring (external interference); abandon
        // the cross-fade rather than chase a stale ID.
        entity.active = None;
        return;
    };

    let mut weight = if active.duration <= 0.0 {
        1.0
    } else {
        let progress = target_state.time / active.duration;
        let shaped = active
            .transition
            .and_then(|t| {
                let record = entity.graph.transition(t);
                entity.graph.blend_curve(record)
            })
            .map_or(progress, |curve| curve.evaluate(progress));
        shaped.clamp(0.0, 1.0)
    };
    if !weight.is_finite() {
        entity.diagnostics.nan_clamps += 1;
        weight = 0.0;
    }

    if let Some(state) = entity.anim_states.get_mut(active.target) {
        state.weight = weight;
    }
    distribute(entity, active.target, 1.0 - weight);

    if weight >= 1.0 {
        entity.animation_current = active.target;
        entity.active = None;
    }
}

/// Promote the evaluator's pending request to the active cross-fade.
fn accept(entity: &mut CharacterState) {
    let Some(pending) = entity.pending.take() else {
        return;
    };
    if entity.anim_states.index_of(pending.target).is_none() {
        return;
    }
    // The very first state snaps in; there is nothing to fade from.
    let duration = if entity.animation_current == INVALID_ID {
        0.0
    } else {
        pending.duration
    };
    if let Some(state) = entity.anim_states.get_mut(pending.target) {
        state.time = 0.0;
    }
    entity.active = Some(ActiveTransition {
        target: pending.target,
        duration,
        transition: pending.transition,
    });
}

/// Spread `remaining` across every live state except `target`, proportional
/// to current weights, or equally when they all sit at zero.
fn distribute(entity: &mut CharacterState, target: u8, remaining: f32) {
    let mut sum = 0.0;
    let mut others = 0u32;
    for (_, id, state) in entity.anim_states.iter() {
        if id != target {
            sum += state.weight;
            others += 1;
        }
    }
    if others == 0 {
        return;
    }

    if sum > 0.0 {
        let scale = remaining / sum;
        for (_, id, state) in entity.anim_states.iter_mut() {
            if id != target {
                state.weight *= scale;
            }
        }
    } else {
        let share = remaining / others as f32;
        for (_, id, state) in entity.anim_states.iter_mut() {
            if id != target {
                state.weight = share;
            }
        }
    }
}

/// Release zero-weight states that are neither current nor a transition
/// endpoint, along with their sampler blocks and kind records.
fn collect(entity: &mut CharacterState) {
    let mut dead: SmallVec<[(u8, u8, u8); 8]> = SmallVec::new();
    for (_, id, state) in entity.anim_states.iter() {
        if state.weight > 0.0 {
            continue;
        }
        if id == entity.animation_current || id == entity.machine.current_anim_state {
            continue;
        }
        if entity.pending.as_ref().is_some_and(|p| p.target == id) {
            continue;
        }
        if entity.active.as_ref().is_some_and(|a| a.target == id) {
            continue;
        }
        dead.push((id, state.start_sampler, state.clip_count));
    }

    for (id, start_sampler, clip_count) in dead {
        entity.samplers.release_block(start_sampler, clip_count as usize);
        entity.anim_states.release(id);
        entity.singles.retain(|rec| rec.anim_state != id);
        entity.linears.retain(|rec| rec.anim_state != id);
        entity.directionals.retain(|rec| rec.anim_state != id);
    }
}
