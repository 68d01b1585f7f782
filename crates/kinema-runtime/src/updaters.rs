//! Per-state-kind sampler updates: blend-tree weights and time sync.
//!
//! Runs after the blender. Each updater advances its samplers' clip times,
//! wraps loops, and distributes the owning animation state's weight across
//! the block per the tree math. Blend trees advance every sampler at
//! `clip_duration / loop_duration` so all clips in a block stay phase-locked
//! to the blended loop.

use std::sync::Arc;

use glam::Vec2;
use kinema_graph::{Blend2DAlgorithm, DirectionalBlendEntry, LinearBlendEntry};
use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::state::{CharacterState, StateKindRec};

/// Keeps inverse-distance weights finite when the query point sits exactly
/// on an entry position.
const DISTANCE_EPSILON: f32 = 1e-4;

/// Run all three state-kind updaters for one tick.
pub(crate) fn update_all<L: ClipLibrary>(entity: &mut CharacterState, clips: &L, dt: f32) {
    update_singles(entity, clips, dt);
    update_linears(entity, clips, dt);
    update_directionals(entity, clips, dt);
}

fn update_singles<L: ClipLibrary>(entity: &mut CharacterState, clips: &L, dt: f32) {
    let graph = Arc::clone(&entity.graph);
    let recs: SmallVec<[StateKindRec; 8]> = entity.singles.clone();
    for rec in recs {
        let Some(anim) = entity.anim_states.get(rec.anim_state).copied() else {
            continue;
        };
        let record = graph.state(rec.state_index);
        let duration = clips.duration(graph.single_payload(record.payload).clip);

        let Some(block) = entity.samplers.block_mut(anim.start_sampler, 1) else {
            continue;
        };
        let sampler = &mut block[0];
        sampler.prev_time = sampler.time;
        sampler.time += dt * anim.speed;
        if anim.looping && duration > 0.0 && (sampler.time >= duration || sampler.time < 0.0) {
            sampler.time = sampler.time.rem_euclid(duration);
        }
        sampler.weight = anim.weight;

        wrap_state_time(entity, rec.anim_state, duration);
    }
}

fn update_linears<L: ClipLibrary>(entity: &mut CharacterState, clips: &L, dt: f32) {
    let graph = Arc::clone(&entity.graph);
    let recs: SmallVec<[StateKindRec; 8]> = entity.linears.clone();
    for rec in recs {
        let Some(anim) = entity.anim_states.get(rec.anim_state).copied() else {
            continue;
        };
        let record = graph.state(rec.state_index);
        let payload = graph.linear_payload(record.payload);
        let entries = graph.linear_entries(payload);

        let mut x = entity.params.float_or(payload.blend_parameter, 0.0);
        if !x.is_finite() {
            entity.diagnostics.nan_clamps += 1;
            x = entries[0].threshold;
        }

        let mut weights: SmallVec<[f32; 8]> = SmallVec::new();
        linear_weights(entries, x, &mut weights);
        let loop_duration = blended_loop_duration(
            clips,
            entries.iter().map(|e| (e.clip, e.clip_speed)),
            &weights,
        );

        let Some(block) = entity
            .samplers
            .block_mut(anim.start_sampler, anim.clip_count as usize)
        else {
            continue;
        };
        for (k, sampler) in block.iter_mut().enumerate() {
            let clip_duration = clips.duration(entries[k].clip);
            sampler.prev_time = sampler.time;
            if loop_duration > 0.0 && clip_duration > 0.0 {
                sampler.time += dt * anim.speed * clip_duration / loop_duration;
            }
            if anim.looping
                && clip_duration > 0.0
                && (sampler.time >= clip_duration || sampler.time < 0.0)
            {
                sampler.time = sampler.time.rem_euclid(clip_duration);
            }
            sampler.weight = weights[k] * anim.weight;
        }

        wrap_state_time(entity, rec.anim_state, loop_duration);
    }
}

fn update_directionals<L: ClipLibrary>(entity: &mut CharacterState, clips: &L, dt: f32) {
    let graph = Arc::clone(&entity.graph);
    let recs: SmallVec<[StateKindRec; 8]> = entity.directionals.clone();
    for rec in recs {
        let Some(anim) = entity.anim_states.get(rec.anim_state).copied() else {
            continue;
        };
        let record = graph.state(rec.state_index);
        let payload = graph.directional_payload(record.payload);
        let entries = graph.directional_entries(payload);
        let algorithm = payload
            .algorithm
            .unwrap_or(entity.config.blend_2d_algorithm);

        let mut point = Vec2::new(
            entity.params.float_or(payload.x_parameter, 0.0),
            entity.params.float_or(payload.y_parameter, 0.0),
        );
        if !point.is_finite() {
            entity.diagnostics.nan_clamps += 1;
            point = entries[0].position;
        }

        let mut weights: SmallVec<[f32; 8]> = SmallVec::new();
        directional_weights(entries, point, algorithm, &mut weights);
        let loop_duration = blended_loop_duration(
            clips,
            entries.iter().map(|e| (e.clip, e.clip_speed)),
            &weights,
        );

        let Some(block) = entity
            .samplers
            .block_mut(anim.start_sampler, anim.clip_count as usize)
        else {
            continue;
        };
        for (k, sampler) in block.iter_mut().enumerate() {
            let clip_duration = clips.duration(entries[k].clip);
            sampler.prev_time = sampler.time;
            if loop_duration > 0.0 && clip_duration > 0.0 {
                sampler.time += dt * anim.speed * clip_duration / loop_duration;
            }
            if anim.looping
                && clip_duration > 0.0
                && (sampler.time >= clip_duration || sampler.time < 0.0)
            {
                sampler.time = sampler.time.rem_euclid(clip_duration);
            }
            sampler.weight = weights[k] * anim.weight;
        }

        wrap_state_time(entity, rec.anim_state, loop_duration);
    }
}

/// Wrap a looping animation state's own clock at its loop duration.
fn wrap_state_time(entity: &mut CharacterState, anim_state: u8, loop_duration: f32) {
    if let Some(state) = entity.anim_states.get_mut(anim_state) {
        if state.looping
            && loop_duration > 0.0
            && (state.time >= loop_duration || state.time < 0.0)
        {
            state.time = state.time.rem_euclid(loop_duration);
        }
    }
}

/// Normalized 1D tree weights at blend position `x`.
///
/// `x` clamps to the threshold range; at most the two samplers bracketing it
/// carry weight, and a position exactly on a threshold gives that sampler
/// everything.
pub(crate) fn linear_weights(
    entries: &[LinearBlendEntry],
    x: f32,
    out: &mut SmallVec<[f32; 8]>,
) {
    out.clear();
    out.resize(entries.len(), 0.0);
    if entries.len() == 1 {
        out[0] = 1.0;
        return;
    }

    let min = entries[0].threshold;
    let max = entries[entries.len() - 1].threshold;
    let x = x.clamp(min, max);

    let mut segment = 0;
    for (k, entry) in entries.iter().enumerate() {
        if entry.threshold <= x {
            segment = k;
        }
    }
    segment = segment.min(entries.len() - 2);

    let a = entries[segment].threshold;
    let b = entries[segment + 1].threshold;
    let t = if b > a { (x - a) / (b - a) } else { 0.0 };
    out[segment] = 1.0 - t;
    out[segment + 1] = t;
}

/// Normalized 2D tree weights at blend position `point`.
pub(crate) fn directional_weights(
    entries: &[DirectionalBlendEntry],
    point: Vec2,
    algorithm: Blend2DAlgorithm,
    out: &mut SmallVec<[f32; 8]>,
) {
    out.clear();
    out.resize(entries.len(), 0.0);
    if entries.len() == 1 {
        out[0] = 1.0;
        return;
    }

    match algorithm {
        Blend2DAlgorithm::InverseDistance => {
            for (k, entry) in entries.iter().enumerate() {
                out[k] = 1.0 / (point.distance(entry.position) + DISTANCE_EPSILON);
            }
        }
        Blend2DAlgorithm::GradientBand => {
            for (i, a) in entries.iter().enumerate() {
                let mut weight = 1.0f32;
                for (j, b) in entries.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let edge = b.position - a.position;
                    let len2 = edge.length_squared();
                    if len2 <= f32::EPSILON {
                        continue;
                    }
                    let band = 1.0 - (point - a.position).dot(edge) / len2;
                    weight = weight.min(band.clamp(0.0, 1.0));
                }
                out[i] = weight;
            }
        }
    }

    let sum: f32 = out.iter().sum();
    if sum > 0.0 {
        for weight in out.iter_mut() {
            *weight /= sum;
        }
    } else {
        // Outside every band: snap to the nearest entry.
        let mut nearest = 0;
        let mut best = f32::INFINITY;
        for (k, entry) in entries.iter().enumerate() {
            let d = point.distance_squared(entry.position);
            if d < best {
                best = d;
                nearest = k;
            }
        }
        out[nearest] = 1.0;
    }
}

/// Weighted loop duration `Σ w_k · (duration_k / speed_k)` over the tree.
pub(crate) fn blended_loop_duration<L: ClipLibrary>(
    clips: &L,
    entries: impl Iterator<Item = (u16, f32)>,
    weights: &[f32],
) -> f32 {
    let mut total = 0.0;
    for ((clip, speed), &weight) in entries.zip(weights.iter()) {
        if weight <= 0.0 || speed <= 0.0 {
            continue;
        }
        let duration = clips.duration(clip);
        if duration <= 0.0 {
            continue;
        }
        total += weight * duration / speed;
    }
    if total.is_finite() {
        total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clips::{FixtureClip, FixtureClipLibrary};
    use crate::state::CharacterState;
    use crate::{factory, RuntimeConfig};
    use kinema_graph::{
        bake, AuthorDirectionalEntry, AuthorGraph, AuthorLinearEntry, AuthorParameter,
        AuthorState, ParameterKind,
    };
    use std::sync::Arc;

    fn library() -> FixtureClipLibrary {
        let mut library = FixtureClipLibrary::new();
        library.add(FixtureClip::new(1.0)); // clip 0
        library.add(FixtureClip::new(2.0)); // clip 1
        library.add(FixtureClip::new(4.0)); // clip 2
        library
    }

    /// Build an entity with the authored state live at full weight.
    fn live_entity(author: &AuthorGraph) -> (CharacterState, u8) {
        let graph = Arc::new(bake(author, None).unwrap().graph);
        let mut entity = CharacterState::new(graph, RuntimeConfig::default()).unwrap();
        let id = factory::instantiate(&mut entity, 0).unwrap();
        entity.machine.current_state = 0;
        entity.machine.current_anim_state = id;
        entity.animation_current = id;
        entity.anim_states.get_mut(id).unwrap().weight = 1.0;
        (entity, id)
    }

    #[test]
    fn test_single_advances_and_wraps() {
        let author = AuthorGraph {
            states: vec![AuthorState::single("idle", 0)],
            default_state: "idle".into(),
            ..Default::default()
        };
        let (mut entity, id) = live_entity(&author);
        let clips = library();

        for _ in 0..9 {
            update_all(&mut entity, &clips, 0.1);
        }
        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 1).unwrap();
        assert!((block[0].time - 0.9).abs() < 1e-5);
        assert_eq!(block[0].weight, 1.0);

        // Clip duration is 1.0; the tenth tick wraps.
        update_all(&mut entity, &clips, 0.1);
        let block = entity.samplers.block(state.start_sampler, 1).unwrap();
        assert!(block[0].time < 0.01, "time = {}", block[0].time);
        assert!(block[0].time < block[0].prev_time);
    }

    #[test]
    fn test_non_looping_single_runs_past_the_end() {
        let author = AuthorGraph {
            states: vec![AuthorState::single("shot", 0).with_looping(false)],
            default_state: "shot".into(),
            ..Default::default()
        };
        let (mut entity, id) = live_entity(&author);
        let clips = library();

        for _ in 0..15 {
            update_all(&mut entity, &clips, 0.1);
        }
        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 1).unwrap();
        assert!(block[0].time > 1.0);
    }

    fn linear_author() -> AuthorGraph {
        AuthorGraph {
            parameters: vec![AuthorParameter::new("blend", ParameterKind::Float)],
            states: vec![AuthorState::linear1d(
                "move",
                "blend",
                vec![
                    AuthorLinearEntry::new(0.0, 0),
                    AuthorLinearEntry::new(1.0, 1),
                ],
            )],
            default_state: "move".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_weights_at_exact_threshold() {
        let (mut entity, id) = live_entity(&linear_author());
        let clips = library();
        entity.params.set_float(0, 1.0).unwrap();

        update_all(&mut entity, &clips, 0.1);

        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 2).unwrap();
        assert_eq!(block[0].weight, 0.0);
        assert_eq!(block[1].weight, 1.0);
    }

    #[test]
    fn test_linear_weights_interpolate() {
        let (mut entity, id) = live_entity(&linear_author());
        let clips = library();
        entity.params.set_float(0, 0.25).unwrap();

        update_all(&mut entity, &clips, 0.1);

        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 2).unwrap();
        assert!((block[0].weight - 0.75).abs() < 1e-6);
        assert!((block[1].weight - 0.25).abs() < 1e-6);
        assert!((block[0].weight + block[1].weight - state.weight).abs() < 1e-6);
    }

    #[test]
    fn test_linear_time_sync_keeps_phase_locked() {
        let (mut entity, id) = live_entity(&linear_author());
        let clips = library();
        entity.params.set_float(0, 0.5).unwrap();

        for _ in 0..10 {
            update_all(&mut entity, &clips, 0.1);
        }

        // Clip 0 is 1s, clip 1 is 2s; both advance proportionally to their
        // duration, so their normalized phases stay equal.
        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 2).unwrap();
        let phase_0 = block[0].time / clips.duration(0);
        let phase_1 = block[1].time / clips.duration(1);
        assert!((phase_0 - phase_1).abs() < 1e-5);
        assert!(phase_0 > 0.0);
    }

    #[test]
    fn test_linear_loop_duration_at_endpoint() {
        let clips = library();
        let entries = [
            LinearBlendEntry {
                threshold: 0.0,
                clip: 0,
                clip_speed: 1.0,
            },
            LinearBlendEntry {
                threshold: 1.0,
                clip: 2,
                clip_speed: 2.0,
            },
        ];
        let mut weights: SmallVec<[f32; 8]> = SmallVec::new();
        linear_weights(&entries, 1.0, &mut weights);

        let loop_duration = blended_loop_duration(
            &clips,
            entries.iter().map(|e| (e.clip, e.clip_speed)),
            &weights,
        );
        // Only clip 2 is active: 4.0s at speed 2.0.
        assert!((loop_duration - 2.0).abs() < 1e-6);
    }

    fn directional_author(algorithm: Option<Blend2DAlgorithm>) -> AuthorGraph {
        let mut state = AuthorState::directional2d(
            "strafe",
            "x",
            "y",
            vec![
                AuthorDirectionalEntry::new(0.0, 1.0, 0),
                AuthorDirectionalEntry::new(1.0, 0.0, 1),
                AuthorDirectionalEntry::new(-1.0, 0.0, 2),
            ],
        );
        if let kinema_graph::AuthorStateKind::Directional2D {
            algorithm: ref mut slot,
            ..
        } = state.kind
        {
            *slot = algorithm;
        }
        AuthorGraph {
            parameters: vec![
                AuthorParameter::new("x", ParameterKind::Float),
                AuthorParameter::new("y", ParameterKind::Float),
            ],
            states: vec![state],
            default_state: "strafe".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_inverse_distance_peaks_at_entry() {
        let (mut entity, id) =
            live_entity(&directional_author(Some(Blend2DAlgorithm::InverseDistance)));
        let clips = library();
        entity.params.set_float(0, 0.0).unwrap();
        entity.params.set_float(1, 1.0).unwrap();

        update_all(&mut entity, &clips, 0.1);

        let state = *entity.anim_states.get(id).unwrap();
        let block = entity.samplers.block(state.start_sampler, 3).unwrap();
        assert!(block[0].weight > 0.99, "w0 = {}", block[0].weight);
        let total: f32 = block.iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_band_vertex_impulse() {
        let entries = [
            DirectionalBlendEntry {
                position: Vec2::new(0.0, 1.0),
                clip: 0,
                clip_speed: 1.0,
            },
            DirectionalBlendEntry {
                position: Vec2::new(1.0, 0.0),
                clip: 1,
                clip_speed: 1.0,
            },
            DirectionalBlendEntry {
                position: Vec2::new(-1.0, 0.0),
                clip: 2,
                clip_speed: 1.0,
            },
        ];
        let mut weights: SmallVec<[f32; 8]> = SmallVec::new();

        for (k, entry) in entries.iter().enumerate() {
            directional_weights(
                &entries,
                entry.position,
                Blend2DAlgorithm::GradientBand,
                &mut weights,
            );
            for (j, &weight) in weights.iter().enumerate() {
                if j == k {
                    assert!((weight - 1.0).abs() < 1e-6, "entry {k}");
                } else {
                    assert!(weight.abs() < 1e-6, "entry {k} leaked into {j}");
                }
            }
        }
    }

    #[test]
    fn test_gradient_band_weights_are_continuous() {
        let entries = [
            DirectionalBlendEntry {
                position: Vec2::new(0.0, 1.0),
                clip: 0,
                clip_speed: 1.0,
            },
            DirectionalBlendEntry {
                position: Vec2::new(1.0, 0.0),
                clip: 1,
                clip_speed: 1.0,
            },
        ];
        let mut previous: SmallVec<[f32; 8]> = SmallVec::new();
        directional_weights(
            &entries,
            Vec2::new(0.0, 1.0),
            Blend2DAlgorithm::GradientBand,
            &mut previous,
        );

        // Walk from one vertex to the other; successive weight vectors may
        // only move by a bounded step.
        for i in 1..=50 {
            let t = i as f32 / 50.0;
            let point = Vec2::new(t, 1.0 - t);
            let mut current: SmallVec<[f32; 8]> = SmallVec::new();
            directional_weights(
                &entries,
                point,
                Blend2DAlgorithm::GradientBand,
                &mut current,
            );
            for (a, b) in previous.iter().zip(current.iter()) {
                assert!((a - b).abs() < 0.1, "jump at t = {t}");
            }
            previous = current;
        }
        assert!((previous[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_positions_share_weight() {
        let entries = [
            DirectionalBlendEntry {
                position: Vec2::ZERO,
                clip: 0,
                clip_speed: 1.0,
            },
            DirectionalBlendEntry {
                position: Vec2::ZERO,
                clip: 1,
                clip_speed: 1.0,
            },
        ];
        let mut weights: SmallVec<[f32; 8]> = SmallVec::new();
        directional_weights(
            &entries,
            Vec2::ZERO,
            Blend2DAlgorithm::GradientBand,
            &mut weights,
        );
        assert!((weights[0] - 0.5).abs() < 1e-6);
        assert!((weights[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_nan_blend_parameter_clamps_and_counts() {
        let (mut entity, _) = live_entity(&linear_author());
        let clips = library();
        entity.params.set_float(0, f32::NAN).unwrap();

        update_all(&mut entity, &clips, 0.1);

        assert_eq!(entity.diagnostics.nan_clamps, 1);
    }
}
