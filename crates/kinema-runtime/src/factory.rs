//! State instantiation.
//!
//! Reserves the destination state's contiguous sampler block, allocates its
//! animation-state slot (weight 0, ramped up by the blender) and appends the
//! per-kind record. Capacity misses roll back cleanly and surface as
//! [`RuntimeError::OutOfCapacity`]; the caller drops the transition for this
//! tick and counts it.

use std::sync::Arc;

use kinema_graph::{StateKind, NO_INDEX};

use crate::state::{AnimationState, CharacterState, StateKindRec};
use crate::{RuntimeError, RuntimeResult};

/// Instantiate `state_index` for an entity, returning the new animation
/// state's ID.
pub(crate) fn instantiate(entity: &mut CharacterState, state_index: u16) -> RuntimeResult<u8> {
    let graph = Arc::clone(&entity.graph);
    let record = *graph.state(state_index);

    let speed_scale = if record.speed_parameter == NO_INDEX {
        1.0
    } else {
        entity.params.float_or(record.speed_parameter, 1.0)
    };
    let mut effective_speed = record.base_speed * speed_scale;
    if !effective_speed.is_finite() {
        entity.diagnostics.nan_clamps += 1;
        effective_speed = 0.0;
    }

    let kind_ring = match record.kind {
        StateKind::Single => &entity.singles,
        StateKind::Linear1D => &entity.linears,
        StateKind::Directional2D => &entity.directionals,
    };
    if kind_ring.len() >= entity.config.max_concurrent_blends {
        return Err(RuntimeError::OutOfCapacity("state kind records"));
    }

    let clip_count = graph.clip_count_of(&record) as usize;
    let start_sampler = entity
        .samplers
        .reserve(clip_count)
        .map_err(|_| RuntimeError::OutOfCapacity("clip samplers"))?;

    let Some(block) = entity.samplers.block_mut(start_sampler, clip_count) else {
        return Err(RuntimeError::OutOfCapacity("clip samplers"));
    };
    match record.kind {
        StateKind::Single => {
            block[0].clip = graph.single_payload(record.payload).clip;
        }
        StateKind::Linear1D => {
            let payload = graph.linear_payload(record.payload);
            for (sampler, entry) in block.iter_mut().zip(graph.linear_entries(payload)) {
                sampler.clip = entry.clip;
            }
        }
        StateKind::Directional2D => {
            let payload = graph.directional_payload(record.payload);
            for (sampler, entry) in block.iter_mut().zip(graph.directional_entries(payload)) {
                sampler.clip = entry.clip;
            }
        }
    }

    let animation_state = AnimationState {
        time: 0.0,
        weight: 0.0,
        speed: effective_speed,
        looping: record.looping,
        start_sampler,
        clip_count: clip_count as u8,
    };
    let (id, _) = match entity.anim_states.insert(animation_state) {
        Ok(slot) => slot,
        Err(_) => {
            entity.samplers.release_block(start_sampler, clip_count);
            return Err(RuntimeError::OutOfCapacity("animation states"));
        }
    };

    let rec = StateKindRec {
        anim_state: id,
        state_index,
    };
    match record.kind {
        StateKind::Single => entity.singles.push(rec),
        StateKind::Linear1D => entity.linears.push(rec),
        StateKind::Directional2D => entity.directionals.push(rec),
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeConfig;
    use kinema_graph::{
        bake, AuthorGraph, AuthorLinearEntry, AuthorParameter, AuthorState, ParameterKind,
    };

    fn entity_for(author: &AuthorGraph, config: RuntimeConfig) -> CharacterState {
        let graph = Arc::new(bake(author, None).unwrap().graph);
        CharacterState::new(graph, config).unwrap()
    }

    fn blend_author() -> AuthorGraph {
        AuthorGraph {
            parameters: vec![
                AuthorParameter::new("blend", ParameterKind::Float),
                AuthorParameter::new("rate", ParameterKind::Float),
            ],
            states: vec![
                AuthorState::single("idle", 0),
                AuthorState::linear1d(
                    "move",
                    "blend",
                    vec![
                        AuthorLinearEntry::new(0.0, 1),
                        AuthorLinearEntry::new(0.5, 2),
                        AuthorLinearEntry::new(1.0, 3),
                    ],
                )
                .with_speed(2.0)
                .with_speed_parameter("rate"),
            ],
            default_state: "idle".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_state_reserves_one_sampler() {
        let mut entity = entity_for(&blend_author(), RuntimeConfig::default());
        let id = instantiate(&mut entity, 0).unwrap();

        let state = entity.anim_states.get(id).copied().unwrap();
        assert_eq!(state.clip_count, 1);
        assert_eq!(state.weight, 0.0);
        assert_eq!(state.time, 0.0);
        assert_eq!(entity.samplers.len(), 1);
        assert_eq!(entity.singles.len(), 1);

        let block = entity.samplers.block(state.start_sampler, 1).unwrap();
        assert_eq!(block[0].clip, 0);
    }

    #[test]
    fn test_blend_tree_reserves_entry_count_samplers() {
        let mut entity = entity_for(&blend_author(), RuntimeConfig::default());
        entity.params.set_float(1, 1.5).unwrap();

        let id = instantiate(&mut entity, 1).unwrap();
        let state = entity.anim_states.get(id).copied().unwrap();

        assert_eq!(state.clip_count, 3);
        // base 2.0 scaled by the "rate" parameter 1.5
        assert_eq!(state.speed, 3.0);
        let block = entity
            .samplers
            .block(state.start_sampler, 3)
            .unwrap()
            .to_vec();
        let clips: Vec<u16> = block.iter().map(|s| s.clip).collect();
        assert_eq!(clips, vec![1, 2, 3]);
    }

    #[test]
    fn test_sampler_capacity_miss_rolls_back() {
        let config = RuntimeConfig {
            max_active_clips: 2,
            ..RuntimeConfig::default()
        };
        let mut entity = entity_for(&blend_author(), config);

        // The 3-clip tree cannot fit in a 2-slot sampler ring.
        assert!(matches!(
            instantiate(&mut entity, 1),
            Err(RuntimeError::OutOfCapacity(_))
        ));
        assert_eq!(entity.samplers.len(), 0);
        assert_eq!(entity.anim_states.len(), 0);
        assert!(entity.linears.is_empty());
    }

    #[test]
    fn test_state_ring_capacity_miss_releases_samplers() {
        let config = RuntimeConfig {
            max_concurrent_blends: 1,
            ..RuntimeConfig::default()
        };
        let mut entity = entity_for(&blend_author(), config);

        instantiate(&mut entity, 0).unwrap();
        assert!(matches!(
            instantiate(&mut entity, 0),
            Err(RuntimeError::OutOfCapacity(_))
        ));
        // The failed attempt must not leak sampler slots.
        assert_eq!(entity.samplers.len(), 1);
    }
}
