//! Root-motion delta extraction.
//!
//! Samples bone 0 at each qualifying sampler's current and previous times,
//! blends both with the sampler weights, and reports the difference. A
//! sampler whose loop wrapped this tick has `time <= prev_time` and is
//! excluded, so loops never emit a huge negative delta (configurable).

use glam::Quat;
use kinema_core::transform::PoseAccumulator;

use crate::clips::ClipLibrary;
use crate::state::{CharacterState, RootMotionDelta};

const ROOT_BONE: u16 = 0;

/// Compute this tick's root delta into `entity.root_delta`.
pub(crate) fn extract<L: ClipLibrary>(entity: &mut CharacterState, clips: &L) {
    let suppress_wrapped = entity.config.loop_wrap_suppresses_root_delta;

    let mut now = PoseAccumulator::new();
    let mut prev = PoseAccumulator::new();
    let mut nan_clamps = 0u32;
    for (_, _, sampler) in entity.samplers.iter() {
        if sampler.weight <= 0.0 {
            continue;
        }
        if suppress_wrapped && sampler.time <= sampler.prev_time {
            continue;
        }
        if !clips.is_valid(sampler.clip) {
            continue;
        }
        let mut pose_now = clips.sample(sampler.clip, sampler.time, ROOT_BONE);
        let mut pose_prev = clips.sample(sampler.clip, sampler.prev_time, ROOT_BONE);
        if pose_now.sanitize() {
            nan_clamps += 1;
        }
        if pose_prev.sanitize() {
            nan_clamps += 1;
        }
        now.accumulate(&pose_now, sampler.weight);
        prev.accumulate(&pose_prev, sampler.weight);
    }
    entity.diagnostics.nan_clamps += nan_clamps;

    entity.root_delta = match (now.finish(), prev.finish()) {
        (Some(now), Some(prev)) => {
            let spin = now.rotation * prev.rotation.conjugate();
            let length = spin.length();
            let rotation = if length > f32::EPSILON {
                Quat::from_xyzw(
                    spin.x / length,
                    spin.y / length,
                    spin.z / length,
                    spin.w / length,
                )
            } else {
                Quat::IDENTITY
            };
            let mut delta = RootMotionDelta {
                translation: now.translation - prev.translation,
                rotation,
            };
            if !delta.translation.is_finite() || !delta.rotation.is_finite() {
                entity.diagnostics.nan_clamps += 1;
                delta = RootMotionDelta::default();
            }
            delta
        }
        _ => RootMotionDelta::default(),
    };
}
