//! Per-bone weighted pose accumulation.
//!
//! For every bone, contributions from all positive-weight samplers are
//! summed (quaternions sum-then-normalize, never slerp) and written through
//! the skeleton sink. Invalid clips contribute nothing and are counted;
//! non-finite samples clamp to the neutral pose and are counted.

use kinema_core::transform::PoseAccumulator;
use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::skeleton::SkeletonSink;
use crate::state::CharacterState;

/// Blend every live sampler's pose into the sink, bone by bone.
pub(crate) fn sample_bones<L: ClipLibrary, S: SkeletonSink>(
    entity: &mut CharacterState,
    clips: &L,
    sink: &mut S,
) {
    let mut live: SmallVec<[(u16, f32, f32); 8]> = SmallVec::new();
    for (_, _, sampler) in entity.samplers.iter() {
        if sampler.weight <= 0.0 {
            continue;
        }
        if !clips.is_valid(sampler.clip) {
            entity.diagnostics.missing_clips += 1;
            continue;
        }
        live.push((sampler.clip, sampler.time, sampler.weight));
    }

    if live.is_empty() {
        sink.finalize();
        return;
    }

    let bone_count = sink.bone_count();
    for bone in 0..bone_count {
        let mut acc = PoseAccumulator::new();
        for &(clip, time, weight) in &live {
            let mut pose = clips.sample(clip, time, bone);
            if pose.sanitize() {
                entity.diagnostics.nan_clamps += 1;
            }
            acc.accumulate(&pose, weight);
        }
        if let Some(mut pose) = acc.finish() {
            if pose.sanitize() {
                entity.diagnostics.nan_clamps += 1;
            }
            sink.write_local(bone, pose);
        }
    }
    sink.finalize();
}
