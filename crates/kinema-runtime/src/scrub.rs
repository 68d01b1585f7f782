//! Editor scrub/preview timeline.
//!
//! While an entity carries the scrub marker, a timeline program owns its
//! sampler ring: evaluation, instantiation, blending and the per-kind
//! updaters are bypassed, and each tick derives a render request (a state at
//! a time, or a transition at a progress) that is applied to the samplers in
//! place. Bone sampling, root motion and events keep running, so a timeline
//! holding a single `State` section advancing at real time reproduces normal
//! playback bit for bit.

use std::sync::Arc;

use glam::Vec2;
use kinema_graph::StateKind;
use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::state::{CharacterState, EntityFlags};
use crate::{factory, updaters, RuntimeError, RuntimeResult};

/// One section of a scrub timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimelineSection {
    /// Normal playback of a state
    State { state: u16, duration: f32 },
    /// Ghosted preview of the cross-fade source
    GhostFrom { state: u16, duration: f32 },
    /// Ghosted preview of the cross-fade destination
    GhostTo { state: u16, duration: f32 },
    /// Hold bar on the source state leading into a transition
    FromBar { state: u16, duration: f32 },
    /// Hold bar on the destination state following a transition
    ToBar { state: u16, duration: f32 },
    /// Cross-fade between two states over explicit clip-time ranges
    Transition {
        from: u16,
        to: u16,
        /// Pool index of the edge supplying the blend curve, if any
        transition: Option<u32>,
        duration: f32,
        /// Clip-time window played in the source state
        from_range: (f32, f32),
        /// Clip-time window played in the destination state
        to_range: (f32, f32),
    },
}

impl TimelineSection {
    /// Section length in seconds
    pub fn duration(&self) -> f32 {
        match *self {
            Self::State { duration, .. }
            | Self::GhostFrom { duration, .. }
            | Self::GhostTo { duration, .. }
            | Self::FromBar { duration, .. }
            | Self::ToBar { duration, .. }
            | Self::Transition { duration, .. } => duration,
        }
    }

    fn push_states(&self, out: &mut SmallVec<[u16; 8]>) {
        let mut push = |state: u16| {
            if !out.contains(&state) {
                out.push(state);
            }
        };
        match *self {
            Self::State { state, .. }
            | Self::GhostFrom { state, .. }
            | Self::GhostTo { state, .. }
            | Self::FromBar { state, .. }
            | Self::ToBar { state, .. } => push(state),
            Self::Transition { from, to, .. } => {
                push(from);
                push(to);
            }
        }
    }
}

/// Playback commands accepted while scrubbing.
///
/// Every command except `Play` leaves the timeline paused at the position it
/// selects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrubCommand {
    /// Resume timeline playback
    Play,
    /// Freeze the timeline position
    Pause,
    /// Scale how fast `advance` moves the position
    SetSpeed(f32),
    /// Jump to a normalized position over the whole timeline
    ScrubToNormalized(f32),
    /// Jump to a normalized progress within the first transition section
    ScrubTransitionProgress(f32),
    /// Step by whole frames at a given frame rate
    StepFrames { frames: i32, fps: f32 },
}

/// The render request derived from the current section.
#[derive(Debug, Clone, Copy, PartialEq)]
enum RenderRequest {
    State {
        state: u16,
        time: f32,
    },
    Transition {
        from: u16,
        to: u16,
        transition: Option<u32>,
        progress: f32,
        from_time: f32,
        to_time: f32,
    },
}

/// Per-entity timeline program driving the sampler ring.
#[derive(Debug, Clone)]
pub(crate) struct ScrubController {
    sections: Vec<TimelineSection>,
    /// Timeline state index to the animation state instantiated for it
    bindings: SmallVec<[(u16, u8); 8]>,
    position: f32,
    playing: bool,
    playback_speed: f32,
}

impl ScrubController {
    fn new(sections: Vec<TimelineSection>) -> Self {
        Self {
            sections,
            bindings: SmallVec::new(),
            position: 0.0,
            playing: true,
            playback_speed: 1.0,
        }
    }

    /// Sum of all section durations
    pub fn total_duration(&self) -> f32 {
        self.sections.iter().map(TimelineSection::duration).sum()
    }

    /// Current timeline position in seconds
    pub fn position(&self) -> f32 {
        self.position
    }

    fn advance(&mut self, dt: f32) {
        if !self.playing {
            return;
        }
        self.position += dt * self.playback_speed;
        let total = self.total_duration();
        if total > 0.0 && (self.position >= total || self.position < 0.0) {
            self.position = self.position.rem_euclid(total);
        }
    }

    fn command(&mut self, command: ScrubCommand) {
        match command {
            ScrubCommand::Play => self.playing = true,
            ScrubCommand::Pause => self.playing = false,
            ScrubCommand::SetSpeed(speed) => {
                self.playback_speed = if speed.is_finite() { speed } else { 1.0 };
            }
            ScrubCommand::ScrubToNormalized(t) => {
                self.position = t.clamp(0.0, 1.0) * self.total_duration();
                self.playing = false;
            }
            ScrubCommand::ScrubTransitionProgress(p) => {
                let mut start = 0.0;
                for section in &self.sections {
                    if let TimelineSection::Transition { duration, .. } = *section {
                        self.position = start + p.clamp(0.0, 1.0) * duration;
                        self.playing = false;
                        return;
                    }
                    start += section.duration();
                }
            }
            ScrubCommand::StepFrames { frames, fps } => {
                if fps > 0.0 {
                    self.position += frames as f32 / fps;
                    let total = self.total_duration();
                    if total > 0.0 {
                        self.position = self.position.rem_euclid(total);
                    }
                    self.playing = false;
                }
            }
        }
    }

    fn current(&self) -> Option<(&TimelineSection, f32)> {
        let last = self.sections.len().checked_sub(1)?;
        let mut local = self.position;
        for (index, section) in self.sections.iter().enumerate() {
            let duration = section.duration();
            if local < duration || index == last {
                return Some((section, local));
            }
            local -= duration;
        }
        None
    }

    fn derive(&self) -> Option<RenderRequest> {
        let (section, local) = self.current()?;
        Some(match *section {
            TimelineSection::State { state, .. }
            | TimelineSection::GhostFrom { state, .. }
            | TimelineSection::GhostTo { state, .. }
            | TimelineSection::FromBar { state, .. }
            | TimelineSection::ToBar { state, .. } => RenderRequest::State { state, time: local },
            TimelineSection::Transition {
                from,
                to,
                transition,
                duration,
                from_range,
                to_range,
            } => {
                let progress = if duration > 0.0 {
                    (local / duration).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                RenderRequest::Transition {
                    from,
                    to,
                    transition,
                    progress,
                    from_time: from_range.0 + progress * (from_range.1 - from_range.0),
                    to_time: to_range.0 + progress * (to_range.1 - to_range.0),
                }
            }
        })
    }
}

/// Install a timeline program, taking the entity out of normal playback.
pub(crate) fn install(
    entity: &mut CharacterState,
    sections: Vec<TimelineSection>,
) -> RuntimeResult<()> {
    if sections.is_empty() {
        return Err(RuntimeError::EmptyTimeline);
    }

    let mut referenced: SmallVec<[u16; 8]> = SmallVec::new();
    for section in &sections {
        section.push_states(&mut referenced);
    }
    for &state in &referenced {
        if state >= entity.graph.state_count() {
            return Err(RuntimeError::InvalidTimelineState(state));
        }
    }

    entity.reset_playback();
    let mut controller = ScrubController::new(sections);
    for &state in &referenced {
        match factory::instantiate(entity, state) {
            Ok(id) => controller.bindings.push((state, id)),
            Err(error) => {
                entity.reset_playback();
                return Err(error);
            }
        }
    }

    log::debug!(
        "installing scrub timeline: {} section(s), {} state(s)",
        controller.sections.len(),
        controller.bindings.len()
    );
    entity.scrub = Some(controller);
    entity.flags.insert(EntityFlags::SCRUB_ACTIVE);
    Ok(())
}

/// Remove the timeline and return the entity to normal playback. The next
/// tick re-enters the graph's default state.
pub(crate) fn remove(entity: &mut CharacterState) {
    entity.scrub = None;
    entity.flags.remove(EntityFlags::SCRUB_ACTIVE);
    entity.reset_playback();
    log::debug!("removed scrub timeline");
}

/// Move the timeline position by `dt`, modulated by the playback speed.
pub(crate) fn advance(entity: &mut CharacterState, dt: f32) {
    if let Some(controller) = entity.scrub.as_mut() {
        controller.advance(dt);
    }
}

/// Apply a playback command to the timeline.
pub(crate) fn command(entity: &mut CharacterState, command: ScrubCommand) {
    if let Some(controller) = entity.scrub.as_mut() {
        controller.command(command);
    }
}

/// Derive the current render request and write it into the sampler ring.
pub(crate) fn apply<L: ClipLibrary>(entity: &mut CharacterState, clips: &L) {
    let Some(controller) = entity.scrub.as_ref() else {
        return;
    };
    let Some(request) = controller.derive() else {
        return;
    };
    let bindings: SmallVec<[(u16, u8); 8]> = controller.bindings.clone();

    // The request re-weights the involved states; everything else goes dark.
    for (_, _, state) in entity.anim_states.iter_mut() {
        state.weight = 0.0;
    }

    match request {
        RenderRequest::State { state, time } => {
            drive_state(entity, clips, &bindings, state, time, 1.0);
        }
        RenderRequest::Transition {
            from,
            to,
            transition,
            progress,
            from_time,
            to_time,
        } => {
            let graph = Arc::clone(&entity.graph);
            let mut weight = progress;
            if let Some(index) = transition {
                if let Some(record) = graph.transition_at(index) {
                    if let Some(curve) = graph.blend_curve(record) {
                        weight = curve.evaluate(progress);
                    }
                }
            }
            let weight = weight.clamp(0.0, 1.0);
            drive_state(entity, clips, &bindings, from, from_time, 1.0 - weight);
            drive_state(entity, clips, &bindings, to, to_time, weight);
        }
    }
}

/// Set one bound state's samplers to an explicit time and weight.
fn drive_state<L: ClipLibrary>(
    entity: &mut CharacterState,
    clips: &L,
    bindings: &[(u16, u8)],
    state_index: u16,
    time: f32,
    weight: f32,
) {
    let Some(&(_, id)) = bindings.iter().find(|(state, _)| *state == state_index) else {
        return;
    };
    let graph = Arc::clone(&entity.graph);
    let record = *graph.state(state_index);

    let anim = {
        let Some(state) = entity.anim_states.get_mut(id) else {
            return;
        };
        state.weight = weight;
        state.time = time;
        *state
    };

    match record.kind {
        StateKind::Single => {
            let duration = clips.duration(graph.single_payload(record.payload).clip);
            let Some(block) = entity.samplers.block_mut(anim.start_sampler, 1) else {
                return;
            };
            let sampler = &mut block[0];
            sampler.prev_time = sampler.time;
            sampler.time = if anim.looping && duration > 0.0 && (time >= duration || time < 0.0)
            {
                time.rem_euclid(duration)
            } else {
                time
            };
            sampler.weight = weight;
        }
        StateKind::Linear1D => {
            let payload = graph.linear_payload(record.payload);
            let entries = graph.linear_entries(payload);
            let mut x = entity.params.float_or(payload.blend_parameter, 0.0);
            if !x.is_finite() {
                entity.diagnostics.nan_clamps += 1;
                x = entries[0].threshold;
            }
            let mut weights: SmallVec<[f32; 8]> = SmallVec::new();
            updaters::linear_weights(entries, x, &mut weights);
            let loop_duration = updaters::blended_loop_duration(
                clips,
                entries.iter().map(|e| (e.clip, e.clip_speed)),
                &weights,
            );
            let Some(block) = entity
                .samplers
                .block_mut(anim.start_sampler, anim.clip_count as usize)
            else {
                return;
            };
            for (k, sampler) in block.iter_mut().enumerate() {
                let clip_duration = clips.duration(entries[k].clip);
                sampler.prev_time = sampler.time;
                let target = if loop_duration > 0.0 {
                    time * clip_duration / loop_duration
                } else {
                    0.0
                };
                sampler.time = if anim.looping
                    && clip_duration > 0.0
                    && (target >= clip_duration || target < 0.0)
                {
                    target.rem_euclid(clip_duration)
                } else {
                    target
                };
                sampler.weight = weights[k] * weight;
            }
        }
        StateKind::Directional2D => {
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
            updaters::directional_weights(entries, point, algorithm, &mut weights);
            let loop_duration = updaters::blended_loop_duration(
                clips,
                entries.iter().map(|e| (e.clip, e.clip_speed)),
                &weights,
            );
            let Some(block) = entity
                .samplers
                .block_mut(anim.start_sampler, anim.clip_count as usize)
            else {
                return;
            };
            for (k, sampler) in block.iter_mut().enumerate() {
                let clip_duration = clips.duration(entries[k].clip);
                sampler.prev_time = sampler.time;
                let target = if loop_duration > 0.0 {
                    time * clip_duration / loop_duration
                } else {
                    0.0
                };
                sampler.time = if anim.looping
                    && clip_duration > 0.0
                    && (target >= clip_duration || target < 0.0)
                {
                    target.rem_euclid(clip_duration)
                } else {
                    target
                };
                sampler.weight = weights[k] * weight;
            }
        }
    }
}
