//! Clip-event emission and the bounded per-entity event ring.
//!
//! Events are written to a ring, never dispatched: the hot path stays free of
//! callbacks. Comparison happens in normalized clip time, so an event at
//! exactly 1.0 fires on the tick its sampler wraps.

use smallvec::SmallVec;

use crate::clips::ClipLibrary;
use crate::state::CharacterState;
use crate::EventOverflowPolicy;

/// A fired clip event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimationEvent {
    /// Authored event identifier
    pub event_id: u32,
    /// Clip the event fired from
    pub clip: u16,
}

/// Bounded per-entity event queue with an explicit overflow policy.
#[derive(Debug, Clone)]
pub(crate) struct EventRing {
    buf: Box<[AnimationEvent]>,
    head: usize,
    len: usize,
    policy: EventOverflowPolicy,
}

impl EventRing {
    pub fn with_capacity(capacity: usize, policy: EventOverflowPolicy) -> Self {
        Self {
            buf: vec![AnimationEvent::default(); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Queue an event. Returns `false` when an event was dropped (either the
    /// incoming one or the oldest queued one, per policy).
    pub fn push(&mut self, event: AnimationEvent) -> bool {
        let capacity = self.buf.len();
        if capacity == 0 {
            return false;
        }
        if self.len == capacity {
            return match self.policy {
                EventOverflowPolicy::DropNewest => false,
                EventOverflowPolicy::DropOldest => {
                    self.buf[self.head] = event;
                    self.head = (self.head + 1) % capacity;
                    false
                }
            };
        }
        let tail = (self.head + self.len) % capacity;
        self.buf[tail] = event;
        self.len += 1;
        true
    }

    /// Dequeue the oldest event
    pub fn pop(&mut self) -> Option<AnimationEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        Some(event)
    }
}

/// Emit every event each sampler crossed this tick.
///
/// The window is half-open, `[prev, now)` in normalized time, so ticks chain
/// without double-firing. A wrapped sampler fires `[prev, 1] ∪ [0, now)`.
///
/// Fired events go to the entity's ring and to `out`. Both sinks are
/// bounded: `out` never grows past its inline capacity, so the tick stays
/// allocation-free, and an event shed from either sink bumps the overflow
/// counter.
pub(crate) fn emit<L: ClipLibrary>(
    entity: &mut CharacterState,
    clips: &L,
    out: &mut SmallVec<[AnimationEvent; 8]>,
) {
    let mut shed = 0u32;
    for (_, _, sampler) in entity.samplers.iter() {
        if sampler.time == sampler.prev_time {
            continue;
        }
        if !clips.is_valid(sampler.clip) {
            continue;
        }
        let duration = clips.duration(sampler.clip);
        if duration <= 0.0 {
            continue;
        }
        let table = clips.event_table(sampler.clip);
        if table.is_empty() {
            continue;
        }

        let prev = sampler.prev_time / duration;
        let now = sampler.time / duration;
        let wrapped = sampler.time < sampler.prev_time;
        for event in table {
            let at = event.normalized_time;
            let hit = if wrapped {
                at >= prev || at < now
            } else {
                at >= prev && at < now
            };
            if hit {
                let fired = AnimationEvent {
                    event_id: event.event_id,
                    clip: sampler.clip,
                };
                let queued = entity.events.push(fired);
                let reported = if out.len() < out.inline_size() {
                    out.push(fired);
                    true
                } else {
                    false
                };
                if !queued || !reported {
                    shed += 1;
                }
            }
        }
    }
    entity.diagnostics.event_overflow += shed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clips::{FixtureClip, FixtureClipLibrary};
    use crate::state::{CharacterState, ClipSampler};
    use crate::RuntimeConfig;
    use kinema_graph::{bake, AuthorGraph, AuthorState};
    use std::sync::Arc;

    fn event(id: u32) -> AnimationEvent {
        AnimationEvent {
            event_id: id,
            clip: 0,
        }
    }

    #[test]
    fn test_ring_preserves_fifo_order() {
        let mut ring = EventRing::with_capacity(4, EventOverflowPolicy::DropOldest);

        for id in 0..3 {
            assert!(ring.push(event(id)));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.pop(), Some(event(0)));
        assert_eq!(ring.pop(), Some(event(1)));
        assert_eq!(ring.pop(), Some(event(2)));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_drop_oldest_overwrites_head() {
        let mut ring = EventRing::with_capacity(2, EventOverflowPolicy::DropOldest);

        assert!(ring.push(event(0)));
        assert!(ring.push(event(1)));
        assert!(!ring.push(event(2)));

        assert_eq!(ring.pop(), Some(event(1)));
        assert_eq!(ring.pop(), Some(event(2)));
    }

    #[test]
    fn test_drop_newest_discards_incoming() {
        let mut ring = EventRing::with_capacity(2, EventOverflowPolicy::DropNewest);

        assert!(ring.push(event(0)));
        assert!(ring.push(event(1)));
        assert!(!ring.push(event(2)));

        assert_eq!(ring.pop(), Some(event(0)));
        assert_eq!(ring.pop(), Some(event(1)));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_emit_caps_the_report_and_counts_overflow() {
        let author = AuthorGraph {
            states: vec![AuthorState::single("idle", 0)],
            default_state: "idle".into(),
            ..Default::default()
        };
        let graph = Arc::new(bake(&author, None).unwrap().graph);
        let mut entity = CharacterState::new(graph, RuntimeConfig::default()).unwrap();

        // Twelve events crossed in a single tick.
        let mut clip = FixtureClip::new(1.0);
        for i in 0..12 {
            clip = clip.with_event(i as f32 * 0.05, i);
        }
        let mut clips = FixtureClipLibrary::new();
        clips.add(clip);

        let base = entity.samplers.reserve(1).unwrap();
        entity.samplers.block_mut(base, 1).unwrap()[0] = ClipSampler {
            clip: 0,
            prev_time: 0.0,
            time: 0.95,
            weight: 1.0,
        };

        let mut out: SmallVec<[AnimationEvent; 8]> = SmallVec::new();
        emit(&mut entity, &clips, &mut out);

        // The per-tick report stops at its inline capacity; the ring keeps
        // the full set and the shed events are counted.
        assert_eq!(out.len(), out.inline_size());
        assert_eq!(entity.events.len(), 12);
        assert_eq!(entity.diagnostics.event_overflow, 4);
        assert_eq!(out[0], event(0));
    }
}
