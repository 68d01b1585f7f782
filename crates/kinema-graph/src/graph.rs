//! Baked graph records and the flattened [`StateGraph`].
//!
//! All cross-references are forward indices into pools owned by the graph;
//! there are no pointers and no cycles of ownership. The graph is immutable
//! once baked and freely shareable across entities.

use glam::Vec2;
use kinema_core::curve::{CurveKey, KeyframeCurve};
use serde::{Deserialize, Serialize};

use crate::{GraphError, GraphResult};

/// Sentinel for optional `u16` indices ("none").
pub const NO_INDEX: u16 = u16::MAX;

/// Discriminates the three state kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    /// Plays a single clip
    Single,
    /// 1D linear blend tree over a float parameter
    Linear1D,
    /// 2D directional blend tree over two float parameters
    Directional2D,
}

/// One flattened authored state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRecord {
    /// State kind, selecting the payload array
    pub kind: StateKind,
    /// Index into the payload array for `kind`
    pub payload: u16,
    /// Authored playback speed
    pub base_speed: f32,
    /// Float parameter scaling `base_speed`, or [`NO_INDEX`]
    pub speed_parameter: u16,
    /// Whether clip time wraps at the loop duration
    pub looping: bool,
    /// First outgoing transition in the transition pool
    pub first_transition: u32,
    /// Number of outgoing transitions
    pub transition_count: u32,
    /// Exit group shared with sub-state-machine siblings, or [`NO_INDEX`]
    pub exit_group: u16,
}

/// A conditional edge between two states.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRecord {
    /// Destination state index
    pub to_state: u16,
    /// Cross-fade duration in seconds
    pub duration: f32,
    /// Whether `exit_time` gates this transition
    pub has_exit_time: bool,
    /// Minimum source-state time in seconds before the transition may fire
    pub exit_time: f32,
    /// First condition in the condition pool
    pub first_condition: u32,
    /// Number of conditions (strict AND)
    pub condition_count: u32,
    /// First key in the curve-key pool
    pub first_curve_key: u32,
    /// Number of curve keys; 0 selects the plain linear ramp
    pub curve_key_count: u32,
}

/// A transition eligible from every state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnyStateTransition {
    /// The underlying edge
    pub transition: TransitionRecord,
    /// Whether the edge may target the state it fires from
    pub allow_self: bool,
}

/// Transitions shared by every exit state of one visual sub-state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitTransitionGroup {
    /// First transition in the transition pool
    pub first_transition: u32,
    /// Number of transitions
    pub transition_count: u32,
}

/// Comparators available to transition conditions.
///
/// Float comparisons use the literal comparator with no epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    BoolTrue,
    BoolFalse,
    IntEq,
    IntNe,
    IntGt,
    IntGe,
    IntLt,
    IntLe,
    FloatGt,
    FloatLt,
}

impl Comparator {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::BoolTrue => 0,
            Self::BoolFalse => 1,
            Self::IntEq => 2,
            Self::IntNe => 3,
            Self::IntGt => 4,
            Self::IntGe => 5,
            Self::IntLt => 6,
            Self::IntLe => 7,
            Self::FloatGt => 8,
            Self::FloatLt => 9,
        }
    }

    pub(crate) fn from_u8(value: u8) -> GraphResult<Self> {
        Ok(match value {
            0 => Self::BoolTrue,
            1 => Self::BoolFalse,
            2 => Self::IntEq,
            3 => Self::IntNe,
            4 => Self::IntGt,
            5 => Self::IntGe,
            6 => Self::IntLt,
            7 => Self::IntLe,
            8 => Self::FloatGt,
            9 => Self::FloatLt,
            other => {
                return Err(GraphError::InvalidBlob(format!(
                    "unknown comparator tag {other}"
                )))
            }
        })
    }

    /// Whether this comparator reads the bool store
    pub fn reads_bool(&self) -> bool {
        matches!(self, Self::BoolTrue | Self::BoolFalse)
    }

    /// Whether this comparator reads the int store
    pub fn reads_int(&self) -> bool {
        matches!(
            self,
            Self::IntEq | Self::IntNe | Self::IntGt | Self::IntGe | Self::IntLt | Self::IntLe
        )
    }

    /// Whether this comparator reads the float store
    pub fn reads_float(&self) -> bool {
        matches!(self, Self::FloatGt | Self::FloatLt)
    }
}

/// One transition condition against a parameter store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    /// Parameter index in the store the comparator reads
    pub parameter: u16,
    /// Comparison applied
    pub comparator: Comparator,
    /// Right-hand side (truncated for int comparisons)
    pub rhs: f32,
}

/// Payload of a [`StateKind::Single`] state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinglePayload {
    /// Clip index in the external clip library
    pub clip: u16,
}

/// Payload of a [`StateKind::Linear1D`] state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear1DPayload {
    /// Float parameter selecting the blend position
    pub blend_parameter: u16,
    /// First entry in the linear-entry pool
    pub first_entry: u32,
    /// Number of entries (at least one, sorted by threshold)
    pub entry_count: u32,
}

/// One clip of a 1D blend tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearBlendEntry {
    /// Blend-parameter value at which this clip fully owns the pose
    pub threshold: f32,
    /// Clip index
    pub clip: u16,
    /// Per-clip speed multiplier
    pub clip_speed: f32,
}

/// Weighting algorithm for 2D directional blend trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blend2DAlgorithm {
    /// Normalized inverse distance to each entry position
    InverseDistance,
    /// Generalized gradient-band interpolation
    GradientBand,
}

/// Payload of a [`StateKind::Directional2D`] state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Directional2DPayload {
    /// Float parameter for the x axis
    pub x_parameter: u16,
    /// Float parameter for the y axis
    pub y_parameter: u16,
    /// First entry in the directional-entry pool
    pub first_entry: u32,
    /// Number of entries (at least one)
    pub entry_count: u32,
    /// Pinned algorithm, or `None` to use the runtime default
    pub algorithm: Option<Blend2DAlgorithm>,
}

/// One clip of a 2D blend tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalBlendEntry {
    /// Position in blend-parameter space
    pub position: Vec2,
    /// Clip index
    pub clip: u16,
    /// Per-clip speed multiplier
    pub clip_speed: f32,
}

/// Which list a fired transition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    /// The current state's outgoing list
    State,
    /// The graph-wide any-state list
    AnyState,
    /// The current state's exit group
    Exit,
}

/// Tagged reference to a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRef {
    /// List the transition lives in
    pub source: TransitionSource,
    /// Index into that list ([`TransitionSource::AnyState`] indexes the
    /// any-state array; the other two index the shared transition pool)
    pub index: u32,
}

/// The immutable flattened state graph.
///
/// Built once at bake time and shared read-only across every entity that
/// references it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateGraph {
    pub(crate) states: Vec<StateRecord>,
    pub(crate) transitions: Vec<TransitionRecord>,
    pub(crate) any_transitions: Vec<AnyStateTransition>,
    pub(crate) exit_groups: Vec<ExitTransitionGroup>,
    pub(crate) single_payloads: Vec<SinglePayload>,
    pub(crate) linear_payloads: Vec<Linear1DPayload>,
    pub(crate) linear_entries: Vec<LinearBlendEntry>,
    pub(crate) directional_payloads: Vec<Directional2DPayload>,
    pub(crate) directional_entries: Vec<DirectionalBlendEntry>,
    pub(crate) curve_keys: Vec<CurveKey>,
    pub(crate) conditions: Vec<Condition>,
    /// Debug state names, aligned with `states` when present
    pub(crate) debug_names: Vec<String>,
    pub(crate) default_state: u16,
    pub(crate) bool_param_count: u16,
    pub(crate) int_param_count: u16,
    pub(crate) float_param_count: u16,
}

impl StateGraph {
    /// Number of states
    pub fn state_count(&self) -> u16 {
        self.states.len() as u16
    }

    /// All state records
    pub fn states(&self) -> &[StateRecord] {
        &self.states
    }

    /// A state record by index
    pub fn state(&self, index: u16) -> &StateRecord {
        &self.states[index as usize]
    }

    /// The state entered on an entity's first tick
    pub fn default_state(&self) -> u16 {
        self.default_state
    }

    /// All any-state transitions, in declaration order
    pub fn any_transitions(&self) -> &[AnyStateTransition] {
        &self.any_transitions
    }

    /// Number of bool parameters
    pub fn bool_parameter_count(&self) -> u16 {
        self.bool_param_count
    }

    /// Number of int parameters
    pub fn int_parameter_count(&self) -> u16 {
        self.int_param_count
    }

    /// Number of float parameters
    pub fn float_parameter_count(&self) -> u16 {
        self.float_param_count
    }

    /// Outgoing transitions of a state with their base pool index
    pub fn outgoing_with_base(&self, state: &StateRecord) -> (u32, &[TransitionRecord]) {
        let first = state.first_transition as usize;
        let count = state.transition_count as usize;
        (state.first_transition, &self.transitions[first..first + count])
    }

    /// Exit-group transitions of a state with their base pool index, when the
    /// state is an exit state
    pub fn exit_transitions_with_base(
        &self,
        state: &StateRecord,
    ) -> Option<(u32, &[TransitionRecord])> {
        if state.exit_group == NO_INDEX {
            return None;
        }
        let group = self.exit_groups.get(state.exit_group as usize)?;
        let first = group.first_transition as usize;
        let count = group.transition_count as usize;
        Some((group.first_transition, &self.transitions[first..first + count]))
    }

    /// A pooled transition by raw index, when in range
    pub fn transition_at(&self, index: u32) -> Option<&TransitionRecord> {
        self.transitions.get(index as usize)
    }

    /// Resolve a tagged transition reference
    pub fn transition(&self, transition: TransitionRef) -> &TransitionRecord {
        match transition.source {
            TransitionSource::AnyState => &self.any_transitions[transition.index as usize].transition,
            TransitionSource::State | TransitionSource::Exit => {
                &self.transitions[transition.index as usize]
            }
        }
    }

    /// Conditions of a transition, in declaration order
    pub fn conditions(&self, transition: &TransitionRecord) -> &[Condition] {
        let first = transition.first_condition as usize;
        let count = transition.condition_count as usize;
        &self.conditions[first..first + count]
    }

    /// Authored blend curve of a transition, when present
    pub fn blend_curve(&self, transition: &TransitionRecord) -> Option<KeyframeCurve<'_>> {
        if transition.curve_key_count == 0 {
            return None;
        }
        let first = transition.first_curve_key as usize;
        let count = transition.curve_key_count as usize;
        Some(KeyframeCurve::new(&self.curve_keys[first..first + count]))
    }

    /// Payload of a [`StateKind::Single`] state
    pub fn single_payload(&self, index: u16) -> &SinglePayload {
        &self.single_payloads[index as usize]
    }

    /// Payload of a [`StateKind::Linear1D`] state
    pub fn linear_payload(&self, index: u16) -> &Linear1DPayload {
        &self.linear_payloads[index as usize]
    }

    /// Entries of a 1D blend tree, sorted ascending by threshold
    pub fn linear_entries(&self, payload: &Linear1DPayload) -> &[LinearBlendEntry] {
        let first = payload.first_entry as usize;
        let count = payload.entry_count as usize;
        &self.linear_entries[first..first + count]
    }

    /// Payload of a [`StateKind::Directional2D`] state
    pub fn directional_payload(&self, index: u16) -> &Directional2DPayload {
        &self.directional_payloads[index as usize]
    }

    /// Entries of a 2D blend tree
    pub fn directional_entries(
        &self,
        payload: &Directional2DPayload,
    ) -> &[DirectionalBlendEntry] {
        let first = payload.first_entry as usize;
        let count = payload.entry_count as usize;
        &self.directional_entries[first..first + count]
    }

    /// Number of clip samplers a state instantiates
    pub fn clip_count_of(&self, state: &StateRecord) -> u16 {
        match state.kind {
            StateKind::Single => 1,
            StateKind::Linear1D => self.linear_payload(state.payload).entry_count as u16,
            StateKind::Directional2D => {
                self.directional_payload(state.payload).entry_count as u16
            }
        }
    }

    /// Debug name of a state, when the bake kept the string pool
    pub fn debug_name(&self, state_index: u16) -> Option<&str> {
        self.debug_names.get(state_index as usize).map(String::as_str)
    }

    /// Check every structural invariant of the baked form.
    pub fn validate(&self) -> GraphResult<()> {
        let n_states = self.states.len();
        if n_states == 0 {
            return Err(GraphError::Invariant("graph holds no states".into()));
        }
        if self.default_state as usize >= n_states {
            return Err(GraphError::Invariant(format!(
                "default state {} out of range ({} states)",
                self.default_state, n_states
            )));
        }
        if !self.debug_names.is_empty() && self.debug_names.len() != n_states {
            return Err(GraphError::Invariant(
                "debug name pool does not align with the state array".into(),
            ));
        }

        for (index, state) in self.states.iter().enumerate() {
            self.validate_range(
                state.first_transition,
                state.transition_count,
                self.transitions.len(),
                "state transition",
            )?;
            if state.speed_parameter != NO_INDEX
                && state.speed_parameter >= self.float_param_count
            {
                return Err(GraphError::Invariant(format!(
                    "state {index} speed parameter {} out of range",
                    state.speed_parameter
                )));
            }
            if state.exit_group != NO_INDEX
                && state.exit_group as usize >= self.exit_groups.len()
            {
                return Err(GraphError::Invariant(format!(
                    "state {index} exit group {} out of range",
                    state.exit_group
                )));
            }
            if !state.base_speed.is_finite() {
                return Err(GraphError::Invariant(format!(
                    "state {index} speed is not finite"
                )));
            }
            match state.kind {
                StateKind::Single => {
                    if state.payload as usize >= self.single_payloads.len() {
                        return Err(GraphError::Invariant(format!(
                            "state {index} single payload out of range"
                        )));
                    }
                }
                StateKind::Linear1D => {
                    if state.payload as usize >= self.linear_payloads.len() {
                        return Err(GraphError::Invariant(format!(
                            "state {index} linear payload out of range"
                        )));
                    }
                }
                StateKind::Directional2D => {
                    if state.payload as usize >= self.directional_payloads.len() {
                        return Err(GraphError::Invariant(format!(
                            "state {index} directional payload out of range"
                        )));
                    }
                }
            }
        }

        for group in &self.exit_groups {
            self.validate_range(
                group.first_transition,
                group.transition_count,
                self.transitions.len(),
                "exit group transition",
            )?;
        }

        for transition in self
            .transitions
            .iter()
            .chain(self.any_transitions.iter().map(|any| &any.transition))
        {
            self.validate_transition(transition)?;
        }

        for condition in &self.conditions {
            let count = match condition.comparator {
                c if c.reads_bool() => self.bool_param_count,
                c if c.reads_int() => self.int_param_count,
                _ => self.float_param_count,
            };
            if condition.parameter >= count {
                return Err(GraphError::Invariant(format!(
                    "condition parameter {} out of range",
                    condition.parameter
                )));
            }
        }

        for payload in &self.linear_payloads {
            self.validate_range(
                payload.first_entry,
                payload.entry_count,
                self.linear_entries.len(),
                "linear blend entry",
            )?;
            if payload.entry_count == 0 {
                return Err(GraphError::Invariant(
                    "1D blend tree holds no entries".into(),
                ));
            }
            if payload.blend_parameter >= self.float_param_count {
                return Err(GraphError::Invariant(format!(
                    "1D blend parameter {} out of range",
                    payload.blend_parameter
                )));
            }
            let entries = self.linear_entries(payload);
            for pair in entries.windows(2) {
                if !(pair[0].threshold <= pair[1].threshold) {
                    return Err(GraphError::Invariant(
                        "1D blend thresholds are not sorted ascending".into(),
                    ));
                }
            }
            if entries.iter().any(|e| !e.threshold.is_finite()) {
                return Err(GraphError::Invariant(
                    "1D blend threshold is not finite".into(),
                ));
            }
        }

        for payload in &self.directional_payloads {
            self.validate_range(
                payload.first_entry,
                payload.entry_count,
                self.directional_entries.len(),
                "directional blend entry",
            )?;
            if payload.entry_count == 0 {
                return Err(GraphError::Invariant(
                    "2D blend tree holds no entries".into(),
                ));
            }
            if payload.x_parameter >= self.float_param_count
                || payload.y_parameter >= self.float_param_count
            {
                return Err(GraphError::Invariant(
                    "2D blend parameter out of range".into(),
                ));
            }
        }

        Ok(())
    }

    fn validate_transition(&self, transition: &TransitionRecord) -> GraphResult<()> {
        if transition.to_state as usize >= self.states.len() {
            return Err(GraphError::Invariant(format!(
                "transition target {} out of range",
                transition.to_state
            )));
        }
        if !(transition.duration >= 0.0) {
            return Err(GraphError::Invariant(
                "transition duration is negative or not finite".into(),
            ));
        }
        if transition.has_exit_time && !(transition.exit_time >= 0.0) {
            return Err(GraphError::Invariant(
                "transition exit time is negative or not finite".into(),
            ));
        }
        self.validate_range(
            transition.first_condition,
            transition.condition_count,
            self.conditions.len(),
            "condition",
        )?;
        self.validate_range(
            transition.first_curve_key,
            transition.curve_key_count,
            self.curve_keys.len(),
            "curve key",
        )?;
        if transition.curve_key_count > 0 {
            let first = transition.first_curve_key as usize;
            let keys = &self.curve_keys[first..first + transition.curve_key_count as usize];
            for pair in keys.windows(2) {
                if !(pair[0].time <= pair[1].time) {
                    return Err(GraphError::Invariant(
                        "blend curve keys are not sorted ascending".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_range(
        &self,
        first: u32,
        count: u32,
        pool_len: usize,
        what: &str,
    ) -> GraphResult<()> {
        let end = first as usize + count as usize;
        if end > pool_len {
            return Err(GraphError::Invariant(format!(
                "{what} range {first}..{end} exceeds pool of {pool_len}"
            )));
        }
        Ok(())
    }
}
