//! Authoring description and the bake pass.
//!
//! Authoring graphs name states and parameters and may group states into
//! visual sub-state machines (nested arbitrarily). Baking flattens every
//! grouping into the single top-level state array, resolves names to integer
//! indices, assigns each sub machine's shared exit-transition group to its
//! exit states, and validates the result. Name tables survive the bake for
//! diagnostics and tooling; the runtime never reads them.

use ahash::AHashMap;
use glam::Vec2;
use kinema_core::curve::CurveKey;
use serde::{Deserialize, Serialize};

use crate::graph::{
    AnyStateTransition, Blend2DAlgorithm, Comparator, Condition, Directional2DPayload,
    DirectionalBlendEntry, ExitTransitionGroup, Linear1DPayload, LinearBlendEntry, SinglePayload,
    StateGraph, StateKind, StateRecord, TransitionRecord, NO_INDEX,
};
use crate::{GraphError, GraphResult};

fn default_speed() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Parameter value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Bool,
    Int,
    Float,
}

/// A named authored parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorParameter {
    pub name: String,
    pub kind: ParameterKind,
}

impl AuthorParameter {
    /// Create a named parameter
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A named authored state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorState {
    pub name: String,
    pub kind: AuthorStateKind,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub speed_parameter: Option<String>,
    #[serde(default = "default_true")]
    pub looping: bool,
    #[serde(default)]
    pub transitions: Vec<AuthorTransition>,
    /// Marks an exit state of the enclosing sub-state machine
    #[serde(default)]
    pub exit: bool,
}

impl AuthorState {
    /// A single-clip state
    pub fn single(name: impl Into<String>, clip: u16) -> Self {
        Self {
            name: name.into(),
            kind: AuthorStateKind::Single { clip },
            speed: 1.0,
            speed_parameter: None,
            looping: true,
            transitions: Vec::new(),
            exit: false,
        }
    }

    /// A 1D blend-tree state
    pub fn linear1d(
        name: impl Into<String>,
        parameter: impl Into<String>,
        entries: Vec<AuthorLinearEntry>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: AuthorStateKind::Linear1D {
                parameter: parameter.into(),
                entries,
            },
            speed: 1.0,
            speed_parameter: None,
            looping: true,
            transitions: Vec::new(),
            exit: false,
        }
    }

    /// A 2D blend-tree state
    pub fn directional2d(
        name: impl Into<String>,
        x_parameter: impl Into<String>,
        y_parameter: impl Into<String>,
        entries: Vec<AuthorDirectionalEntry>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: AuthorStateKind::Directional2D {
                x_parameter: x_parameter.into(),
                y_parameter: y_parameter.into(),
                algorithm: None,
                entries,
            },
            speed: 1.0,
            speed_parameter: None,
            looping: true,
            transitions: Vec::new(),
            exit: false,
        }
    }

    /// Set the authored playback speed
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Scale playback speed by a float parameter
    pub fn with_speed_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.speed_parameter = Some(parameter.into());
        self
    }

    /// Set whether clip time wraps
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Append an outgoing transition
    pub fn with_transition(mut self, transition: AuthorTransition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Mark this state as an exit state of its sub machine
    pub fn as_exit(mut self) -> Self {
        self.exit = true;
        self
    }
}

/// Per-kind authored payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthorStateKind {
    Single {
        clip: u16,
    },
    Linear1D {
        parameter: String,
        entries: Vec<AuthorLinearEntry>,
    },
    Directional2D {
        x_parameter: String,
        y_parameter: String,
        #[serde(default)]
        algorithm: Option<Blend2DAlgorithm>,
        entries: Vec<AuthorDirectionalEntry>,
    },
}

/// One clip of an authored 1D blend tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthorLinearEntry {
    pub threshold: f32,
    pub clip: u16,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

impl AuthorLinearEntry {
    /// Entry with unit clip speed
    pub fn new(threshold: f32, clip: u16) -> Self {
        Self {
            threshold,
            clip,
            speed: 1.0,
        }
    }
}

/// One clip of an authored 2D blend tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthorDirectionalEntry {
    pub position: [f32; 2],
    pub clip: u16,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

impl AuthorDirectionalEntry {
    /// Entry with unit clip speed
    pub fn new(x: f32, y: f32, clip: u16) -> Self {
        Self {
            position: [x, y],
            clip,
            speed: 1.0,
        }
    }
}

/// An authored transition referencing its target by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorTransition {
    pub to: String,
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub exit_time: Option<f32>,
    #[serde(default)]
    pub conditions: Vec<AuthorCondition>,
    #[serde(default)]
    pub curve: Vec<CurveKey>,
}

impl AuthorTransition {
    /// Instant transition to a named state
    pub fn to(state: impl Into<String>) -> Self {
        Self {
            to: state.into(),
            duration: 0.0,
            exit_time: None,
            conditions: Vec::new(),
            curve: Vec::new(),
        }
    }

    /// Set the cross-fade duration
    pub fn with_duration(mut self, duration: f32) -> Self {
        self.duration = duration;
        self
    }

    /// Gate the transition on source-state time
    pub fn with_exit_time(mut self, exit_time: f32) -> Self {
        self.exit_time = Some(exit_time);
        self
    }

    /// Append a condition
    pub fn with_condition(mut self, condition: AuthorCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach an authored blend curve
    pub fn with_curve(mut self, curve: Vec<CurveKey>) -> Self {
        self.curve = curve;
        self
    }
}

/// An authored condition referencing its parameter by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorCondition {
    pub parameter: String,
    pub comparator: Comparator,
    #[serde(default)]
    pub rhs: f32,
}

impl AuthorCondition {
    /// `parameter == true`
    pub fn bool_true(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            comparator: Comparator::BoolTrue,
            rhs: 0.0,
        }
    }

    /// `parameter == false`
    pub fn bool_false(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            comparator: Comparator::BoolFalse,
            rhs: 0.0,
        }
    }

    /// Integer comparison against `rhs`
    pub fn int(parameter: impl Into<String>, comparator: Comparator, rhs: i32) -> Self {
        Self {
            parameter: parameter.into(),
            comparator,
            rhs: rhs as f32,
        }
    }

    /// Float comparison against `rhs`
    pub fn float(parameter: impl Into<String>, comparator: Comparator, rhs: f32) -> Self {
        Self {
            parameter: parameter.into(),
            comparator,
            rhs,
        }
    }
}

/// An authored any-state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorAnyTransition {
    #[serde(flatten)]
    pub transition: AuthorTransition,
    #[serde(default)]
    pub allow_self: bool,
}

/// A visual sub-state machine grouping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorSubMachine {
    pub name: String,
    #[serde(default)]
    pub states: Vec<AuthorState>,
    #[serde(default)]
    pub sub_machines: Vec<AuthorSubMachine>,
    /// Transitions shared by every exit state of this machine
    #[serde(default)]
    pub exit_transitions: Vec<AuthorTransition>,
}

/// The root authoring document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorGraph {
    #[serde(default)]
    pub parameters: Vec<AuthorParameter>,
    #[serde(default)]
    pub states: Vec<AuthorState>,
    #[serde(default)]
    pub sub_machines: Vec<AuthorSubMachine>,
    #[serde(default)]
    pub any_transitions: Vec<AuthorAnyTransition>,
    pub default_state: String,
}

/// A parameter resolved to its typed store slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterRef {
    pub kind: ParameterKind,
    pub index: u16,
}

/// Name tables kept beside the baked graph for tooling.
#[derive(Debug, Clone, Default)]
pub struct GraphNames {
    /// Parameter name to typed store slot
    pub parameters: AHashMap<String, ParameterRef>,
    /// Full state path (`Sub/State`) to flattened index
    pub states: AHashMap<String, u16>,
}

impl GraphNames {
    /// Look up a parameter slot by name
    pub fn parameter(&self, name: &str) -> Option<ParameterRef> {
        self.parameters.get(name).copied()
    }

    /// Look up a state index by full path
    pub fn state(&self, path: &str) -> Option<u16> {
        self.states.get(path).copied()
    }
}

/// A baked graph with its name tables.
#[derive(Debug, Clone)]
pub struct BakedGraph {
    pub graph: StateGraph,
    pub names: GraphNames,
}

/// A flattened state awaiting index resolution.
struct FlatState<'a> {
    path: String,
    state: &'a AuthorState,
    /// Exit group of the enclosing sub machine, when `state.exit`
    exit_group: u16,
}

struct Baker<'a> {
    parameters: AHashMap<String, ParameterRef>,
    flat: Vec<FlatState<'a>>,
    exit_groups: Vec<&'a [AuthorTransition]>,
    by_path: AHashMap<String, u16>,
    by_name: AHashMap<String, Option<u16>>,
    default_2d: Option<Blend2DAlgorithm>,
}

/// Flatten and validate an authoring graph into its baked form.
///
/// `default_2d` pins the weighting algorithm for 2D states that do not name
/// one; `None` leaves the choice to the runtime configuration.
pub fn bake(author: &AuthorGraph, default_2d: Option<Blend2DAlgorithm>) -> GraphResult<BakedGraph> {
    let mut baker = Baker {
        parameters: AHashMap::new(),
        flat: Vec::new(),
        exit_groups: Vec::new(),
        by_path: AHashMap::new(),
        by_name: AHashMap::new(),
        default_2d,
    };

    baker.assign_parameters(&author.parameters)?;
    baker.collect_states(&author.states, "", NO_INDEX)?;
    for machine in &author.sub_machines {
        baker.collect_machine(machine, "")?;
    }
    baker.index_states()?;
    baker.emit(author)
}

impl<'a> Baker<'a> {
    fn assign_parameters(&mut self, parameters: &[AuthorParameter]) -> GraphResult<()> {
        let mut counts = [0u16; 3];
        for parameter in parameters {
            let slot = match parameter.kind {
                ParameterKind::Bool => &mut counts[0],
                ParameterKind::Int => &mut counts[1],
                ParameterKind::Float => &mut counts[2],
            };
            let reference = ParameterRef {
                kind: parameter.kind,
                index: *slot,
            };
            *slot += 1;
            if self
                .parameters
                .insert(parameter.name.clone(), reference)
                .is_some()
            {
                return Err(GraphError::DuplicateParameter(parameter.name.clone()));
            }
        }
        Ok(())
    }

    fn collect_states(
        &mut self,
        states: &'a [AuthorState],
        prefix: &str,
        exit_group: u16,
    ) -> GraphResult<()> {
        for state in states {
            if state.exit && exit_group == NO_INDEX {
                return Err(GraphError::Invariant(format!(
                    "state '{}' is marked exit outside a sub-state machine",
                    state.name
                )));
            }
            let path = if prefix.is_empty() {
                state.name.clone()
            } else {
                format!("{prefix}/{}", state.name)
            };
            self.flat.push(FlatState {
                path,
                state,
                exit_group: if state.exit { exit_group } else { NO_INDEX },
            });
        }
        Ok(())
    }

    fn collect_machine(&mut self, machine: &'a AuthorSubMachine, prefix: &str) -> GraphResult<()> {
        let path = if prefix.is_empty() {
            machine.name.clone()
        } else {
            format!("{prefix}/{}", machine.name)
        };
        let group = self.exit_groups.len() as u16;
        self.exit_groups.push(&machine.exit_transitions);
        self.collect_states(&machine.states, &path, group)?;
        for nested in &machine.sub_machines {
            self.collect_machine(nested, &path)?;
        }
        Ok(())
    }

    fn index_states(&mut self) -> GraphResult<()> {
        for (index, flat) in self.flat.iter().enumerate() {
            let index = index as u16;
            if self.by_path.insert(flat.path.clone(), index).is_some() {
                return Err(GraphError::DuplicateState(flat.path.clone()));
            }
            // A bare name resolves only while it is globally unambiguous.
            self.by_name
                .entry(flat.state.name.clone())
                .and_modify(|slot| *slot = None)
                .or_insert(Some(index));
        }
        Ok(())
    }

    fn resolve_state(&self, name: &str) -> GraphResult<u16> {
        if let Some(&index) = self.by_path.get(name) {
            return Ok(index);
        }
        match self.by_name.get(name) {
            Some(Some(index)) => Ok(*index),
            Some(None) => Err(GraphError::AmbiguousState(name.to_string())),
            None => Err(GraphError::UnknownState(name.to_string())),
        }
    }

    fn resolve_parameter(&self, name: &str, kind: ParameterKind) -> GraphResult<u16> {
        let reference = self
            .parameters
            .get(name)
            .ok_or_else(|| GraphError::UnknownParameter(name.to_string()))?;
        if reference.kind != kind {
            return Err(GraphError::ParameterType(name.to_string()));
        }
        Ok(reference.index)
    }

    fn emit(&self, author: &AuthorGraph) -> GraphResult<BakedGraph> {
        let mut graph = StateGraph {
            default_state: self.resolve_state(&author.default_state)?,
            ..Default::default()
        };
        for reference in self.parameters.values() {
            match reference.kind {
                ParameterKind::Bool => graph.bool_param_count += 1,
                ParameterKind::Int => graph.int_param_count += 1,
                ParameterKind::Float => graph.float_param_count += 1,
            }
        }

        for flat in &self.flat {
            let state = flat.state;
            let first_transition = graph.transitions.len() as u32;
            for transition in &state.transitions {
                let record = self.emit_transition(transition, &mut graph)?;
                graph.transitions.push(record);
            }
            let transition_count = graph.transitions.len() as u32 - first_transition;

            let speed_parameter = match &state.speed_parameter {
                Some(name) => self.resolve_parameter(name, ParameterKind::Float)?,
                None => NO_INDEX,
            };

            let (kind, payload) = match &state.kind {
                AuthorStateKind::Single { clip } => {
                    let payload = graph.single_payloads.len() as u16;
                    graph.single_payloads.push(SinglePayload { clip: *clip });
                    (StateKind::Single, payload)
                }
                AuthorStateKind::Linear1D { parameter, entries } => {
                    let blend_parameter =
                        self.resolve_parameter(parameter, ParameterKind::Float)?;
                    let mut sorted = entries.clone();
                    if sorted.iter().any(|e| !e.threshold.is_finite()) {
                        return Err(GraphError::Invariant(format!(
                            "state '{}' has a non-finite blend threshold",
                            flat.path
                        )));
                    }
                    sorted.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
                    let first_entry = graph.linear_entries.len() as u32;
                    for entry in &sorted {
                        graph.linear_entries.push(LinearBlendEntry {
                            threshold: entry.threshold,
                            clip: entry.clip,
                            clip_speed: entry.speed,
                        });
                    }
                    let payload = graph.linear_payloads.len() as u16;
                    graph.linear_payloads.push(Linear1DPayload {
                        blend_parameter,
                        first_entry,
                        entry_count: sorted.len() as u32,
                    });
                    (StateKind::Linear1D, payload)
                }
                AuthorStateKind::Directional2D {
                    x_parameter,
                    y_parameter,
                    algorithm,
                    entries,
                } => {
                    let x = self.resolve_parameter(x_parameter, ParameterKind::Float)?;
                    let y = self.resolve_parameter(y_parameter, ParameterKind::Float)?;
                    let first_entry = graph.directional_entries.len() as u32;
                    for entry in entries {
                        graph.directional_entries.push(DirectionalBlendEntry {
                            position: Vec2::from_array(entry.position),
                            clip: entry.clip,
                            clip_speed: entry.speed,
                        });
                    }
                    let payload = graph.directional_payloads.len() as u16;
                    graph.directional_payloads.push(Directional2DPayload {
                        x_parameter: x,
                        y_parameter: y,
                        first_entry,
                        entry_count: entries.len() as u32,
                        algorithm: (*algorithm).or(self.default_2d),
                    });
                    (StateKind::Directional2D, payload)
                }
            };

            graph.states.push(StateRecord {
                kind,
                payload,
                base_speed: state.speed,
                speed_parameter,
                looping: state.looping,
                first_transition,
                transition_count,
                exit_group: flat.exit_group,
            });
            graph.debug_names.push(flat.path.clone());
        }

        for exit_transitions in &self.exit_groups {
            let first_transition = graph.transitions.len() as u32;
            for transition in exit_transitions.iter() {
                let record = self.emit_transition(transition, &mut graph)?;
                graph.transitions.push(record);
            }
            graph.exit_groups.push(ExitTransitionGroup {
                first_transition,
                transition_count: graph.transitions.len() as u32 - first_transition,
            });
        }

        for any in &author.any_transitions {
            let record = self.emit_transition(&any.transition, &mut graph)?;
            graph.any_transitions.push(AnyStateTransition {
                transition: record,
                allow_self: any.allow_self,
            });
        }

        graph.validate()?;
        let names = GraphNames {
            parameters: self.parameters.clone(),
            states: self.by_path.clone(),
        };
        Ok(BakedGraph { graph, names })
    }

    fn emit_transition(
        &self,
        transition: &AuthorTransition,
        graph: &mut StateGraph,
    ) -> GraphResult<TransitionRecord> {
        let to_state = self.resolve_state(&transition.to)?;

        let first_condition = graph.conditions.len() as u32;
        for condition in &transition.conditions {
            let kind = if condition.comparator.reads_bool() {
                ParameterKind::Bool
            } else if condition.comparator.reads_int() {
                ParameterKind::Int
            } else {
                ParameterKind::Float
            };
            let parameter = self.resolve_parameter(&condition.parameter, kind)?;
            graph.conditions.push(Condition {
                parameter,
                comparator: condition.comparator,
                rhs: condition.rhs,
            });
        }

        let first_curve_key = graph.curve_keys.len() as u32;
        graph.curve_keys.extend_from_slice(&transition.curve);

        Ok(TransitionRecord {
            to_state,
            duration: transition.duration,
            has_exit_time: transition.exit_time.is_some(),
            exit_time: transition.exit_time.unwrap_or(0.0),
            first_condition,
            condition_count: transition.conditions.len() as u32,
            first_curve_key,
            curve_key_count: transition.curve.len() as u32,
        })
    }
}
