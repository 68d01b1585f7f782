//! # Kinema Graph
//!
//! Immutable, flattened animation state-machine graphs.
//!
//! A graph is authored hierarchically (named states, optionally grouped into
//! visual sub-state machines) and baked by [`builder::bake`] into a flat
//! [`graph::StateGraph`]: one top-level state array, pooled transitions,
//! conditions and blend-curve keys, and integer parameter indices. The baked
//! form is read-only at runtime and serializes to a single linear blob
//! (see [`blob`]).

pub mod blob;
pub mod builder;
pub mod graph;

pub use blob::{decode, encode, BLOB_VERSION};
pub use builder::{
    bake, AuthorAnyTransition, AuthorCondition, AuthorDirectionalEntry, AuthorGraph,
    AuthorLinearEntry, AuthorParameter, AuthorState, AuthorStateKind, AuthorSubMachine,
    AuthorTransition, BakedGraph, GraphNames, ParameterKind, ParameterRef,
};
pub use graph::{
    AnyStateTransition, Blend2DAlgorithm, Comparator, Condition, Directional2DPayload,
    DirectionalBlendEntry, ExitTransitionGroup, Linear1DPayload, LinearBlendEntry, SinglePayload,
    StateGraph, StateKind, StateRecord, TransitionRecord, TransitionRef, TransitionSource,
    NO_INDEX,
};

use thiserror::Error;

/// Errors raised while building, validating or decoding a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("invalid blob: {0}")]
    InvalidBlob(String),

    #[error("blob byte order does not match this machine")]
    ByteOrderMismatch,

    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown state '{0}'")]
    UnknownState(String),

    #[error("ambiguous state name '{0}', use its full path")]
    AmbiguousState(String),

    #[error("duplicate state name '{0}'")]
    DuplicateState(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("duplicate parameter name '{0}'")]
    DuplicateParameter(String),

    #[error("parameter '{0}' has the wrong type for this use")]
    ParameterType(String),

    #[error("graph invariant violated: {0}")]
    Invariant(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;
