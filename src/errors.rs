//! Error types for model construction, channel algebra and message passing.

use thiserror::Error;

// Errors raised by a factor when the messages it receives don't fit its declared arity or shapes
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("arity mismatch: expected {expected} messages, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("empty shape {0:?}: every axis needs at least one entry")]
    EmptyShape(Vec<usize>),
}

/// Errors that can occur while building a model or running message passing.
///
/// Numerical divergence is not reported here: a reverted run ends normally and
/// the outcome is recorded in its `RunReport`.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model graph contains a cycle")]
    NotADag,

    #[error("invalid edge from {from} to {to}: edges must alternate between variables and factors")]
    InvalidEdge { from: String, to: String },

    #[error("factor {factor} expects {expected} {side} variables, found {found}")]
    ArityMismatch {
        factor: String,
        side: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("variable {0} has no parent factor")]
    MissingParent(String),

    #[error("variable {0} has more than one parent factor")]
    MultipleParents(String),

    #[error("duplicate variable id {0}")]
    DuplicateVariable(String),

    #[error("message graph was not initialized, cannot warm start")]
    NotInitialized,

    #[error("missing key {key} in payload")]
    MissingKey { key: String },

    #[error("no message edge from node {from} to node {to}")]
    UnknownEdge { from: usize, to: usize },

    #[error("factor {factor}: {error}")]
    Factor { factor: String, error: ChannelError },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
