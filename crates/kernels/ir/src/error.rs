//! IR errors.
//!
//! Errors raised while staging, validating, evaluating or compiling graphs.
//!
//! # Error Categories
//!
//! - **Binding errors**: [`IrError::MissingRule`]
//! - **Determinism errors**: [`IrError::UnseededSampling`]
//! - **Environment errors**: [`IrError::UnboundVariable`], [`IrError::VariableRebound`]
//! - **Structural errors**: [`IrError::Arity`], [`IrError::ShapeInference`], [`IrError::CarryMismatch`], [`IrError::InvalidGraph`]
//! - **Evaluation errors**: [`IrError::Value`], [`IrError::Rule`], [`IrError::Unsupported`]
//!
//! # Error Handling Policy
//!
//! A graph that fails any check is a defect in the program that staged it or
//! in the rewrite that produced it. Errors are raised at the point of
//! detection and never repaired.

use stoch_foundation::ValueError;
use thiserror::Error;

use crate::graph::{Aval, Var};

/// IR result type alias.
pub type Result<T> = std::result::Result<T, IrError>;

/// Errors raised by the IR layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrError {
    /// A custom operation was bound or used without one of its rules.
    #[error("operation '{op}' has no {rule} rule")]
    MissingRule {
        /// Operation kind name.
        op: String,
        /// Name of the absent rule.
        rule: &'static str,
    },

    /// A sampling node reached a deterministic compilation boundary without
    /// a seeded key.
    ///
    /// Graphs containing assume nodes (or trace nodes, which may sample) must
    /// be executed through seeded interpretation.
    #[error("unseeded sampling: '{op}' reached a deterministic boundary")]
    UnseededSampling {
        /// Kind of the offending node.
        op: String,
    },

    /// A variable was read before any write in the current pass.
    #[error("unbound variable {0}")]
    UnboundVariable(Var),

    /// A variable was written twice in the same pass.
    #[error("variable {0} written twice")]
    VariableRebound(Var),

    /// An operation received the wrong number of operands.
    #[error("'{op}' expects {expected} inputs, found {found}")]
    Arity {
        op: String,
        expected: usize,
        found: usize,
    },

    /// Output avals could not be inferred from input avals.
    #[error("cannot infer output of '{op}': {message}")]
    ShapeInference { op: String, message: String },

    /// A loop body changed the aval of its carried state.
    #[error("loop carry changed from {expected} to {found}")]
    CarryMismatch { expected: Aval, found: Aval },

    /// Graph validation failed.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// Array manipulation failed during evaluation.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A custom rule reported a failure.
    #[error("rule of '{op}' failed: {message}")]
    Rule { op: String, message: String },

    /// The requested transformation is not defined for this node.
    #[error("unsupported: {0}")]
    Unsupported(String),
}
