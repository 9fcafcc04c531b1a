//! Stoch IR - staged probabilistic intermediate representation
//!
//! Host closures are staged into closed graphs whose nodes are deterministic
//! primitives, structured control flow (indexed branch, fixed-length loop)
//! and extensible custom operations. The runtime crate interprets custom
//! nodes of kind assume, observe, log-density and trace; this crate only
//! knows how to build, check, evaluate and differentiate graphs.
//!
//! Pipeline: host closure -> Stager -> Graph -> (validate | eval | jvp | compile)

pub mod compile;
pub mod custom;
pub mod env;
pub mod error;
pub mod eval;
pub mod graph;
pub mod jvp;
pub mod primitive;
pub mod rewrite;
pub mod stage;
pub mod validate;

pub use compile::{compile, Kernel};
pub use custom::{
    define_operation, BatchRule, CustomOp, DifferentiateRule, Elaboration, ExecuteRule, InferRule, OpKind,
    Payload, RuleSet,
};
pub use env::{Environment, FromLiteral};
pub use error::{IrError, Result};
pub use eval::{branch_index, eval_equation, eval_graph, scan_loop, ScanShape};
pub use graph::{Atom, Aval, Equation, Graph, Op, Var};
pub use jvp::{jvp, Dual};
pub use primitive::Primitive;
pub use rewrite::{rewrite_custom, Rewrite, Site};
pub use stage::{stage, Branch, Stager};
pub use validate::{ensure_valid, validate_graph, ValidationError};
