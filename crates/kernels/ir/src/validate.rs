//! Graph validation.
//!
//! Validates that a graph is well-formed:
//! - Every variable read is a constvar, an invar, or written by an earlier node
//! - No variable is written twice
//! - Nodes carry one aval per output
//! - Branch and loop nodes agree with the signatures of their sub-graphs
//!
//! Sub-graphs are validated recursively.

use std::collections::HashSet;
use std::fmt;

use crate::error::IrError;
use crate::graph::{Atom, Graph, Op, Var};

/// Graph validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A variable is read before being written.
    UndefinedVariable { var: Var, node: usize },
    /// A variable is written more than once.
    DuplicateDefinition { var: Var },
    /// A node's outputs and output avals differ in length.
    AvalCountMismatch { node: usize },
    /// A node's inputs do not match the signature of its sub-graph.
    SubGraphSignature { node: usize, message: String },
    /// Constvars and constant values differ in length.
    ConstCountMismatch,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UndefinedVariable { var, node } => {
                write!(f, "node {} reads undefined {}", node, var)
            }
            ValidationError::DuplicateDefinition { var } => write!(f, "{} defined twice", var),
            ValidationError::AvalCountMismatch { node } => {
                write!(f, "node {} has mismatched output avals", node)
            }
            ValidationError::SubGraphSignature { node, message } => {
                write!(f, "node {}: {}", node, message)
            }
            ValidationError::ConstCountMismatch => write!(f, "constvars and consts differ"),
        }
    }
}

/// Validate a graph and its sub-graphs.
///
/// Returns Ok(()) if the graph is valid, or a list of errors.
pub fn validate_graph(graph: &Graph) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check(graph, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// [`validate_graph`] folded into a single [`IrError`].
pub fn ensure_valid(graph: &Graph) -> crate::Result<()> {
    validate_graph(graph).map_err(|errors| {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        IrError::InvalidGraph(joined)
    })
}

fn check(graph: &Graph, errors: &mut Vec<ValidationError>) {
    let mut defined: HashSet<Var> = HashSet::new();

    if graph.constvars.len() != graph.consts.len() {
        errors.push(ValidationError::ConstCountMismatch);
    }
    for var in graph.constvars.iter().chain(&graph.invars) {
        if !defined.insert(*var) {
            errors.push(ValidationError::DuplicateDefinition { var: *var });
        }
    }

    for (i, eqn) in graph.equations.iter().enumerate() {
        for input in &eqn.inputs {
            if let Atom::Var(var) = input {
                if !defined.contains(var) {
                    errors.push(ValidationError::UndefinedVariable { var: *var, node: i });
                }
            }
        }

        if eqn.outputs.len() != eqn.out_avals.len() {
            errors.push(ValidationError::AvalCountMismatch { node: i });
        }

        match &eqn.op {
            Op::Cond { branches } => {
                for branch in branches {
                    if branch.invars.len() + 1 != eqn.inputs.len() {
                        errors.push(ValidationError::SubGraphSignature {
                            node: i,
                            message: format!(
                                "branch takes {} operands, node passes {}",
                                branch.invars.len(),
                                eqn.inputs.len().saturating_sub(1)
                            ),
                        });
                    }
                    if branch.outvars.len() != eqn.outputs.len() {
                        errors.push(ValidationError::SubGraphSignature {
                            node: i,
                            message: "branch output count differs from node".to_string(),
                        });
                    }
                    check(branch, errors);
                }
            }
            Op::Scan {
                body,
                num_consts,
                num_carry,
                ..
            } => {
                if body.invars.len() != eqn.inputs.len() {
                    errors.push(ValidationError::SubGraphSignature {
                        node: i,
                        message: format!(
                            "body takes {} inputs, node passes {}",
                            body.invars.len(),
                            eqn.inputs.len()
                        ),
                    });
                }
                if num_consts + num_carry > eqn.inputs.len() || body.outvars.len() != eqn.outputs.len() {
                    errors.push(ValidationError::SubGraphSignature {
                        node: i,
                        message: "loop carry does not fit the node".to_string(),
                    });
                }
                check(body, errors);
            }
            Op::Prim(_) | Op::Custom(_) => {}
        }

        for var in &eqn.outputs {
            if var.is_drop() {
                continue;
            }
            if !defined.insert(*var) {
                errors.push(ValidationError::DuplicateDefinition { var: *var });
            }
        }
    }

    for out in &graph.outvars {
        if let Atom::Var(var) = out {
            if !defined.contains(var) {
                errors.push(ValidationError::UndefinedVariable {
                    var: *var,
                    node: graph.equations.len(),
                });
            }
        }
    }
}
