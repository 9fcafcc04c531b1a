//! Deterministic compilation boundary.
//!
//! A [`Kernel`] is a validated graph that is a pure function of its inputs.
//! Graphs that can still sample (an assume node, or a trace node whose
//! callee may sample, anywhere including sub-graphs) are refused with
//! [`IrError::UnseededSampling`]: such graphs only become deterministic when
//! a key is threaded through them by seeded interpretation.

use std::sync::Arc;

use stoch_foundation::Value;

use crate::error::{IrError, Result};
use crate::eval::eval_graph;
use crate::graph::Graph;
use crate::validate::ensure_valid;

/// A compiled deterministic graph.
#[derive(Debug, Clone)]
pub struct Kernel {
    graph: Arc<Graph>,
}

/// Compile `graph` into a deterministic kernel.
pub fn compile(graph: Arc<Graph>) -> Result<Kernel> {
    let mut offending = None;
    graph.any_node(&mut |eqn| match eqn.op.custom_kind() {
        Some(kind) if kind.samples() => {
            offending = Some(kind.to_string());
            true
        }
        _ => false,
    });
    if let Some(op) = offending {
        tracing::debug!(%op, "refusing to compile unseeded graph");
        return Err(IrError::UnseededSampling { op });
    }
    ensure_valid(&graph)?;
    Ok(Kernel { graph })
}

impl Kernel {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        eval_graph(&self.graph, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::{Elaboration, OpKind, RuleSet};
    use crate::graph::{Atom, Aval};
    use crate::stage::stage;
    use stoch_foundation::DType;

    fn assume_op() -> crate::custom::CustomOp {
        OpKind::Assume
            .bind(
                RuleSet::new()
                    .execute(|_, _| Ok(vec![Value::f64(0.5)]))
                    .infer_shapes(|_, _| Ok(vec![Aval::scalar(DType::F64)]))
                    .batch(|_, xs, axes| Ok((xs.to_vec(), axes.to_vec())))
                    .differentiate(|_, p, t| Ok((p.to_vec(), t.to_vec()))),
                Elaboration::labelled("uniform"),
            )
            .unwrap()
    }

    #[test]
    fn test_pure_graph_compiles() {
        let graph = stage::<IrError, _>(&[Aval::scalar(DType::F64)], |s, xs| Ok(vec![s.exp(&xs[0])?])).unwrap();
        let kernel = compile(Arc::new(graph)).unwrap();
        assert_eq!(kernel.call(&[Value::f64(0.0)]).unwrap(), vec![Value::f64(1.0)]);
    }

    #[test]
    fn test_assume_in_branch_is_refused() {
        let graph = stage::<IrError, _>(&[Aval::scalar(DType::Bool)], |s, xs| {
            s.if_else(
                &xs[0],
                &[],
                |s, _| s.bind(assume_op(), &[]),
                |_, _| Ok(vec![Atom::from(0.0)]),
            )
        })
        .unwrap();
        let err = compile(Arc::new(graph)).unwrap_err();
        assert_eq!(err, IrError::UnseededSampling { op: "assume".to_string() });
    }
}
