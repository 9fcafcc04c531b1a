//! Graph rewriting over custom nodes.
//!
//! Reflective transformations (discretisation, blanket extraction) keep a
//! graph's structure and change what its custom nodes do. [`rewrite_custom`]
//! visits every custom node, including those inside branch and loop bodies,
//! and lets the caller keep it, swap its operation, or replace its outputs
//! by constants.

use std::collections::HashMap;
use std::sync::Arc;

use stoch_foundation::Value;

use crate::custom::CustomOp;
use crate::error::IrError;
use crate::graph::{Atom, Equation, Graph, Op, Var};

/// What to do with one custom node.
#[derive(Debug, Clone)]
pub enum Rewrite {
    Keep,
    /// Same inputs and outputs, different operation.
    Replace(CustomOp),
    /// Remove the node and read these values wherever its outputs were used.
    Substitute(Vec<Value>),
}

/// Where a visited node sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    /// Position among the top-level nodes, for nodes outside sub-graphs.
    pub top_level: Option<usize>,
}

/// Rewrite every custom node of `graph` with `f`.
pub fn rewrite_custom<E>(
    graph: &Graph,
    f: &mut dyn FnMut(&Equation, Site) -> Result<Rewrite, E>,
) -> Result<Graph, E>
where
    E: From<IrError>,
{
    rewrite_inner(graph, true, f)
}

fn rewrite_inner<E>(
    graph: &Graph,
    top: bool,
    f: &mut dyn FnMut(&Equation, Site) -> Result<Rewrite, E>,
) -> Result<Graph, E>
where
    E: From<IrError>,
{
    let mut subst: HashMap<Var, Value> = HashMap::new();
    let mut equations = Vec::with_capacity(graph.equations.len());

    for (i, eqn) in graph.equations.iter().enumerate() {
        let mut eqn = eqn.clone();
        eqn.inputs = eqn.inputs.iter().map(|a| resolve(a, &subst)).collect();
        eqn.op = match eqn.op {
            Op::Cond { branches } => {
                let mut rewritten = Vec::with_capacity(branches.len());
                for branch in &branches {
                    rewritten.push(Arc::new(rewrite_inner(branch, false, f)?));
                }
                Op::Cond { branches: rewritten }
            }
            Op::Scan {
                body,
                length,
                num_consts,
                num_carry,
                reverse,
            } => Op::Scan {
                body: Arc::new(rewrite_inner(&body, false, f)?),
                length,
                num_consts,
                num_carry,
                reverse,
            },
            other => other,
        };

        if !matches!(eqn.op, Op::Custom(_)) {
            equations.push(eqn);
            continue;
        }
        let site = Site {
            top_level: top.then_some(i),
        };
        match f(&eqn, site)? {
            Rewrite::Keep => equations.push(eqn),
            Rewrite::Replace(op) => {
                eqn.op = Op::Custom(op);
                equations.push(eqn);
            }
            Rewrite::Substitute(values) => {
                if values.len() != eqn.outputs.len() {
                    return Err(IrError::Arity {
                        op: eqn.op.name(),
                        expected: eqn.outputs.len(),
                        found: values.len(),
                    }
                    .into());
                }
                for (var, value) in eqn.outputs.iter().zip(values) {
                    if !var.is_drop() {
                        subst.insert(*var, value);
                    }
                }
            }
        }
    }

    Ok(Graph {
        invars: graph.invars.clone(),
        in_avals: graph.in_avals.clone(),
        constvars: graph.constvars.clone(),
        consts: graph.consts.clone(),
        equations,
        outvars: graph.outvars.iter().map(|a| resolve(a, &subst)).collect(),
        out_avals: graph.out_avals.clone(),
    })
}

fn resolve(atom: &Atom, subst: &HashMap<Var, Value>) -> Atom {
    match atom {
        Atom::Var(v) => match subst.get(v) {
            Some(value) => Atom::Lit(value.clone()),
            None => atom.clone(),
        },
        Atom::Lit(_) => atom.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom::{define_operation, Elaboration, RuleSet};
    use crate::eval::eval_graph;
    use crate::graph::Aval;
    use crate::stage::stage;
    use stoch_foundation::DType;

    fn constant_op(label: &str, x: f64) -> CustomOp {
        define_operation(label)
            .bind(
                RuleSet::new()
                    .execute(move |_, _| Ok(vec![Value::f64(x)]))
                    .infer_shapes(|_, _| Ok(vec![Aval::scalar(DType::F64)]))
                    .batch(|_, xs, axes| Ok((xs.to_vec(), axes.to_vec())))
                    .differentiate(|_, p, t| Ok((p.to_vec(), t.to_vec()))),
                Elaboration::labelled(label),
            )
            .unwrap()
    }

    #[test]
    fn test_substitute_and_replace() {
        let graph = stage::<IrError, _>(&[], |s, _| {
            let a = s.bind(constant_op("a", 1.0), &[])?;
            let b = s.bind(constant_op("b", 2.0), &[])?;
            Ok(vec![s.add(&a[0], &b[0])?])
        })
        .unwrap();
        assert_eq!(eval_graph(&graph, &[]).unwrap(), vec![Value::f64(3.0)]);

        let rewritten = rewrite_custom::<IrError>(&graph, &mut |eqn, site| {
            assert!(site.top_level.is_some());
            let Op::Custom(op) = &eqn.op else {
                unreachable!()
            };
            Ok(match op.elaboration().label.as_str() {
                "a" => Rewrite::Substitute(vec![Value::f64(10.0)]),
                _ => Rewrite::Replace(constant_op("c", 5.0)),
            })
        })
        .unwrap();
        assert_eq!(rewritten.equations.len(), 2);
        assert_eq!(eval_graph(&rewritten, &[]).unwrap(), vec![Value::f64(15.0)]);
    }
}
