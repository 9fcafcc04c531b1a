//! Lowering of constrained programs for exact enumeration.
//!
//! A constrained program is re-staged so that its trace nodes disappear:
//! each site is replaced by what its own measure lowers to (an assume node
//! for a free distribution, whose density the enumerators add, and an
//! observe node for a constrained one). The result holds only nodes the
//! enumerators understand.

use std::collections::HashMap;

use stoch_ir::{Atom, Graph, IrError, Op, OpKind, Stager, Var};
use tracing::trace;

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::error::{Error, Result};
use crate::ops::{site_address, trace_site};

/// Re-stage `graph` into `s`, lowering trace sites under `constraint`.
///
/// Returns the free choices as atoms and the outputs.
pub(crate) fn lower_graph(
    s: &mut Stager,
    graph: &Graph,
    constraint: &ChoiceMap,
    args: &[Atom],
) -> Result<(ChoiceTree<Atom>, Vec<Atom>)> {
    if args.len() != graph.invars.len() {
        return Err(IrError::Arity {
            op: "lower".to_string(),
            expected: graph.invars.len(),
            found: args.len(),
        }
        .into());
    }
    let mut env: HashMap<Var, Atom> = HashMap::new();
    for (var, value) in graph.constvars.iter().zip(&graph.consts) {
        env.insert(*var, s.constant(value.clone()));
    }
    for (var, arg) in graph.invars.iter().zip(args) {
        env.insert(*var, arg.clone());
    }
    let read = |env: &HashMap<Var, Atom>, atom: &Atom| -> Result<Atom> {
        match atom {
            Atom::Lit(_) => Ok(atom.clone()),
            Atom::Var(v) => env.get(v).cloned().ok_or(Error::Ir(IrError::UnboundVariable(*v))),
        }
    };

    let mut choices = ChoiceTree::empty();
    for eqn in &graph.equations {
        let inputs = eqn
            .inputs
            .iter()
            .map(|a| read(&env, a))
            .collect::<Result<Vec<_>>>()?;
        let outputs = match &eqn.op {
            Op::Custom(op) if op.kind() == &OpKind::Trace => {
                let e = op.elaboration();
                let addr = site_address(e)?;
                let sub_constraint = constraint.get(&addr).cloned().unwrap_or_default();
                let measure = trace_site(e)?
                    .callee
                    .project(sub_constraint)
                    .map_err(|err| err.under(&addr))?;
                let (sub_choices, retval) = measure.lower_enum(s, &inputs).map_err(|err| err.under(&addr))?;
                trace!(%addr, measure = %measure.name(), "lowered site");
                if !sub_choices.is_empty() {
                    choices.insert(addr, sub_choices);
                }
                retval
            }
            op if op.sub_graphs().iter().any(|g| g.contains_kind(&OpKind::Trace)) => {
                return Err(Error::NotEnumerable {
                    site: op.name(),
                    reason: "trace site inside a branch or loop body".to_string(),
                })
            }
            _ => s.replay(eqn, inputs)?,
        };
        if outputs.len() != eqn.outputs.len() {
            return Err(Error::Internal(format!(
                "{} lowered to {} outputs, expected {}",
                eqn.op.name(),
                outputs.len(),
                eqn.outputs.len()
            )));
        }
        for (var, atom) in eqn.outputs.iter().zip(outputs) {
            if !var.is_drop() {
                env.insert(*var, atom);
            }
        }
    }
    let retval = graph
        .outvars
        .iter()
        .map(|a| read(&env, a))
        .collect::<Result<Vec<_>>>()?;
    Ok((choices, retval))
}
