//! Discretisation rewrite.

use stoch_ir::{rewrite_custom, Graph, Op, OpKind, Rewrite};
use tracing::trace;

use crate::error::{Error, Result};
use crate::ops::{retarget, site_address, trace_site};
use crate::selection::Selection;

/// `graph` with every trace site the selection reaches calling its
/// discretised callee.
///
/// The callee is discretised under the residual selection, so `sel("a/b")`
/// discretises `b` inside the program traced at `a`.
pub(crate) fn discretize_graph(graph: &Graph, selection: &Selection) -> Result<Graph> {
    rewrite_custom::<Error>(graph, &mut |eqn, _| {
        let Op::Custom(op) = &eqn.op else {
            return Ok(Rewrite::Keep);
        };
        if op.kind() != &OpKind::Trace {
            return Ok(Rewrite::Keep);
        }
        let addr = site_address(op.elaboration())?;
        let (_, residual) = selection.matches(&addr);
        if residual.is_empty() {
            return Ok(Rewrite::Keep);
        }
        let callee = trace_site(op.elaboration())?
            .callee
            .discretize_with(&residual)
            .map_err(|e| e.under(&addr))?;
        trace!(%addr, callee = %callee.name(), "discretized site");
        Ok(Rewrite::Replace(retarget(op, callee)?))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{attach_discretization, flip, normal, normal_grid_around_mean};
    use crate::ops::ProbabilisticStager;
    use crate::selection::sel;
    use stoch_ir::{stage, Atom};

    #[test]
    fn test_only_selected_sites_change() {
        let gridded = attach_discretization(normal(), normal_grid_around_mean(3.0, 7));
        let graph = stage::<Error, _>(&[], |s, _| {
            let x = s.choose("x", &gridded, &[Atom::from(0.0), Atom::from(1.0)])?;
            let y = s.choose("y", &gridded, &[x, Atom::from(1.0)])?;
            let c = s.choose("c", &flip(), &[])?;
            Ok(vec![y, c])
        })
        .unwrap();
        let out = discretize_graph(&graph, &sel("y")).unwrap();
        let labels: Vec<String> = out
            .equations
            .iter()
            .filter_map(|e| match &e.op {
                Op::Custom(op) => Some(op.elaboration().label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["normal", "normal@grid7", "flip"]);
    }

    #[test]
    fn test_missing_discretization_is_a_mismatch() {
        let graph = stage::<Error, _>(&[], |s, _| Ok(vec![s.choose("c", &flip(), &[])?])).unwrap();
        let err = discretize_graph(&graph, &sel("c")).unwrap_err();
        assert!(matches!(err, Error::SelectionMismatch { ref address, .. } if address == "c"));
    }
}
