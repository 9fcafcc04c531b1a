//! Reflective transformations.
//!
//! Programs are data: their staged graphs can be inspected and rewritten.
//! This module holds the graph-level halves of the reflective operations
//! exposed on [`Program`](crate::gfi::Program) and
//! [`Measure`](crate::gfi::Measure):
//!
//! - [`discretize`]: swap selected distributions for their discretisations
//! - [`project`]: lower a constrained program to sampling and scoring nodes
//! - [`blanket`]: restrict a program to what a selection influences
//! - [`trace_type`]: static description of a program's choices

pub mod blanket;
pub mod discretize;
pub mod project;
pub mod trace_type;

use stoch_ir::{Graph, Op, OpKind};

use crate::error::Result;
use crate::ops::{site_address, trace_site, TraceSite};

/// Every trace site of `graph`, sub-graphs included, in staging order.
pub(crate) fn trace_sites(graph: &Graph) -> Result<Vec<(String, TraceSite)>> {
    let mut sites = Vec::new();
    collect_sites(graph, &mut sites)?;
    Ok(sites)
}

fn collect_sites(graph: &Graph, sites: &mut Vec<(String, TraceSite)>) -> Result<()> {
    for eqn in &graph.equations {
        match &eqn.op {
            Op::Custom(op) if op.kind() == &OpKind::Trace => {
                let e = op.elaboration();
                sites.push((site_address(e)?, trace_site(e)?.clone()));
            }
            other => {
                for sub in other.sub_graphs() {
                    collect_sites(sub, sites)?;
                }
            }
        }
    }
    Ok(())
}
