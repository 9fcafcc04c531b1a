//! Enumeration by tagged broadcasting.
//!
//! Each assume node opens a new dimension holding its support and adds the
//! prior density of every support value to the score. A value
//! carries the dimensions it depends on as leading axes, in the order they
//! were opened, and every other node runs vectorised over the union of its
//! inputs' dimensions. The score is tagged the same way. At the end the
//! outputs and the score are broadcast over all dimensions and flattened,
//! which lists combinations in the same row-major order as
//! [`enumerate`](super::enumerate::enumerate).
//!
//! No dimension is summed out before the readout, so the cost is that of
//! plain enumeration; values that depend on few choices stay small until
//! the end. Sampling and observation are only supported outside branch and
//! loop bodies.

use stoch_foundation::{Shape, Slot, Value};
use stoch_ir::{Aval, Environment, FromLiteral, Graph, Op, OpKind};
use tracing::{debug, trace};

use crate::choices::ChoiceTree;
use crate::context::Context;
use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::gfi::Measure;
use crate::interpret::enumerate::{Enumeration, LoweredMeasure};
use crate::interpret::eval::{eval_node, log_density_slot};
use crate::ops::{sampler, site_address};

/// A value over some enumeration dimensions.
///
/// `value` has one leading axis per entry of `dims`, sized by the dimension.
#[derive(Debug, Clone, PartialEq)]
struct Tagged {
    dims: Vec<usize>,
    value: Value,
}

impl FromLiteral for Tagged {
    fn from_literal(value: &Value) -> Self {
        Tagged::plain(value.clone())
    }
}

impl Tagged {
    fn plain(value: Value) -> Self {
        Self {
            dims: Vec::new(),
            value,
        }
    }

    fn element_shape(&self) -> Shape {
        Shape::new(self.value.shape().dims()[self.dims.len()..].to_vec())
    }

    /// Broadcast over `target`, a sorted superset of `dims`, flattened to
    /// `[lanes, ..]`.
    fn lanes_over(&self, target: &[usize], sizes: &[usize]) -> Result<Value> {
        let element = self.element_shape();
        let mut expanded: Vec<usize> = target
            .iter()
            .map(|d| if self.dims.contains(d) { sizes[*d] } else { 1 })
            .collect();
        expanded.extend_from_slice(element.dims());
        let mut full: Vec<usize> = target.iter().map(|d| sizes[*d]).collect();
        let lanes = full.iter().product();
        full.extend_from_slice(element.dims());
        let broadcast = self.value.reshape(expanded)?.broadcast_to(&Shape::new(full))?;
        Ok(broadcast.reshape(element.prepend(lanes))?)
    }

    /// A lane slot over `dims` folded back into a tagged value.
    fn from_slot(slot: Slot, dims: &[usize], sizes: &[usize]) -> Result<Self> {
        match slot {
            Slot::Uniform(v) => Ok(Tagged::plain(v)),
            Slot::Lanes(v) => {
                let mut shape: Vec<usize> = dims.iter().map(|d| sizes[*d]).collect();
                shape.extend_from_slice(v.shape().tail().dims());
                Ok(Tagged {
                    dims: dims.to_vec(),
                    value: v.reshape(shape)?,
                })
            }
        }
    }
}

/// Dimensions opened so far.
struct Dims {
    sizes: Vec<usize>,
    cap: usize,
}

impl Dims {
    fn open(&mut self, size: usize, site: &str) -> Result<usize> {
        let total = self.sizes.iter().product::<usize>().saturating_mul(size);
        if total > self.cap {
            return Err(Error::NotEnumerable {
                site: site.to_string(),
                reason: format!("{} combinations exceed the cap of {}", total, self.cap),
            });
        }
        self.sizes.push(size);
        Ok(self.sizes.len() - 1)
    }

    fn union<'a>(&self, values: impl IntoIterator<Item = &'a Tagged>) -> Vec<usize> {
        let mut dims: Vec<usize> = values.into_iter().flat_map(|t| t.dims.iter().copied()).collect();
        dims.sort_unstable();
        dims.dedup();
        dims
    }

    fn lanes(&self, dims: &[usize]) -> usize {
        dims.iter().map(|d| self.sizes[*d]).product()
    }

    /// Inputs as slots over `dims`, with the pass lane count.
    fn slots(&self, values: &[Tagged], dims: &[usize]) -> Result<(Option<usize>, Vec<Slot>)> {
        if dims.is_empty() {
            return Ok((None, values.iter().map(|t| Slot::Uniform(t.value.clone())).collect()));
        }
        let slots = values
            .iter()
            .map(|t| {
                if t.dims.is_empty() {
                    Ok(Slot::Uniform(t.value.clone()))
                } else {
                    Ok(Slot::Lanes(t.lanes_over(dims, &self.sizes)?))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((Some(self.lanes(dims)), slots))
    }
}

/// Enumerate every execution of `graph` on `args` by tagged broadcasting.
///
/// Same result as [`enumerate`](super::enumerate::enumerate) for graphs
/// that sample only at the top level.
pub fn eliminate(ctx: &mut Context, graph: &Graph, args: &[Value]) -> Result<Enumeration> {
    let (scores, retval) = eliminate_graph(ctx, graph, args)?;
    Ok(Enumeration {
        scores,
        choices: ChoiceTree::empty(),
        retval,
    })
}

pub(crate) fn eliminate_measure(ctx: &mut Context, measure: &Measure, args: &[Value]) -> Result<Enumeration> {
    let lowered = LoweredMeasure::stage(measure, args)?;
    let (scores, outputs) = eliminate_graph(ctx, &lowered.graph, args)?;
    debug!(measure = %measure.name(), combinations = scores.len(), "eliminated");
    lowered.assemble(scores, outputs)
}

fn eliminate_graph(ctx: &mut Context, graph: &Graph, args: &[Value]) -> Result<(Vec<f64>, Vec<Value>)> {
    let mut dims = Dims {
        sizes: Vec::new(),
        cap: ctx.policy().max_enumeration_lanes,
    };
    let mut score = Tagged::plain(Value::f64(0.0));
    let mut env: Environment<Tagged> =
        Environment::for_graph(graph, args.iter().cloned().map(Tagged::plain).collect())?;

    for eqn in &graph.equations {
        let inputs = env.read_all(&eqn.inputs)?;
        let outputs = match &eqn.op {
            Op::Custom(op) if op.kind() == &OpKind::Assume => {
                let dist = sampler(op.elaboration())?;
                let Some(value) = open_support(&mut dims, dist, &inputs)? else {
                    return Ok(vanished(&graph.out_avals));
                };
                let mut site = vec![value.clone()];
                site.extend(inputs);
                score = add_tagged(&dims, &score, &log_density_tagged(&dims, dist, &site)?)?;
                vec![value]
            }
            Op::Custom(op) if op.kind() == &OpKind::Observe => {
                let dist = sampler(op.elaboration())?;
                score = add_tagged(&dims, &score, &log_density_tagged(&dims, dist, &inputs)?)?;
                Vec::new()
            }
            Op::Custom(op) if op.kind() == &OpKind::Trace => {
                return Err(Error::NotEnumerable {
                    site: site_address(op.elaboration())?,
                    reason: "trace sites must be lowered before enumeration".to_string(),
                })
            }
            op if op.sub_graphs().iter().any(|g| g.is_probabilistic()) => {
                return Err(Error::NotEnumerable {
                    site: op.name(),
                    reason: "sampling or observation inside a branch or loop body".to_string(),
                })
            }
            _ => {
                let union = dims.union(&inputs);
                let (lanes, slots) = dims.slots(&inputs, &union)?;
                let outs = ctx.with_lanes(lanes, |ctx| eval_node(ctx, eqn, slots))?;
                outs.into_iter()
                    .map(|s| Tagged::from_slot(s, &union, &dims.sizes))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        env.write_all(&eqn.outputs, outputs)?;
    }

    let all: Vec<usize> = (0..dims.sizes.len()).collect();
    let outputs = env
        .read_all(&graph.outvars)?
        .iter()
        .map(|t| readout(t, &all, &dims.sizes))
        .collect::<Result<Vec<_>>>()?;
    let scores = readout(&score, &all, &dims.sizes)?.data().to_vec();
    trace!(dims = ?dims.sizes, "tagged readout");
    Ok((scores, outputs))
}

/// The support of one assume node as a fresh dimension, or `None` when it
/// is empty.
fn open_support(dims: &mut Dims, dist: &Dist, inputs: &[Tagged]) -> Result<Option<Tagged>> {
    let no_support = || Error::NotEnumerable {
        site: dist.name().to_string(),
        reason: "no finite support".to_string(),
    };
    let union = dims.union(inputs);
    let (lanes, slots) = dims.slots(inputs, &union)?;
    let supports = match lanes {
        None => {
            let values: Vec<Value> = slots.iter().map(|s| s.value().clone()).collect();
            vec![dist.support(&values)?.ok_or_else(no_support)?]
        }
        Some(n) => (0..n)
            .map(|l| {
                let views = slots.iter().map(|s| s.lane(l)).collect::<std::result::Result<Vec<_>, _>>()?;
                dist.support(&views)?.ok_or_else(no_support)
            })
            .collect::<Result<Vec<_>>>()?,
    };
    let k = supports.first().map_or(0, Vec::len);
    if supports.iter().any(|s| s.len() != k) {
        return Err(Error::NotEnumerable {
            site: dist.name().to_string(),
            reason: "support size varies across lanes".to_string(),
        });
    }
    if k == 0 {
        return Ok(None);
    }
    let d = dims.open(k, dist.name())?;
    trace!(dist = dist.name(), dim = d, support = k, "open dimension");
    if supports.iter().all(|s| s == &supports[0]) {
        return Ok(Some(Tagged {
            dims: vec![d],
            value: Value::stack(&supports[0])?,
        }));
    }
    let stacked = Value::stack(&supports.concat())?;
    let mut shape: Vec<usize> = union.iter().map(|u| dims.sizes[*u]).collect();
    shape.push(k);
    shape.extend_from_slice(stacked.shape().tail().dims());
    let mut tags = union;
    tags.push(d);
    Ok(Some(Tagged {
        dims: tags,
        value: stacked.reshape(shape)?,
    }))
}

/// `log p(value | args)` for `[value, args..]`.
fn log_density_tagged(dims: &Dims, dist: &Dist, inputs: &[Tagged]) -> Result<Tagged> {
    let union = dims.union(inputs);
    let (lanes, slots) = dims.slots(inputs, &union)?;
    let (value, args) = slots.split_first().ok_or_else(|| Error::InvalidArgument {
        dist: dist.name().to_string(),
        message: "missing value".to_string(),
    })?;
    Tagged::from_slot(log_density_slot(lanes, dist, value, args)?, &union, &dims.sizes)
}

fn add_tagged(dims: &Dims, a: &Tagged, b: &Tagged) -> Result<Tagged> {
    let union = dims.union([a, b]);
    let (_, slots) = dims.slots(&[a.clone(), b.clone()], &union)?;
    Tagged::from_slot(slots[0].add(&slots[1])?, &union, &dims.sizes)
}

fn readout(t: &Tagged, all: &[usize], sizes: &[usize]) -> Result<Value> {
    if all.is_empty() {
        return Ok(t.value.reshape(t.value.shape().prepend(1))?);
    }
    t.lanes_over(all, sizes)
}

fn vanished(out_avals: &[Aval]) -> (Vec<f64>, Vec<Value>) {
    let outputs = out_avals
        .iter()
        .map(|a| Value::zeros(a.dtype, a.shape.prepend(0)))
        .collect();
    (Vec::new(), outputs)
}
