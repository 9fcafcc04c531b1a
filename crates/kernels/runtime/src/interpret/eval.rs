//! Core slot interpreter.
//!
//! Runs a graph over [`Slot`]s. Assume nodes draw from the context's key
//! stream, observe and trace nodes go to the innermost handler, and
//! everything else evaluates deterministically. Without lanes every slot is
//! uniform; under a lane count the same pass serves a vectorised execution.
//!
//! Key discipline: each sampling site takes one split of the current key,
//! lane `l` of a site folds `l` into that split, and branches and loops run
//! under a scope key of their own (loop iteration `i` folds in `i`).

use std::sync::Arc;

use stoch_foundation::{Slot, Value};
use stoch_ir::{branch_index, Aval, CustomOp, Environment, Equation, Graph, Op, OpKind, ScanShape};
use tracing::trace;

use crate::context::Context;
use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::ops::{sampler, site_address, trace_site};

/// Run `graph` on plain values under `ctx`.
///
/// Observe nodes are ignored and trace nodes simulate their callee, unless a
/// handler is installed on `ctx`.
pub fn evaluate(ctx: &mut Context, graph: &Graph, args: &[Value]) -> Result<Vec<Value>> {
    let slots = args.iter().cloned().map(Slot::Uniform).collect();
    Ok(run_graph(ctx, graph, slots)?
        .into_iter()
        .map(Slot::into_value)
        .collect())
}

pub(crate) fn run_graph(ctx: &mut Context, graph: &Graph, args: Vec<Slot>) -> Result<Vec<Slot>> {
    let mut env: Environment<Slot> = Environment::for_graph(graph, args)?;
    for eqn in &graph.equations {
        let inputs = env.read_all(&eqn.inputs)?;
        let outputs = eval_node(ctx, eqn, inputs)?;
        env.write_all(&eqn.outputs, outputs)?;
    }
    Ok(env.read_all(&graph.outvars)?)
}

/// Evaluate one node.
pub(crate) fn eval_node(ctx: &mut Context, eqn: &Equation, inputs: Vec<Slot>) -> Result<Vec<Slot>> {
    match &eqn.op {
        Op::Prim(p) => Ok(vec![p.apply(&inputs)?]),
        Op::Custom(op) => eval_custom(ctx, op, inputs),
        Op::Cond { branches } => eval_cond(ctx, branches, inputs),
        Op::Scan {
            body,
            length,
            num_consts,
            num_carry,
            reverse,
        } => {
            let shape = ScanShape {
                length: *length,
                num_consts: *num_consts,
                num_carry: *num_carry,
                reverse: *reverse,
            };
            eval_scan(ctx, body, shape, &eqn.out_avals, inputs)
        }
    }
}

fn eval_custom(ctx: &mut Context, op: &CustomOp, inputs: Vec<Slot>) -> Result<Vec<Slot>> {
    let e = op.elaboration();
    match op.kind() {
        OpKind::Assume => Ok(vec![sample_slot(ctx, sampler(e)?, &inputs, e.shared, &e.label)?]),
        OpKind::LogDensity => {
            let (value, args) = split_value(sampler(e)?, &inputs)?;
            Ok(vec![live_log_density(ctx, sampler(e)?, value, args)?])
        }
        OpKind::Observe => {
            let (value, args) = split_value(sampler(e)?, &inputs)?;
            let lp = ctx.masked(&live_log_density(ctx, sampler(e)?, value, args)?)?;
            if let Some(result) = ctx.dispatch(|handler, _| handler.observe(&lp)) {
                result?;
            }
            Ok(Vec::new())
        }
        OpKind::Trace => {
            let site = trace_site(e)?;
            let addr = site_address(e)?;
            if ctx.handler_depth() == 0 {
                trace!(%addr, "trace without a handler");
                return Ok(site.callee.simulate_slots(ctx, inputs)?.retval().to_vec());
            }
            ctx.dispatch(|handler, ctx| handler.trace(ctx, &addr, &site.callee, inputs))
                .unwrap_or_else(|| Err(Error::Internal("handler vanished".to_string())))
        }
        OpKind::User { .. } => eval_user(op, inputs),
    }
}

fn split_value<'a>(dist: &Dist, inputs: &'a [Slot]) -> Result<(&'a Slot, &'a [Slot])> {
    inputs.split_first().ok_or_else(|| Error::InvalidArgument {
        dist: dist.name().to_string(),
        message: "missing value".to_string(),
    })
}

/// Lanes of the current pass that are live, when a mask is active.
fn live_lanes(ctx: &Context) -> Result<Option<Vec<bool>>> {
    let Some(mask) = ctx.mask() else {
        return Ok(None);
    };
    let lanes = mask.lane_count().unwrap_or(0);
    Ok(Some((0..lanes).map(|l| ctx.lane_live(l)).collect::<Result<Vec<_>>>()?))
}

fn is_live(live: Option<&[bool]>, l: usize) -> bool {
    live.map_or(true, |flags| flags.get(l).copied().unwrap_or(true))
}

/// Draw from `dist` at one sampling site.
///
/// Lanes come from the arguments or, for argument-free sites, from the
/// context. A shared draw uses the same key in every lane. A lane outside the
/// current mask whose arguments the distribution rejects holds zeros.
pub(crate) fn sample_slot(ctx: &mut Context, dist: &Dist, args: &[Slot], shared: bool, site: &str) -> Result<Slot> {
    let key = ctx.next_key(site)?;
    let lanes = Slot::common_lanes(args)?.or(ctx.lanes());
    let live = live_lanes(ctx)?;
    match lanes {
        None => {
            let values: Vec<Value> = args.iter().map(|s| s.value().clone()).collect();
            Ok(Slot::Uniform(dist.sample(&mut key.stream(), &values)?))
        }
        Some(_) if shared && args.iter().all(|s| !s.is_lanes()) => {
            let values: Vec<Value> = args.iter().map(|s| s.value().clone()).collect();
            Ok(Slot::Uniform(dist.sample(&mut key.stream(), &values)?))
        }
        Some(n) => Slot::per_lane::<Error, _>(args, n, |l, views| {
            let lane_key = if shared { key } else { key.fold_in(l as u64) };
            match dist.sample(&mut lane_key.stream(), views) {
                Err(_) if !is_live(live.as_deref(), l) => {
                    let avals: Vec<Aval> = views.iter().map(Aval::of).collect();
                    let aval = dist.event_aval(&avals)?;
                    Ok(Value::zeros(aval.dtype, aval.shape))
                }
                drawn => drawn,
            }
        }),
    }
}

/// `log p(value)`, uniform when every input is uniform.
pub(crate) fn log_density_slot(lanes: Option<usize>, dist: &Dist, value: &Slot, args: &[Slot]) -> Result<Slot> {
    log_density_lanes(lanes, None, dist, value, args)
}

/// [`log_density_slot`] under the mask of `ctx`: a lane outside the mask
/// whose arguments the distribution rejects scores zero.
pub(crate) fn live_log_density(ctx: &Context, dist: &Dist, value: &Slot, args: &[Slot]) -> Result<Slot> {
    let live = live_lanes(ctx)?;
    log_density_lanes(ctx.lanes(), live.as_deref(), dist, value, args)
}

fn log_density_lanes(
    lanes: Option<usize>,
    live: Option<&[bool]>,
    dist: &Dist,
    value: &Slot,
    args: &[Slot],
) -> Result<Slot> {
    let mut inputs = Vec::with_capacity(args.len() + 1);
    inputs.push(value.clone());
    inputs.extend_from_slice(args);
    match Slot::common_lanes(&inputs)? {
        None => {
            let values: Vec<Value> = args.iter().map(|s| s.value().clone()).collect();
            Ok(Slot::Uniform(Value::f64(dist.log_density(value.value(), &values)?)))
        }
        Some(n) => {
            if let Some(expected) = lanes.filter(|m| *m != n) {
                return Err(Error::ShapeMismatch(format!(
                    "{} lanes in a pass of {}",
                    n, expected
                )));
            }
            Slot::per_lane::<Error, _>(&inputs, n, |l, views| match dist.log_density(&views[0], &views[1..]) {
                Ok(lp) => Ok(Value::f64(lp)),
                Err(_) if !is_live(live, l) => Ok(Value::f64(0.0)),
                Err(e) => Err(e),
            })
        }
    }
}

fn eval_cond(ctx: &mut Context, branches: &[Arc<Graph>], inputs: Vec<Slot>) -> Result<Vec<Slot>> {
    let (index, operands) = inputs
        .split_first()
        .ok_or_else(|| Error::Internal("cond without an index".to_string()))?;
    let key = ctx.scope_key();
    match index {
        Slot::Uniform(v) => {
            let taken = branch_index(v, branches.len())?;
            ctx.scoped(key, |ctx| run_graph(ctx, &branches[taken], operands.to_vec()))
        }
        Slot::Lanes(_) => {
            let lanes = index.lane_count();
            let mut taken = Vec::with_capacity(branches.len());
            for (b, branch) in branches.iter().enumerate() {
                let mask = branch_mask(index, b, branches.len())?;
                let outs = ctx.scoped(key, |ctx| {
                    ctx.with_lanes(lanes, |ctx| {
                        ctx.with_mask(mask, |ctx| run_graph(ctx, branch, operands.to_vec()))
                    })
                })?;
                taken.push(outs);
            }
            let num_outputs = taken.first().map_or(0, Vec::len);
            (0..num_outputs)
                .map(|k| {
                    let options: Vec<Slot> = taken.iter().map(|outs| outs[k].clone()).collect();
                    Ok(Slot::mux(index, &options)?)
                })
                .collect()
        }
    }
}

/// Lanes whose index selects branch `b`, clamped as [`Slot::mux`] clamps.
fn branch_mask(index: &Slot, b: usize, num_branches: usize) -> Result<Slot> {
    let options: Vec<Slot> = (0..num_branches)
        .map(|k| Slot::Uniform(Value::bool(k == b)))
        .collect();
    Ok(Slot::mux(index, &options)?)
}

fn eval_scan(
    ctx: &mut Context,
    body: &Graph,
    shape: ScanShape,
    out_avals: &[Aval],
    inputs: Vec<Slot>,
) -> Result<Vec<Slot>> {
    let ScanShape {
        num_consts, num_carry, ..
    } = shape;
    if inputs.len() < num_consts + num_carry {
        return Err(Error::Internal(format!(
            "scan expects at least {} inputs, found {}",
            num_consts + num_carry,
            inputs.len()
        )));
    }
    let loop_key = ctx.scope_key();
    let consts = &inputs[..num_consts];
    let mut carry = inputs[num_consts..num_consts + num_carry].to_vec();
    let xs = &inputs[num_consts + num_carry..];
    let num_ys = out_avals.len().saturating_sub(num_carry);
    let mut ys: Vec<Vec<Slot>> = vec![Vec::with_capacity(shape.length); num_ys];

    for i in shape.order() {
        let mut args = consts.to_vec();
        args.extend(carry.iter().cloned());
        for x in xs {
            args.push(slice_slot(x, i)?);
        }
        let key = loop_key.map(|k| k.fold_in(i as u64));
        let mut outs = ctx.scoped(key, |ctx| run_graph(ctx, body, args))?;
        let rest = outs.split_off(num_carry.min(outs.len()));
        carry = outs;
        for (acc, y) in ys.iter_mut().zip(rest) {
            acc.push(y);
        }
    }

    let mut result = carry;
    for (k, mut acc) in ys.into_iter().enumerate() {
        if shape.reverse {
            acc.reverse();
        }
        result.push(stack_slots(&acc, &out_avals[num_carry + k])?);
    }
    Ok(result)
}

/// Element `i` of the leading per-lane axis.
pub(crate) fn slice_slot(x: &Slot, i: usize) -> Result<Slot> {
    Ok(match x {
        Slot::Uniform(v) => Slot::Uniform(v.index_axis0(i)?),
        Slot::Lanes(v) => Slot::Lanes(v.move_axis(1, 0)?.index_axis0(i)?),
    })
}

/// Stack per-iteration slots along a new per-lane leading axis.
pub(crate) fn stack_slots(items: &[Slot], aval: &Aval) -> Result<Slot> {
    if items.is_empty() {
        return Ok(Slot::Uniform(Value::zeros(aval.dtype, aval.shape.clone())));
    }
    match Slot::common_lanes(items)? {
        None => {
            let values: Vec<Value> = items.iter().map(|s| s.value().clone()).collect();
            Ok(Slot::Uniform(Value::stack(&values)?))
        }
        Some(lanes) => {
            let values = items
                .iter()
                .map(|s| s.materialize(lanes))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(Slot::Lanes(Value::stack(&values)?.move_axis(0, 1)?))
        }
    }
}

/// User operations run `execute` on plain inputs and `batch` on lane inputs.
fn eval_user(op: &CustomOp, inputs: Vec<Slot>) -> Result<Vec<Slot>> {
    if inputs.iter().all(|s| !s.is_lanes()) {
        let values: Vec<Value> = inputs.into_iter().map(Slot::into_value).collect();
        return Ok(op.execute(&values)?.into_iter().map(Slot::Uniform).collect());
    }
    let axes: Vec<Option<usize>> = inputs.iter().map(|s| s.is_lanes().then_some(0)).collect();
    let values: Vec<Value> = inputs.into_iter().map(Slot::into_value).collect();
    let (outs, out_axes) = op.batch(&values, &axes)?;
    if outs.len() != out_axes.len() {
        return Err(Error::Internal(format!(
            "batch rule of {} returned {} values and {} axes",
            op.kind(),
            outs.len(),
            out_axes.len()
        )));
    }
    outs.into_iter()
        .zip(out_axes)
        .map(|(value, axis)| {
            Ok(match axis {
                Some(a) => Slot::Lanes(value.move_axis(a, 0)?),
                None => Slot::Uniform(value),
            })
        })
        .collect()
}
