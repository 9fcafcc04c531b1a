//! Built-in probabilistic nodes and the staging API for them.
//!
//! Sampling nodes carry their [`Dist`] as elaboration payload; trace nodes
//! carry a [`TraceSite`]. The rules bound here only serve plain evaluation
//! and shape inference. The runtime interpreters pattern-match on the node
//! kind and never call `execute` on these nodes.

use stoch_foundation::{DType, Slot, Value};
use stoch_ir::{Atom, Aval, CustomOp, Elaboration, IrError, OpKind, RuleSet, Stager};

use crate::context::Context;
use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::gfi::Program;
use crate::interpret::eval::{log_density_slot, sample_slot};

/// Payload of a trace node.
#[derive(Debug, Clone)]
pub struct TraceSite {
    pub callee: Program,
    /// Avals of the callee arguments, as staged.
    pub arg_avals: Vec<Aval>,
}

pub(crate) fn sampler(e: &Elaboration) -> Result<&Dist> {
    e.payload::<Dist>()
        .ok_or_else(|| Error::Internal(format!("sampling node {} without a distribution", e.label)))
}

pub(crate) fn trace_site(e: &Elaboration) -> Result<&TraceSite> {
    e.payload::<TraceSite>()
        .ok_or_else(|| Error::Internal(format!("trace node {} without a callee", e.label)))
}

pub(crate) fn site_address(e: &Elaboration) -> Result<String> {
    e.address
        .as_ref()
        .map(|a| a.to_string())
        .ok_or_else(|| Error::Internal(format!("trace node {} without an address", e.label)))
}

/// Same trace node calling `callee` instead.
pub(crate) fn retarget(op: &CustomOp, callee: Program) -> Result<CustomOp> {
    let site = trace_site(op.elaboration())?;
    let mut elaboration = op.elaboration().clone();
    elaboration.label = callee.name();
    let site = TraceSite {
        callee,
        arg_avals: site.arg_avals.clone(),
    };
    Ok(op.with_elaboration(elaboration.with_payload(std::sync::Arc::new(site))))
}

fn lane_slots(values: &[Value], axes: &[Option<usize>]) -> stoch_ir::Result<(usize, Vec<Slot>)> {
    let mut lanes = 1;
    let mut slots = Vec::with_capacity(values.len());
    for (value, axis) in values.iter().zip(axes) {
        match axis {
            Some(a) => {
                let moved = value.move_axis(*a, 0)?;
                lanes = moved.shape().leading().unwrap_or(1);
                slots.push(Slot::Lanes(moved));
            }
            None => slots.push(Slot::Uniform(value.clone())),
        }
    }
    Ok((lanes, slots))
}

/// Rules for sampling and density nodes.
///
/// Plain `execute` and `batch` have no caller context, so a sample drawn
/// here comes from a fresh unseeded [`Context`] and its fallback stream.
/// This is the interactive path only; reproducible draws go through a
/// seeded context and the runtime interpreter.
fn sampler_rules(kind: &OpKind) -> RuleSet {
    let name = kind.to_string();
    let op_name = name.clone();
    let shape_kind = kind.clone();
    let rules = RuleSet::new().infer_shapes(move |e, avals| match shape_kind {
        OpKind::Assume => {
            let dist = sampler(e).map_err(|err| err.into_ir(&op_name))?;
            Ok(vec![dist.event_aval(avals).map_err(|err| err.into_ir(&op_name))?])
        }
        OpKind::LogDensity => Ok(vec![Aval::scalar(DType::F64)]),
        _ => Ok(Vec::new()),
    });
    match kind {
        OpKind::Assume => {
            let (n1, n2, n3) = (name.clone(), name.clone(), name);
            rules
                .execute(move |e, args| {
                    let dist = sampler(e).map_err(|err| err.into_ir(&n1))?;
                    let mut ctx = Context::new();
                    let slots: Vec<Slot> = args.iter().cloned().map(Slot::Uniform).collect();
                    let out = sample_slot(&mut ctx, dist, &slots, e.shared, &e.label).map_err(|err| err.into_ir(&n1))?;
                    Ok(vec![out.into_value()])
                })
                .batch(move |e, values, axes| {
                    let dist = sampler(e).map_err(|err| err.into_ir(&n2))?;
                    let (lanes, slots) = lane_slots(values, axes)?;
                    let mut ctx = Context::new();
                    let out = ctx
                        .with_lanes(Some(lanes), |ctx| sample_slot(ctx, dist, &slots, e.shared, &e.label))
                        .map_err(|err| err.into_ir(&n2))?;
                    Ok((vec![out.materialize(lanes)?], vec![Some(0)]))
                })
                .differentiate(move |e, primals, _| {
                    let dist = sampler(e).map_err(|err| err.into_ir(&n3))?;
                    let slots: Vec<Slot> = primals.iter().cloned().map(Slot::Uniform).collect();
                    let out = sample_slot(&mut Context::new(), dist, &slots, e.shared, &e.label)
                        .map_err(|err| err.into_ir(&n3))?
                        .into_value();
                    let tangent = Value::zeros(DType::F64, out.shape().clone());
                    Ok((vec![out], vec![tangent]))
                })
        }
        _ => {
            let emits = matches!(kind, OpKind::LogDensity);
            let (n1, n2, n3) = (name.clone(), name.clone(), name);
            rules
                .execute(move |e, inputs| {
                    let dist = sampler(e).map_err(|err| err.into_ir(&n1))?;
                    let lp = scalar_density(dist, inputs).map_err(|err| err.into_ir(&n1))?;
                    Ok(if emits { vec![Value::f64(lp)] } else { Vec::new() })
                })
                .batch(move |e, values, axes| {
                    let dist = sampler(e).map_err(|err| err.into_ir(&n2))?;
                    let (lanes, slots) = lane_slots(values, axes)?;
                    let (value, args) = slots.split_first().ok_or(IrError::Arity {
                        op: n2.clone(),
                        expected: 1,
                        found: 0,
                    })?;
                    let lp = log_density_slot(Some(lanes), dist, value, args).map_err(|err| err.into_ir(&n2))?;
                    Ok(if emits {
                        (vec![lp.materialize(lanes)?], vec![Some(0)])
                    } else {
                        (Vec::new(), Vec::new())
                    })
                })
                .differentiate(move |e, primals, tangents| {
                    if !emits {
                        return Ok((Vec::new(), Vec::new()));
                    }
                    let dist = sampler(e).map_err(|err| err.into_ir(&n3))?;
                    let (lp, dlp) = density_jvp(dist, primals, tangents).map_err(|err| err.into_ir(&n3))?;
                    Ok((vec![Value::f64(lp)], vec![Value::f64(dlp)]))
                })
        }
    }
}

fn scalar_density(dist: &Dist, inputs: &[Value]) -> Result<f64> {
    let (value, args) = inputs.split_first().ok_or_else(|| Error::InvalidArgument {
        dist: dist.name().to_string(),
        message: "missing value".to_string(),
    })?;
    dist.log_density(value, args)
}

/// Central difference of the log density along the tangent direction.
fn density_jvp(dist: &Dist, primals: &[Value], tangents: &[Value]) -> Result<(f64, f64)> {
    const H: f64 = 1e-6;
    let shift = |sign: f64| -> Result<Vec<Value>> {
        primals
            .iter()
            .zip(tangents)
            .map(|(p, t)| {
                if p.dtype() != DType::F64 || t.data().iter().all(|x| *x == 0.0) {
                    Ok(p.clone())
                } else {
                    Ok(p.zip_with(t, DType::F64, |a, b| a + sign * H * b)?)
                }
            })
            .collect()
    };
    let lp = scalar_density(dist, primals)?;
    let up = scalar_density(dist, &shift(1.0)?)?;
    let down = scalar_density(dist, &shift(-1.0)?)?;
    Ok((lp, (up - down) / (2.0 * H)))
}

fn sampler_op(kind: OpKind, dist: &Dist, shared: bool) -> Result<CustomOp> {
    let mut elaboration = Elaboration::labelled(dist.name()).with_payload(std::sync::Arc::new(dist.clone()));
    elaboration.shared = shared;
    let rules = sampler_rules(&kind);
    Ok(kind.bind(rules, elaboration)?)
}

/// Rules for trace nodes. Like the sampler rules, plain execution simulates
/// the callee in a fresh unseeded [`Context`].
fn trace_rules() -> RuleSet {
    RuleSet::new()
        .execute(|e, args| {
            let site = trace_site(e).map_err(|err| err.into_ir("trace"))?;
            let slots = args.iter().cloned().map(Slot::Uniform).collect();
            let trace = site
                .callee
                .simulate_slots(&mut Context::new(), slots)
                .map_err(|err| err.into_ir("trace"))?;
            Ok(trace.retval_values())
        })
        .infer_shapes(|e, avals| {
            let site = trace_site(e).map_err(|err| err.into_ir("trace"))?;
            site.callee.output_avals(avals).map_err(|err| err.into_ir("trace"))
        })
        .batch(|e, values, axes| {
            let site = trace_site(e).map_err(|err| err.into_ir("trace"))?;
            let (lanes, slots) = lane_slots(values, axes)?;
            let mut ctx = Context::new();
            let trace = ctx
                .with_lanes(Some(lanes), |ctx| site.callee.simulate_slots(ctx, slots))
                .map_err(|err| err.into_ir("trace"))?;
            let mut outs = Vec::with_capacity(trace.retval().len());
            for slot in trace.retval() {
                outs.push(slot.materialize(lanes)?);
            }
            let out_axes = vec![Some(0); outs.len()];
            Ok((outs, out_axes))
        })
        .differentiate(|e, _, _| {
            Err(IrError::Unsupported(format!(
                "differentiating through the traced call {}",
                e.label
            )))
        })
}

fn trace_op(addr: &str, callee: &Program, arg_avals: Vec<Aval>) -> Result<CustomOp> {
    let site = TraceSite {
        callee: callee.clone(),
        arg_avals,
    };
    let elaboration = Elaboration::labelled(callee.name())
        .at(addr)
        .with_payload(std::sync::Arc::new(site));
    Ok(OpKind::Trace.bind(trace_rules(), elaboration)?)
}

/// Staging of probabilistic nodes.
pub trait ProbabilisticStager {
    /// Untraced draw from `dist`.
    fn sample(&mut self, dist: &Dist, args: &[Atom]) -> Result<Atom>;

    /// Untraced draw shared by every lane of a vectorised pass.
    fn sample_shared(&mut self, dist: &Dist, args: &[Atom]) -> Result<Atom>;

    /// Add `log p(value)` to the score.
    fn observe(&mut self, dist: &Dist, value: impl Into<Atom>, args: &[Atom]) -> Result<()>;

    /// `log p(value)` as a value.
    fn log_density(&mut self, dist: &Dist, value: impl Into<Atom>, args: &[Atom]) -> Result<Atom>;

    /// Call `program` and record its choices under `addr`.
    fn trace(&mut self, addr: &str, program: &Program, args: &[Atom]) -> Result<Vec<Atom>>;

    /// Record one draw from `dist` under `addr`.
    fn choose(&mut self, addr: &str, dist: &Dist, args: &[Atom]) -> Result<Atom>;
}

impl ProbabilisticStager for Stager {
    fn sample(&mut self, dist: &Dist, args: &[Atom]) -> Result<Atom> {
        let op = sampler_op(OpKind::Assume, dist, false)?;
        single(self.bind(op, args)?)
    }

    fn sample_shared(&mut self, dist: &Dist, args: &[Atom]) -> Result<Atom> {
        let op = sampler_op(OpKind::Assume, dist, true)?;
        single(self.bind(op, args)?)
    }

    fn observe(&mut self, dist: &Dist, value: impl Into<Atom>, args: &[Atom]) -> Result<()> {
        let op = sampler_op(OpKind::Observe, dist, false)?;
        let mut inputs = vec![value.into()];
        inputs.extend_from_slice(args);
        self.bind(op, &inputs)?;
        Ok(())
    }

    fn log_density(&mut self, dist: &Dist, value: impl Into<Atom>, args: &[Atom]) -> Result<Atom> {
        let op = sampler_op(OpKind::LogDensity, dist, false)?;
        let mut inputs = vec![value.into()];
        inputs.extend_from_slice(args);
        single(self.bind(op, &inputs)?)
    }

    fn trace(&mut self, addr: &str, program: &Program, args: &[Atom]) -> Result<Vec<Atom>> {
        if addr.is_empty() || addr.contains('/') {
            return Err(Error::Unsupported(format!(
                "trace address {:?} must be a single non-empty segment",
                addr
            )));
        }
        let mut avals = Vec::with_capacity(args.len());
        for arg in args {
            avals.push(self.aval(arg)?);
        }
        let op = trace_op(addr, program, avals)?;
        Ok(self.bind(op, args)?)
    }

    fn choose(&mut self, addr: &str, dist: &Dist, args: &[Atom]) -> Result<Atom> {
        single(self.trace(addr, &Program::distribution(dist.clone()), args)?)
    }
}

fn single(mut atoms: Vec<Atom>) -> Result<Atom> {
    match atoms.len() {
        1 => atoms.pop().ok_or_else(|| Error::Internal("empty outputs".to_string())),
        n => Err(IrError::Arity {
            op: "sample".to_string(),
            expected: 1,
            found: n,
        }
        .into()),
    }
}
