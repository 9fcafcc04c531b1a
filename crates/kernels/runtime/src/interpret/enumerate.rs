//! Exact enumeration.
//!
//! A graph is run with one lane per combination of finite-support choices.
//! An assume node with `K` support values multiplies the lanes by `K`: lane
//! `l·K + k` continues lane `l` with the `k`-th value, and its score gains
//! the density of that value. Observe nodes add their log density to the
//! score of every lane.
//!
//! Pending work is an explicit stack of continuations per [`Frame`], so the
//! host stack does not grow with the graph. A branch whose index varies
//! across lanes splits the frame by branch. A loop whose body samples runs
//! one iteration at a time, so lanes can grow between iterations.
//!
//! Every lane records the support positions it took. Finished lanes are
//! ordered by that path, which is row-major over the choices in graph order
//! whatever splits happened on the way.

use std::sync::Arc;

use serde::Serialize;
use stoch_foundation::{Slot, Value, ValueError};
use stoch_ir::{branch_index, stage, Atom, Aval, CustomOp, Environment, Equation, Graph, Op, OpKind, ScanShape};
use tracing::{debug, trace};

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::distributions::{logsumexp, Dist};
use crate::error::{Error, Result};
use crate::gfi::{slot_avals, uniform_slots, Measure};
use crate::interpret::eval::{eval_node, log_density_slot, slice_slot, stack_slots};
use crate::ops::{sampler, site_address};

/// Every execution of a program, with its score.
///
/// Row `i` of every array is combination `i`: `scores[i]` is the joint log
/// density of the choices and observations, `choices` holds each free choice
/// stacked along a leading axis and `retval` the stacked outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enumeration {
    pub scores: Vec<f64>,
    pub choices: ChoiceTree<Value>,
    pub retval: Vec<Value>,
}

impl Enumeration {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// `log Σ exp(score)`: the log evidence of the observations.
    pub fn log_normalizer(&self) -> f64 {
        logsumexp(&self.scores)
    }

    /// Normalised probability of each combination.
    ///
    /// All zeros when every combination is impossible.
    pub fn posterior(&self) -> Vec<f64> {
        let z = self.log_normalizer();
        if !z.is_finite() {
            return vec![0.0; self.len()];
        }
        self.scores.iter().map(|s| (s - z).exp()).collect()
    }

    /// Index of the highest-scoring combination, the first one on ties.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, s) in self.scores.iter().enumerate() {
            match best {
                Some((_, b)) if *s <= b => {}
                _ => best = Some((i, *s)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Choices of combination `i`.
    pub fn choices_at(&self, i: usize) -> Result<ChoiceMap> {
        self.choices
            .try_map(&mut |v: &Value| Ok::<_, Error>(Slot::Uniform(v.index_axis0(i)?)))
    }

    /// Outputs of combination `i`.
    pub fn retval_at(&self, i: usize) -> Result<Vec<Value>> {
        Ok(self
            .retval
            .iter()
            .map(|v| v.index_axis0(i))
            .collect::<std::result::Result<_, _>>()?)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| Error::Internal(format!("enumeration to json: {err}")))
    }
}

/// Enumerate every execution of `graph` on `args`.
///
/// The graph must be free of trace nodes. `retval` holds the graph outputs;
/// `choices` is empty, as untraced draws have no address.
pub fn enumerate(ctx: &mut Context, graph: &Graph, args: &[Value]) -> Result<Enumeration> {
    let (scores, retval) = enumerate_graph(ctx, graph, uniform_slots(args))?;
    Ok(Enumeration {
        scores,
        choices: ChoiceTree::empty(),
        retval,
    })
}

pub(crate) fn enumerate_measure(ctx: &mut Context, measure: &Measure, args: &[Value]) -> Result<Enumeration> {
    let lowered = LoweredMeasure::stage(measure, args)?;
    let (scores, outputs) = enumerate_graph(ctx, &lowered.graph, uniform_slots(args))?;
    debug!(measure = %measure.name(), combinations = scores.len(), "enumerated");
    lowered.assemble(scores, outputs)
}

/// A measure staged into one graph whose outputs are its free choices,
/// leaves first, then its return values.
pub(crate) struct LoweredMeasure {
    pub graph: Graph,
    layout: ChoiceTree<Atom>,
    num_choices: usize,
}

impl LoweredMeasure {
    pub(crate) fn stage(measure: &Measure, args: &[Value]) -> Result<Self> {
        let avals = slot_avals(&uniform_slots(args));
        let mut layout = None;
        let graph = stage::<Error, _>(&avals, |s, xs| {
            let (choices, retval) = measure.lower_enum(s, xs)?;
            let mut outs: Vec<Atom> = choices.leaves().into_iter().map(|(_, a)| a.clone()).collect();
            outs.extend(retval);
            layout = Some(choices);
            Ok(outs)
        })?;
        let layout = layout.ok_or_else(|| Error::Internal("measure staged without choices".to_string()))?;
        let num_choices = layout.leaves().len();
        trace!(measure = %measure.name(), equations = graph.equations.len(), num_choices, "lowered measure");
        Ok(Self {
            graph,
            layout,
            num_choices,
        })
    }

    pub(crate) fn assemble(&self, scores: Vec<f64>, mut outputs: Vec<Value>) -> Result<Enumeration> {
        if outputs.len() < self.num_choices {
            return Err(Error::Internal(format!(
                "{} outputs for {} choices",
                outputs.len(),
                self.num_choices
            )));
        }
        let retval = outputs.split_off(self.num_choices);
        let choices = self
            .layout
            .refill(&mut outputs.into_iter())
            .ok_or_else(|| Error::Internal("choice layout outlived its outputs".to_string()))?;
        Ok(Enumeration {
            scores,
            choices,
            retval,
        })
    }
}

/// Pending equations of one graph.
#[derive(Clone)]
struct Block {
    graph: Arc<Graph>,
    pc: usize,
    env: Environment<Slot>,
}

impl Block {
    fn new(graph: Arc<Graph>, args: Vec<Slot>) -> Result<Self> {
        let env = Environment::for_graph(&graph, args)?;
        Ok(Self { graph, pc: 0, env })
    }
}

/// A scan whose body samples, run one iteration at a time.
#[derive(Clone)]
struct Loop {
    body: Arc<Graph>,
    shape: ScanShape,
    out_avals: Vec<Aval>,
    order: Vec<usize>,
    step: usize,
    consts: Vec<Slot>,
    carry: Vec<Slot>,
    xs: Vec<Slot>,
    ys: Vec<Vec<Slot>>,
}

impl Loop {
    fn new(body: Arc<Graph>, shape: ScanShape, out_avals: &[Aval], mut inputs: Vec<Slot>) -> Result<Self> {
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
        let xs = inputs.split_off(num_consts + num_carry);
        let carry = inputs.split_off(num_consts);
        let num_ys = out_avals.len().saturating_sub(num_carry);
        Ok(Self {
            body,
            shape,
            out_avals: out_avals.to_vec(),
            order: shape.order(),
            step: 0,
            consts: inputs,
            carry,
            xs,
            ys: vec![Vec::with_capacity(shape.length); num_ys],
        })
    }

    fn is_done(&self) -> bool {
        self.step == self.order.len()
    }

    fn iteration(&self) -> Result<Block> {
        let i = self.order[self.step];
        let mut args = self.consts.clone();
        args.extend(self.carry.iter().cloned());
        for x in &self.xs {
            args.push(slice_slot(x, i)?);
        }
        Block::new(Arc::clone(&self.body), args)
    }

    fn absorb(&mut self, mut outs: Vec<Slot>) {
        let rest = outs.split_off(self.shape.num_carry.min(outs.len()));
        self.carry = outs;
        for (acc, y) in self.ys.iter_mut().zip(rest) {
            acc.push(y);
        }
        self.step += 1;
    }

    fn finish(self) -> Result<Vec<Slot>> {
        let num_carry = self.shape.num_carry;
        let mut result = self.carry;
        for (k, mut acc) in self.ys.into_iter().enumerate() {
            if self.shape.reverse {
                acc.reverse();
            }
            result.push(stack_slots(&acc, &self.out_avals[num_carry + k])?);
        }
        Ok(result)
    }
}

#[derive(Clone)]
enum Cont {
    Block(Block),
    Loop(Loop),
}

/// A set of lanes sharing one continuation stack.
struct Frame {
    lanes: usize,
    score: Slot,
    /// Support positions taken by each lane, in graph order.
    paths: Vec<Vec<usize>>,
    stack: Vec<Cont>,
}

impl Frame {
    /// Same frame with every slot passed through `f`.
    fn map_slots(
        self,
        lanes: usize,
        paths: Vec<Vec<usize>>,
        f: &mut impl FnMut(&Slot) -> std::result::Result<Slot, ValueError>,
    ) -> Result<Frame> {
        let mut stack = Vec::with_capacity(self.stack.len());
        for cont in self.stack {
            stack.push(match cont {
                Cont::Block(b) => Cont::Block(Block {
                    env: b.env.map_values(|s| Ok(f(s)?))?,
                    ..b
                }),
                Cont::Loop(l) => Cont::Loop(Loop {
                    consts: map_each(&l.consts, f)?,
                    carry: map_each(&l.carry, f)?,
                    xs: map_each(&l.xs, f)?,
                    ys: l
                        .ys
                        .iter()
                        .map(|acc| map_each(acc, f))
                        .collect::<std::result::Result<_, _>>()?,
                    ..l
                }),
            });
        }
        Ok(Frame {
            lanes,
            score: f(&self.score)?,
            paths,
            stack,
        })
    }

    /// Each lane repeated `k` times, lane `l·k + j` taking position `j`.
    fn expand(self, k: usize) -> Result<Frame> {
        let paths = self
            .paths
            .iter()
            .flat_map(|p| {
                (0..k).map(move |j| {
                    let mut q = p.clone();
                    q.push(j);
                    q
                })
            })
            .collect();
        let lanes = self.lanes * k;
        self.map_slots(lanes, paths, &mut |s| s.repeat_lanes(k))
    }

    /// The lanes at `indices`, in that order.
    fn gather(&self, indices: &[usize]) -> Result<Frame> {
        let paths = indices.iter().map(|&i| self.paths[i].clone()).collect();
        let copy = Frame {
            lanes: self.lanes,
            score: self.score.clone(),
            paths: Vec::new(),
            stack: self.stack.clone(),
        };
        copy.map_slots(indices.len(), paths, &mut |s| s.gather_lanes(indices))
    }

    fn top_block(&mut self) -> Result<&mut Block> {
        match self.stack.last_mut() {
            Some(Cont::Block(b)) => Ok(b),
            _ => Err(Error::Internal("enumeration frame without a pending block".to_string())),
        }
    }
}

fn map_each(
    slots: &[Slot],
    f: &mut impl FnMut(&Slot) -> std::result::Result<Slot, ValueError>,
) -> std::result::Result<Vec<Slot>, ValueError> {
    slots.iter().map(|s| f(s)).collect()
}

/// Lanes that reached the end of the graph.
struct Finished {
    lanes: usize,
    score: Slot,
    paths: Vec<Vec<usize>>,
    outputs: Vec<Slot>,
}

enum Step {
    Continue(Frame),
    Split(Vec<Frame>),
    Done(Finished),
    /// Every lane ran into an empty support.
    Vanished,
}

fn enumerate_graph(ctx: &mut Context, graph: &Graph, args: Vec<Slot>) -> Result<(Vec<f64>, Vec<Value>)> {
    let root = Frame {
        lanes: 1,
        score: Slot::Uniform(Value::f64(0.0)),
        paths: vec![Vec::new()],
        stack: vec![Cont::Block(Block::new(Arc::new(graph.clone()), args)?)],
    };
    let mut worklist = vec![root];
    let mut finished = Vec::new();
    while let Some(mut frame) = worklist.pop() {
        loop {
            match step(ctx, frame)? {
                Step::Continue(next) => frame = next,
                Step::Split(parts) => {
                    trace!(parts = parts.len(), "frame split");
                    worklist.extend(parts.into_iter().rev());
                    break;
                }
                Step::Done(done) => {
                    finished.push(done);
                    break;
                }
                Step::Vanished => break,
            }
        }
    }
    collect(finished, &graph.out_avals)
}

fn step(ctx: &mut Context, mut frame: Frame) -> Result<Step> {
    match frame.stack.pop() {
        None => Err(Error::Internal("empty enumeration frame".to_string())),
        Some(Cont::Loop(l)) if l.is_done() => {
            let outs = l.finish()?;
            deliver(frame, outs)
        }
        Some(Cont::Loop(l)) => {
            let body = l.iteration()?;
            frame.stack.push(Cont::Loop(l));
            frame.stack.push(Cont::Block(body));
            Ok(Step::Continue(frame))
        }
        Some(Cont::Block(block)) if block.pc == block.graph.equations.len() => {
            let outs = block.env.read_all(&block.graph.outvars)?;
            deliver(frame, outs)
        }
        Some(Cont::Block(block)) => run_equation(ctx, frame, block),
    }
}

/// Hand the outputs of a finished block or loop to whatever waits on them.
fn deliver(mut frame: Frame, outs: Vec<Slot>) -> Result<Step> {
    match frame.stack.pop() {
        None => Ok(Step::Done(Finished {
            lanes: frame.lanes,
            score: frame.score,
            paths: frame.paths,
            outputs: outs,
        })),
        Some(Cont::Block(mut parent)) => {
            let graph = Arc::clone(&parent.graph);
            parent.env.write_all(&graph.equations[parent.pc].outputs, outs)?;
            parent.pc += 1;
            frame.stack.push(Cont::Block(parent));
            Ok(Step::Continue(frame))
        }
        Some(Cont::Loop(mut l)) => {
            l.absorb(outs);
            frame.stack.push(Cont::Loop(l));
            Ok(Step::Continue(frame))
        }
    }
}

fn run_equation(ctx: &mut Context, mut frame: Frame, mut block: Block) -> Result<Step> {
    let graph = Arc::clone(&block.graph);
    let eqn = &graph.equations[block.pc];
    let inputs = block.env.read_all(&eqn.inputs)?;
    match &eqn.op {
        Op::Custom(op) if op.kind() == &OpKind::Assume => {
            frame.stack.push(Cont::Block(block));
            expand_assume(ctx, frame, eqn, op, &inputs)
        }
        Op::Custom(op) if op.kind() == &OpKind::Observe => {
            let dist = sampler(op.elaboration())?;
            let (value, args) = inputs.split_first().ok_or_else(|| Error::InvalidArgument {
                dist: dist.name().to_string(),
                message: "missing value".to_string(),
            })?;
            let lp = log_density_slot(Some(frame.lanes), dist, value, args)?;
            frame.score = frame.score.add(&lp)?;
            block.pc += 1;
            frame.stack.push(Cont::Block(block));
            Ok(Step::Continue(frame))
        }
        Op::Custom(op) if op.kind() == &OpKind::Trace => Err(Error::NotEnumerable {
            site: site_address(op.elaboration())?,
            reason: "trace sites must be lowered before enumeration".to_string(),
        }),
        Op::Cond { branches } if branches.iter().any(|b| b.is_probabilistic()) => {
            frame.stack.push(Cont::Block(block));
            enter_branch(frame, branches, inputs)
        }
        Op::Scan {
            body,
            length,
            num_consts,
            num_carry,
            reverse,
        } if body.is_probabilistic() => {
            let shape = ScanShape {
                length: *length,
                num_consts: *num_consts,
                num_carry: *num_carry,
                reverse: *reverse,
            };
            frame.stack.push(Cont::Block(block));
            frame
                .stack
                .push(Cont::Loop(Loop::new(Arc::clone(body), shape, &eqn.out_avals, inputs)?));
            Ok(Step::Continue(frame))
        }
        _ => {
            let outs = ctx.with_lanes(Some(frame.lanes), |ctx| eval_node(ctx, eqn, inputs))?;
            block.env.write_all(&eqn.outputs, outs)?;
            block.pc += 1;
            frame.stack.push(Cont::Block(block));
            Ok(Step::Continue(frame))
        }
    }
}

/// Support of `dist` per lane; a single list when every argument is uniform.
fn lane_supports(dist: &Dist, args: &[Slot], lanes: usize) -> Result<Vec<Vec<Value>>> {
    let no_support = || Error::NotEnumerable {
        site: dist.name().to_string(),
        reason: "no finite support".to_string(),
    };
    if args.iter().all(|s| !s.is_lanes()) {
        let values: Vec<Value> = args.iter().map(|s| s.value().clone()).collect();
        return Ok(vec![dist.support(&values)?.ok_or_else(no_support)?]);
    }
    (0..lanes)
        .map(|l| {
            let views = args.iter().map(|s| s.lane(l)).collect::<std::result::Result<Vec<_>, _>>()?;
            dist.support(&views)?.ok_or_else(no_support)
        })
        .collect()
}

fn expand_assume(ctx: &Context, frame: Frame, eqn: &Equation, op: &CustomOp, inputs: &[Slot]) -> Result<Step> {
    let dist = sampler(op.elaboration())?;
    let supports = lane_supports(dist, inputs, frame.lanes)?;
    let k = supports.first().map_or(0, Vec::len);
    if supports.iter().any(|s| s.len() != k) {
        return Err(Error::NotEnumerable {
            site: dist.name().to_string(),
            reason: "support size varies across lanes".to_string(),
        });
    }
    if k == 0 {
        return Ok(Step::Vanished);
    }
    let cap = ctx.policy().max_enumeration_lanes;
    let lanes = frame.lanes.saturating_mul(k);
    if lanes > cap {
        return Err(Error::NotEnumerable {
            site: dist.name().to_string(),
            reason: format!("{} combinations exceed the cap of {}", lanes, cap),
        });
    }
    let value = if supports.len() == 1 {
        Value::stack(&supports[0])?.tile_axis0(frame.lanes)?
    } else {
        Value::stack(&supports.concat())?
    };
    trace!(dist = dist.name(), support = k, lanes, "expand");
    let value = Slot::Lanes(value);
    let args = inputs
        .iter()
        .map(|s| s.repeat_lanes(k))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let lp = log_density_slot(Some(lanes), dist, &value, &args)?;
    let mut frame = frame.expand(k)?;
    frame.score = frame.score.add(&lp)?;
    let block = frame.top_block()?;
    block.env.write_all(&eqn.outputs, vec![value])?;
    block.pc += 1;
    Ok(Step::Continue(frame))
}

/// Push the taken branch, splitting the frame when lanes disagree.
fn enter_branch(mut frame: Frame, branches: &[Arc<Graph>], inputs: Vec<Slot>) -> Result<Step> {
    let (index, operands) = inputs
        .split_first()
        .ok_or_else(|| Error::Internal("cond without an index".to_string()))?;
    match index {
        Slot::Uniform(v) => {
            let taken = branch_index(v, branches.len())?;
            frame
                .stack
                .push(Cont::Block(Block::new(Arc::clone(&branches[taken]), operands.to_vec())?));
            Ok(Step::Continue(frame))
        }
        Slot::Lanes(_) => {
            let mut groups: Vec<Vec<usize>> = vec![Vec::new(); branches.len()];
            for l in 0..frame.lanes {
                groups[branch_index(&index.lane(l)?, branches.len())?].push(l);
            }
            let mut parts = Vec::new();
            for (branch, lanes) in branches.iter().zip(&groups) {
                if lanes.is_empty() {
                    continue;
                }
                let mut part = frame.gather(lanes)?;
                let args = operands
                    .iter()
                    .map(|s| s.gather_lanes(lanes))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                part.stack.push(Cont::Block(Block::new(Arc::clone(branch), args)?));
                parts.push(part);
            }
            Ok(Step::Split(parts))
        }
    }
}

/// Concatenate finished lanes in path order.
fn collect(finished: Vec<Finished>, out_avals: &[Aval]) -> Result<(Vec<f64>, Vec<Value>)> {
    let mut rows: Vec<(&[usize], usize, usize)> = Vec::new();
    let mut scores = Vec::with_capacity(finished.len());
    let mut outputs = Vec::with_capacity(finished.len());
    for (f, done) in finished.iter().enumerate() {
        scores.push(done.score.materialize(done.lanes)?);
        outputs.push(
            done.outputs
                .iter()
                .map(|s| s.materialize(done.lanes))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        );
        for (l, path) in done.paths.iter().enumerate() {
            rows.push((path.as_slice(), f, l));
        }
    }
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut flat_scores = Vec::with_capacity(rows.len());
    for &(_, f, l) in &rows {
        flat_scores.push(scores[f].data()[l]);
    }
    let mut stacked = Vec::with_capacity(out_avals.len());
    for (k, aval) in out_avals.iter().enumerate() {
        if rows.is_empty() {
            stacked.push(Value::zeros(aval.dtype, aval.shape.prepend(0)));
            continue;
        }
        let picked = rows
            .iter()
            .map(|&(_, f, l)| outputs[f][k].index_axis0(l))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        stacked.push(Value::stack(&picked)?);
    }
    Ok((flat_scores, stacked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{bernoulli, categorical, normal};
    use crate::ops::ProbabilisticStager;
    use stoch_foundation::DType;

    fn and_model() -> Graph {
        stage::<Error, _>(&[], |s, _| {
            let x = s.sample(&bernoulli(), &[Atom::from(0.5)])?;
            let y = s.sample(&bernoulli(), &[Atom::from(0.3)])?;
            let both = s.and(&x, &y)?;
            let p = s.select(&both, 1.0, 0.0)?;
            s.observe(&bernoulli(), Value::bool(true), &[p])?;
            Ok(vec![x, y])
        })
        .unwrap()
    }

    #[test]
    fn test_conjunction_of_two_coins() {
        let e = enumerate(&mut Context::new(), &and_model(), &[]).unwrap();
        assert_eq!(e.len(), 4);
        assert_eq!(e.retval[0], Value::from_bools(&[false, false, true, true]));
        assert_eq!(e.retval[1], Value::from_bools(&[false, true, false, true]));
        let finite: Vec<f64> = e.scores.iter().copied().filter(|s| s.is_finite()).collect();
        assert_eq!(finite.len(), 1);
        assert!((e.scores[3] - (0.5f64 * 0.3).ln()).abs() < 1e-12);
        assert!((e.log_normalizer() - 0.15f64.ln()).abs() < 1e-12);
        assert_eq!(e.argmax(), Some(3));
        assert_eq!(e.posterior(), vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_every_combination_appears_once() {
        let graph = stage::<Error, _>(&[], |s, _| {
            let mut outs = Vec::new();
            for _ in 0..5 {
                outs.push(s.sample(&bernoulli(), &[Atom::from(0.5)])?);
            }
            Ok(outs)
        })
        .unwrap();
        let e = enumerate(&mut Context::new(), &graph, &[]).unwrap();
        assert_eq!(e.len(), 32);
        assert!((e.log_normalizer()).abs() < 1e-12);
        let mut seen: Vec<Vec<f64>> = (0..32)
            .map(|i| e.retval.iter().map(|v| v.data()[i]).collect())
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        seen.dedup();
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn test_dependent_support() {
        // y's probabilities depend on x; every lane still has two outcomes.
        let graph = stage::<Error, _>(&[], |s, _| {
            let x = s.sample(&bernoulli(), &[Atom::from(0.25)])?;
            let p = s.select(&x, 0.9, 0.1)?;
            let y = s.sample(&bernoulli(), &[p])?;
            Ok(vec![y])
        })
        .unwrap();
        let e = enumerate(&mut Context::new(), &graph, &[]).unwrap();
        let expected = [0.75 * 0.9, 0.75 * 0.1, 0.25 * 0.1, 0.25 * 0.9];
        for (s, p) in e.scores.iter().zip(expected) {
            assert!((s - f64::ln(p)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_branch_on_sampled_index_splits_lanes() {
        let graph = stage::<Error, _>(&[], |s, _| {
            let x = s.sample(&bernoulli(), &[Atom::from(0.5)])?;
            let outs = s.if_else::<Error, _, _>(
                &x,
                &[],
                |s, _| {
                    let probs = s.constant(Value::from_f64s(&[0.2, 0.3, 0.5]));
                    Ok(vec![s.sample(&categorical(), &[probs])?])
                },
                |s, _| Ok(vec![s.constant(Value::i64(0))]),
            )?;
            Ok(vec![x, outs[0].clone()])
        })
        .unwrap();
        let e = enumerate(&mut Context::new(), &graph, &[]).unwrap();
        assert_eq!(e.len(), 4);
        assert!((e.log_normalizer()).abs() < 1e-12);
        assert_eq!(e.retval[0], Value::from_bools(&[false, true, true, true]));
        assert_eq!(e.retval[1], Value::from_i64s(&[0, 0, 1, 2]));
    }

    #[test]
    fn test_loop_body_sampling_multiplies_lanes() {
        let graph = stage::<Error, _>(&[], |s, _| {
            let zero = s.constant(Value::i64(0));
            let (count, _) = s.scan::<Error, _>(3, &[zero], &[], |s, carry, _| {
                let b = s.sample(&bernoulli(), &[Atom::from(0.5)])?;
                let bi = s.convert(&b, DType::I64)?;
                Ok((vec![s.add(&carry[0], &bi)?], Vec::new()))
            })?;
            Ok(count)
        })
        .unwrap();
        let e = enumerate(&mut Context::new(), &graph, &[]).unwrap();
        assert_eq!(e.len(), 8);
        assert_eq!(e.retval[0], Value::from_i64s(&[0, 1, 1, 2, 1, 2, 2, 3]));
    }

    #[test]
    fn test_continuous_site_is_not_enumerable() {
        let graph = stage::<Error, _>(&[], |s, _| {
            Ok(vec![s.sample(&normal(), &[Atom::from(0.0), Atom::from(1.0)])?])
        })
        .unwrap();
        let err = enumerate(&mut Context::new(), &graph, &[]).unwrap_err();
        assert!(matches!(err, Error::NotEnumerable { .. }));
    }

    #[test]
    fn test_lane_cap() {
        let graph = stage::<Error, _>(&[], |s, _| {
            let mut outs = Vec::new();
            for _ in 0..4 {
                outs.push(s.sample(&bernoulli(), &[Atom::from(0.5)])?);
            }
            Ok(outs)
        })
        .unwrap();
        let mut policy = stoch_foundation::RuntimePolicy::default();
        policy.max_enumeration_lanes = 8;
        let err = enumerate(&mut Context::with_policy(policy), &graph, &[]).unwrap_err();
        assert!(matches!(err, Error::NotEnumerable { .. }));
    }

    #[test]
    fn test_json_output() {
        let e = enumerate(&mut Context::new(), &and_model(), &[]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&e.to_json().unwrap()).unwrap();
        assert_eq!(json["scores"].as_array().unwrap().len(), 4);
        // Impossible combinations serialise as null.
        assert!(json["scores"][0].is_null());
    }
}
