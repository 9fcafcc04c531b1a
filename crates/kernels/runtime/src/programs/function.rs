//! Programs staged from host closures.
//!
//! A [`FnProgram`] is staged once per argument avals and cached. Its
//! generative semantics come from running the staged graph under a
//! handler: every trace node of the graph becomes a sub-trace at its
//! address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use stoch_foundation::{Slot, Value};
use stoch_ir::{ensure_valid, rewrite_custom, stage, Atom, Aval, Graph, Op, OpKind, Rewrite, Stager, Var};
use tracing::{debug, trace};

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gfi::{slot_avals, GenerativeFunction, Measure, Program, ReflectiveMeasure, Update};
use crate::handlers::{Handler, Recorded};
use crate::interpret::eval::run_graph;
use crate::ops::{retarget, site_address, trace_site};
use crate::reflect::blanket::BlanketFlags;
use crate::reflect::discretize::discretize_graph;
use crate::reflect::project::lower_graph;
use crate::reflect::trace_sites;
use crate::reflect::trace_type::TraceType;
use crate::selection::Selection;
use crate::trace::{Trace, TraceBody};

/// Host closure a program is staged from.
pub type HostFn = dyn Fn(&mut Stager, &[Atom]) -> Result<Vec<Atom>> + Send + Sync;

enum Source {
    Host(Arc<HostFn>),
    /// Graph of `base` with selected sites discretised.
    Discretized { base: Program, selection: Selection },
    /// A fixed graph for fixed argument avals.
    Staged { graph: Arc<Graph> },
}

/// A program staged from a host closure.
pub struct FnProgram {
    name: String,
    source: Source,
    cache: Mutex<HashMap<Vec<Aval>, Arc<Graph>>>,
    validate: bool,
}

/// Program from a staging closure.
///
/// ```ignore
/// let model = gen("model", |s, _| {
///     let x = s.choose("x", &normal(), &[Atom::from(0.0), Atom::from(1.0)])?;
///     Ok(vec![x])
/// });
/// ```
pub fn gen<F>(name: impl Into<String>, f: F) -> Program
where
    F: Fn(&mut Stager, &[Atom]) -> Result<Vec<Atom>> + Send + Sync + 'static,
{
    Program::new(FnProgram::new(name, Source::Host(Arc::new(f))))
}

impl FnProgram {
    fn new(name: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            source,
            cache: Mutex::new(HashMap::new()),
            validate: true,
        }
    }

    /// Skip graph validation after staging.
    pub fn unchecked(mut self) -> Self {
        self.validate = false;
        self
    }

    fn staged(name: impl Into<String>, graph: Graph) -> Self {
        Self::new(name, Source::Staged { graph: Arc::new(graph) })
    }

    fn build(&self, args: &[Aval]) -> Result<Graph> {
        match &self.source {
            Source::Host(f) => stage::<Error, _>(args, |s, xs| f(s, xs)),
            Source::Discretized { base, selection } => discretize_graph(&*base.graph(args)?, selection),
            Source::Staged { graph } => {
                if graph.in_avals != args {
                    return Err(Error::ShapeMismatch(format!(
                        "{} was staged for {:?}, called with {:?}",
                        self.name, graph.in_avals, args
                    )));
                }
                Ok(graph.as_ref().clone())
            }
        }
    }

    fn run(&self, ctx: &mut Context, handler: Handler, args: Vec<Slot>) -> Result<(Vec<Slot>, Recorded)> {
        let graph = self.graph(&slot_avals(&args))?;
        let (retval, handler) = ctx.with_handler(handler, |ctx| run_graph(ctx, &graph, args))?;
        Ok((retval, handler.finish()))
    }
}

fn poisoned() -> Error {
    Error::Internal("staging cache poisoned".to_string())
}

fn read_taint(taint: &HashMap<Var, bool>, atom: &Atom) -> bool {
    atom.as_var().map_or(false, |v| taint.get(&v).copied().unwrap_or(false))
}

fn retval_values(sub: &Trace, addr: &str) -> Result<Vec<Value>> {
    sub.retval()
        .iter()
        .map(|slot| match slot {
            Slot::Uniform(v) => Ok(v.clone()),
            Slot::Lanes(_) => Err(Error::Unsupported(format!(
                "blanket over the vectorised site {}",
                addr
            ))),
        })
        .collect()
}

impl GenerativeFunction for FnProgram {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn graph(&self, args: &[Aval]) -> Result<Arc<Graph>> {
        if let Some(graph) = self.cache.lock().map_err(|_| poisoned())?.get(args) {
            return Ok(graph.clone());
        }
        let graph = self.build(args)?;
        if self.validate {
            ensure_valid(&graph)?;
        }
        debug!(
            program = %self.name,
            nodes = graph.equations.len(),
            sites = graph.equations.iter().filter(|e| e.op.custom_kind() == Some(&OpKind::Trace)).count(),
            "staged"
        );
        let graph = Arc::new(graph);
        self.cache
            .lock()
            .map_err(|_| poisoned())?
            .insert(args.to_vec(), graph.clone());
        Ok(graph)
    }

    fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>> {
        Ok(self.graph(args)?.out_avals.clone())
    }

    fn simulate(&self, ctx: &mut Context, this: &Program, args: Vec<Slot>) -> Result<Trace> {
        let (retval, rec) = self.run(ctx, Handler::simulate(), args.clone())?;
        Ok(Trace::new(this.clone(), args, TraceBody::Map(rec.subtraces), retval, rec.score))
    }

    fn assess(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)> {
        let (retval, rec) = self.run(ctx, Handler::assess(choices.clone()), args)?;
        Ok((rec.weight, retval))
    }

    fn update(
        &self,
        ctx: &mut Context,
        this: &Program,
        trace: &Trace,
        args: Vec<Slot>,
        choices: &ChoiceMap,
    ) -> Result<Update> {
        let (retval, rec) = self.run(ctx, Handler::update(trace, choices.clone()), args.clone())?;
        Ok(Update {
            trace: Trace::new(this.clone(), args, TraceBody::Map(rec.subtraces), retval, rec.score),
            weight: rec.weight,
            discarded: rec.discarded,
        })
    }

    fn project(&self, this: &Program, constraint: ChoiceMap) -> Result<Measure> {
        Ok(Measure::new(ConstrainedFn {
            program: this.clone(),
            constraint,
        }))
    }

    fn discretize(&self, this: &Program, selection: &Selection) -> Result<Program> {
        Ok(Program::new(FnProgram::new(
            format!("{}.discretized", self.name),
            Source::Discretized {
                base: this.clone(),
                selection: selection.clone(),
            },
        )))
    }

    fn selection(&self, args: &[Aval]) -> Result<Selection> {
        let mut entries = IndexMap::new();
        for (addr, site) in trace_sites(&*self.graph(args)?)? {
            let sub = site.callee.selection(&site.arg_avals).map_err(|e| e.under(&addr))?;
            entries.insert(addr, sub);
        }
        Ok(Selection::Dict(entries))
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        let sites = trace_sites(&*self.graph(args)?)?;
        if sites.is_empty() {
            return Ok(TraceType::Bottom);
        }
        let mut entries = IndexMap::new();
        for (addr, site) in sites {
            let sub = site.callee.trace_type(&site.arg_avals).map_err(|e| e.under(&addr))?;
            entries.insert(addr, sub);
        }
        Ok(TraceType::Map(entries))
    }

    fn blanket_flags(&self, trace: &Trace, in_flows: &[bool], selection: &Selection) -> Result<BlanketFlags> {
        let graph = self.graph(&slot_avals(trace.args()))?;
        let mut taint: HashMap<Var, bool> = HashMap::new();
        for (var, flows) in graph.invars.iter().zip(in_flows) {
            taint.insert(*var, *flows);
        }
        let mut children = IndexMap::new();
        for eqn in &graph.equations {
            let inputs: Vec<bool> = eqn.inputs.iter().map(|a| read_taint(&taint, a)).collect();
            let outputs = match &eqn.op {
                Op::Custom(op) if op.kind() == &OpKind::Trace => {
                    let e = op.elaboration();
                    let addr = site_address(e)?;
                    let sub = trace
                        .subtrace(&addr)
                        .ok_or_else(|| Error::Internal(format!("no sub-trace at {}", addr)))?;
                    let (_, residual) = selection.matches(&addr);
                    let flags = trace_site(e)?
                        .callee
                        .inner()
                        .blanket_flags(sub, &inputs, &residual)
                        .map_err(|err| err.under(&addr))?;
                    trace!(%addr, retain = flags.retain, tagged = flags.tagged, "blanket flags");
                    let outs = flags.out_flows.clone();
                    children.insert(addr, flags);
                    outs
                }
                op if op.sub_graphs().iter().any(|g| g.contains_kind(&OpKind::Trace)) => {
                    // Sites inside branches and loops are kept whole.
                    for sub in op.sub_graphs() {
                        for (addr, _) in trace_sites(sub)? {
                            let tagged = selection.matches(&addr).0;
                            children.insert(
                                addr,
                                BlanketFlags {
                                    retain: true,
                                    tagged,
                                    out_flows: Vec::new(),
                                    children: IndexMap::new(),
                                },
                            );
                        }
                    }
                    vec![true; eqn.outputs.len()]
                }
                _ => vec![inputs.iter().any(|t| *t); eqn.outputs.len()],
            };
            for (var, flows) in eqn.outputs.iter().zip(outputs) {
                taint.insert(*var, flows);
            }
        }
        let out_flows = graph.outvars.iter().map(|a| read_taint(&taint, a)).collect();
        Ok(BlanketFlags {
            retain: true,
            tagged: selection.matches_root(),
            out_flows,
            children,
        })
    }

    fn blanket_rewrite(&self, _this: &Program, trace: &Trace, flags: &BlanketFlags) -> Result<Program> {
        let graph = self.graph(&slot_avals(trace.args()))?;
        let rewritten = rewrite_custom::<Error>(&graph, &mut |eqn, site| {
            let Op::Custom(op) = &eqn.op else {
                return Ok(Rewrite::Keep);
            };
            if op.kind() != &OpKind::Trace || site.top_level.is_none() {
                return Ok(Rewrite::Keep);
            }
            let e = op.elaboration();
            let addr = site_address(e)?;
            let sub = trace
                .subtrace(&addr)
                .ok_or_else(|| Error::Internal(format!("no sub-trace at {}", addr)))?;
            let child = flags
                .child(&addr)
                .ok_or_else(|| Error::Internal(format!("no blanket flags at {}", addr)))?;
            if !child.retain {
                return Ok(Rewrite::Substitute(retval_values(sub, &addr)?));
            }
            let callee = &trace_site(e)?.callee;
            let restricted = callee
                .inner()
                .blanket_rewrite(callee, sub, child)
                .map_err(|err| err.under(&addr))?;
            if restricted.same(callee) {
                Ok(Rewrite::Keep)
            } else {
                Ok(Rewrite::Replace(retarget(op, restricted)?))
            }
        })?;
        Ok(Program::new(FnProgram::staged(format!("{}.blanket", self.name), rewritten)))
    }
}

/// A staged program with constraints on some of its addresses.
#[derive(Debug, Clone)]
pub struct ConstrainedFn {
    program: Program,
    constraint: ChoiceMap,
}

impl ReflectiveMeasure for ConstrainedFn {
    fn name(&self) -> String {
        format!("{}|constrained", self.program.name())
    }

    fn program(&self) -> &Program {
        &self.program
    }

    fn constraint(&self) -> ChoiceMap {
        self.constraint.clone()
    }

    fn generate(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<(Trace, Slot)> {
        let graph = self.program.graph(&slot_avals(&args))?;
        let handler = Handler::generate(self.constraint.clone());
        let (retval, handler) = ctx.with_handler(handler, |ctx| run_graph(ctx, &graph, args.clone()))?;
        let rec = handler.finish();
        let trace = Trace::new(
            self.program.clone(),
            args,
            TraceBody::Map(rec.subtraces),
            retval,
            rec.score,
        );
        Ok((trace, rec.weight))
    }

    fn lower_enum(&self, s: &mut Stager, args: &[Atom]) -> Result<(ChoiceTree<Atom>, Vec<Atom>)> {
        let mut avals = Vec::with_capacity(args.len());
        for arg in args {
            avals.push(s.aval(arg)?);
        }
        let graph = self.program.graph(&avals)?;
        lower_graph(s, &graph, &self.constraint, args)
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        let constrained: Vec<_> = self.constraint.leaves().into_iter().map(|(a, _)| a).collect();
        Ok(self.program.trace_type(args)?.without(&constrained))
    }
}
