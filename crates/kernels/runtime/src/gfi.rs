//! Generative function interface.
//!
//! [`GenerativeFunction`] is implemented by every program kind: primitive
//! distributions, staged host closures, vectorised programs and marginals.
//! [`ReflectiveMeasure`] is implemented by what `project` returns: a
//! program paired with constraints on some of its choices, which can
//! `generate` traces and lower itself for exact enumeration.
//!
//! Both traits work on [`Slot`]s so that the same implementation serves a
//! plain call and a vectorised one; the lane count is read from the
//! [`Context`]. The [`Program`] and [`Measure`] handles add the value-level
//! entry points.
//!
//! Scores and weights follow one convention:
//!
//! ```text
//! trace.score          = -log p(choices)
//! assess weight        =  log p(choices)
//! update weight        =  log p(new choices) - log p(old choices)
//! generate weight      =  log p(constrained choices | unconstrained choices)
//! ```

use std::fmt;
use std::sync::Arc;

use stoch_foundation::{Slot, Value};
use stoch_ir::{Atom, Aval, Graph, Stager};
use tracing::instrument;

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::interpret::eliminate::eliminate_measure;
use crate::interpret::enumerate::{enumerate_measure, Enumeration};
use crate::programs::{DistributionProgram, VmapProgram};
use crate::reflect::blanket::BlanketFlags;
use crate::reflect::trace_type::TraceType;
use crate::selection::Selection;
use crate::trace::Trace;

/// Aval seen by one lane of a slot.
pub(crate) fn slot_aval(slot: &Slot) -> Aval {
    Aval::new(slot.dtype(), slot.lane_shape())
}

pub(crate) fn slot_avals(slots: &[Slot]) -> Vec<Aval> {
    slots.iter().map(slot_aval).collect()
}

pub(crate) fn uniform_slots(values: &[Value]) -> Vec<Slot> {
    values.iter().cloned().map(Slot::Uniform).collect()
}

/// Result of an `update`.
#[derive(Debug, Clone)]
pub struct Update {
    pub trace: Trace,
    pub weight: Slot,
    /// Old values of the choices that were replaced or dropped.
    pub discarded: ChoiceMap,
}

impl Update {
    /// Weight summed over any lanes.
    pub fn weight(&self) -> f64 {
        self.weight.total()
    }
}

/// A program kind.
pub trait GenerativeFunction: Send + Sync {
    fn name(&self) -> String;

    fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>>;

    /// Sample a full trace. `this` is the handle the trace will refer to.
    fn simulate(&self, ctx: &mut Context, this: &Program, args: Vec<Slot>) -> Result<Trace>;

    /// Log density of fully specified choices, with the return values.
    fn assess(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)>;

    /// Move `trace` to new arguments and choices.
    fn update(
        &self,
        ctx: &mut Context,
        this: &Program,
        trace: &Trace,
        args: Vec<Slot>,
        choices: &ChoiceMap,
    ) -> Result<Update>;

    /// Pair the program with constraints on its choices.
    fn project(&self, this: &Program, constraint: ChoiceMap) -> Result<Measure>;

    /// Swap the distributions at selected addresses for their discretisations.
    fn discretize(&self, _this: &Program, _selection: &Selection) -> Result<Program> {
        Err(Error::Unsupported(format!("discretize of {}", self.name())))
    }

    /// Every address the program can record.
    fn selection(&self, args: &[Aval]) -> Result<Selection>;

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType>;

    /// Staged graph for arguments of the given avals.
    fn graph(&self, _args: &[Aval]) -> Result<Arc<Graph>> {
        Err(Error::Unsupported(format!("{} has no staged graph", self.name())))
    }

    /// First blanket pass: which sites the selection reaches.
    fn blanket_flags(&self, _trace: &Trace, _in_flows: &[bool], _selection: &Selection) -> Result<BlanketFlags> {
        Err(Error::Unsupported(format!("blanket of {}", self.name())))
    }

    /// Second blanket pass: the program restricted to retained sites.
    fn blanket_rewrite(&self, _this: &Program, _trace: &Trace, _flags: &BlanketFlags) -> Result<Program> {
        Err(Error::Unsupported(format!("blanket of {}", self.name())))
    }

    fn as_distribution(&self) -> Option<&Dist> {
        None
    }
}

/// Shared handle to a program.
#[derive(Clone)]
pub struct Program(Arc<dyn GenerativeFunction>);

impl Program {
    pub fn new(program: impl GenerativeFunction + 'static) -> Self {
        Self(Arc::new(program))
    }

    /// A distribution as a one-choice program.
    pub fn distribution(dist: Dist) -> Self {
        Self::new(DistributionProgram::new(dist))
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>> {
        self.0.output_avals(args)
    }

    pub fn graph(&self, args: &[Aval]) -> Result<Arc<Graph>> {
        self.0.graph(args)
    }

    pub fn as_distribution(&self) -> Option<&Dist> {
        self.0.as_distribution()
    }

    pub(crate) fn inner(&self) -> &dyn GenerativeFunction {
        self.0.as_ref()
    }

    /// Same program object.
    pub fn same(&self, other: &Program) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[instrument(level = "debug", skip_all, fields(program = %self.name()))]
    pub fn simulate(&self, ctx: &mut Context, args: &[Value]) -> Result<Trace> {
        self.simulate_slots(ctx, uniform_slots(args))
    }

    /// Return values of one simulated execution.
    pub fn call(&self, ctx: &mut Context, args: &[Value]) -> Result<Vec<Value>> {
        Ok(self.simulate(ctx, args)?.retval_values())
    }

    /// Log density of `choices` and the return values they produce.
    #[instrument(level = "debug", skip_all, fields(program = %self.name()))]
    pub fn assess(&self, ctx: &mut Context, args: &[Value], choices: &ChoiceMap) -> Result<(f64, Vec<Value>)> {
        let (weight, retval) = self.assess_slots(ctx, uniform_slots(args), choices)?;
        Ok((weight.total(), retval.into_iter().map(Slot::into_value).collect()))
    }

    #[instrument(level = "debug", skip_all, fields(program = %self.name()))]
    pub fn update(&self, ctx: &mut Context, trace: &Trace, args: &[Value], choices: &ChoiceMap) -> Result<Update> {
        self.update_slots(ctx, trace, uniform_slots(args), choices)
    }

    /// Trace consistent with `constraint` and its importance weight.
    #[instrument(level = "debug", skip_all, fields(program = %self.name()))]
    pub fn generate(&self, ctx: &mut Context, args: &[Value], constraint: &ChoiceMap) -> Result<(Trace, f64)> {
        let (trace, weight) = self.generate_slots(ctx, uniform_slots(args), constraint)?;
        Ok((trace, weight.total()))
    }

    pub fn project(&self, constraint: ChoiceMap) -> Result<Measure> {
        self.0.project(self, constraint)
    }

    /// Discretised program, staged eagerly against `args`.
    pub fn discretize(&self, args: &[Value], selection: &Selection) -> Result<Program> {
        let program = self.discretize_with(selection)?;
        let avals: Vec<Aval> = args.iter().map(Aval::of).collect();
        program.output_avals(&avals)?;
        Ok(program)
    }

    pub(crate) fn discretize_with(&self, selection: &Selection) -> Result<Program> {
        self.0.discretize(self, selection)
    }

    pub fn selection(&self, args: &[Aval]) -> Result<Selection> {
        self.0.selection(args)
    }

    pub fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        self.0.trace_type(args)
    }

    pub fn filter(&self, choices: &ChoiceMap, selection: &Selection) -> ChoiceMap {
        choices.filter(selection)
    }

    /// Measure over the selected choices and everything they influence,
    /// with the rest of `trace` held fixed.
    ///
    /// `flows` marks arguments that already depend on the selection.
    pub fn blanket(&self, flows: &[bool], trace: &Trace, selection: &Selection) -> Result<Measure> {
        let flags = self.0.blanket_flags(trace, flows, selection)?;
        let program = self.0.blanket_rewrite(self, trace, &flags)?;
        let keep = program.selection(&slot_avals(trace.args()))?;
        let constraint = trace.filter(&(!selection.clone() & keep));
        tracing::debug!(
            program = %self.name(),
            constrained = constraint.leaves().len(),
            "blanket"
        );
        program.project(constraint)
    }

    /// Vectorise over `in_axes` of the arguments.
    pub fn vmap(&self, in_axes: Vec<Option<usize>>, axis_size: Option<usize>) -> Program {
        Program::new(VmapProgram::new(self.clone(), Some(in_axes), axis_size))
    }

    /// `n` independent executions on shared arguments.
    pub fn repeat(&self, n: usize) -> Program {
        Program::new(VmapProgram::new(self.clone(), None, Some(n)))
    }

    /// Exact joint over every choice.
    pub fn enumerate(&self, ctx: &mut Context, args: &[Value]) -> Result<Enumeration> {
        self.project(ChoiceMap::empty())?.enumerate(ctx, args)
    }

    pub fn simulate_slots(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<Trace> {
        self.0.simulate(ctx, self, args)
    }

    pub fn assess_slots(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)> {
        self.0.assess(ctx, args, choices)
    }

    pub fn update_slots(&self, ctx: &mut Context, trace: &Trace, args: Vec<Slot>, choices: &ChoiceMap) -> Result<Update> {
        self.0.update(ctx, self, trace, args, choices)
    }

    pub fn generate_slots(&self, ctx: &mut Context, args: Vec<Slot>, constraint: &ChoiceMap) -> Result<(Trace, Slot)> {
        self.project(constraint.clone())?.generate_slots(ctx, args)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Program({})", self.name())
    }
}

/// A program with constraints on some of its choices.
pub trait ReflectiveMeasure: Send + Sync {
    fn name(&self) -> String;

    /// The unconstrained program.
    fn program(&self) -> &Program;

    fn constraint(&self) -> ChoiceMap;

    /// Trace agreeing with the constraint, and its importance weight.
    fn generate(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<(Trace, Slot)>;

    /// Stage the measure as sampling and scoring nodes only.
    ///
    /// Returns the unconstrained choices as atoms, in the layout of the
    /// choice map they form, and the return values.
    fn lower_enum(&self, s: &mut Stager, args: &[Atom]) -> Result<(ChoiceTree<Atom>, Vec<Atom>)>;

    fn discretize(&self, selection: &Selection) -> Result<Measure> {
        self.program()
            .discretize_with(selection)?
            .project(self.constraint())
    }

    /// Add constraints. Existing constraints win over new ones.
    fn project(&self, constraint: ChoiceMap) -> Result<Measure> {
        self.program().project(self.constraint().merge(&constraint))
    }

    fn filter(&self, selection: &Selection) -> ChoiceMap {
        self.constraint().filter(selection)
    }

    fn selection(&self, args: &[Aval]) -> Result<Selection> {
        self.program().selection(args)
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        self.program().trace_type(args)
    }
}

/// Shared handle to a measure.
#[derive(Clone)]
pub struct Measure(Arc<dyn ReflectiveMeasure>);

impl Measure {
    pub fn new(measure: impl ReflectiveMeasure + 'static) -> Self {
        Self(Arc::new(measure))
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn program(&self) -> &Program {
        self.0.program()
    }

    pub fn constraint(&self) -> ChoiceMap {
        self.0.constraint()
    }

    #[instrument(level = "debug", skip_all, fields(measure = %self.name()))]
    pub fn generate(&self, ctx: &mut Context, args: &[Value]) -> Result<(Trace, f64)> {
        let (trace, weight) = self.generate_slots(ctx, uniform_slots(args))?;
        Ok((trace, weight.total()))
    }

    pub fn generate_slots(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<(Trace, Slot)> {
        self.0.generate(ctx, args)
    }

    pub fn lower_enum(&self, s: &mut Stager, args: &[Atom]) -> Result<(ChoiceTree<Atom>, Vec<Atom>)> {
        self.0.lower_enum(s, args)
    }

    pub fn discretize(&self, selection: &Selection) -> Result<Measure> {
        self.0.discretize(selection)
    }

    pub fn project(&self, constraint: ChoiceMap) -> Result<Measure> {
        self.0.project(constraint)
    }

    pub fn filter(&self, selection: &Selection) -> ChoiceMap {
        self.0.filter(selection)
    }

    pub fn selection(&self, args: &[Aval]) -> Result<Selection> {
        self.0.selection(args)
    }

    pub fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        self.0.trace_type(args)
    }

    /// Every joint assignment of the unconstrained choices with its log weight.
    pub fn enumerate(&self, ctx: &mut Context, args: &[Value]) -> Result<Enumeration> {
        enumerate_measure(ctx, self, args)
    }

    /// Same result as [`Measure::enumerate`], computed by tagged broadcasting.
    pub fn eliminate(&self, ctx: &mut Context, args: &[Value]) -> Result<Enumeration> {
        eliminate_measure(ctx, self, args)
    }
}

impl fmt::Debug for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measure({})", self.name())
    }
}
