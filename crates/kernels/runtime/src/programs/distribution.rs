//! Distributions as one-choice programs.

use stoch_foundation::{Slot, UnaryOp, Value};
use stoch_ir::{Atom, Aval, Stager};

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::distributions::Dist;
use crate::error::{Error, Result};
use crate::gfi::{slot_aval, slot_avals, GenerativeFunction, Measure, Program, ReflectiveMeasure, Update};
use crate::interpret::eval::{live_log_density, sample_slot};
use crate::ops::ProbabilisticStager;
use crate::reflect::blanket::BlanketFlags;
use crate::reflect::trace_type::{Support, TraceType};
use crate::selection::Selection;
use crate::trace::{Trace, TraceBody};

/// A distribution whose trace is a single leaf.
#[derive(Debug, Clone)]
pub struct DistributionProgram {
    dist: Dist,
}

impl DistributionProgram {
    pub fn new(dist: Dist) -> Self {
        Self { dist }
    }

    pub fn dist(&self) -> &Dist {
        &self.dist
    }

    /// The supplied choice must have the event's dtype and per-lane shape.
    fn check_choice(&self, args: &[Slot], value: &Slot) -> Result<()> {
        let expected = self.dist.event_aval(&slot_avals(args))?;
        let found = slot_aval(value);
        if expected != found {
            return Err(Error::TypeMismatch {
                address: String::new(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn leaf_choice<'a>(&self, choices: &'a ChoiceMap) -> Result<Option<&'a Slot>> {
        match choices {
            ChoiceTree::Leaf(v) => Ok(Some(v)),
            ChoiceTree::Node(entries) => match entries.keys().next() {
                None => Ok(None),
                Some(key) => Err(Error::AddressNotFound { address: key.clone() }),
            },
        }
    }
}

fn negate(slot: &Slot) -> Slot {
    slot.unary(UnaryOp::Neg)
}

fn zero() -> Slot {
    Slot::Uniform(Value::f64(0.0))
}

impl GenerativeFunction for DistributionProgram {
    fn name(&self) -> String {
        self.dist.name().to_string()
    }

    fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>> {
        Ok(vec![self.dist.event_aval(args)?])
    }

    fn simulate(&self, ctx: &mut Context, this: &Program, args: Vec<Slot>) -> Result<Trace> {
        let value = sample_slot(ctx, &self.dist, &args, false, self.dist.name())?;
        let lp = live_log_density(ctx, &self.dist, &value, &args)?;
        Ok(Trace::new(
            this.clone(),
            args,
            TraceBody::Leaf(value.clone()),
            vec![value],
            negate(&lp),
        ))
    }

    fn assess(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)> {
        let value = self.leaf_choice(choices)?.ok_or_else(|| Error::AddressNotFound {
            address: String::new(),
        })?;
        self.check_choice(&args, value)?;
        let lp = live_log_density(ctx, &self.dist, value, &args)?;
        Ok((lp, vec![value.clone()]))
    }

    fn update(
        &self,
        ctx: &mut Context,
        this: &Program,
        trace: &Trace,
        args: Vec<Slot>,
        choices: &ChoiceMap,
    ) -> Result<Update> {
        let TraceBody::Leaf(old) = trace.body() else {
            return Err(Error::Internal(format!("{} trace without a leaf", self.dist.name())));
        };
        let (value, discarded) = match self.leaf_choice(choices)? {
            Some(new) => {
                self.check_choice(&args, new)?;
                (new.clone(), ChoiceTree::Leaf(old.clone()))
            }
            None => (old.clone(), ChoiceMap::empty()),
        };
        let lp = live_log_density(ctx, &self.dist, &value, &args)?;
        let weight = lp.add(trace.score_slot())?;
        let trace = Trace::new(this.clone(), args, TraceBody::Leaf(value.clone()), vec![value], negate(&lp));
        Ok(Update {
            trace,
            weight,
            discarded,
        })
    }

    fn project(&self, this: &Program, constraint: ChoiceMap) -> Result<Measure> {
        let value = self.leaf_choice(&constraint)?.cloned();
        Ok(Measure::new(ConstrainedLeaf::new(this.clone(), value)))
    }

    fn discretize(&self, this: &Program, selection: &Selection) -> Result<Program> {
        if !selection.matches_root() {
            return Ok(this.clone());
        }
        match self.dist.discretization() {
            Some(grid) => Ok(Program::distribution(grid)),
            None => Err(Error::SelectionMismatch {
                address: String::new(),
                message: format!("{} has no discretization", self.dist.name()),
            }),
        }
    }

    fn selection(&self, _args: &[Aval]) -> Result<Selection> {
        Ok(Selection::All)
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        let support = match self.dist.support_size(args) {
            Some(n) => Support::Finite(n),
            None => Support::Real,
        };
        Ok(TraceType::shaped(&self.dist.event_aval(args)?, support))
    }

    fn blanket_flags(&self, _trace: &Trace, in_flows: &[bool], selection: &Selection) -> Result<BlanketFlags> {
        let flags = if selection.matches_root() {
            BlanketFlags {
                retain: true,
                tagged: true,
                out_flows: vec![true],
                ..BlanketFlags::default()
            }
        } else if in_flows.iter().any(|f| *f) {
            // Scored against the new value of its arguments, but its own
            // value stays fixed.
            BlanketFlags {
                retain: true,
                tagged: false,
                out_flows: vec![false],
                ..BlanketFlags::default()
            }
        } else {
            BlanketFlags::dropped(1)
        };
        Ok(flags)
    }

    fn blanket_rewrite(&self, this: &Program, _trace: &Trace, _flags: &BlanketFlags) -> Result<Program> {
        Ok(this.clone())
    }

    fn as_distribution(&self) -> Option<&Dist> {
        Some(&self.dist)
    }
}

/// A one-choice program with its choice fixed, or free when `value` is
/// `None`.
#[derive(Debug, Clone)]
pub struct ConstrainedLeaf {
    program: Program,
    value: Option<Slot>,
}

impl ConstrainedLeaf {
    pub(crate) fn new(program: Program, value: Option<Slot>) -> Self {
        Self { program, value }
    }
}

impl ReflectiveMeasure for ConstrainedLeaf {
    fn name(&self) -> String {
        match self.value {
            Some(_) => format!("{}|constrained", self.program.name()),
            None => self.program.name(),
        }
    }

    fn program(&self) -> &Program {
        &self.program
    }

    fn constraint(&self) -> ChoiceMap {
        self.value.clone().map(ChoiceTree::Leaf).unwrap_or_default()
    }

    fn generate(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<(Trace, Slot)> {
        match &self.value {
            None => Ok((self.program.simulate_slots(ctx, args)?, zero())),
            Some(value) => {
                let (weight, retval) = self
                    .program
                    .assess_slots(ctx, args.clone(), &ChoiceTree::Leaf(value.clone()))?;
                let trace = Trace::new(
                    self.program.clone(),
                    args,
                    TraceBody::Leaf(value.clone()),
                    retval,
                    negate(&weight),
                );
                Ok((trace, weight))
            }
        }
    }

    fn lower_enum(&self, s: &mut Stager, args: &[Atom]) -> Result<(ChoiceTree<Atom>, Vec<Atom>)> {
        let dist = self.program.as_distribution().ok_or_else(|| Error::NotEnumerable {
            site: self.program.name(),
            reason: "not a primitive distribution".to_string(),
        })?;
        match &self.value {
            None => {
                let x = s.sample(dist, args)?;
                Ok((ChoiceTree::Leaf(x.clone()), vec![x]))
            }
            Some(Slot::Uniform(value)) => {
                let x = s.constant(value.clone());
                s.observe(dist, &x, args)?;
                Ok((ChoiceTree::empty(), vec![x]))
            }
            Some(Slot::Lanes(_)) => Err(Error::Unsupported(format!(
                "enumerating {} under a per-lane constraint",
                dist.name()
            ))),
        }
    }
}
