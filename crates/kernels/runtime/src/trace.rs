//! Execution traces.
//!
//! A [`Trace`] records one execution of a program: its arguments, its
//! random choices (a leaf for a distribution, a map of sub-traces for a
//! composite program), its return values and its score, the negative log
//! density of the recorded choices.

use std::fmt;

use indexmap::IndexMap;
use stoch_foundation::{Address, Slot, Value};

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gfi::{Measure, Program, Update};
use crate::selection::Selection;

/// Recorded choices of one execution.
#[derive(Debug, Clone)]
pub enum TraceBody {
    /// The program is itself one choice.
    Leaf(Slot),
    /// Sub-traces by call-site address, in execution order.
    Map(IndexMap<String, Trace>),
}

/// One execution of a program.
#[derive(Clone)]
pub struct Trace {
    program: Program,
    args: Vec<Slot>,
    body: TraceBody,
    retval: Vec<Slot>,
    score: Slot,
}

impl Trace {
    pub fn new(program: Program, args: Vec<Slot>, body: TraceBody, retval: Vec<Slot>, score: Slot) -> Self {
        Self {
            program,
            args,
            body,
            retval,
            score,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn args(&self) -> &[Slot] {
        &self.args
    }

    pub fn body(&self) -> &TraceBody {
        &self.body
    }

    pub fn retval(&self) -> &[Slot] {
        &self.retval
    }

    /// Return values as plain arrays; lane slots keep their lane axis.
    pub fn retval_values(&self) -> Vec<Value> {
        self.retval.iter().map(|s| s.value().clone()).collect()
    }

    /// Score, one entry per lane in a vectorised execution.
    pub fn score_slot(&self) -> &Slot {
        &self.score
    }

    /// Negative log density of the recorded choices, summed over any lanes.
    pub fn score(&self) -> f64 {
        self.score.total()
    }

    /// Sub-trace at `addr`; `/`-separated addresses walk several levels.
    pub fn subtrace(&self, addr: &str) -> Option<&Trace> {
        let mut trace = self;
        for segment in Address::parse(addr).segments() {
            match &trace.body {
                TraceBody::Map(subtraces) => trace = subtraces.get(segment)?,
                TraceBody::Leaf(_) => return None,
            }
        }
        Some(trace)
    }

    /// All recorded choices.
    pub fn choices(&self) -> ChoiceMap {
        match &self.body {
            TraceBody::Leaf(v) => ChoiceTree::Leaf(v.clone()),
            TraceBody::Map(subtraces) => {
                let mut map = ChoiceMap::empty();
                for (addr, sub) in subtraces {
                    let choices = sub.choices();
                    if !choices.is_empty() {
                        map.insert(addr.clone(), choices);
                    }
                }
                map
            }
        }
    }

    /// Value of the choice at `addr`.
    pub fn value(&self, addr: &str) -> Option<Value> {
        match &self.subtrace(addr)?.body {
            TraceBody::Leaf(v) => Some(v.value().clone()),
            TraceBody::Map(_) => None,
        }
    }

    pub fn filter(&self, selection: &Selection) -> ChoiceMap {
        self.choices().filter(selection)
    }

    /// Move this trace to new arguments and choices.
    pub fn update(&self, ctx: &mut Context, args: &[Value], choices: &ChoiceMap) -> Result<Update> {
        self.program.update(ctx, self, args, choices)
    }

    /// Markov blanket measure of the choices in `selection`.
    pub fn blanket(&self, selection: &Selection) -> Result<Measure> {
        let flows = vec![false; self.args.len()];
        self.program.blanket(&flows, self, selection)
    }

    /// Same trace with `args` and every recorded slot passed through `f`.
    ///
    /// The score is left to the caller, as it does not follow the
    /// leaf layout.
    pub(crate) fn map_slots(&self, args: Vec<Slot>, f: &mut impl FnMut(&Slot) -> Result<Slot>) -> Result<Trace> {
        let body = match &self.body {
            TraceBody::Leaf(v) => TraceBody::Leaf(f(v)?),
            TraceBody::Map(subtraces) => {
                let mut out = IndexMap::with_capacity(subtraces.len());
                for (addr, sub) in subtraces {
                    let sub_args = sub.args.iter().map(&mut *f).collect::<Result<_>>()?;
                    let mut mapped = sub.map_slots(sub_args, f)?;
                    mapped.score = f(&sub.score)?;
                    out.insert(addr.clone(), mapped);
                }
                TraceBody::Map(out)
            }
        };
        Ok(Trace {
            program: self.program.clone(),
            args,
            body,
            retval: self.retval.iter().map(&mut *f).collect::<Result<_>>()?,
            score: self.score.clone(),
        })
    }

    /// Lane-wise choice between two executions of one call site: lanes where
    /// `mask` holds come from `on_true`, the rest from `on_false`.
    ///
    /// Both traces must come from the same program and record the same
    /// addresses.
    pub(crate) fn select_lanes(mask: &Slot, on_true: &Trace, on_false: &Trace) -> Result<Trace> {
        let mismatch = |expected: String, found: String| Error::TypeMismatch {
            address: String::new(),
            expected,
            found,
        };
        if on_true.program.name() != on_false.program.name() {
            return Err(mismatch(on_false.program.name(), on_true.program.name()));
        }
        let pick = |a: &Slot, b: &Slot| -> Result<Slot> { Ok(Slot::select(mask, a, b)?) };
        let pick_all = |a: &[Slot], b: &[Slot]| -> Result<Vec<Slot>> {
            if a.len() != b.len() {
                return Err(mismatch(format!("{} values", b.len()), format!("{} values", a.len())));
            }
            a.iter().zip(b).map(|(x, y)| pick(x, y)).collect()
        };
        let body = match (&on_true.body, &on_false.body) {
            (TraceBody::Leaf(a), TraceBody::Leaf(b)) => TraceBody::Leaf(pick(a, b)?),
            (TraceBody::Map(a), TraceBody::Map(b)) => {
                if a.len() != b.len() || a.keys().any(|k| !b.contains_key(k)) {
                    let keys = |m: &IndexMap<String, Trace>| m.keys().cloned().collect::<Vec<_>>().join(", ");
                    return Err(mismatch(format!("{{{}}}", keys(b)), format!("{{{}}}", keys(a))));
                }
                let mut out = IndexMap::with_capacity(a.len());
                for (addr, sub) in a {
                    let other = &b[addr];
                    out.insert(
                        addr.clone(),
                        Trace::select_lanes(mask, sub, other).map_err(|e| e.under(addr))?,
                    );
                }
                TraceBody::Map(out)
            }
            _ => return Err(mismatch("the same trace layout".to_string(), "a leaf and a map".to_string())),
        };
        Ok(Trace {
            program: on_true.program.clone(),
            args: pick_all(&on_true.args, &on_false.args)?,
            body,
            retval: pick_all(&on_true.retval, &on_false.retval)?,
            score: pick(&on_true.score, &on_false.score)?,
        })
    }

    pub(crate) fn with_program(mut self, program: Program) -> Trace {
        self.program = program;
        self
    }

    pub(crate) fn with_score(mut self, score: Slot) -> Trace {
        self.score = score;
        self
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("program", &self.program.name())
            .field("body", &self.body)
            .field("retval", &self.retval)
            .field("score", &self.score)
            .finish()
    }
}
