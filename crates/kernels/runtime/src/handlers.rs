//! Effect handlers for trace and observe nodes.
//!
//! A composite program runs its graph under one handler installed on the
//! [`Context`]. The core interpreter hands every trace node and every
//! observed log density to the innermost handler, which decides what the
//! call means: record a fresh sub-trace, score given choices, move an old
//! sub-trace, or generate under constraints.
//!
//! Under a lane mask every contribution to a score or weight is zeroed in
//! the lanes that are not live. Two branches of a lane-varying cond may
//! call the same address from disjoint lanes; their sub-traces are merged
//! lane by lane.

use indexmap::IndexMap;
use stoch_foundation::{BinaryOp, Slot, Value};
use tracing::trace;

use crate::choices::ChoiceMap;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gfi::Program;
use crate::trace::Trace;

fn zero() -> Slot {
    Slot::Uniform(Value::f64(0.0))
}

fn sub(a: &Slot, b: &Slot) -> Result<Slot> {
    Ok(Slot::binary(BinaryOp::Sub, a, b)?)
}

/// Lanes that have called each address so far.
#[derive(Debug, Default)]
pub(crate) struct Visits(IndexMap<String, Option<Slot>>);

/// How a call site relates to earlier calls of the same address.
enum Visit {
    First,
    /// Called before from other lanes; holds the lanes of this call.
    Rejoin(Slot),
}

impl Visits {
    /// Record a call of `addr` by the live lanes of `ctx`.
    ///
    /// A second call is allowed only when neither call saw every lane and
    /// no lane made both.
    fn claim(&mut self, ctx: &Context, addr: &str) -> Result<Visit> {
        let mask = ctx.mask().cloned();
        let Some(seen) = self.0.get_mut(addr) else {
            self.0.insert(addr.to_string(), mask);
            return Ok(Visit::First);
        };
        if let (Some(before), Some(now)) = (seen.as_ref(), mask) {
            if Slot::binary(BinaryOp::And, before, &now)?.total() == 0.0 {
                let union = Slot::binary(BinaryOp::Or, before, &now)?;
                *seen = Some(union);
                return Ok(Visit::Rejoin(now));
            }
        }
        Err(Error::DuplicateAddress(addr.to_string()))
    }
}

/// Store `fresh` at `addr`, merging lane-wise with an earlier call.
fn record(subtraces: &mut IndexMap<String, Trace>, addr: &str, visit: Visit, fresh: Trace) -> Result<()> {
    let merged = match (visit, subtraces.get(addr)) {
        (Visit::Rejoin(lanes), Some(earlier)) => {
            Trace::select_lanes(&lanes, &fresh, earlier).map_err(|e| e.under(addr))?
        }
        _ => fresh,
    };
    subtraces.insert(addr.to_string(), merged);
    Ok(())
}

/// Meaning of trace and observe nodes for one program execution.
#[derive(Debug)]
pub(crate) enum Handler {
    /// Sample every sub-program and record its trace.
    Simulate {
        score: Slot,
        subtraces: IndexMap<String, Trace>,
        visits: Visits,
    },
    /// Score the sub-choices of a complete choice map.
    Assess {
        choices: ChoiceMap,
        weight: Slot,
        visits: Visits,
    },
    /// Move the sub-traces of an old trace to new arguments and choices.
    Update {
        old: IndexMap<String, Trace>,
        choices: ChoiceMap,
        weight: Slot,
        score: Slot,
        subtraces: IndexMap<String, Trace>,
        discarded: ChoiceMap,
        visits: Visits,
    },
    /// Project every sub-program onto its constraints and generate.
    Generate {
        constraint: ChoiceMap,
        weight: Slot,
        score: Slot,
        subtraces: IndexMap<String, Trace>,
        visits: Visits,
    },
    /// Sum observed log densities; sub-programs are simulated and dropped.
    Collect { score: Slot },
}

impl Handler {
    pub(crate) fn simulate() -> Self {
        Handler::Simulate {
            score: zero(),
            subtraces: IndexMap::new(),
            visits: Visits::default(),
        }
    }

    pub(crate) fn assess(choices: ChoiceMap) -> Self {
        Handler::Assess {
            choices,
            weight: zero(),
            visits: Visits::default(),
        }
    }

    /// `weight` starts at the old score, so that it ends as
    /// `log p(new) - log p(old)`.
    pub(crate) fn update(old: &Trace, choices: ChoiceMap) -> Self {
        let old_subtraces = match old.body() {
            crate::trace::TraceBody::Map(subtraces) => subtraces.clone(),
            crate::trace::TraceBody::Leaf(_) => IndexMap::new(),
        };
        Handler::Update {
            old: old_subtraces,
            choices,
            weight: old.score_slot().clone(),
            score: zero(),
            subtraces: IndexMap::new(),
            discarded: ChoiceMap::empty(),
            visits: Visits::default(),
        }
    }

    pub(crate) fn generate(constraint: ChoiceMap) -> Self {
        Handler::Generate {
            constraint,
            weight: zero(),
            score: zero(),
            subtraces: IndexMap::new(),
            visits: Visits::default(),
        }
    }

    pub(crate) fn collect() -> Self {
        Handler::Collect { score: zero() }
    }

    /// Handle a call of `callee` at `addr`.
    pub(crate) fn trace(
        &mut self,
        ctx: &mut Context,
        addr: &str,
        callee: &Program,
        args: Vec<Slot>,
    ) -> Result<Vec<Slot>> {
        trace!(%addr, callee = %callee.name(), "trace site");
        match self {
            Handler::Simulate {
                score,
                subtraces,
                visits,
            } => {
                let visit = visits.claim(ctx, addr)?;
                let sub_trace = callee.simulate_slots(ctx, args).map_err(|e| e.under(addr))?;
                let own = ctx.masked(sub_trace.score_slot())?;
                *score = score.add(&own)?;
                let retval = sub_trace.retval().to_vec();
                record(subtraces, addr, visit, sub_trace.with_score(own))?;
                Ok(retval)
            }
            Handler::Assess {
                choices,
                weight,
                visits,
            } => {
                visits.claim(ctx, addr)?;
                let sub_choices = choices.get(addr).ok_or_else(|| Error::AddressNotFound {
                    address: addr.to_string(),
                })?;
                let (w, retval) = callee
                    .assess_slots(ctx, args, sub_choices)
                    .map_err(|e| e.under(addr))?;
                *weight = weight.add(&ctx.masked(&w)?)?;
                Ok(retval)
            }
            Handler::Update {
                old,
                choices,
                weight,
                score,
                subtraces,
                discarded,
                visits,
            } => {
                let visit = visits.claim(ctx, addr)?;
                let new_choices = choices.get(addr).cloned().unwrap_or_default();
                let sub_trace = match old.get(addr) {
                    Some(prev) => {
                        let up = callee
                            .update_slots(ctx, prev, args, &new_choices)
                            .map_err(|e| e.under(addr))?;
                        *weight = weight.add(&ctx.masked(&sub(&up.weight, prev.score_slot())?)?)?;
                        if !up.discarded.is_empty() {
                            let merged = match (&visit, discarded.get(addr)) {
                                (Visit::Rejoin(lanes), Some(earlier)) => {
                                    ChoiceMap::select_lanes(lanes, &up.discarded, earlier)?
                                }
                                _ => up.discarded,
                            };
                            discarded.insert(addr, merged);
                        }
                        up.trace
                    }
                    None if new_choices.is_empty() => {
                        return Err(Error::AddressNotFound {
                            address: addr.to_string(),
                        })
                    }
                    None => {
                        let (fresh, w) = callee
                            .generate_slots(ctx, args, &new_choices)
                            .map_err(|e| e.under(addr))?;
                        *weight = weight.add(&ctx.masked(&w)?)?;
                        fresh
                    }
                };
                let own = ctx.masked(sub_trace.score_slot())?;
                *score = score.add(&own)?;
                let retval = sub_trace.retval().to_vec();
                record(subtraces, addr, visit, sub_trace.with_score(own))?;
                Ok(retval)
            }
            Handler::Generate {
                constraint,
                weight,
                score,
                subtraces,
                visits,
            } => {
                let visit = visits.claim(ctx, addr)?;
                let sub_constraint = constraint.get(addr).cloned().unwrap_or_default();
                let (sub_trace, w) = callee
                    .project(sub_constraint)
                    .and_then(|m| m.generate_slots(ctx, args))
                    .map_err(|e| e.under(addr))?;
                *weight = weight.add(&ctx.masked(&w)?)?;
                let own = ctx.masked(sub_trace.score_slot())?;
                *score = score.add(&own)?;
                let retval = sub_trace.retval().to_vec();
                record(subtraces, addr, visit, sub_trace.with_score(own))?;
                Ok(retval)
            }
            Handler::Collect { .. } => Ok(callee.simulate_slots(ctx, args)?.retval().to_vec()),
        }
    }

    /// Handle an observed log density, already masked to the live lanes.
    pub(crate) fn observe(&mut self, log_density: &Slot) -> Result<()> {
        match self {
            Handler::Simulate { score, .. } => *score = sub(score, log_density)?,
            Handler::Assess { weight, .. } => *weight = weight.add(log_density)?,
            Handler::Update { weight, score, .. } | Handler::Generate { weight, score, .. } => {
                *weight = weight.add(log_density)?;
                *score = sub(score, log_density)?;
            }
            Handler::Collect { score } => *score = score.add(log_density)?,
        }
        Ok(())
    }
}

/// What a composite execution recorded, once its handler is removed.
pub(crate) struct Recorded {
    pub subtraces: IndexMap<String, Trace>,
    pub score: Slot,
    pub weight: Slot,
    pub discarded: ChoiceMap,
}

impl Handler {
    pub(crate) fn finish(self) -> Recorded {
        match self {
            Handler::Simulate { score, subtraces, .. } => Recorded {
                subtraces,
                score,
                weight: zero(),
                discarded: ChoiceMap::empty(),
            },
            Handler::Assess { weight, .. } => Recorded {
                subtraces: IndexMap::new(),
                score: zero(),
                weight,
                discarded: ChoiceMap::empty(),
            },
            Handler::Update {
                old,
                weight,
                score,
                subtraces,
                mut discarded,
                ..
            } => {
                // Old sites the new execution never reached are dropped.
                for (addr, prev) in old {
                    if !subtraces.contains_key(&addr) {
                        let choices = prev.choices();
                        if !choices.is_empty() {
                            discarded.insert(addr, choices);
                        }
                    }
                }
                Recorded {
                    subtraces,
                    score,
                    weight,
                    discarded,
                }
            }
            Handler::Generate {
                weight,
                score,
                subtraces,
                ..
            } => Recorded {
                subtraces,
                score,
                weight,
                discarded: ChoiceMap::empty(),
            },
            Handler::Collect { score } => Recorded {
                subtraces: IndexMap::new(),
                score: zero(),
                weight: score,
                discarded: ChoiceMap::empty(),
            },
        }
    }
}
