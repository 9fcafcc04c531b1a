//! Marginals estimated by importance sampling.

use stoch_foundation::{Slot, UnaryOp, Value};
use stoch_ir::Aval;
use tracing::debug;

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::distributions::logsumexp;
use crate::error::{Error, Result};
use crate::gfi::{uniform_slots, GenerativeFunction, Measure, Program, Update};
use crate::programs::distribution::ConstrainedLeaf;
use crate::reflect::trace_type::TraceType;
use crate::selection::Selection;
use crate::trace::{Trace, TraceBody};

/// How the other addresses are integrated out.
#[derive(Debug, Clone)]
pub struct Importance {
    /// Proposes the other addresses from the program's arguments. The prior
    /// is used when absent.
    pub proposal: Option<Program>,
    pub particles: usize,
}

impl Importance {
    pub fn prior(particles: usize) -> Self {
        Self {
            proposal: None,
            particles,
        }
    }

    pub fn with_proposal(proposal: Program, particles: usize) -> Self {
        Self {
            proposal: Some(proposal),
            particles,
        }
    }
}

/// The choice at `address` of `program`, with every other choice
/// marginalised.
///
/// Its density is a self-normalised importance estimate, so `assess` and
/// the trace score are random.
#[derive(Debug, Clone)]
pub struct Marginal {
    program: Program,
    address: String,
    algorithm: Importance,
}

impl Marginal {
    pub fn new(program: Program, address: impl Into<String>, algorithm: Importance) -> Self {
        Self {
            program,
            address: address.into(),
            algorithm,
        }
    }

    fn require_uniform(&self, ctx: &Context) -> Result<()> {
        match ctx.lanes() {
            None => Ok(()),
            Some(_) => Err(Error::Unsupported(format!("vectorised {}", self.name()))),
        }
    }

    fn leaf<'a>(&self, choices: &'a ChoiceMap) -> Result<&'a Slot> {
        choices.leaf_value().ok_or_else(|| Error::AddressNotFound {
            address: String::new(),
        })
    }

    /// `log p(address = value)`, estimated with the configured particles.
    fn log_marginal(&self, ctx: &mut Context, args: &[Slot], value: &Slot) -> Result<Slot> {
        let particles = self.algorithm.particles.max(1);
        let constraint = ChoiceMap::empty().with(self.address.clone(), ChoiceTree::Leaf(value.clone()));
        let mut weights = Vec::with_capacity(particles);
        for _ in 0..particles {
            let w = match &self.algorithm.proposal {
                None => self.program.generate_slots(ctx, args.to_vec(), &constraint)?.1.total(),
                Some(proposal) => {
                    let q = proposal.simulate_slots(ctx, args.to_vec())?;
                    let joint = constraint.merge(&q.choices());
                    let (lp, _) = self.program.assess_slots(ctx, args.to_vec(), &joint)?;
                    lp.total() + q.score()
                }
            };
            weights.push(w);
        }
        let estimate = logsumexp(&weights) - (particles as f64).ln();
        debug!(address = %self.address, particles, estimate, "marginal estimate");
        Ok(Slot::Uniform(Value::f64(estimate)))
    }

    fn leaf_trace(&self, this: &Program, args: Vec<Slot>, value: Slot, log_p: &Slot) -> Trace {
        Trace::new(
            this.clone(),
            args,
            TraceBody::Leaf(value.clone()),
            vec![value],
            log_p.unary(UnaryOp::Neg),
        )
    }
}

impl GenerativeFunction for Marginal {
    fn name(&self) -> String {
        format!("marginal({}, {})", self.program.name(), self.address)
    }

    fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>> {
        match self.trace_type(args)? {
            TraceType::Shaped { dtype, shape, .. } => Ok(vec![Aval::new(dtype, shape)]),
            _ => Err(Error::Unsupported(format!(
                "{} is not a single choice of {}",
                self.address,
                self.program.name()
            ))),
        }
    }

    fn simulate(&self, ctx: &mut Context, this: &Program, args: Vec<Slot>) -> Result<Trace> {
        self.require_uniform(ctx)?;
        let full = self.program.simulate_slots(ctx, args.clone())?;
        let choices = full.choices();
        let value = choices
            .get(&self.address)
            .and_then(ChoiceTree::leaf_value)
            .cloned()
            .ok_or_else(|| Error::AddressNotFound {
                address: self.address.clone(),
            })?;
        let log_p = self.log_marginal(ctx, &args, &value)?;
        Ok(self.leaf_trace(this, args, value, &log_p))
    }

    fn assess(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)> {
        self.require_uniform(ctx)?;
        let value = self.leaf(choices)?.clone();
        let log_p = self.log_marginal(ctx, &args, &value)?;
        Ok((log_p, vec![value]))
    }

    fn update(
        &self,
        ctx: &mut Context,
        this: &Program,
        trace: &Trace,
        args: Vec<Slot>,
        choices: &ChoiceMap,
    ) -> Result<Update> {
        self.require_uniform(ctx)?;
        let TraceBody::Leaf(old) = trace.body() else {
            return Err(Error::Internal(format!("{} trace without a leaf", self.name())));
        };
        let (value, discarded) = match choices {
            ChoiceTree::Leaf(new) => (new.clone(), ChoiceTree::Leaf(old.clone())),
            other if other.is_empty() => (old.clone(), ChoiceMap::empty()),
            _ => {
                return Err(Error::AddressNotFound {
                    address: self.address.clone(),
                })
            }
        };
        let log_p = self.log_marginal(ctx, &args, &value)?;
        let weight = log_p.add(trace.score_slot())?;
        Ok(Update {
            trace: self.leaf_trace(this, args, value, &log_p),
            weight,
            discarded,
        })
    }

    fn project(&self, this: &Program, constraint: ChoiceMap) -> Result<Measure> {
        let value = match constraint {
            ChoiceTree::Leaf(v) => Some(v),
            other if other.is_empty() => None,
            _ => {
                return Err(Error::AddressNotFound {
                    address: self.address.clone(),
                })
            }
        };
        Ok(Measure::new(ConstrainedLeaf::new(this.clone(), value)))
    }

    fn selection(&self, _args: &[Aval]) -> Result<Selection> {
        Ok(Selection::All)
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        self.program
            .trace_type(args)?
            .get(&self.address)
            .cloned()
            .ok_or_else(|| Error::AddressNotFound {
                address: self.address.clone(),
            })
    }
}

impl Program {
    /// The choice at `address`, with the others integrated out by
    /// importance sampling.
    pub fn marginal(&self, address: impl Into<String>, algorithm: Importance) -> Program {
        Program::new(Marginal::new(self.clone(), address, algorithm))
    }
}

/// Convenience for the value-level entry points of a marginal.
pub fn estimate_log_marginal(
    ctx: &mut Context,
    program: &Program,
    address: &str,
    args: &[Value],
    value: Value,
    algorithm: Importance,
) -> Result<f64> {
    let marginal = Marginal::new(program.clone(), address, algorithm);
    Ok(marginal
        .log_marginal(ctx, &uniform_slots(args), &Slot::Uniform(value))?
        .total())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::bernoulli;
    use crate::ops::ProbabilisticStager;
    use crate::programs::gen;
    use stoch_foundation::Key;
    use stoch_ir::Atom;

    fn model() -> Program {
        gen("two_coins", |s, _| {
            let a = s.choose("a", &bernoulli(), &[Atom::from(0.5)])?;
            let p = s.select(&a, 0.8, 0.2)?;
            let b = s.choose("b", &bernoulli(), &[p])?;
            Ok(vec![b])
        })
    }

    #[test]
    fn test_prior_importance_estimates_marginal() {
        // p(b = true) = 0.5 * 0.8 + 0.5 * 0.2 = 0.5
        let mut ctx = Context::seeded(Key::new(11));
        let lp = estimate_log_marginal(
            &mut ctx,
            &model(),
            "b",
            &[],
            Value::bool(true),
            Importance::prior(2000),
        )
        .unwrap();
        assert!((lp - 0.5f64.ln()).abs() < 0.05);
    }

    #[test]
    fn test_marginal_trace_is_one_leaf() {
        let marginal = model().marginal("b", Importance::prior(10));
        let trace = marginal.simulate(&mut Context::seeded(Key::new(3)), &[]).unwrap();
        assert!(trace.value("").is_some());
        assert!(trace.score().is_finite());
        let t = marginal.trace_type(&[]).unwrap();
        assert_eq!(t.num_outcomes(), Some(2));
    }
}
