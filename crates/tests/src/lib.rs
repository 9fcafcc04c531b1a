//! Integration test harness for stoch.
//!
//! Shared models and checks for the end-to-end tests under `tests/`. Every
//! helper panics with the failing operation on error, so tests read as a
//! sequence of calls and assertions.

use stoch_foundation::{DType, Key, Value};
use stoch_ir::Atom;
use stoch_runtime::{
    bernoulli, flip, logsumexp, normal, ChoiceMap, Context, Enumeration, Error, Measure, Program, ProbabilisticStager,
    Trace,
};
use tracing::debug;

/// Test harness around one seeded context.
pub struct TestHarness {
    ctx: Context,
}

impl TestHarness {
    /// A harness whose draws all derive from `seed`.
    pub fn seeded(seed: u64) -> Self {
        stoch_tools::init_test_logging();
        Self {
            ctx: Context::seeded(Key::new(seed)),
        }
    }

    /// A harness without entropy, for deterministic operations only.
    pub fn unseeded() -> Self {
        stoch_tools::init_test_logging();
        Self { ctx: Context::new() }
    }

    pub fn ctx(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// # Panics
    ///
    /// Panics if simulation fails.
    pub fn simulate(&mut self, program: &Program, args: &[Value]) -> Trace {
        program
            .simulate(&mut self.ctx, args)
            .unwrap_or_else(|err| panic!("simulate {} failed: {}", program.name(), err))
    }

    /// Log density of `choices`.
    ///
    /// # Panics
    ///
    /// Panics if assessment fails.
    pub fn assess(&mut self, program: &Program, args: &[Value], choices: &ChoiceMap) -> f64 {
        program
            .assess(&mut self.ctx, args, choices)
            .unwrap_or_else(|err| panic!("assess {} failed: {}", program.name(), err))
            .0
    }

    /// # Panics
    ///
    /// Panics if enumeration fails.
    pub fn enumerate(&mut self, measure: &Measure, args: &[Value]) -> Enumeration {
        measure
            .enumerate(&mut self.ctx, args)
            .unwrap_or_else(|err| panic!("enumerate {} failed: {}", measure.name(), err))
    }

    /// # Panics
    ///
    /// Panics if elimination fails.
    pub fn eliminate(&mut self, measure: &Measure, args: &[Value]) -> Enumeration {
        measure
            .eliminate(&mut self.ctx, args)
            .unwrap_or_else(|err| panic!("eliminate {} failed: {}", measure.name(), err))
    }

    /// `log Σ p(choices)` over every assignment of the boolean `addresses`,
    /// computed one `assess` at a time.
    pub fn brute_force_log_marginal(&mut self, program: &Program, args: &[Value], addresses: &[String]) -> f64 {
        let k = addresses.len();
        let mut terms = Vec::with_capacity(1 << k);
        for bits in 0..1usize << k {
            let choices = ChoiceMap::from_values(
                addresses
                    .iter()
                    .enumerate()
                    .map(|(i, addr)| (addr.as_str(), Value::bool((bits >> (k - 1 - i)) & 1 == 1))),
            );
            terms.push(self.assess(program, args, &choices));
        }
        let total = logsumexp(&terms);
        debug!(program = %program.name(), assignments = terms.len(), total, "brute force marginal");
        total
    }
}

/// Assert `|a - b| <= tol`.
#[track_caller]
pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!(
        (a - b).abs() <= tol || a == b,
        "expected {} to be within {} of {}",
        a,
        tol,
        b
    );
}

/// `x ~ Bernoulli(0.5)`, `y ~ Bernoulli(0.3)`, observe `x AND y`.
pub fn and_model() -> Program {
    stoch_runtime::gen("and", |s, _| {
        let x = s.choose("x", &bernoulli(), &[Atom::from(0.5)])?;
        let y = s.choose("y", &bernoulli(), &[Atom::from(0.3)])?;
        let both = s.and(&x, &y)?;
        let p = s.select(&both, 1.0, 0.0)?;
        s.observe(&bernoulli(), Value::bool(true), &[p])?;
        Ok(vec![x, y])
    })
}

/// `a → b` through a noisy copy, and an unrelated `c`.
pub fn chain_model() -> Program {
    stoch_runtime::gen("chain", |s, _| {
        let a = s.choose("a", &bernoulli(), &[Atom::from(0.5)])?;
        let p = s.select(&a, 0.9, 0.1)?;
        let b = s.choose("b", &bernoulli(), &[p])?;
        let c = s.choose("c", &bernoulli(), &[Atom::from(0.2)])?;
        Ok(vec![b, c])
    })
}

/// Addresses `c0 .. c{k-1}` of [`coins_model`].
pub fn coin_addresses(k: usize) -> Vec<String> {
    (0..k).map(|i| format!("c{}", i)).collect()
}

/// `k` biased coins whose head count is observed noisily at `1.5`.
pub fn coins_model(k: usize) -> Program {
    stoch_runtime::gen(format!("coins{}", k), move |s, _| {
        let mut count = Atom::from(0.0);
        let mut coins = Vec::with_capacity(k);
        for (i, addr) in coin_addresses(k).iter().enumerate() {
            let p = 0.2 + 0.6 * i as f64 / k.max(1) as f64;
            let c = s.choose(addr, &bernoulli(), &[Atom::from(p)])?;
            let cf = s.convert(&c, DType::F64)?;
            count = s.add(&count, &cf)?;
            coins.push(c);
        }
        s.observe(&normal(), Value::f64(1.5), &[count, Atom::from(1.0)])?;
        Ok(coins)
    })
}

/// `x ~ Normal(mean, 1)`, `y ~ Normal(x, 0.5)`.
pub fn gaussian_model() -> Program {
    stoch_runtime::gen("gaussian", |s, xs| {
        let x = s.choose("x", &normal(), &[xs[0].clone(), Atom::from(1.0)])?;
        let y = s.choose("y", &normal(), &[x.clone(), Atom::from(0.5)])?;
        Ok(vec![y])
    })
}

/// Untraced draws inside a two-way branch on the argument, followed by a
/// traced coin. The branches draw different numbers of values.
pub fn branching_model() -> Program {
    stoch_runtime::gen("branching", |s, xs| {
        let drawn = s.if_else::<Error, _, _>(
            &xs[0],
            &[],
            |s, _| Ok(vec![s.sample(&normal(), &[Atom::from(0.0), Atom::from(1.0)])?]),
            |s, _| {
                let a = s.sample(&normal(), &[Atom::from(0.0), Atom::from(1.0)])?;
                let b = s.sample(&normal(), &[Atom::from(0.0), Atom::from(1.0)])?;
                Ok(vec![s.add(&a, &b)?])
            },
        )?;
        let z = s.choose("z", &bernoulli(), &[Atom::from(0.5)])?;
        Ok(vec![drawn[0].clone(), z])
    })
}

/// `x ~ flip`; `0.5` is observed under `normal(0, 1)` only when `x` holds.
pub fn gated_observation_model() -> Program {
    stoch_runtime::gen("gated_observation", |s, _| {
        let x = s.choose("x", &flip(), &[])?;
        let gated = s.if_else::<Error, _, _>(
            &x,
            &[],
            |s, _| {
                s.observe(&normal(), Value::f64(0.5), &[Atom::from(0.0), Atom::from(1.0)])?;
                Ok(vec![Atom::from(1.0)])
            },
            |_, _| Ok(vec![Atom::from(0.0)]),
        )?;
        Ok(vec![x, gated[0].clone()])
    })
}

/// `x ~ flip`, then `y` is drawn around 0 when `x` holds. Otherwise `y` is
/// drawn around 10 when `shared_address` is set, and `z` around 10 when not.
pub fn branch_choice_model(shared_address: bool) -> Program {
    let other = if shared_address { "y" } else { "z" };
    stoch_runtime::gen("branch_choice", move |s, _| {
        let x = s.choose("x", &flip(), &[])?;
        let drawn = s.if_else::<Error, _, _>(
            &x,
            &[],
            |s, _| Ok(vec![s.choose("y", &normal(), &[Atom::from(0.0), Atom::from(1.0)])?]),
            |s, _| Ok(vec![s.choose(other, &normal(), &[Atom::from(10.0), Atom::from(1.0)])?]),
        )?;
        Ok(vec![x, drawn[0].clone()])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brute_force_of_independent_coins_is_zero() {
        let program = stoch_runtime::gen("free", |s, _| {
            let a = s.choose("a", &bernoulli(), &[Atom::from(0.3)])?;
            let b = s.choose("b", &bernoulli(), &[Atom::from(0.6)])?;
            Ok(vec![a, b])
        });
        let mut h = TestHarness::unseeded();
        let total = h.brute_force_log_marginal(&program, &[], &["a".to_string(), "b".to_string()]);
        assert_close(total, 0.0, 1e-12);
    }
}
