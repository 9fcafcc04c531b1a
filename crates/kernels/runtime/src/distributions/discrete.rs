//! Finite and countable distributions.

use stoch_foundation::{DType, RngStream, Value};
use stoch_ir::Aval;

use super::{check_arity, elementwise_aval, invalid, log_density_elementwise, sample_elementwise, Distribution};
use crate::error::Result;

fn check_probability(dist: &str, p: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&p) {
        return Err(invalid(dist, format!("probability {} outside [0, 1]", p)));
    }
    Ok(())
}

fn bool_support() -> Vec<Value> {
    vec![Value::bool(false), Value::bool(true)]
}

/// `Bernoulli(p)`: `true` with probability `p`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bernoulli;

impl Distribution for Bernoulli {
    fn name(&self) -> &str {
        "bernoulli"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        elementwise_aval(self.name(), 1, args, DType::Bool)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        sample_elementwise(self.name(), 1, args, DType::Bool, |p| {
            check_probability("bernoulli", p[0])?;
            Ok(if rng.bool_with_prob(p[0]) { 1.0 } else { 0.0 })
        })
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        log_density_elementwise(self.name(), 1, value, args, |x, p| {
            check_probability("bernoulli", p[0])?;
            Ok(if x != 0.0 { p[0].ln() } else { (1.0 - p[0]).ln() })
        })
    }

    fn support(&self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        check_arity(self.name(), 1, args.len())?;
        Ok(args[0].is_scalar().then(bool_support))
    }

    fn support_size(&self, args: &[Aval]) -> Option<usize> {
        (args.len() == 1 && args[0].shape.rank() == 0).then_some(2)
    }
}

/// A fair coin. Takes no arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flip;

impl Distribution for Flip {
    fn name(&self) -> &str {
        "flip"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        check_arity(self.name(), 0, args.len())?;
        Ok(Aval::scalar(DType::Bool))
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        check_arity(self.name(), 0, args.len())?;
        Ok(Value::bool(rng.bool_with_prob(0.5)))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        check_arity(self.name(), 0, args.len())?;
        value.scalar_f64()?;
        Ok(0.5f64.ln())
    }

    fn support(&self, _args: &[Value]) -> Result<Option<Vec<Value>>> {
        Ok(Some(bool_support()))
    }

    fn support_size(&self, _args: &[Aval]) -> Option<usize> {
        Some(2)
    }
}

/// `Categorical(probs)`: an index into a vector of unnormalised weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct Categorical;

impl Categorical {
    fn weights<'a>(&self, args: &'a [Value]) -> Result<&'a [f64]> {
        check_arity(self.name(), 1, args.len())?;
        let probs = &args[0];
        if probs.rank() != 1 || probs.numel() == 0 {
            return Err(invalid(self.name(), format!("weights must be a non-empty vector, found {}", probs.shape())));
        }
        if probs.data().iter().any(|w| *w < 0.0 || w.is_nan()) || probs.sum() <= 0.0 {
            return Err(invalid(self.name(), "weights must be non-negative with a positive sum"));
        }
        Ok(probs.data())
    }
}

impl Distribution for Categorical {
    fn name(&self) -> &str {
        "categorical"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        check_arity(self.name(), 1, args.len())?;
        if args[0].shape.rank() != 1 {
            return Err(invalid(self.name(), format!("weights must be a vector, found {}", args[0].shape)));
        }
        Ok(Aval::scalar(DType::I64))
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        let weights = self.weights(args)?;
        Ok(Value::i64(rng.weighted_choice(weights) as i64))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        let weights = self.weights(args)?;
        let x = value.scalar_f64()?;
        if x < 0.0 || x.fract() != 0.0 || x as usize >= weights.len() {
            return Ok(f64::NEG_INFINITY);
        }
        let total: f64 = weights.iter().sum();
        Ok((weights[x as usize] / total).ln())
    }

    fn support(&self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        let n = self.weights(args)?.len();
        Ok(Some((0..n as i64).map(Value::i64).collect()))
    }

    fn support_size(&self, args: &[Aval]) -> Option<usize> {
        match args {
            [probs] if probs.shape.rank() == 1 => probs.shape.leading(),
            _ => None,
        }
    }
}

/// `Geometric(p)`: failures before the first success.
#[derive(Debug, Clone, Copy, Default)]
pub struct Geometric;

impl Distribution for Geometric {
    fn name(&self) -> &str {
        "geometric"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        elementwise_aval(self.name(), 1, args, DType::I64)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        sample_elementwise(self.name(), 1, args, DType::I64, |p| {
            let p = p[0];
            if !(p > 0.0 && p <= 1.0) {
                return Err(invalid("geometric", format!("success probability {} outside (0, 1]", p)));
            }
            if p == 1.0 {
                return Ok(0.0);
            }
            // Inversion: floor(ln U / ln(1 - p)).
            let u = rng.uniform().max(f64::MIN_POSITIVE);
            Ok((u.ln() / (1.0 - p).ln()).floor())
        })
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        log_density_elementwise(self.name(), 1, value, args, |k, p| {
            let p = p[0];
            if !(p > 0.0 && p <= 1.0) {
                return Err(invalid("geometric", format!("success probability {} outside (0, 1]", p)));
            }
            if k < 0.0 || k.fract() != 0.0 {
                return Ok(f64::NEG_INFINITY);
            }
            if p == 1.0 {
                return Ok(if k == 0.0 { 0.0 } else { f64::NEG_INFINITY });
            }
            Ok(k * (1.0 - p).ln() + p.ln())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_bernoulli_density() {
        let lp = Bernoulli.log_density(&Value::bool(true), &[Value::f64(0.3)]).unwrap();
        assert!((lp - 0.3f64.ln()).abs() < 1e-12);
        let lq = Bernoulli.log_density(&Value::bool(false), &[Value::f64(0.3)]).unwrap();
        assert!((lq - 0.7f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_bernoulli_rejects_bad_probability() {
        let err = Bernoulli.sample(&mut RngStream::new(1), &[Value::f64(1.5)]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_categorical_support_and_density() {
        let probs = Value::from_f64s(&[1.0, 3.0]);
        let support = Categorical.support(&[probs.clone()]).unwrap().unwrap();
        assert_eq!(support, vec![Value::i64(0), Value::i64(1)]);
        let lp = Categorical.log_density(&Value::i64(1), &[probs.clone()]).unwrap();
        assert!((lp - 0.75f64.ln()).abs() < 1e-12);
        let out = Categorical.log_density(&Value::i64(5), &[probs]).unwrap();
        assert_eq!(out, f64::NEG_INFINITY);
    }

    #[test]
    fn test_geometric_draws_are_counts() {
        let mut rng = RngStream::new(9);
        for _ in 0..32 {
            let k = Geometric.sample(&mut rng, &[Value::f64(0.4)]).unwrap();
            let k = k.as_i64().unwrap();
            assert!(k >= 0);
        }
        let lp = Geometric.log_density(&Value::i64(2), &[Value::f64(0.5)]).unwrap();
        assert!((lp - 0.125f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_flip_is_fair() {
        let lp = Flip.log_density(&Value::bool(true), &[]).unwrap();
        assert!((lp - 0.5f64.ln()).abs() < 1e-12);
        assert_eq!(Flip.support_size(&[]), Some(2));
    }
}
