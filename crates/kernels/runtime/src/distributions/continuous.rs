//! Continuous distributions.

use std::f64::consts::PI;

use stoch_foundation::{DType, RngStream, Value};
use stoch_ir::Aval;

use super::{elementwise_aval, invalid, log_density_elementwise, sample_elementwise, Distribution};
use crate::error::Result;

/// `Normal(mean, std)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normal;

fn check_scale(std: f64) -> Result<()> {
    if !(std > 0.0) || !std.is_finite() {
        return Err(invalid("normal", format!("standard deviation {} must be positive", std)));
    }
    Ok(())
}

impl Distribution for Normal {
    fn name(&self) -> &str {
        "normal"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        elementwise_aval(self.name(), 2, args, DType::F64)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        sample_elementwise(self.name(), 2, args, DType::F64, |p| {
            check_scale(p[1])?;
            Ok(rng.normal_with(p[0], p[1]))
        })
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        log_density_elementwise(self.name(), 2, value, args, |x, p| {
            check_scale(p[1])?;
            let z = (x - p[0]) / p[1];
            Ok(-0.5 * z * z - p[1].ln() - 0.5 * (2.0 * PI).ln())
        })
    }
}

/// `Uniform(low, high)` on the closed interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

fn check_bounds(low: f64, high: f64) -> Result<()> {
    if !(low < high) {
        return Err(invalid("uniform", format!("empty interval [{}, {}]", low, high)));
    }
    Ok(())
}

impl Distribution for Uniform {
    fn name(&self) -> &str {
        "uniform"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        elementwise_aval(self.name(), 2, args, DType::F64)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        sample_elementwise(self.name(), 2, args, DType::F64, |p| {
            check_bounds(p[0], p[1])?;
            Ok(rng.uniform_range(p[0], p[1]))
        })
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        log_density_elementwise(self.name(), 2, value, args, |x, p| {
            check_bounds(p[0], p[1])?;
            Ok(if x >= p[0] && x <= p[1] {
                -(p[1] - p[0]).ln()
            } else {
                f64::NEG_INFINITY
            })
        })
    }
}

/// `Beta(alpha, beta)` on `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Beta;

fn check_concentrations(alpha: f64, beta: f64) -> Result<()> {
    if !(alpha > 0.0 && beta > 0.0) || !alpha.is_finite() || !beta.is_finite() {
        return Err(invalid("beta", format!("concentrations {}, {} must be positive", alpha, beta)));
    }
    Ok(())
}

/// `ln Γ(x)` for `x > 0`, Lanczos approximation with `g = 7`.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFICIENTS[1..]
        .iter()
        .enumerate()
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64 + 1.0));
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// `(k - 1) ln x`, zero when `k` is one so that `x = 0` stays finite.
fn power_term(k: f64, x: f64) -> f64 {
    if k == 1.0 {
        0.0
    } else {
        (k - 1.0) * x.ln()
    }
}

impl Distribution for Beta {
    fn name(&self) -> &str {
        "beta"
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        elementwise_aval(self.name(), 2, args, DType::F64)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        sample_elementwise(self.name(), 2, args, DType::F64, |p| {
            check_concentrations(p[0], p[1])?;
            let a = rng.gamma(p[0]);
            let b = rng.gamma(p[1]);
            Ok(if a + b > 0.0 { a / (a + b) } else { 0.5 })
        })
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        log_density_elementwise(self.name(), 2, value, args, |x, p| {
            check_concentrations(p[0], p[1])?;
            if !(0.0..=1.0).contains(&x) {
                return Ok(f64::NEG_INFINITY);
            }
            let ln_norm = ln_gamma(p[0]) + ln_gamma(p[1]) - ln_gamma(p[0] + p[1]);
            Ok(power_term(p[0], x) + power_term(p[1], 1.0 - x) - ln_norm)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_normal_at_zero() {
        let lp = Normal
            .log_density(&Value::f64(0.0), &[Value::f64(0.0), Value::f64(1.0)])
            .unwrap();
        assert!((lp + 0.5 * (2.0 * PI).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_density_outside_support() {
        let args = [Value::f64(0.0), Value::f64(2.0)];
        let inside = Uniform.log_density(&Value::f64(1.0), &args).unwrap();
        assert!((inside + 2f64.ln()).abs() < 1e-12);
        let outside = Uniform.log_density(&Value::f64(3.0), &args).unwrap();
        assert_eq!(outside, f64::NEG_INFINITY);
    }

    #[test]
    fn test_ln_gamma_at_integers() {
        assert!(ln_gamma(1.0).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - PI.sqrt().ln()).abs() < 1e-10);
    }

    #[test]
    fn test_beta_density() {
        let args = [Value::f64(2.0), Value::f64(3.0)];
        // 12 x (1 - x)^2 at one half
        let lp = Beta.log_density(&Value::f64(0.5), &args).unwrap();
        assert!((lp - 1.5f64.ln()).abs() < 1e-10);
        let flat = Beta
            .log_density(&Value::f64(0.0), &[Value::f64(1.0), Value::f64(1.0)])
            .unwrap();
        assert!(flat.abs() < 1e-10);
        let outside = Beta.log_density(&Value::f64(1.5), &args).unwrap();
        assert_eq!(outside, f64::NEG_INFINITY);
        assert!(Beta.log_density(&Value::f64(0.5), &[Value::f64(0.0), Value::f64(1.0)]).is_err());
    }

    #[test]
    fn test_beta_samples_in_unit_interval() {
        let mut rng = RngStream::new(8);
        let args = [Value::f64(2.0), Value::f64(3.0)];
        let n = 2000;
        let mut total = 0.0;
        for _ in 0..n {
            let x = Beta.sample(&mut rng, &args).unwrap().as_f64().unwrap();
            assert!((0.0..=1.0).contains(&x));
            total += x;
        }
        assert!((total / n as f64 - 0.4).abs() < 0.03);
    }

    #[test]
    fn test_uniform_samples_in_range() {
        let mut rng = RngStream::new(5);
        for _ in 0..64 {
            let x = Uniform
                .sample(&mut rng, &[Value::f64(-1.0), Value::f64(1.0)])
                .unwrap()
                .as_f64()
                .unwrap();
            assert!((-1.0..1.0).contains(&x));
        }
    }
}
