//! Samplers with known densities.
//!
//! A [`Distribution`] draws from a [`RngStream`] and scores values under
//! explicit arguments. Sampling nodes hold a [`Dist`] handle in their
//! elaboration; the interpreters call it once per lane.
//!
//! Scalar-parameter distributions are elementwise: their arguments broadcast
//! against each other and the event has the broadcast shape. The density of
//! an array event is the product of the elementwise densities.
//!
//! A distribution may expose a finite [`Distribution::support`] (usable by
//! enumeration) and a [`Distribution::discretization`] (usable by the
//! discretize rewrite). [`attach_discretization`] adds one to any
//! continuous distribution.

mod continuous;
mod discrete;
mod grid;

use std::fmt;
use std::sync::Arc;

use stoch_foundation::{DType, RngStream, Shape, Value};
use stoch_ir::Aval;

use crate::error::{Error, Result};

pub use continuous::{Beta, Normal, Uniform};
pub use discrete::{Bernoulli, Categorical, Flip, Geometric};
pub use grid::{attach_discretization, normal_grid_around_mean, Grid, GridDistribution};

/// A sampler with a log density.
pub trait Distribution: Send + Sync {
    fn name(&self) -> &str;

    /// Aval of one draw for arguments of the given avals.
    fn event_aval(&self, args: &[Aval]) -> Result<Aval>;

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value>;

    /// Log density of `value`; `-inf` outside the support.
    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64>;

    /// Every value the distribution can produce, if finitely many.
    fn support(&self, _args: &[Value]) -> Result<Option<Vec<Value>>> {
        Ok(None)
    }

    /// Size of the finite support, known from avals alone.
    fn support_size(&self, _args: &[Aval]) -> Option<usize> {
        None
    }

    /// Finite-support stand-in used by the discretize rewrite.
    fn discretization(&self) -> Option<Dist> {
        None
    }
}

/// Shared handle to a distribution.
#[derive(Clone)]
pub struct Dist(Arc<dyn Distribution>);

impl Dist {
    pub fn new(dist: impl Distribution + 'static) -> Self {
        Self(Arc::new(dist))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        self.0.event_aval(args)
    }

    pub fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        self.0.sample(rng, args)
    }

    pub fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        self.0.log_density(value, args)
    }

    pub fn support(&self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        self.0.support(args)
    }

    pub fn support_size(&self, args: &[Aval]) -> Option<usize> {
        self.0.support_size(args)
    }

    pub fn discretization(&self) -> Option<Dist> {
        self.0.discretization()
    }

    /// Same underlying distribution object.
    pub fn same(&self, other: &Dist) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dist({})", self.name())
    }
}

pub fn bernoulli() -> Dist {
    Dist::new(Bernoulli)
}

pub fn flip() -> Dist {
    Dist::new(Flip)
}

pub fn categorical() -> Dist {
    Dist::new(Categorical)
}

pub fn geometric() -> Dist {
    Dist::new(Geometric)
}

pub fn normal() -> Dist {
    Dist::new(Normal)
}

pub fn uniform() -> Dist {
    Dist::new(Uniform)
}

pub fn beta() -> Dist {
    Dist::new(Beta)
}

/// Numerically stable `log(sum(exp(xs)))`; `-inf` for an empty slice.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

fn invalid(dist: &str, message: impl Into<String>) -> Error {
    Error::InvalidArgument {
        dist: dist.to_string(),
        message: message.into(),
    }
}

fn check_arity(dist: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(invalid(dist, format!("expected {} arguments, found {}", expected, found)));
    }
    Ok(())
}

/// Event aval of an elementwise distribution.
fn elementwise_aval(dist: &str, arity: usize, args: &[Aval], dtype: DType) -> Result<Aval> {
    check_arity(dist, arity, args.len())?;
    let mut shape = Shape::scalar();
    for aval in args {
        shape = shape
            .broadcast(&aval.shape)
            .ok_or_else(|| invalid(dist, format!("cannot broadcast {} with {}", shape, aval.shape)))?;
    }
    Ok(Aval::new(dtype, shape))
}

/// Arguments broadcast to the common event shape.
fn broadcast_args(dist: &str, arity: usize, args: &[Value]) -> Result<(Shape, Vec<Value>)> {
    let avals: Vec<Aval> = args.iter().map(Aval::of).collect();
    let shape = elementwise_aval(dist, arity, &avals, DType::F64)?.shape;
    let params = args
        .iter()
        .map(|a| a.broadcast_to(&shape))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((shape, params))
}

fn sample_elementwise(
    dist: &str,
    arity: usize,
    args: &[Value],
    dtype: DType,
    mut draw: impl FnMut(&[f64]) -> Result<f64>,
) -> Result<Value> {
    let (shape, params) = broadcast_args(dist, arity, args)?;
    let mut data = Vec::with_capacity(shape.numel());
    let mut row = vec![0.0; arity];
    for i in 0..shape.numel() {
        for (slot, p) in row.iter_mut().zip(&params) {
            *slot = p.data()[i];
        }
        data.push(draw(&row)?);
    }
    Ok(Value::new(dtype, shape, data)?)
}

fn log_density_elementwise(
    dist: &str,
    arity: usize,
    value: &Value,
    args: &[Value],
    density: impl Fn(f64, &[f64]) -> Result<f64>,
) -> Result<f64> {
    let (shape, params) = broadcast_args(dist, arity, args)?;
    let value = value.broadcast_to(&shape)?;
    let mut total = 0.0;
    let mut row = vec![0.0; arity];
    for (i, &x) in value.data().iter().enumerate() {
        for (slot, p) in row.iter_mut().zip(&params) {
            *slot = p.data()[i];
        }
        total += density(x, &row)?;
    }
    Ok(total)
}
