//! Grid discretisation of continuous distributions.
//!
//! A [`Grid`] places a fixed number of points from a distribution's
//! arguments. The resulting [`GridDistribution`] puts mass on those points
//! proportional to the base density, renormalised over the grid:
//!
//! ```text
//! p_grid(v) = pdf(v) / sum_g pdf(g)        for v on the grid, 0 elsewhere
//! ```

use std::fmt;
use std::sync::Arc;

use stoch_foundation::{DType, RngStream, Value};
use stoch_ir::Aval;

use super::{check_arity, invalid, logsumexp, Dist, Distribution};
use crate::error::Result;

type PlaceFn = Arc<dyn Fn(&[Value]) -> Result<Vec<f64>> + Send + Sync>;

/// Point placement for a scalar continuous distribution.
#[derive(Clone)]
pub struct Grid {
    points: usize,
    place: PlaceFn,
}

impl Grid {
    /// `place(args)` must return exactly `points` points.
    pub fn new(points: usize, place: impl Fn(&[Value]) -> Result<Vec<f64>> + Send + Sync + 'static) -> Self {
        Self {
            points,
            place: Arc::new(place),
        }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn locate(&self, args: &[Value]) -> Result<Vec<f64>> {
        let pts = (self.place)(args)?;
        if pts.len() != self.points {
            return Err(invalid(
                "grid",
                format!("placement produced {} points, expected {}", pts.len(), self.points),
            ));
        }
        Ok(pts)
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid").field("points", &self.points).finish()
    }
}

/// `points` evenly spaced values over `mean ± n_std * std`.
///
/// Expects `(mean, std)` arguments, as taken by the normal distribution.
pub fn normal_grid_around_mean(n_std: f64, points: usize) -> Grid {
    Grid::new(points, move |args: &[Value]| {
        check_arity("grid", 2, args.len())?;
        let mean = args[0].scalar_f64()?;
        let std = args[1].scalar_f64()?;
        if points == 1 {
            return Ok(vec![mean]);
        }
        let lo = mean - n_std * std;
        let step = 2.0 * n_std * std / (points - 1) as f64;
        Ok((0..points).map(|i| lo + step * i as f64).collect())
    })
}

/// `base` with `grid` attached as its discretisation.
pub fn attach_discretization(base: Dist, grid: Grid) -> Dist {
    Dist::new(Discretizable {
        name: base.name().to_string(),
        base,
        grid,
    })
}

struct Discretizable {
    name: String,
    base: Dist,
    grid: Grid,
}

impl Distribution for Discretizable {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        self.base.event_aval(args)
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        self.base.sample(rng, args)
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        self.base.log_density(value, args)
    }

    fn support(&self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        self.base.support(args)
    }

    fn support_size(&self, args: &[Aval]) -> Option<usize> {
        self.base.support_size(args)
    }

    fn discretization(&self) -> Option<Dist> {
        Some(Dist::new(GridDistribution::new(self.base.clone(), self.grid.clone())))
    }
}

/// A continuous distribution restricted to grid points.
pub struct GridDistribution {
    name: String,
    base: Dist,
    grid: Grid,
}

impl GridDistribution {
    pub fn new(base: Dist, grid: Grid) -> Self {
        Self {
            name: format!("{}@grid{}", base.name(), grid.points()),
            base,
            grid,
        }
    }

    /// Grid points with their unnormalised log weights.
    fn weighted_points(&self, args: &[Value]) -> Result<(Vec<f64>, Vec<f64>)> {
        let pts = self.grid.locate(args)?;
        let logw = pts
            .iter()
            .map(|&x| self.base.log_density(&Value::f64(x), args))
            .collect::<Result<Vec<_>>>()?;
        Ok((pts, logw))
    }
}

impl Distribution for GridDistribution {
    fn name(&self) -> &str {
        &self.name
    }

    fn event_aval(&self, args: &[Aval]) -> Result<Aval> {
        let aval = self.base.event_aval(args)?;
        if aval.shape.rank() != 0 {
            return Err(invalid(&self.name, format!("grids need scalar events, found {}", aval.shape)));
        }
        Ok(Aval::scalar(DType::F64))
    }

    fn sample(&self, rng: &mut RngStream, args: &[Value]) -> Result<Value> {
        let (pts, logw) = self.weighted_points(args)?;
        let top = logw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = logw.iter().map(|w| (w - top).exp()).collect();
        Ok(Value::f64(pts[rng.weighted_choice(&weights)]))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64> {
        let x = value.scalar_f64()?;
        let (pts, logw) = self.weighted_points(args)?;
        let scale = pts.iter().fold(1.0f64, |m, p| m.max(p.abs()));
        match pts.iter().position(|p| (p - x).abs() <= 1e-12 * scale) {
            Some(i) => Ok(logw[i] - logsumexp(&logw)),
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn support(&self, args: &[Value]) -> Result<Option<Vec<Value>>> {
        Ok(Some(self.grid.locate(args)?.into_iter().map(Value::f64).collect()))
    }

    fn support_size(&self, _args: &[Aval]) -> Option<usize> {
        Some(self.grid.points())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::normal;

    #[test]
    fn test_grid_points_are_symmetric() {
        let grid = normal_grid_around_mean(2.0, 5);
        let pts = grid.locate(&[Value::f64(1.0), Value::f64(0.5)]).unwrap();
        assert_eq!(pts, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_grid_density_normalises() {
        let d = attach_discretization(normal(), normal_grid_around_mean(3.0, 7))
            .discretization()
            .unwrap();
        let args = [Value::f64(0.0), Value::f64(1.0)];
        let support = d.support(&args).unwrap().unwrap();
        assert_eq!(support.len(), 7);
        let lps: Vec<f64> = support
            .iter()
            .map(|v| d.log_density(v, &args).unwrap())
            .collect();
        assert!(logsumexp(&lps).abs() < 1e-9);
        assert_eq!(d.log_density(&Value::f64(0.3), &args).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_plain_normal_has_no_discretization() {
        assert!(normal().discretization().is_none());
    }
}
