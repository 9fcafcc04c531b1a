//! Modular vectorisation.
//!
//! A vmap of size `A` inside a pass of `L` lanes runs its body with `L·A`
//! lanes; lane `l·A + a` is element `a` of outer lane `l`. Inputs are laid
//! out on entry and outputs folded back on exit:
//!
//! ```text
//! uniform, mapped      [A, ..]     -> tiled L times
//! uniform, unmapped    [..]        -> stays uniform
//! lanes,   unmapped    [L, ..]     -> each lane repeated A times
//! lanes,   mapped      [L, .., A]  -> axis moved forward, reshaped to [L·A, ..]
//! ```
//!
//! On exit a lane slot of `L·A` lanes becomes `L` lanes of `[A, ..]`.

use stoch_foundation::{Shape, Slot, Value};
use stoch_ir::Graph;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::interpret::eval::run_graph;

/// Lane layout of one vectorised call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LaneLayout {
    /// Lanes of the enclosing pass.
    pub outer: Option<usize>,
    /// Size of the mapped axis.
    pub size: usize,
}

impl LaneLayout {
    pub(crate) fn new(outer: Option<usize>, size: usize) -> Self {
        Self { outer, size }
    }

    /// Lane count inside the vectorised call.
    pub(crate) fn inner(&self) -> usize {
        self.outer.unwrap_or(1) * self.size
    }

    /// Lay out one input for the inner pass.
    pub(crate) fn enter(&self, slot: &Slot, axis: Option<usize>) -> Result<Slot> {
        Ok(match (slot, axis) {
            (Slot::Uniform(_), None) => slot.clone(),
            (Slot::Uniform(v), Some(a)) => {
                let moved = v.move_axis(a, 0)?;
                match self.outer {
                    None => Slot::Lanes(moved),
                    Some(l) => Slot::Lanes(moved.tile_axis0(l)?),
                }
            }
            (Slot::Lanes(_), None) => slot.repeat_lanes(self.size)?,
            (Slot::Lanes(v), Some(a)) => {
                let moved = v.move_axis(a + 1, 1)?;
                let mut dims = vec![self.inner()];
                dims.extend_from_slice(&moved.shape().dims()[2..]);
                Slot::Lanes(moved.reshape(dims)?)
            }
        })
    }

    /// Run `f` as the inner pass: the lane count becomes [`LaneLayout::inner`]
    /// and a lane mask is repeated onto every element of its lane.
    pub(crate) fn run<T>(&self, ctx: &mut Context, f: impl FnOnce(&mut Context) -> Result<T>) -> Result<T> {
        let mask = ctx.mask().map(|m| m.repeat_lanes(self.size)).transpose()?;
        ctx.with_lanes(Some(self.inner()), |ctx| ctx.replacing_mask(mask, f))
    }

    /// Fold one output of the inner pass back into the outer layout.
    pub(crate) fn exit(&self, slot: &Slot) -> Result<Slot> {
        Ok(match slot {
            Slot::Uniform(v) => Slot::Uniform(v.reshape(v.shape().prepend(1))?.tile_axis0(self.size)?),
            Slot::Lanes(v) => match self.outer {
                None => Slot::Uniform(v.clone()),
                Some(l) => {
                    let mut dims = vec![l, self.size];
                    dims.extend_from_slice(v.shape().tail().dims());
                    Slot::Lanes(v.reshape(dims)?)
                }
            },
        })
    }
}

/// Length of the mapped axis, read from the mapped inputs.
///
/// All mapped inputs must agree with each other and with `axis_size` when
/// it is given. Without mapped inputs `axis_size` is required.
pub(crate) fn static_dim_length(
    in_axes: &[Option<usize>],
    shapes: &[Shape],
    axis_size: Option<usize>,
) -> Result<usize> {
    if in_axes.len() != shapes.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} axes for {} arguments",
            in_axes.len(),
            shapes.len()
        )));
    }
    let mut found = axis_size;
    for (i, (axis, shape)) in in_axes.iter().zip(shapes).enumerate() {
        let Some(a) = axis else { continue };
        let n = shape.dims().get(*a).copied().ok_or_else(|| {
            Error::ShapeMismatch(format!("argument {} of shape {} has no axis {}", i, shape, a))
        })?;
        match found {
            Some(m) if m != n => {
                return Err(Error::ShapeMismatch(format!(
                    "argument {} maps an axis of length {}, expected {}",
                    i, n, m
                )))
            }
            _ => found = Some(n),
        }
    }
    found.ok_or_else(|| Error::ShapeMismatch("no mapped argument and no axis size".to_string()))
}

/// `shape` without axis `axis`.
pub(crate) fn remove_axis(shape: &Shape, axis: usize) -> Result<Shape> {
    if axis >= shape.rank() {
        return Err(Error::ShapeMismatch(format!("shape {} has no axis {}", shape, axis)));
    }
    let mut dims = shape.dims().to_vec();
    dims.remove(axis);
    Ok(Shape::new(dims))
}

/// Run `graph` over `args` mapped along `in_axes`, under the current lanes.
pub(crate) fn vmap_slots(
    ctx: &mut Context,
    graph: &Graph,
    in_axes: &[Option<usize>],
    axis_size: Option<usize>,
    args: Vec<Slot>,
) -> Result<Vec<Slot>> {
    let shapes: Vec<Shape> = args.iter().map(Slot::lane_shape).collect();
    let layout = LaneLayout::new(ctx.lanes(), static_dim_length(in_axes, &shapes, axis_size)?);
    let inner_args = args
        .iter()
        .zip(in_axes)
        .map(|(slot, axis)| layout.enter(slot, *axis))
        .collect::<Result<Vec<_>>>()?;
    debug!(size = layout.size, lanes = layout.inner(), "vmap");
    let outs = layout.run(ctx, |ctx| run_graph(ctx, graph, inner_args))?;
    outs.iter().map(|slot| layout.exit(slot)).collect()
}

/// Vectorise `graph` over `in_axes` of `args`.
///
/// Outputs carry the mapped axis in front. `axis_size` is inferred from the
/// mapped arguments when absent.
pub fn modular_vmap(
    ctx: &mut Context,
    graph: &Graph,
    in_axes: &[Option<usize>],
    axis_size: Option<usize>,
    args: &[Value],
) -> Result<Vec<Value>> {
    let slots = args.iter().cloned().map(Slot::Uniform).collect();
    Ok(vmap_slots(ctx, graph, in_axes, axis_size, slots)?
        .into_iter()
        .map(Slot::into_value)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::normal;
    use crate::ops::ProbabilisticStager;
    use stoch_foundation::{DType, Key};
    use stoch_ir::{stage, Atom, Aval};

    #[test]
    fn test_axis_size_inference() {
        let shapes = [Shape::new(vec![3, 2]), Shape::scalar()];
        assert_eq!(static_dim_length(&[Some(0), None], &shapes, None).unwrap(), 3);
        assert_eq!(static_dim_length(&[Some(1), None], &shapes, None).unwrap(), 2);
        assert!(matches!(
            static_dim_length(&[Some(0), None], &shapes, Some(4)),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(static_dim_length(&[None, None], &shapes, None).is_err());
    }

    #[test]
    fn test_nested_layout_round_trips() {
        let layout = LaneLayout::new(Some(2), 3);
        // Two outer lanes, each holding a length-3 vector.
        let outer = Slot::Lanes(Value::from_f64s(&[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]).reshape(vec![2, 3]).unwrap());
        let inner = layout.enter(&outer, Some(0)).unwrap();
        assert_eq!(inner.lane_count(), Some(6));
        assert_eq!(inner.lane(4).unwrap(), Value::f64(11.0));
        assert_eq!(layout.exit(&inner).unwrap(), outer);

        let shared = Slot::Lanes(Value::from_f64s(&[5.0, 7.0]));
        let repeated = layout.enter(&shared, None).unwrap();
        assert_eq!(repeated.lane(2).unwrap(), Value::f64(5.0));
        assert_eq!(repeated.lane(3).unwrap(), Value::f64(7.0));
    }

    #[test]
    fn test_mapped_sampling_draws_per_element() {
        let graph = stage::<Error, _>(&[Aval::scalar(DType::F64)], |s, xs| {
            let x = s.sample(&normal(), &[xs[0].clone(), Atom::from(1.0)])?;
            Ok(vec![x])
        })
        .unwrap();
        let means = Value::from_f64s(&[0.0, 100.0, 200.0, 300.0]);
        let out = modular_vmap(&mut Context::seeded(Key::new(9)), &graph, &[Some(0)], None, &[means]).unwrap();
        assert_eq!(out[0].shape(), &Shape::new(vec![4]));
        for (i, x) in out[0].data().iter().enumerate() {
            assert!((x - 100.0 * i as f64).abs() < 10.0);
        }
    }

    #[test]
    fn test_unmapped_output_is_broadcast() {
        let graph = stage::<Error, _>(&[Aval::scalar(DType::F64)], |s, _| Ok(vec![s.constant(Value::f64(2.0))])).unwrap();
        let out = modular_vmap(&mut Context::new(), &graph, &[None], Some(3), &[Value::f64(0.0)]).unwrap();
        assert_eq!(out[0], Value::from_f64s(&[2.0, 2.0, 2.0]));
    }
}
