//! Vectorised programs.
//!
//! A [`VmapProgram`] runs its inner program once per element of the mapped
//! axis, as one pass with the lane count multiplied. Its trace holds the
//! inner choices with the mapped axis in front, and its score is the sum
//! over elements.

use stoch_foundation::{Shape, Slot, Value};
use stoch_ir::{Atom, Aval, Stager};

use crate::choices::{ChoiceMap, ChoiceTree};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::gfi::{GenerativeFunction, Measure, Program, ReflectiveMeasure, Update};
use crate::interpret::vmap::{remove_axis, static_dim_length, LaneLayout};
use crate::reflect::trace_type::TraceType;
use crate::selection::Selection;
use crate::trace::Trace;

/// `inner` mapped over `in_axes` of its arguments.
#[derive(Debug, Clone)]
pub struct VmapProgram {
    inner: Program,
    /// `None` maps no argument, as in `repeat`.
    in_axes: Option<Vec<Option<usize>>>,
    axis_size: Option<usize>,
}

impl VmapProgram {
    pub fn new(inner: Program, in_axes: Option<Vec<Option<usize>>>, axis_size: Option<usize>) -> Self {
        Self {
            inner,
            in_axes,
            axis_size,
        }
    }

    pub fn inner(&self) -> &Program {
        &self.inner
    }

    fn axes(&self, num_args: usize) -> Vec<Option<usize>> {
        self.in_axes.clone().unwrap_or_else(|| vec![None; num_args])
    }

    fn layout(&self, ctx: &Context, args: &[Slot]) -> Result<(LaneLayout, Vec<Option<usize>>)> {
        let axes = self.axes(args.len());
        let shapes: Vec<Shape> = args.iter().map(Slot::lane_shape).collect();
        let size = static_dim_length(&axes, &shapes, self.axis_size)?;
        Ok((LaneLayout::new(ctx.lanes(), size), axes))
    }

    fn enter_args(layout: &LaneLayout, axes: &[Option<usize>], args: &[Slot]) -> Result<Vec<Slot>> {
        args.iter().zip(axes).map(|(s, a)| layout.enter(s, *a)).collect()
    }

    /// Avals seen by one element, and the axis size.
    fn inner_avals(&self, args: &[Aval]) -> Result<(Vec<Aval>, usize)> {
        let axes = self.axes(args.len());
        let shapes: Vec<Shape> = args.iter().map(|a| a.shape.clone()).collect();
        let size = static_dim_length(&axes, &shapes, self.axis_size)?;
        let avals = args
            .iter()
            .zip(&axes)
            .map(|(aval, axis)| match axis {
                Some(a) => Ok(Aval::new(aval.dtype, remove_axis(&aval.shape, *a)?)),
                None => Ok(aval.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((avals, size))
    }

    /// Inner trace folded back into the outer layout.
    fn exit_trace(&self, this: &Program, layout: &LaneLayout, inner: &Trace, args: Vec<Slot>) -> Result<Trace> {
        let score = layout.exit(inner.score_slot())?.lane_sums()?;
        Ok(inner
            .map_slots(args, &mut |s| layout.exit(s))?
            .with_program(this.clone())
            .with_score(score))
    }

    /// Outer trace laid out for the inner pass.
    ///
    /// The inner score is zero: callers add the outer score back, as the
    /// per-element split of the summed score is not recorded.
    fn enter_trace(&self, layout: &LaneLayout, trace: &Trace, inner_args: Vec<Slot>) -> Result<Trace> {
        Ok(trace
            .map_slots(inner_args, &mut |s| layout.enter(s, Some(0)))?
            .with_program(self.inner.clone())
            .with_score(Slot::Uniform(Value::f64(0.0))))
    }
}

fn enter_choices(layout: &LaneLayout, choices: &ChoiceMap) -> Result<ChoiceMap> {
    choices.try_map(&mut |s| layout.enter(s, Some(0)))
}

fn exit_choices(layout: &LaneLayout, choices: &ChoiceMap) -> Result<ChoiceMap> {
    choices.try_map(&mut |s| layout.exit(s))
}

fn batch_trace_type(t: TraceType, size: usize) -> TraceType {
    match t {
        TraceType::Bottom => TraceType::Bottom,
        TraceType::Shaped { dtype, shape, support } => TraceType::Shaped {
            dtype,
            shape: shape.prepend(size),
            support,
        },
        TraceType::Map(entries) => TraceType::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, batch_trace_type(v, size)))
                .collect(),
        ),
    }
}

impl GenerativeFunction for VmapProgram {
    fn name(&self) -> String {
        format!("vmap({})", self.inner.name())
    }

    fn output_avals(&self, args: &[Aval]) -> Result<Vec<Aval>> {
        let (avals, size) = self.inner_avals(args)?;
        Ok(self
            .inner
            .output_avals(&avals)?
            .into_iter()
            .map(|a| Aval::new(a.dtype, a.shape.prepend(size)))
            .collect())
    }

    fn simulate(&self, ctx: &mut Context, this: &Program, args: Vec<Slot>) -> Result<Trace> {
        let (layout, axes) = self.layout(ctx, &args)?;
        let inner_args = Self::enter_args(&layout, &axes, &args)?;
        let inner = layout.run(ctx, |ctx| self.inner.simulate_slots(ctx, inner_args))?;
        self.exit_trace(this, &layout, &inner, args)
    }

    fn assess(&self, ctx: &mut Context, args: Vec<Slot>, choices: &ChoiceMap) -> Result<(Slot, Vec<Slot>)> {
        let (layout, axes) = self.layout(ctx, &args)?;
        let inner_args = Self::enter_args(&layout, &axes, &args)?;
        let inner_choices = enter_choices(&layout, choices)?;
        let (weight, retval) = layout.run(ctx, |ctx| {
            self.inner.assess_slots(ctx, inner_args, &inner_choices)
        })?;
        let retval = retval.iter().map(|s| layout.exit(s)).collect::<Result<_>>()?;
        Ok((layout.exit(&weight)?.lane_sums()?, retval))
    }

    fn update(
        &self,
        ctx: &mut Context,
        this: &Program,
        trace: &Trace,
        args: Vec<Slot>,
        choices: &ChoiceMap,
    ) -> Result<Update> {
        let (layout, axes) = self.layout(ctx, &args)?;
        let inner_args = Self::enter_args(&layout, &axes, &args)?;
        let old = self.enter_trace(&layout, trace, inner_args.clone())?;
        let inner_choices = enter_choices(&layout, choices)?;
        let up = layout.run(ctx, |ctx| {
            self.inner.update_slots(ctx, &old, inner_args, &inner_choices)
        })?;
        let weight = layout.exit(&up.weight)?.lane_sums()?.add(trace.score_slot())?;
        Ok(Update {
            trace: self.exit_trace(this, &layout, &up.trace, args)?,
            weight,
            discarded: exit_choices(&layout, &up.discarded)?,
        })
    }

    fn project(&self, this: &Program, constraint: ChoiceMap) -> Result<Measure> {
        Ok(Measure::new(VmapMeasure {
            program: this.clone(),
            vmap: self.clone(),
            constraint,
        }))
    }

    fn discretize(&self, _this: &Program, selection: &Selection) -> Result<Program> {
        Ok(Program::new(VmapProgram::new(
            self.inner.discretize_with(selection)?,
            self.in_axes.clone(),
            self.axis_size,
        )))
    }

    fn selection(&self, args: &[Aval]) -> Result<Selection> {
        let (avals, _) = self.inner_avals(args)?;
        self.inner.selection(&avals)
    }

    fn trace_type(&self, args: &[Aval]) -> Result<TraceType> {
        let (avals, size) = self.inner_avals(args)?;
        Ok(batch_trace_type(self.inner.trace_type(&avals)?, size))
    }
}

/// A vectorised program with constraints laid out along the mapped axis.
#[derive(Debug, Clone)]
pub struct VmapMeasure {
    program: Program,
    vmap: VmapProgram,
    constraint: ChoiceMap,
}

impl ReflectiveMeasure for VmapMeasure {
    fn name(&self) -> String {
        format!("{}|constrained", self.program.name())
    }

    fn program(&self) -> &Program {
        &self.program
    }

    fn constraint(&self) -> ChoiceMap {
        self.constraint.clone()
    }

    fn generate(&self, ctx: &mut Context, args: Vec<Slot>) -> Result<(Trace, Slot)> {
        let (layout, axes) = self.vmap.layout(ctx, &args)?;
        let inner_args = VmapProgram::enter_args(&layout, &axes, &args)?;
        let inner_constraint = enter_choices(&layout, &self.constraint)?;
        let (inner, weight) = layout.run(ctx, |ctx| {
            self.vmap.inner.generate_slots(ctx, inner_args, &inner_constraint)
        })?;
        let trace = self.vmap.exit_trace(&self.program, &layout, &inner, args)?;
        Ok((trace, layout.exit(&weight)?.lane_sums()?))
    }

    fn lower_enum(&self, _s: &mut Stager, _args: &[Atom]) -> Result<(ChoiceTree<Atom>, Vec<Atom>)> {
        Err(Error::NotEnumerable {
            site: self.program.name(),
            reason: "vectorised programs are enumerated through their inner program".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::normal;
    use crate::programs::gen;
    use crate::ops::ProbabilisticStager;
    use stoch_foundation::Key;

    fn model() -> Program {
        gen("model", |s, xs| {
            let x = s.choose("x", &normal(), &[xs[0].clone(), Atom::from(1.0)])?;
            Ok(vec![x])
        })
    }

    #[test]
    fn test_repeat_draws_independently() {
        let program = model().repeat(5);
        let trace = program
            .simulate(&mut Context::seeded(Key::new(1)), &[Value::f64(0.0)])
            .unwrap();
        let xs = trace.value("x").unwrap();
        assert_eq!(xs.shape(), &Shape::new(vec![5]));
        for i in 0..5 {
            for j in i + 1..5 {
                assert_ne!(xs.data()[i], xs.data()[j]);
            }
        }
        let (w, _) = program
            .assess(&mut Context::new(), &[Value::f64(0.0)], &trace.choices())
            .unwrap();
        assert!((trace.score() + w).abs() < 1e-10);
    }

    #[test]
    fn test_update_weight_sums_elements() {
        let program = model().vmap(vec![Some(0)], None);
        let means = [Value::from_f64s(&[0.0, 1.0, 2.0])];
        let mut ctx = Context::seeded(Key::new(2));
        let trace = program.simulate(&mut ctx, &means).unwrap();
        let new = ChoiceMap::from_values([("x", Value::from_f64s(&[0.5, 0.5, 0.5]))]);
        let up = program.update(&mut ctx, &trace, &means, &new).unwrap();
        let (w_new, _) = program.assess(&mut ctx, &means, &new).unwrap();
        assert!((up.weight() - (w_new + trace.score())).abs() < 1e-10);
        assert_eq!(up.discarded.value("x"), trace.value("x").as_ref());
    }

    #[test]
    fn test_output_avals_gain_the_axis() {
        let program = model().vmap(vec![Some(0)], None);
        let avals = program
            .output_avals(&[Aval::new(stoch_foundation::DType::F64, vec![4])])
            .unwrap();
        assert_eq!(avals[0].shape, Shape::new(vec![4]));
    }
}
