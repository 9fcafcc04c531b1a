//! Lane slots.
//!
//! A vectorised pass runs one graph over many lanes at once. Each variable of
//! such a pass is held in a [`Slot`]: either one value shared by every lane,
//! or a value whose leading axis enumerates the lanes.
//!
//! Elementwise operations align the two forms before broadcasting. With a
//! per-lane rank `R` (the largest per-lane rank of the operands), a lane
//! value of per-lane shape `s` is viewed as `[L, 1.., s]` and a uniform value
//! as `[1, 1.., s]`, so that the usual right-aligned rule applies to the
//! per-lane shapes while the lane axis stays in front.

use crate::operators::{BinaryOp, UnaryOp};
use crate::value::{DType, Shape, Value, ValueError};

/// How one variable is held during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// One value shared by every lane.
    Uniform(Value),
    /// Leading axis indexes lanes.
    Lanes(Value),
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Uniform(value)
    }
}

impl Slot {
    /// Wrap a value as lanes when a lane count is active.
    pub fn with_lanes(lanes: Option<usize>, value: Value) -> Slot {
        match lanes {
            Some(_) => Slot::Lanes(value),
            None => Slot::Uniform(value),
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Slot::Uniform(v) | Slot::Lanes(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Slot::Uniform(v) | Slot::Lanes(v) => v,
        }
    }

    pub fn is_lanes(&self) -> bool {
        matches!(self, Slot::Lanes(_))
    }

    /// Number of lanes held, or `None` for a uniform slot.
    pub fn lane_count(&self) -> Option<usize> {
        match self {
            Slot::Uniform(_) => None,
            Slot::Lanes(v) => v.shape().leading(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.value().dtype()
    }

    /// Shape seen by a single lane.
    pub fn lane_shape(&self) -> Shape {
        match self {
            Slot::Uniform(v) => v.shape().clone(),
            Slot::Lanes(v) => v.shape().tail(),
        }
    }

    /// The value seen by lane `i`.
    pub fn lane(&self, i: usize) -> Result<Value, ValueError> {
        match self {
            Slot::Uniform(v) => Ok(v.clone()),
            Slot::Lanes(v) => v.index_axis0(i),
        }
    }

    /// Explicit `[lanes, ..]` layout of this slot.
    pub fn materialize(&self, lanes: usize) -> Result<Value, ValueError> {
        match self {
            Slot::Uniform(v) => v.reshape(v.shape().prepend(1))?.tile_axis0(lanes),
            Slot::Lanes(v) => {
                if v.shape().leading() != Some(lanes) {
                    return Err(ValueError::ShapeMismatch {
                        expected: v.shape().tail().prepend(lanes),
                        found: v.shape().clone(),
                    });
                }
                Ok(v.clone())
            }
        }
    }

    /// Stack per-lane values into a lane slot.
    pub fn from_lane_values(values: &[Value]) -> Result<Slot, ValueError> {
        Ok(Slot::Lanes(Value::stack(values)?))
    }

    /// Lane count shared by a set of slots.
    ///
    /// Uniform slots impose nothing; two lane slots must agree.
    pub fn common_lanes<'a>(
        slots: impl IntoIterator<Item = &'a Slot>,
    ) -> Result<Option<usize>, ValueError> {
        let mut lanes: Option<(usize, &Slot)> = None;
        for slot in slots {
            if let Some(n) = slot.lane_count() {
                match lanes {
                    None => lanes = Some((n, slot)),
                    Some((m, first)) if m != n => {
                        return Err(ValueError::ShapeMismatch {
                            expected: first.value().shape().clone(),
                            found: slot.value().shape().clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(lanes.map(|(n, _)| n))
    }

    /// Lane `l` becomes lanes `l*k .. l*k+k`. Uniform slots are unchanged.
    pub fn repeat_lanes(&self, k: usize) -> Result<Slot, ValueError> {
        match self {
            Slot::Uniform(_) => Ok(self.clone()),
            Slot::Lanes(v) => Ok(Slot::Lanes(v.repeat_axis0(k)?)),
        }
    }

    /// Lanes are tiled `k` times. Uniform slots are unchanged.
    pub fn tile_lanes(&self, k: usize) -> Result<Slot, ValueError> {
        match self {
            Slot::Uniform(_) => Ok(self.clone()),
            Slot::Lanes(v) => Ok(Slot::Lanes(v.tile_axis0(k)?)),
        }
    }

    /// Keep the given lanes, in order. Uniform slots are unchanged.
    pub fn gather_lanes(&self, indices: &[usize]) -> Result<Slot, ValueError> {
        match self {
            Slot::Uniform(_) => Ok(self.clone()),
            Slot::Lanes(v) => Ok(Slot::Lanes(v.gather_axis0(indices)?)),
        }
    }

    /// Sum over each lane's elements.
    pub fn lane_sums(&self) -> Result<Slot, ValueError> {
        match self {
            Slot::Uniform(v) => Ok(Slot::Uniform(Value::f64(v.sum()))),
            Slot::Lanes(v) => Ok(Slot::Lanes(v.sum_rows()?.cast(DType::F64))),
        }
    }

    /// Sum of every element across every lane.
    pub fn total(&self) -> f64 {
        self.value().sum()
    }

    pub fn cast(&self, dtype: DType) -> Slot {
        match self {
            Slot::Uniform(v) => Slot::Uniform(v.cast(dtype)),
            Slot::Lanes(v) => Slot::Lanes(v.cast(dtype)),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Slot {
        let dtype = op.result_dtype(self.dtype());
        match self {
            Slot::Uniform(v) => Slot::Uniform(v.map(dtype, |x| op.apply(x))),
            Slot::Lanes(v) => Slot::Lanes(v.map(dtype, |x| op.apply(x))),
        }
    }

    pub fn binary(op: BinaryOp, lhs: &Slot, rhs: &Slot) -> Result<Slot, ValueError> {
        let dtype = op.result_dtype(lhs.dtype(), rhs.dtype());
        let (lanes, values) = Slot::align(&[lhs, rhs])?;
        let out = values[0].zip_with(&values[1], dtype, |a, b| op.apply(a, b))?;
        Ok(Slot::with_lanes(lanes, out))
    }

    pub fn add(&self, other: &Slot) -> Result<Slot, ValueError> {
        Slot::binary(BinaryOp::Add, self, other)
    }

    /// Elementwise `pred ? on_true : on_false`.
    pub fn select(pred: &Slot, on_true: &Slot, on_false: &Slot) -> Result<Slot, ValueError> {
        let dtype = if on_true.dtype() == on_false.dtype() {
            on_true.dtype()
        } else {
            DType::promote(on_true.dtype(), on_false.dtype())
        };
        let (lanes, values) = Slot::align(&[pred, on_true, on_false])?;
        let out = values[0].zip3_with(&values[1], &values[2], dtype, |p, t, f| {
            if p != 0.0 {
                t
            } else {
                f
            }
        })?;
        Ok(Slot::with_lanes(lanes, out))
    }

    /// Per-lane choice among `options` by an integer index.
    ///
    /// Indices are clamped into range. A uniform index returns the chosen
    /// option unchanged.
    pub fn mux(index: &Slot, options: &[Slot]) -> Result<Slot, ValueError> {
        if options.is_empty() {
            return Err(ValueError::Empty);
        }
        match index {
            Slot::Uniform(v) => Ok(options[clamp_index(v.scalar_f64()?, options.len())].clone()),
            Slot::Lanes(v) => {
                let lanes = v.shape().leading().unwrap_or(0);
                let mut rows = Vec::with_capacity(lanes);
                for l in 0..lanes {
                    let i = clamp_index(v.index_axis0(l)?.scalar_f64()?, options.len());
                    rows.push(options[i].lane(l)?);
                }
                Slot::from_lane_values(&rows)
            }
        }
    }

    /// Run `f` once per lane over the lane views of `inputs` and stack the
    /// results.
    pub fn per_lane<E, F>(inputs: &[Slot], lanes: usize, mut f: F) -> Result<Slot, E>
    where
        E: From<ValueError>,
        F: FnMut(usize, &[Value]) -> Result<Value, E>,
    {
        let mut rows = Vec::with_capacity(lanes);
        for l in 0..lanes {
            let views = inputs
                .iter()
                .map(|s| s.lane(l))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(f(l, &views)?);
        }
        Ok(Slot::from_lane_values(&rows)?)
    }

    /// Bring slots into a common layout for elementwise broadcasting.
    ///
    /// Returns the shared lane count and one value per slot. Without lanes the
    /// values are returned as they are.
    pub fn align(slots: &[&Slot]) -> Result<(Option<usize>, Vec<Value>), ValueError> {
        let lanes = Slot::common_lanes(slots.iter().copied())?;
        if lanes.is_none() {
            return Ok((None, slots.iter().map(|s| s.value().clone()).collect()));
        }
        let rank = slots
            .iter()
            .map(|s| s.lane_shape().rank())
            .max()
            .unwrap_or(0);
        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            let lane_shape = slot.lane_shape();
            let lead = match slot {
                Slot::Uniform(_) => 1,
                Slot::Lanes(v) => v.shape().leading().unwrap_or(1),
            };
            let mut dims = Vec::with_capacity(rank + 1);
            dims.push(lead);
            dims.extend(std::iter::repeat(1).take(rank - lane_shape.rank()));
            dims.extend_from_slice(lane_shape.dims());
            values.push(slot.value().reshape(dims)?);
        }
        Ok((lanes, values))
    }
}

fn clamp_index(x: f64, len: usize) -> usize {
    if x <= 0.0 {
        0
    } else {
        (x as usize).min(len - 1)
    }
}
