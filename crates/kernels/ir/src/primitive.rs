//! Deterministic primitives.
//!
//! Primitives evaluate on [`Slot`]s, so one definition serves both lane-free
//! evaluation and every vectorised pass.

use std::fmt;

use stoch_foundation::{BinaryOp, DType, Shape, Slot, UnaryOp, Value};

use crate::error::{IrError, Result};
use crate::graph::Aval;

/// Built-in deterministic operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// `select(pred, on_true, on_false)`, elementwise.
    Select,
    Convert(DType),
    /// Sum of every element, as a `f64` scalar.
    ReduceSum,
    /// `x[i]` along the leading axis. Indices are clamped.
    Index,
    /// `[0, 1, .., length-1]` as `i64`.
    Iota { length: usize },
    /// Stack equally shaped operands along a new leading axis.
    Stack,
}

impl Primitive {
    /// Number of inputs, or `None` for variadic primitives.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Primitive::Unary(_) | Primitive::Convert(_) | Primitive::ReduceSum => Some(1),
            Primitive::Binary(_) | Primitive::Index => Some(2),
            Primitive::Select => Some(3),
            Primitive::Iota { .. } => Some(0),
            Primitive::Stack => None,
        }
    }

    fn check_arity(&self, found: usize) -> Result<()> {
        match self.arity() {
            Some(expected) if expected != found => Err(IrError::Arity {
                op: self.to_string(),
                expected,
                found,
            }),
            None if found == 0 => Err(IrError::Arity {
                op: self.to_string(),
                expected: 1,
                found,
            }),
            _ => Ok(()),
        }
    }

    /// Output aval for the given input avals.
    pub fn infer(&self, inputs: &[Aval]) -> Result<Aval> {
        self.check_arity(inputs.len())?;
        let fail = |message: String| IrError::ShapeInference {
            op: self.to_string(),
            message,
        };
        match self {
            Primitive::Unary(op) => Ok(Aval::new(op.result_dtype(inputs[0].dtype), inputs[0].shape.clone())),
            Primitive::Binary(op) => {
                let shape = inputs[0]
                    .shape
                    .broadcast(&inputs[1].shape)
                    .ok_or_else(|| fail(format!("{} vs {}", inputs[0].shape, inputs[1].shape)))?;
                Ok(Aval::new(op.result_dtype(inputs[0].dtype, inputs[1].dtype), shape))
            }
            Primitive::Select => {
                let shape = inputs[0]
                    .shape
                    .broadcast(&inputs[1].shape)
                    .and_then(|s| s.broadcast(&inputs[2].shape))
                    .ok_or_else(|| fail("operands do not broadcast".to_string()))?;
                let dtype = if inputs[1].dtype == inputs[2].dtype {
                    inputs[1].dtype
                } else {
                    DType::promote(inputs[1].dtype, inputs[2].dtype)
                };
                Ok(Aval::new(dtype, shape))
            }
            Primitive::Convert(dtype) => Ok(Aval::new(*dtype, inputs[0].shape.clone())),
            Primitive::ReduceSum => Ok(Aval::scalar(DType::F64)),
            Primitive::Index => {
                if inputs[0].shape.rank() == 0 {
                    return Err(fail("cannot index a scalar".to_string()));
                }
                if inputs[1].shape.rank() != 0 {
                    return Err(fail(format!("index must be scalar, found {}", inputs[1].shape)));
                }
                Ok(Aval::new(inputs[0].dtype, inputs[0].shape.tail()))
            }
            Primitive::Iota { length } => Ok(Aval::new(DType::I64, vec![*length])),
            Primitive::Stack => {
                let first = &inputs[0];
                let mut dtype = first.dtype;
                for aval in &inputs[1..] {
                    if aval.shape != first.shape {
                        return Err(fail(format!("{} vs {}", first.shape, aval.shape)));
                    }
                    if aval.dtype != dtype {
                        dtype = DType::promote(dtype, aval.dtype);
                    }
                }
                Ok(Aval::new(dtype, first.shape.prepend(inputs.len())))
            }
        }
    }

    /// Evaluate on slots.
    pub fn apply(&self, inputs: &[Slot]) -> Result<Slot> {
        self.check_arity(inputs.len())?;
        let out = match self {
            Primitive::Unary(op) => inputs[0].unary(*op),
            Primitive::Binary(op) => Slot::binary(*op, &inputs[0], &inputs[1])?,
            Primitive::Select => Slot::select(&inputs[0], &inputs[1], &inputs[2])?,
            Primitive::Convert(dtype) => inputs[0].cast(*dtype),
            Primitive::ReduceSum => inputs[0].lane_sums()?,
            Primitive::Index => match (&inputs[0], &inputs[1]) {
                (Slot::Uniform(x), Slot::Uniform(i)) => Slot::Uniform(index_clamped(x, i)?),
                _ => {
                    let lanes = Slot::common_lanes(inputs)?.unwrap_or(1);
                    Slot::per_lane::<IrError, _>(inputs, lanes, |_, views| {
                        index_clamped(&views[0], &views[1])
                    })?
                }
            },
            Primitive::Iota { length } => Slot::Uniform(Value::arange(*length)),
            Primitive::Stack => match Slot::common_lanes(inputs)? {
                None => {
                    let values: Vec<Value> = inputs.iter().map(|s| s.value().clone()).collect();
                    Slot::Uniform(Value::stack(&values)?)
                }
                Some(lanes) => Slot::per_lane::<IrError, _>(inputs, lanes, |_, views| {
                    Ok(Value::stack(views)?)
                })?,
            },
        };
        Ok(out)
    }

    /// Evaluate on plain values.
    pub fn eval(&self, inputs: &[Value]) -> Result<Value> {
        let slots: Vec<Slot> = inputs.iter().cloned().map(Slot::Uniform).collect();
        Ok(self.apply(&slots)?.into_value())
    }
}

fn index_clamped(x: &Value, i: &Value) -> Result<Value> {
    let len = x.shape().leading().unwrap_or(0);
    if len == 0 {
        return Err(IrError::ShapeInference {
            op: "index".to_string(),
            message: format!("cannot index shape {}", x.shape()),
        });
    }
    let raw = i.scalar_f64()?;
    let index = if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(len - 1)
    };
    Ok(x.index_axis0(index)?)
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Unary(op) => write!(f, "{}", op.symbol()),
            Primitive::Binary(op) => write!(f, "{}", op.symbol()),
            Primitive::Select => write!(f, "select"),
            Primitive::Convert(dtype) => write!(f, "convert[{}]", dtype),
            Primitive::ReduceSum => write!(f, "reduce_sum"),
            Primitive::Index => write!(f, "index"),
            Primitive::Iota { length } => write!(f, "iota[{}]", length),
            Primitive::Stack => write!(f, "stack"),
        }
    }
}

/// Zero tangent matching an aval.
pub fn zero_tangent(shape: &Shape) -> Value {
    Value::zeros(DType::F64, shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_binary_broadcast() {
        let out = Primitive::Binary(BinaryOp::Add)
            .infer(&[
                Aval::new(DType::I64, vec![3]),
                Aval::scalar(DType::F64),
            ])
            .unwrap();
        assert_eq!(out, Aval::new(DType::F64, vec![3]));
    }

    #[test]
    fn test_arity_checked() {
        let err = Primitive::Select.infer(&[Aval::scalar(DType::Bool)]).unwrap_err();
        assert!(matches!(err, IrError::Arity { expected: 3, found: 1, .. }));
    }

    #[test]
    fn test_index_per_lane() {
        let x = Slot::Uniform(Value::from_f64s(&[10.0, 20.0, 30.0]));
        let i = Slot::Lanes(Value::from_i64s(&[2, 0, 7]));
        let out = Primitive::Index.apply(&[x, i]).unwrap();
        assert_eq!(out, Slot::Lanes(Value::from_f64s(&[30.0, 10.0, 30.0])));
    }

    #[test]
    fn test_stack_mixed_slots() {
        let a = Slot::Uniform(Value::f64(0.5));
        let b = Slot::Lanes(Value::from_f64s(&[1.0, 2.0]));
        let out = Primitive::Stack.apply(&[a, b]).unwrap();
        assert_eq!(out.value().shape().dims(), &[2, 2]);
        assert_eq!(out.lane(1).unwrap().data(), &[0.5, 2.0]);
    }

    #[test]
    fn test_reduce_sum_is_f64() {
        let out = Primitive::ReduceSum.eval(&[Value::from_bools(&[true, true, false])]).unwrap();
        assert_eq!(out, Value::f64(2.0));
    }
}
