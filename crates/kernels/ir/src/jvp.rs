//! Forward-mode differentiation.
//!
//! Pushes tangents through a graph alongside primal values. Primitives use
//! the derivatives defined here; custom nodes use their `differentiate`
//! rule. Tangents are always `f64`; integer and boolean results carry zero
//! tangents.

use stoch_foundation::{BinaryOp, DType, Shape, UnaryOp, Value};

use crate::env::{Environment, FromLiteral};
use crate::error::{IrError, Result};
use crate::eval::{branch_index, ScanShape};
use crate::graph::{Graph, Op};
use crate::primitive::{zero_tangent, Primitive};

/// A primal value paired with its tangent.
#[derive(Debug, Clone, PartialEq)]
pub struct Dual {
    pub primal: Value,
    pub tangent: Value,
}

impl FromLiteral for Dual {
    fn from_literal(value: &Value) -> Self {
        Dual {
            primal: value.clone(),
            tangent: zero_tangent(value.shape()),
        }
    }
}

/// Jacobian-vector product of `graph` at `primals` along `tangents`.
pub fn jvp(graph: &Graph, primals: &[Value], tangents: &[Value]) -> Result<(Vec<Value>, Vec<Value>)> {
    if primals.len() != tangents.len() {
        return Err(IrError::Arity {
            op: "jvp".to_string(),
            expected: primals.len(),
            found: tangents.len(),
        });
    }
    let args = primals
        .iter()
        .zip(tangents)
        .map(|(p, t)| Dual {
            primal: p.clone(),
            tangent: t.cast(DType::F64),
        })
        .collect();
    let outs = jvp_duals(graph, args)?;
    Ok(outs.into_iter().map(|d| (d.primal, d.tangent)).unzip())
}

fn jvp_duals(graph: &Graph, args: Vec<Dual>) -> Result<Vec<Dual>> {
    let mut env: Environment<Dual> = Environment::for_graph(graph, args)?;
    for eqn in &graph.equations {
        let inputs = env.read_all(&eqn.inputs)?;
        let outputs = match &eqn.op {
            Op::Prim(p) => {
                let primals: Vec<Value> = inputs.iter().map(|d| d.primal.clone()).collect();
                let tangents: Vec<Value> = inputs.iter().map(|d| d.tangent.clone()).collect();
                let primal = p.eval(&primals)?;
                let tangent = prim_tangent(p, &primals, &tangents, primal.shape())?;
                vec![Dual { primal, tangent }]
            }
            Op::Custom(op) => {
                let primals: Vec<Value> = inputs.iter().map(|d| d.primal.clone()).collect();
                let tangents: Vec<Value> = inputs.iter().map(|d| d.tangent.clone()).collect();
                let (ps, ts) = op.differentiate(&primals, &tangents)?;
                ps.into_iter()
                    .zip(ts)
                    .map(|(primal, tangent)| Dual { primal, tangent })
                    .collect()
            }
            Op::Cond { branches } => {
                let (index, operands) = inputs.split_first().ok_or_else(|| IrError::Arity {
                    op: "cond".to_string(),
                    expected: 1,
                    found: 0,
                })?;
                let taken = branch_index(&index.primal, branches.len())?;
                jvp_duals(&branches[taken], operands.to_vec())?
            }
            Op::Scan {
                body,
                length,
                num_consts,
                num_carry,
                reverse,
            } => jvp_scan(
                body,
                ScanShape {
                    length: *length,
                    num_consts: *num_consts,
                    num_carry: *num_carry,
                    reverse: *reverse,
                },
                &inputs,
                &eqn.out_avals.iter().map(|a| a.shape.clone()).collect::<Vec<_>>(),
            )?,
        };
        env.write_all(&eqn.outputs, outputs)?;
    }
    env.read_all(&graph.outvars)
}

fn jvp_scan(body: &Graph, shape: ScanShape, inputs: &[Dual], out_shapes: &[Shape]) -> Result<Vec<Dual>> {
    let ScanShape {
        num_consts,
        num_carry,
        ..
    } = shape;
    let consts = &inputs[..num_consts];
    let mut carry = inputs[num_consts..num_consts + num_carry].to_vec();
    let xs = &inputs[num_consts + num_carry..];
    let num_ys = out_shapes.len().saturating_sub(num_carry);
    let mut ys: Vec<Vec<Dual>> = vec![Vec::new(); num_ys];

    for i in shape.order() {
        let mut args = consts.to_vec();
        args.extend(carry.iter().cloned());
        for x in xs {
            args.push(Dual {
                primal: x.primal.index_axis0(i)?,
                tangent: x.tangent.index_axis0(i)?,
            });
        }
        let mut outs = jvp_duals(body, args)?;
        let rest = outs.split_off(num_carry.min(outs.len()));
        carry = outs;
        for (acc, y) in ys.iter_mut().zip(rest) {
            acc.push(y);
        }
    }

    let mut result = carry;
    for (k, mut acc) in ys.into_iter().enumerate() {
        if acc.is_empty() {
            let shape = &out_shapes[num_carry + k];
            result.push(Dual {
                primal: Value::zeros(DType::F64, shape.clone()),
                tangent: zero_tangent(shape),
            });
            continue;
        }
        if shape.reverse {
            acc.reverse();
        }
        let primals: Vec<Value> = acc.iter().map(|d| d.primal.clone()).collect();
        let tangents: Vec<Value> = acc.iter().map(|d| d.tangent.clone()).collect();
        result.push(Dual {
            primal: Value::stack(&primals)?,
            tangent: Value::stack(&tangents)?,
        });
    }
    Ok(result)
}

fn prim_tangent(p: &Primitive, x: &[Value], t: &[Value], out: &Shape) -> Result<Value> {
    let tangent = match p {
        Primitive::Unary(UnaryOp::Not) => zero_tangent(out),
        Primitive::Unary(op) => t[0].zip_with(&x[0], DType::F64, |t, x| t * op.derivative(x))?,
        Primitive::Binary(op) => binary_tangent(*op, &x[0], &x[1], &t[0], &t[1], out)?,
        Primitive::Select => {
            let broadcast = |v: &Value| v.broadcast_to(out);
            let pred = broadcast(&x[0])?;
            let on_true = broadcast(&t[1])?;
            let on_false = broadcast(&t[2])?;
            pred.zip3_with(&on_true, &on_false, DType::F64, |p, a, b| if p != 0.0 { a } else { b })?
        }
        Primitive::Convert(DType::F64) => t[0].cast(DType::F64),
        Primitive::Convert(_) | Primitive::Iota { .. } => zero_tangent(out),
        Primitive::ReduceSum => Value::f64(t[0].sum()),
        Primitive::Index => Primitive::Index.eval(&[t[0].clone(), x[1].clone()])?,
        Primitive::Stack => Value::stack(t)?,
    };
    Ok(tangent)
}

fn binary_tangent(op: BinaryOp, a: &Value, b: &Value, ta: &Value, tb: &Value, out: &Shape) -> Result<Value> {
    let f: fn(f64, f64, f64, f64) -> f64 = match op {
        BinaryOp::Add => |_, _, ta, tb| ta + tb,
        BinaryOp::Sub => |_, _, ta, tb| ta - tb,
        BinaryOp::Mul => |a, b, ta, tb| ta * b + a * tb,
        BinaryOp::Div => |a, b, ta, tb| ta / b - a * tb / (b * b),
        BinaryOp::Pow => |a, b, ta, tb| {
            let base = if ta == 0.0 { 0.0 } else { ta * b * a.powf(b - 1.0) };
            let exponent = if tb == 0.0 || a <= 0.0 { 0.0 } else { tb * a.ln() * a.powf(b) };
            base + exponent
        },
        BinaryOp::Max => |a, b, ta, tb| if a >= b { ta } else { tb },
        BinaryOp::Min => |a, b, ta, tb| if a <= b { ta } else { tb },
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::And
        | BinaryOp::Or => return Ok(zero_tangent(out)),
    };
    let [a, b, ta, tb] = [a, b, ta, tb].map(|v| v.broadcast_to(out));
    let (a, b, ta, tb) = (a?, b?, ta?, tb?);
    let data = (0..out.numel())
        .map(|i| f(a.data()[i], b.data()[i], ta.data()[i], tb.data()[i]))
        .collect();
    Ok(Value::new(DType::F64, out.clone(), data)?)
}
