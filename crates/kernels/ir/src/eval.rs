//! Plain graph evaluation.
//!
//! Evaluates a graph on concrete values. Custom nodes run their `execute`
//! rule and their elaboration is ignored, so sampling nodes draw from
//! whatever source their rule uses. Interpreters that give sampling a
//! meaning live in the runtime.

use stoch_foundation::Value;

use crate::env::Environment;
use crate::error::{IrError, Result};
use crate::graph::{Aval, Equation, Graph, Op};

/// Evaluate `graph` on `args`.
pub fn eval_graph(graph: &Graph, args: &[Value]) -> Result<Vec<Value>> {
    let mut env: Environment<Value> = Environment::for_graph(graph, args.to_vec())?;
    for eqn in &graph.equations {
        let inputs = env.read_all(&eqn.inputs)?;
        let outputs = eval_equation(eqn, &inputs)?;
        env.write_all(&eqn.outputs, outputs)?;
    }
    env.read_all(&graph.outvars)
}

/// Evaluate one node on concrete inputs.
pub fn eval_equation(eqn: &Equation, inputs: &[Value]) -> Result<Vec<Value>> {
    match &eqn.op {
        Op::Prim(p) => Ok(vec![p.eval(inputs)?]),
        Op::Custom(op) => op.execute(inputs),
        Op::Cond { branches } => {
            let (index, operands) = inputs.split_first().ok_or_else(|| IrError::Arity {
                op: "cond".to_string(),
                expected: 1,
                found: 0,
            })?;
            let taken = branch_index(index, branches.len())?;
            eval_graph(&branches[taken], operands)
        }
        Op::Scan {
            body,
            length,
            num_consts,
            num_carry,
            reverse,
        } => scan_loop(
            ScanShape {
                length: *length,
                num_consts: *num_consts,
                num_carry: *num_carry,
                reverse: *reverse,
            },
            inputs,
            &eqn.out_avals,
            |_, args| eval_graph(body, args),
        ),
    }
}

/// Clamped branch index from a scalar.
pub fn branch_index(index: &Value, num_branches: usize) -> Result<usize> {
    let raw = index.scalar_f64()?;
    if num_branches == 0 {
        return Err(IrError::Arity {
            op: "cond".to_string(),
            expected: 1,
            found: 0,
        });
    }
    Ok(if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(num_branches - 1)
    })
}

/// Static layout of a scan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanShape {
    pub length: usize,
    pub num_consts: usize,
    pub num_carry: usize,
    pub reverse: bool,
}

impl ScanShape {
    /// Iteration order: `0..length`, or reversed.
    pub fn order(&self) -> Vec<usize> {
        if self.reverse {
            (0..self.length).rev().collect()
        } else {
            (0..self.length).collect()
        }
    }
}

/// Drive a scan over concrete values.
///
/// `step(i, body_args)` runs the body for iteration `i` and returns
/// `[carry.., y_i..]`. `out_avals` are the node's output avals, used to
/// shape empty `ys` when `length == 0`.
pub fn scan_loop(
    shape: ScanShape,
    inputs: &[Value],
    out_avals: &[Aval],
    mut step: impl FnMut(usize, &[Value]) -> Result<Vec<Value>>,
) -> Result<Vec<Value>> {
    let ScanShape {
        length,
        num_consts,
        num_carry,
        ..
    } = shape;
    if inputs.len() < num_consts + num_carry {
        return Err(IrError::Arity {
            op: "scan".to_string(),
            expected: num_consts + num_carry,
            found: inputs.len(),
        });
    }
    let consts = &inputs[..num_consts];
    let mut carry = inputs[num_consts..num_consts + num_carry].to_vec();
    let xs = &inputs[num_consts + num_carry..];
    let num_ys = out_avals.len().saturating_sub(num_carry);
    let mut ys: Vec<Vec<Value>> = vec![Vec::with_capacity(length); num_ys];

    for i in shape.order() {
        let mut args = consts.to_vec();
        args.extend(carry.iter().cloned());
        for x in xs {
            args.push(x.index_axis0(i)?);
        }
        let mut outs = step(i, &args)?;
        if outs.len() != num_carry + num_ys {
            return Err(IrError::Arity {
                op: "scan".to_string(),
                expected: num_carry + num_ys,
                found: outs.len(),
            });
        }
        let rest = outs.split_off(num_carry);
        carry = outs;
        for (acc, y) in ys.iter_mut().zip(rest) {
            acc.push(y);
        }
    }

    let mut result = carry;
    for (k, mut acc) in ys.into_iter().enumerate() {
        let aval = &out_avals[num_carry + k];
        if acc.is_empty() {
            result.push(Value::zeros(aval.dtype, aval.shape.clone()));
            continue;
        }
        if shape.reverse {
            acc.reverse();
        }
        result.push(Value::stack(&acc)?);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Atom;
    use crate::stage::stage;
    use stoch_foundation::DType;

    #[test]
    fn test_eval_arithmetic() {
        let graph = stage::<IrError, _>(&[Aval::scalar(DType::F64)], |s, xs| {
            let y = s.mul(&xs[0], 3.0)?;
            Ok(vec![s.add(&y, 1.0)?])
        })
        .unwrap();
        let out = eval_graph(&graph, &[Value::f64(2.0)]).unwrap();
        assert_eq!(out, vec![Value::f64(7.0)]);
    }

    #[test]
    fn test_eval_cond_with_capture() {
        let graph = stage::<IrError, _>(&[Aval::scalar(DType::F64)], |s, xs| {
            let offset = s.mul(&xs[0], 10.0)?;
            let pred = s.gt(&xs[0], 0.0)?;
            s.if_else(
                pred,
                &[xs[0].clone()],
                |s, ops| Ok::<_, IrError>(vec![s.add(&ops[0], &offset)?]),
                |s, ops| Ok(vec![s.neg(&ops[0])?]),
            )
        })
        .unwrap();
        assert_eq!(eval_graph(&graph, &[Value::f64(1.0)]).unwrap(), vec![Value::f64(11.0)]);
        assert_eq!(eval_graph(&graph, &[Value::f64(-2.0)]).unwrap(), vec![Value::f64(2.0)]);
    }

    #[test]
    fn test_eval_scan_cumulative_sum() {
        let graph = stage::<IrError, _>(&[Aval::new(DType::F64, vec![4])], |s, xs| {
            let (carry, ys) = s.scan(4, &[Atom::from(0.0)], &[xs[0].clone()], |s, c, x| {
                let next = s.add(&c[0], &x[0])?;
                Ok::<_, IrError>((vec![next.clone()], vec![next]))
            })?;
            Ok(vec![carry[0].clone(), ys[0].clone()])
        })
        .unwrap();
        let out = eval_graph(&graph, &[Value::from_f64s(&[1.0, 2.0, 3.0, 4.0])]).unwrap();
        assert_eq!(out[0], Value::f64(10.0));
        assert_eq!(out[1], Value::from_f64s(&[1.0, 3.0, 6.0, 10.0]));
    }

    #[test]
    fn test_eval_reverse_scan_keeps_positions() {
        let graph = stage::<IrError, _>(&[Aval::new(DType::F64, vec![3])], |s, xs| {
            let (_, ys) = s.scan_reverse(3, &[Atom::from(0.0)], &[xs[0].clone()], |s, c, x| {
                let next = s.add(&c[0], &x[0])?;
                Ok::<_, IrError>((vec![next.clone()], vec![next]))
            })?;
            Ok(ys)
        })
        .unwrap();
        let out = eval_graph(&graph, &[Value::from_f64s(&[1.0, 2.0, 3.0])]).unwrap();
        assert_eq!(out[0], Value::from_f64s(&[6.0, 5.0, 3.0]));
    }

    #[test]
    fn test_arity_mismatch() {
        let graph = stage::<IrError, _>(&[Aval::scalar(DType::F64)], |_, xs| Ok(xs.to_vec())).unwrap();
        assert!(matches!(
            eval_graph(&graph, &[]),
            Err(IrError::Arity { expected: 1, found: 0, .. })
        ));
    }
}
