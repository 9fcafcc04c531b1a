//! IR graph type definitions.
//!
//! A [`Graph`] is a closed, flattened program: typed inputs, embedded
//! constants, an ordered list of [`Equation`]s and output atoms. Every
//! variable is written exactly once, before it is read.
//!
//! # Example
//!
//! ```text
//! { lambda ; %0:f64[] .
//!   %1:bool[] = assume[flip @ x] %0
//!   %2:f64[] = convert[f64] %1
//!   %3:f64[] = add %2 1.0
//!   in (%3) }
//! ```

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use stoch_foundation::{DType, Shape, Value};

use crate::custom::{CustomOp, OpKind};
use crate::primitive::Primitive;

/// Graph variable.
///
/// Variables are numbered by the stager. Ids are unique across a graph and
/// all of its sub-graphs staged in the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

impl Var {
    /// Output position whose value is discarded.
    pub const DROP: Var = Var(u32::MAX);

    pub fn is_drop(self) -> bool {
        self == Var::DROP
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_drop() {
            write!(f, "_")
        } else {
            write!(f, "%{}", self.0)
        }
    }
}

/// Operand of an equation: a variable or an inline literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Var(Var),
    Lit(Value),
}

impl Atom {
    pub fn as_var(&self) -> Option<Var> {
        match self {
            Atom::Var(v) => Some(*v),
            Atom::Lit(_) => None,
        }
    }
}

impl From<Var> for Atom {
    fn from(v: Var) -> Self {
        Atom::Var(v)
    }
}

impl From<&Atom> for Atom {
    fn from(a: &Atom) -> Self {
        a.clone()
    }
}

impl From<Value> for Atom {
    fn from(v: Value) -> Self {
        Atom::Lit(v)
    }
}

impl From<f64> for Atom {
    fn from(x: f64) -> Self {
        Atom::Lit(Value::f64(x))
    }
}

impl From<i64> for Atom {
    fn from(x: i64) -> Self {
        Atom::Lit(Value::i64(x))
    }
}

impl From<bool> for Atom {
    fn from(b: bool) -> Self {
        Atom::Lit(Value::bool(b))
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Var(v) => write!(f, "{}", v),
            Atom::Lit(v) => write!(f, "{}", v),
        }
    }
}

/// Abstract value: the dtype and shape of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Aval {
    pub dtype: DType,
    pub shape: Shape,
}

impl Aval {
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }

    pub fn of(value: &Value) -> Self {
        Self::new(value.dtype(), value.shape().clone())
    }
}

impl fmt::Display for Aval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

/// Node operation.
#[derive(Debug, Clone)]
pub enum Op {
    /// Deterministic elementwise or structural primitive.
    Prim(Primitive),

    /// Indexed branch. Inputs are `[index, operands..]`; each branch takes the
    /// operands and returns the outputs. Out-of-range indices are clamped.
    Cond { branches: Vec<Arc<Graph>> },

    /// Fixed-length loop with carried state.
    ///
    /// Inputs are `[consts.., carry.., xs..]`. The body takes
    /// `[consts.., carry.., x_i..]` and returns `[carry.., y_i..]`. Outputs
    /// are `[carry.., ys..]` with each `ys` stacked along a new leading axis.
    Scan {
        body: Arc<Graph>,
        length: usize,
        num_consts: usize,
        num_carry: usize,
        reverse: bool,
    },

    /// Extensible node with pluggable rules.
    Custom(CustomOp),
}

impl Op {
    /// Kind of a custom node, if this is one.
    pub fn custom_kind(&self) -> Option<&OpKind> {
        match self {
            Op::Custom(op) => Some(op.kind()),
            _ => None,
        }
    }

    /// Sub-graphs owned by this node.
    pub fn sub_graphs(&self) -> Vec<&Arc<Graph>> {
        match self {
            Op::Cond { branches } => branches.iter().collect(),
            Op::Scan { body, .. } => vec![body],
            Op::Prim(_) | Op::Custom(_) => Vec::new(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Op::Prim(p) => p.to_string(),
            Op::Cond { .. } => "cond".to_string(),
            Op::Scan { .. } => "scan".to_string(),
            Op::Custom(op) => op.kind().to_string(),
        }
    }
}

/// One node of a graph.
#[derive(Debug, Clone)]
pub struct Equation {
    pub op: Op,
    pub inputs: SmallVec<[Atom; 4]>,
    pub outputs: SmallVec<[Var; 2]>,
    /// Output avals, one per output.
    pub out_avals: SmallVec<[Aval; 2]>,
}

/// A closed, flattened program.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub invars: Vec<Var>,
    pub in_avals: Vec<Aval>,
    pub constvars: Vec<Var>,
    pub consts: Vec<Value>,
    pub equations: Vec<Equation>,
    pub outvars: Vec<Atom>,
    pub out_avals: Vec<Aval>,
}

impl Graph {
    /// True if any node, including nodes of sub-graphs, satisfies `pred`.
    pub fn any_node(&self, pred: &mut dyn FnMut(&Equation) -> bool) -> bool {
        for eqn in &self.equations {
            if pred(eqn) {
                return true;
            }
            for g in eqn.op.sub_graphs() {
                if g.any_node(&mut *pred) {
                    return true;
                }
            }
        }
        false
    }

    /// True if a custom node of `kind` is reachable.
    pub fn contains_kind(&self, kind: &OpKind) -> bool {
        self.any_node(&mut |eqn| eqn.op.custom_kind() == Some(kind))
    }

    /// True if any assume, observe or trace node is reachable.
    pub fn is_probabilistic(&self) -> bool {
        self.any_node(&mut |eqn| {
            matches!(
                eqn.op.custom_kind(),
                Some(OpKind::Assume | OpKind::Observe | OpKind::Trace)
            )
        })
    }

    /// Largest variable id used anywhere in the graph, plus one.
    pub fn next_var(&self) -> u32 {
        let vars = self
            .invars
            .iter()
            .chain(&self.constvars)
            .chain(self.equations.iter().flat_map(|e| e.outputs.iter()));
        let own = vars
            .filter(|v| !v.is_drop())
            .map(|v| v.0 + 1)
            .max()
            .unwrap_or(0);
        self.equations
            .iter()
            .flat_map(|e| e.op.sub_graphs())
            .map(|g| g.next_var())
            .fold(own, u32::max)
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        write!(f, "{{ lambda ")?;
        for (i, (v, c)) in self.constvars.iter().zip(&self.consts).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", v, Aval::of(c))?;
        }
        write!(f, "; ")?;
        for (i, (v, a)) in self.invars.iter().zip(&self.in_avals).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", v, a)?;
        }
        writeln!(f, " .")?;
        for eqn in &self.equations {
            write!(f, "{}  ", pad)?;
            for (i, (v, a)) in eqn.outputs.iter().zip(&eqn.out_avals).enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}:{}", v, a)?;
            }
            write!(f, " = ")?;
            match &eqn.op {
                Op::Prim(p) => write!(f, "{}", p)?,
                Op::Custom(op) => write!(f, "{}", op)?,
                Op::Cond { branches } => {
                    write!(f, "cond[")?;
                    for branch in branches {
                        writeln!(f)?;
                        write!(f, "{}    ", pad)?;
                        branch.fmt_indented(f, indent + 2)?;
                    }
                    write!(f, "]")?;
                }
                Op::Scan {
                    body,
                    length,
                    num_consts,
                    num_carry,
                    reverse,
                } => {
                    write!(
                        f,
                        "scan[length={} consts={} carry={} reverse={} ",
                        length, num_consts, num_carry, reverse
                    )?;
                    body.fmt_indented(f, indent + 2)?;
                    write!(f, "]")?;
                }
            }
            for input in &eqn.inputs {
                write!(f, " {}", input)?;
            }
            writeln!(f)?;
        }
        write!(f, "{}  in (", pad)?;
        for (i, out) in self.outvars.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", out)?;
        }
        write!(f, ") }}")
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avals_order_by_dtype_then_shape() {
        let mut avals = vec![
            Aval::new(DType::F64, vec![2]),
            Aval::scalar(DType::Bool),
            Aval::scalar(DType::F64),
            Aval::new(DType::I64, vec![3, 1]),
        ];
        avals.sort();
        assert_eq!(
            avals,
            vec![
                Aval::scalar(DType::Bool),
                Aval::new(DType::I64, vec![3, 1]),
                Aval::scalar(DType::F64),
                Aval::new(DType::F64, vec![2]),
            ]
        );
    }
}
