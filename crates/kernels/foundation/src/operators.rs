//! Elementwise operators.
//!
//! These enums are shared by the stager, the IR primitives and every
//! interpreter so that evaluation rules live in exactly one place.

use serde::{Deserialize, Serialize};

use crate::value::DType;

/// Binary elementwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Addition: `a + b`.
    Add,
    /// Subtraction: `a - b`.
    Sub,
    /// Multiplication: `a * b`.
    Mul,
    /// Division: `a / b`. Always produces `f64`.
    Div,
    /// Exponentiation: `a ^ b`. Always produces `f64`.
    Pow,
    /// Elementwise maximum.
    Max,
    /// Elementwise minimum.
    Min,
    /// Equality: `a == b`.
    Eq,
    /// Inequality: `a != b`.
    Ne,
    /// Less than: `a < b`.
    Lt,
    /// Less than or equal: `a <= b`.
    Le,
    /// Greater than: `a > b`.
    Gt,
    /// Greater than or equal: `a >= b`.
    Ge,
    /// Logical and on truthiness.
    And,
    /// Logical or on truthiness.
    Or,
}

impl BinaryOp {
    /// Apply the operator to two scalars.
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Eq => truth(a == b),
            BinaryOp::Ne => truth(a != b),
            BinaryOp::Lt => truth(a < b),
            BinaryOp::Le => truth(a <= b),
            BinaryOp::Gt => truth(a > b),
            BinaryOp::Ge => truth(a >= b),
            BinaryOp::And => truth(a != 0.0 && b != 0.0),
            BinaryOp::Or => truth(a != 0.0 || b != 0.0),
        }
    }

    /// Result dtype for the given operand dtypes.
    pub fn result_dtype(self, lhs: DType, rhs: DType) -> DType {
        match self {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or => DType::Bool,
            BinaryOp::Div | BinaryOp::Pow => DType::F64,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Max | BinaryOp::Min => {
                DType::promote(lhs, rhs)
            }
        }
    }

    /// Symbol used when pretty-printing graphs.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Unary elementwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Numeric negation: `-x`.
    Neg,
    /// Logical not.
    Not,
    Exp,
    Log,
    Log1p,
    Sqrt,
    Abs,
    Sin,
    Cos,
    Tanh,
    /// Logistic sigmoid `1 / (1 + e^-x)`.
    Logistic,
}

impl UnaryOp {
    /// Apply the operator to a scalar.
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Not => truth(x == 0.0),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Log1p => x.ln_1p(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Logistic => 1.0 / (1.0 + (-x).exp()),
        }
    }

    /// Derivative of the operator at `x`. Logical not has none and reports zero.
    #[inline]
    pub fn derivative(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -1.0,
            UnaryOp::Not => 0.0,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => 1.0 / x,
            UnaryOp::Log1p => 1.0 / (1.0 + x),
            UnaryOp::Sqrt => 0.5 / x.sqrt(),
            UnaryOp::Abs => x.signum(),
            UnaryOp::Sin => x.cos(),
            UnaryOp::Cos => -x.sin(),
            UnaryOp::Tanh => 1.0 - x.tanh().powi(2),
            UnaryOp::Logistic => {
                let s = 1.0 / (1.0 + (-x).exp());
                s * (1.0 - s)
            }
        }
    }

    /// Result dtype for the given operand dtype.
    pub fn result_dtype(self, input: DType) -> DType {
        match self {
            UnaryOp::Not => DType::Bool,
            UnaryOp::Neg | UnaryOp::Abs => match input {
                DType::Bool => DType::I64,
                other => other,
            },
            _ => DType::F64,
        }
    }

    /// Symbol used when pretty-printing graphs.
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Log1p => "log1p",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "abs",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Logistic => "logistic",
        }
    }
}

#[inline]
fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_produce_bool() {
        assert_eq!(BinaryOp::Lt.apply(1.0, 2.0), 1.0);
        assert_eq!(BinaryOp::Ge.apply(1.0, 2.0), 0.0);
        assert_eq!(BinaryOp::Lt.result_dtype(DType::F64, DType::I64), DType::Bool);
    }

    #[test]
    fn arithmetic_promotes() {
        assert_eq!(BinaryOp::Add.result_dtype(DType::I64, DType::F64), DType::F64);
        assert_eq!(BinaryOp::Add.result_dtype(DType::Bool, DType::Bool), DType::I64);
        assert_eq!(BinaryOp::Div.result_dtype(DType::I64, DType::I64), DType::F64);
    }

    #[test]
    fn logistic_derivative_matches_finite_difference() {
        let x = 0.3;
        let h = 1e-6;
        let fd = (UnaryOp::Logistic.apply(x + h) - UnaryOp::Logistic.apply(x - h)) / (2.0 * h);
        assert!((fd - UnaryOp::Logistic.derivative(x)).abs() < 1e-8);
    }
}
