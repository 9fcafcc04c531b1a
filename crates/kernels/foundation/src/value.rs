//! Runtime values.
//!
//! A [`Value`] is a dense, row-major n-d array with a [`DType`] and a
//! [`Shape`]. Storage is always `f64`: booleans are stored as `0.0`/`1.0` and
//! integers are stored exactly (within ±2^53). A scalar is a rank-0 value.
//!
//! Broadcasting follows the usual right-aligned rule: trailing dimensions
//! must agree or be `1`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Element type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I64,
    F64,
}

impl DType {
    /// Common dtype for arithmetic on two operands.
    pub fn promote(a: DType, b: DType) -> DType {
        match (a, b) {
            (DType::F64, _) | (_, DType::F64) => DType::F64,
            _ => DType::I64,
        }
    }

    /// Canonicalise a raw element for storage under this dtype.
    #[inline]
    pub fn normalize(self, x: f64) -> f64 {
        match self {
            DType::Bool => {
                if x != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::I64 => x.trunc(),
            DType::F64 => x,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Bool => write!(f, "bool"),
            DType::I64 => write!(f, "i64"),
            DType::F64 => write!(f, "f64"),
        }
    }
}

/// Dimensions of a [`Value`], outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// The rank-0 shape.
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements (1 for scalars).
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Leading dimension, if any.
    pub fn leading(&self) -> Option<usize> {
        self.0.first().copied()
    }

    /// New shape with `n` prepended as the leading dimension.
    pub fn prepend(&self, n: usize) -> Shape {
        let mut dims = Vec::with_capacity(self.0.len() + 1);
        dims.push(n);
        dims.extend_from_slice(&self.0);
        Shape(dims)
    }

    /// Shape without the leading dimension.
    pub fn tail(&self) -> Shape {
        Shape(self.0.iter().skip(1).copied().collect())
    }

    /// Right-aligned broadcast of two shapes.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let mut dims = vec![0; rank];
        for (i, out) in dims.iter_mut().enumerate() {
            let a = dim_from_right(self, rank - 1 - i);
            let b = dim_from_right(other, rank - 1 - i);
            *out = match (a, b) {
                (x, y) if x == y => x,
                (1, y) => y,
                (x, 1) => x,
                _ => return None,
            };
        }
        Some(Shape(dims))
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.rank()];
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }
}

fn dim_from_right(shape: &Shape, offset: usize) -> usize {
    if offset < shape.rank() {
        shape.0[shape.rank() - 1 - offset]
    } else {
        1
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

/// Errors raised by value construction and array manipulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    /// Flat data does not fill the declared shape.
    #[error("data length {len} does not match shape {shape}")]
    DataLength { shape: Shape, len: usize },

    /// Two shapes are not broadcast compatible.
    #[error("cannot broadcast {lhs} with {rhs}")]
    Broadcast { lhs: Shape, rhs: Shape },

    /// Element counts differ between source and target shape.
    #[error("cannot reshape {from} into {to}")]
    Reshape { from: Shape, to: Shape },

    #[error("index {index} out of bounds for axis of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A single element was required.
    #[error("expected a single element, found shape {0}")]
    NotScalar(Shape),

    #[error("axis {axis} out of range for rank {rank}")]
    Axis { axis: usize, rank: usize },

    /// Values that must share a shape do not.
    #[error("cannot combine values of shape {expected} and {found}")]
    ShapeMismatch { expected: Shape, found: Shape },

    #[error("cannot stack an empty list of values")]
    Empty,
}

/// A dense n-d array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    dtype: DType,
    shape: Shape,
    data: Vec<f64>,
}

impl Value {
    /// Build a value from flat row-major data.
    pub fn new(dtype: DType, shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self, ValueError> {
        let shape = shape.into();
        if data.len() != shape.numel() {
            return Err(ValueError::DataLength {
                shape,
                len: data.len(),
            });
        }
        let data = data.into_iter().map(|x| dtype.normalize(x)).collect();
        Ok(Self { dtype, shape, data })
    }

    /// Rank-0 value of the given dtype.
    pub fn scalar(dtype: DType, x: f64) -> Self {
        Self {
            dtype,
            shape: Shape::scalar(),
            data: vec![dtype.normalize(x)],
        }
    }

    pub fn f64(x: f64) -> Self {
        Self::scalar(DType::F64, x)
    }

    pub fn i64(x: i64) -> Self {
        Self::scalar(DType::I64, x as f64)
    }

    pub fn bool(b: bool) -> Self {
        Self::scalar(DType::Bool, if b { 1.0 } else { 0.0 })
    }

    /// Rank-1 `f64` value.
    pub fn from_f64s(xs: &[f64]) -> Self {
        Self {
            dtype: DType::F64,
            shape: Shape::new(vec![xs.len()]),
            data: xs.to_vec(),
        }
    }

    /// Rank-1 `i64` value.
    pub fn from_i64s(xs: &[i64]) -> Self {
        Self {
            dtype: DType::I64,
            shape: Shape::new(vec![xs.len()]),
            data: xs.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Rank-1 `bool` value.
    pub fn from_bools(xs: &[bool]) -> Self {
        Self {
            dtype: DType::Bool,
            shape: Shape::new(vec![xs.len()]),
            data: xs.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Value of the given shape with every element equal to `x`.
    pub fn full(dtype: DType, shape: impl Into<Shape>, x: f64) -> Self {
        let shape = shape.into();
        let n = shape.numel();
        Self {
            dtype,
            shape,
            data: vec![dtype.normalize(x); n],
        }
    }

    pub fn zeros(dtype: DType, shape: impl Into<Shape>) -> Self {
        Self::full(dtype, shape, 0.0)
    }

    /// `[0, 1, .., n-1]` as `i64`.
    pub fn arange(n: usize) -> Self {
        Self {
            dtype: DType::I64,
            shape: Shape::new(vec![n]),
            data: (0..n).map(|i| i as f64).collect(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.rank() == 0
    }

    /// The single element of a one-element value.
    pub fn scalar_f64(&self) -> Result<f64, ValueError> {
        if self.data.len() == 1 {
            Ok(self.data[0])
        } else {
            Err(ValueError::NotScalar(self.shape.clone()))
        }
    }

    /// Scalar as `f64`, if this is rank 0.
    pub fn as_f64(&self) -> Option<f64> {
        self.is_scalar().then(|| self.data[0])
    }

    /// Scalar as `bool`, if this is rank 0.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_f64().map(|x| x != 0.0)
    }

    /// Scalar as `i64`, if this is rank 0.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|x| x as i64)
    }

    /// Convert to another dtype.
    pub fn cast(&self, dtype: DType) -> Value {
        Value {
            dtype,
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| dtype.normalize(x)).collect(),
        }
    }

    /// Apply `f` to every element.
    pub fn map(&self, dtype: DType, f: impl Fn(f64) -> f64) -> Value {
        Value {
            dtype,
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| dtype.normalize(f(x))).collect(),
        }
    }

    /// Sum of every element.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Value, ValueError> {
        let shape = shape.into();
        if shape.numel() != self.data.len() {
            return Err(ValueError::Reshape {
                from: self.shape.clone(),
                to: shape,
            });
        }
        Ok(Value {
            dtype: self.dtype,
            shape,
            data: self.data.clone(),
        })
    }

    pub fn broadcast_to(&self, shape: &Shape) -> Result<Value, ValueError> {
        if &self.shape == shape {
            return Ok(self.clone());
        }
        let indices = broadcast_indices(&self.shape, shape)?;
        Ok(Value {
            dtype: self.dtype,
            shape: shape.clone(),
            data: indices.into_iter().map(|i| self.data[i]).collect(),
        })
    }

    /// Elementwise binary combination with broadcasting.
    pub fn zip_with(
        &self,
        other: &Value,
        dtype: DType,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ValueError> {
        let shape = self
            .shape
            .broadcast(&other.shape)
            .ok_or_else(|| ValueError::Broadcast {
                lhs: self.shape.clone(),
                rhs: other.shape.clone(),
            })?;
        let a = self.broadcast_to(&shape)?;
        let b = other.broadcast_to(&shape)?;
        let data = a
            .data
            .iter()
            .zip(&b.data)
            .map(|(&x, &y)| dtype.normalize(f(x, y)))
            .collect();
        Ok(Value { dtype, shape, data })
    }

    /// Elementwise ternary combination with broadcasting.
    pub fn zip3_with(
        &self,
        b: &Value,
        c: &Value,
        dtype: DType,
        f: impl Fn(f64, f64, f64) -> f64,
    ) -> Result<Value, ValueError> {
        let broadcast_err = || ValueError::Broadcast {
            lhs: self.shape.clone(),
            rhs: b.shape.clone(),
        };
        let shape = self
            .shape
            .broadcast(&b.shape)
            .and_then(|s| s.broadcast(&c.shape))
            .ok_or_else(broadcast_err)?;
        let x = self.broadcast_to(&shape)?;
        let y = b.broadcast_to(&shape)?;
        let z = c.broadcast_to(&shape)?;
        let data = (0..shape.numel())
            .map(|i| dtype.normalize(f(x.data[i], y.data[i], z.data[i])))
            .collect();
        Ok(Value { dtype, shape, data })
    }

    /// Element `i` along the leading axis.
    pub fn index_axis0(&self, index: usize) -> Result<Value, ValueError> {
        let len = self.leading_len()?;
        if index >= len {
            return Err(ValueError::IndexOutOfBounds { index, len });
        }
        let chunk = self.chunk_len();
        Ok(Value {
            dtype: self.dtype,
            shape: self.shape.tail(),
            data: self.data[index * chunk..(index + 1) * chunk].to_vec(),
        })
    }

    /// Select rows of the leading axis, in order, allowing repeats.
    pub fn gather_axis0(&self, indices: &[usize]) -> Result<Value, ValueError> {
        let len = self.leading_len()?;
        let chunk = self.chunk_len();
        let mut data = Vec::with_capacity(indices.len() * chunk);
        for &index in indices {
            if index >= len {
                return Err(ValueError::IndexOutOfBounds { index, len });
            }
            data.extend_from_slice(&self.data[index * chunk..(index + 1) * chunk]);
        }
        Ok(Value {
            dtype: self.dtype,
            shape: self.shape.tail().prepend(indices.len()),
            data,
        })
    }

    /// `[a, b]` tiled twice is `[a, b, a, b]`.
    pub fn tile_axis0(&self, times: usize) -> Result<Value, ValueError> {
        let len = self.leading_len()?;
        let indices: Vec<usize> = (0..times).flat_map(|_| 0..len).collect();
        self.gather_axis0(&indices)
    }

    /// `[a, b]` repeated twice is `[a, a, b, b]`.
    pub fn repeat_axis0(&self, times: usize) -> Result<Value, ValueError> {
        let len = self.leading_len()?;
        let indices: Vec<usize> = (0..len)
            .flat_map(|i| std::iter::repeat(i).take(times))
            .collect();
        self.gather_axis0(&indices)
    }

    /// Stack equally shaped values along a new leading axis.
    pub fn stack(values: &[Value]) -> Result<Value, ValueError> {
        let first = values.first().ok_or(ValueError::Empty)?;
        let mut dtype = first.dtype;
        let mut data = Vec::with_capacity(values.len() * first.numel());
        for v in values {
            if v.shape != first.shape {
                return Err(ValueError::ShapeMismatch {
                    expected: first.shape.clone(),
                    found: v.shape.clone(),
                });
            }
            if v.dtype != dtype {
                dtype = DType::promote(dtype, v.dtype);
            }
            data.extend_from_slice(&v.data);
        }
        Ok(Value {
            dtype,
            shape: first.shape.prepend(values.len()),
            data,
        })
    }

    /// Concatenate values along their existing leading axis.
    pub fn concat_axis0(values: &[Value]) -> Result<Value, ValueError> {
        let first = values.first().ok_or(ValueError::Empty)?;
        first.leading_len()?;
        let tail = first.shape.tail();
        let mut dtype = first.dtype;
        let mut rows = 0;
        let mut data = Vec::new();
        for v in values {
            let len = v.leading_len()?;
            if v.shape.tail() != tail {
                return Err(ValueError::ShapeMismatch {
                    expected: first.shape.clone(),
                    found: v.shape.clone(),
                });
            }
            if v.dtype != dtype {
                dtype = DType::promote(dtype, v.dtype);
            }
            rows += len;
            data.extend_from_slice(&v.data);
        }
        Ok(Value {
            dtype,
            shape: tail.prepend(rows),
            data,
        })
    }

    /// Permute axes: output axis `i` is input axis `perm[i]`.
    pub fn transpose(&self, perm: &[usize]) -> Result<Value, ValueError> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(ValueError::Axis {
                axis: perm.len(),
                rank,
            });
        }
        if let Some(&axis) = perm.iter().find(|&&a| a >= rank) {
            return Err(ValueError::Axis { axis, rank });
        }
        let src_strides = self.shape.strides();
        let dims: Vec<usize> = perm.iter().map(|&p| self.shape.dims()[p]).collect();
        let out_shape = Shape::new(dims);
        let mut data = Vec::with_capacity(self.data.len());
        let mut counter = vec![0usize; rank];
        for _ in 0..out_shape.numel() {
            let src: usize = counter
                .iter()
                .enumerate()
                .map(|(i, &c)| c * src_strides[perm[i]])
                .sum();
            data.push(self.data[src]);
            advance(&mut counter, out_shape.dims());
        }
        Ok(Value {
            dtype: self.dtype,
            shape: out_shape,
            data,
        })
    }

    /// Move axis `from` so that it becomes axis `to`.
    pub fn move_axis(&self, from: usize, to: usize) -> Result<Value, ValueError> {
        let rank = self.rank();
        if from >= rank || to >= rank {
            return Err(ValueError::Axis {
                axis: from.max(to),
                rank,
            });
        }
        if from == to {
            return Ok(self.clone());
        }
        let mut perm: Vec<usize> = (0..rank).filter(|&a| a != from).collect();
        perm.insert(to, from);
        self.transpose(&perm)
    }

    /// Sum over every axis except the leading one.
    pub fn sum_rows(&self) -> Result<Value, ValueError> {
        let len = self.leading_len()?;
        let chunk = self.chunk_len();
        let data = (0..len)
            .map(|i| self.data[i * chunk..(i + 1) * chunk].iter().sum())
            .collect();
        Ok(Value {
            dtype: if self.dtype == DType::Bool {
                DType::I64
            } else {
                self.dtype
            },
            shape: Shape::new(vec![len]),
            data,
        })
    }

    /// Elementwise closeness, treating equal infinities as close.
    pub fn all_close(&self, other: &Value, tol: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(&a, &b)| a == b || (a - b).abs() <= tol)
    }

    fn leading_len(&self) -> Result<usize, ValueError> {
        self.shape
            .leading()
            .ok_or(ValueError::Axis { axis: 0, rank: 0 })
    }

    fn chunk_len(&self) -> usize {
        self.shape.tail().numel()
    }

    fn fmt_element(&self, f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
        match self.dtype {
            DType::Bool => write!(f, "{}", x != 0.0),
            DType::I64 => write!(f, "{}", x as i64),
            DType::F64 => write!(f, "{}", x),
        }
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, axis: usize, offset: usize) -> fmt::Result {
        if axis == self.rank() {
            return self.fmt_element(f, self.data[offset]);
        }
        let stride: usize = self.shape.dims()[axis + 1..].iter().product();
        write!(f, "[")?;
        for i in 0..self.shape.dims()[axis] {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.fmt_block(f, axis + 1, offset + i * stride)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data.is_empty() {
            return write!(f, "{}{}[]", self.dtype, self.shape);
        }
        self.fmt_block(f, 0, 0)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::f64(x)
    }
}

impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::i64(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

/// For every element of `out`, the flat index of the `src` element that
/// broadcasts onto it.
fn broadcast_indices(src: &Shape, out: &Shape) -> Result<Vec<usize>, ValueError> {
    let err = || ValueError::Broadcast {
        lhs: src.clone(),
        rhs: out.clone(),
    };
    if src.rank() > out.rank() {
        return Err(err());
    }
    let offset = out.rank() - src.rank();
    let src_strides = src.strides();
    let mut effective = vec![0usize; out.rank()];
    for (i, &d) in src.dims().iter().enumerate() {
        let od = out.dims()[offset + i];
        if d == od {
            effective[offset + i] = src_strides[i];
        } else if d != 1 {
            return Err(err());
        }
    }
    let mut indices = Vec::with_capacity(out.numel());
    let mut counter = vec![0usize; out.rank()];
    for _ in 0..out.numel() {
        indices.push(counter.iter().zip(&effective).map(|(c, s)| c * s).sum());
        advance(&mut counter, out.dims());
    }
    Ok(indices)
}

/// Row-major increment of a multi-index.
fn advance(counter: &mut [usize], dims: &[usize]) {
    for d in (0..dims.len()).rev() {
        counter[d] += 1;
        if counter[d] < dims[d] {
            return;
        }
        counter[d] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Value {
        Value::new(DType::F64, vec![2, 3], vec![0., 1., 2., 3., 4., 5.]).unwrap()
    }

    #[test]
    fn test_new_checks_length() {
        let err = Value::new(DType::F64, vec![2, 2], vec![1.0]).unwrap_err();
        assert!(matches!(err, ValueError::DataLength { len: 1, .. }));
    }

    #[test]
    fn test_dtype_normalisation() {
        let v = Value::new(DType::Bool, vec![3], vec![0.0, 2.0, -1.0]).unwrap();
        assert_eq!(v.data(), &[0.0, 1.0, 1.0]);
        let i = Value::new(DType::I64, vec![2], vec![1.7, -1.7]).unwrap();
        assert_eq!(i.data(), &[1.0, -1.0]);
    }

    #[test]
    fn test_broadcast_row_and_column() {
        let row = Value::from_f64s(&[10.0, 20.0, 30.0]);
        let sum = grid().zip_with(&row, DType::F64, |a, b| a + b).unwrap();
        assert_eq!(sum.data(), &[10., 21., 32., 13., 24., 35.]);

        let col = Value::new(DType::F64, vec![2, 1], vec![100., 200.]).unwrap();
        let sum = grid().zip_with(&col, DType::F64, |a, b| a + b).unwrap();
        assert_eq!(sum.data(), &[100., 101., 102., 203., 204., 205.]);

        let bad = Value::from_f64s(&[1.0, 2.0]);
        assert!(matches!(
            grid().zip_with(&bad, DType::F64, |a, b| a + b),
            Err(ValueError::Broadcast { .. })
        ));
    }

    #[test]
    fn test_tile_and_repeat() {
        let v = Value::from_i64s(&[1, 2]);
        assert_eq!(v.tile_axis0(2).unwrap().data(), &[1., 2., 1., 2.]);
        assert_eq!(v.repeat_axis0(2).unwrap().data(), &[1., 1., 2., 2.]);
    }

    #[test]
    fn test_index_and_gather() {
        let g = grid();
        assert_eq!(g.index_axis0(1).unwrap().data(), &[3., 4., 5.]);
        let picked = g.gather_axis0(&[1, 1, 0]).unwrap();
        assert_eq!(picked.shape().dims(), &[3, 3]);
        assert!(matches!(
            g.index_axis0(2),
            Err(ValueError::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_transpose_and_move_axis() {
        let t = grid().transpose(&[1, 0]).unwrap();
        assert_eq!(t.shape().dims(), &[3, 2]);
        assert_eq!(t.data(), &[0., 3., 1., 4., 2., 5.]);

        let cube = Value::new(DType::F64, vec![2, 3, 4], (0..24).map(f64::from).collect()).unwrap();
        let moved = cube.move_axis(2, 0).unwrap();
        assert_eq!(moved.shape().dims(), &[4, 2, 3]);
        assert_eq!(moved.index_axis0(1).unwrap().data()[0], 1.0);
    }

    #[test]
    fn test_stack_and_concat() {
        let a = Value::from_f64s(&[1.0, 2.0]);
        let b = Value::from_f64s(&[3.0, 4.0]);
        let s = Value::stack(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(s.shape().dims(), &[2, 2]);
        let c = Value::concat_axis0(&[a, b]).unwrap();
        assert_eq!(c.shape().dims(), &[4]);
        assert!(matches!(Value::stack(&[]), Err(ValueError::Empty)));
    }

    #[test]
    fn test_sum_rows() {
        let rows = grid().sum_rows().unwrap();
        assert_eq!(rows.data(), &[3.0, 12.0]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::bool(true).to_string(), "true");
        assert_eq!(Value::from_i64s(&[1, 2]).to_string(), "[1, 2]");
        assert_eq!(grid().to_string(), "[[0, 1, 2], [3, 4, 5]]");
    }

    #[test]
    fn test_dtype_serde_lowercase() {
        let json = serde_json::to_string(&DType::F64).unwrap();
        assert_eq!(json, "\"f64\"");
    }
}
