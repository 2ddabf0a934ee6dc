//! Numeric values passed to and returned from user functions.
//!
//! A [`Value`] is either a scalar, a vector, a matrix or a higher-rank
//! tensor. Every backend exchanges results through the canonical row-major
//! flat layout defined by [`Value::flatten`] and [`Value::from_flat`], so a
//! first-order derivative of a function with output shape `O` and input
//! length `n` is always the flat buffer of shape `O ++ [n]`.

use crate::error::{Error, Result};
use crate::types::Real;
use nalgebra::{DMatrix, DVector};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shape of a value.
///
/// The scalar case is kept distinct from a vector of length one. An
/// [`Shape::Array`] with fewer than two dimensions is accepted everywhere
/// and treated as the equivalent scalar or vector shape; see
/// [`Shape::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// A single number.
    Scalar,
    /// A vector of the given length.
    Vector(usize),
    /// An array with two or more dimensions.
    Array(Vec<usize>),
}

impl Shape {
    /// Builds the canonical shape for a list of dimensions.
    pub fn from_dims(dims: Vec<usize>) -> Self {
        match dims.len() {
            0 => Shape::Scalar,
            1 => Shape::Vector(dims[0]),
            _ => Shape::Array(dims),
        }
    }

    /// The canonical form of this shape.
    ///
    /// `Array([])` becomes `Scalar` and `Array([n])` becomes `Vector(n)`.
    pub fn normalized(&self) -> Shape {
        match self {
            Shape::Array(dims) if dims.len() < 2 => Shape::from_dims(dims.clone()),
            other => other.clone(),
        }
    }

    /// Returns the list of dimensions (empty for scalars).
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Shape::Scalar => Vec::new(),
            Shape::Vector(n) => vec![*n],
            Shape::Array(dims) => dims.clone(),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        match self {
            Shape::Scalar => 0,
            Shape::Vector(_) => 1,
            Shape::Array(dims) => dims.len(),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector(n) => *n,
            Shape::Array(dims) => dims.iter().product(),
        }
    }

    /// Returns true if the shape holds no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for the scalar shape.
    pub fn is_scalar(&self) -> bool {
        self.rank() == 0
    }

    /// Appends trailing dimensions, e.g. `vector(3).extend(&[2]) == array[3, 2]`.
    pub fn extend(&self, trailing: &[usize]) -> Self {
        let mut dims = self.dims();
        dims.extend_from_slice(trailing);
        Shape::from_dims(dims)
    }

    /// Integer encoding of the shape: `-1` for scalars, the element count
    /// otherwise.
    pub fn legacy_code(&self) -> i64 {
        if self.is_scalar() {
            -1
        } else {
            self.len() as i64
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Vector(n) => write!(f, "vector({})", n),
            Shape::Array(dims) => write!(f, "array{:?}", dims),
        }
    }
}

/// A numeric argument or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<S: Real> {
    /// A single number.
    Scalar(S),
    /// A column vector.
    Vector(DVector<S>),
    /// A matrix.
    Matrix(DMatrix<S>),
    /// An array of rank three or more, stored row-major.
    Tensor {
        /// Dimensions of the array
        shape: Vec<usize>,
        /// Row-major data
        data: Vec<S>,
    },
}

impl<S: Real> Value<S> {
    /// Creates a scalar value.
    pub fn scalar(s: S) -> Self {
        Value::Scalar(s)
    }

    /// Creates a vector value from its entries.
    pub fn from_vec(v: Vec<S>) -> Self {
        Value::Vector(DVector::from_vec(v))
    }

    /// Creates a matrix value from row-major entries.
    pub fn from_row_slice(nrows: usize, ncols: usize, data: &[S]) -> Self {
        Value::Matrix(DMatrix::from_row_slice(nrows, ncols, data))
    }

    /// Creates a zero-filled value of the given shape.
    pub fn zeros(shape: &Shape) -> Self {
        let data = vec![S::zero(); shape.len()];
        Self::build(shape, data)
    }

    /// Builds a value of the given shape from row-major data.
    ///
    /// Two-dimensional shapes become [`Value::Matrix`], higher ranks become
    /// [`Value::Tensor`]. The shape is normalized first, so an
    /// `Array([n])` yields a vector.
    pub fn from_flat(shape: &Shape, data: Vec<S>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(Error::shape_mismatch(
                format!("{} elements for {}", shape.len(), shape),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Self::build(shape, data))
    }

    /// Builds a value from its dimensions and row-major data, picking the
    /// variant that matches the rank.
    pub fn tensor(dims: Vec<usize>, data: Vec<S>) -> Result<Self> {
        Self::from_flat(&Shape::from_dims(dims), data)
    }

    fn build(shape: &Shape, mut data: Vec<S>) -> Self {
        match shape.normalized() {
            Shape::Scalar => Value::Scalar(data.swap_remove(0)),
            Shape::Vector(_) => Value::Vector(DVector::from_vec(data)),
            Shape::Array(dims) if dims.len() == 2 => {
                Value::Matrix(DMatrix::from_row_slice(dims[0], dims[1], &data))
            }
            Shape::Array(dims) => Value::Tensor { shape: dims, data },
        }
    }

    /// Returns the shape of this value.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::Scalar,
            Value::Vector(v) => Shape::Vector(v.len()),
            Value::Matrix(m) => Shape::Array(vec![m.nrows(), m.ncols()]),
            Value::Tensor { shape, .. } => Shape::from_dims(shape.clone()),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
            Value::Matrix(m) => m.len(),
            Value::Tensor { data, .. } => data.len(),
        }
    }

    /// Returns true if the value holds no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the scalar, or an evaluation error for any other kind.
    pub fn as_scalar(&self) -> Result<&S> {
        match self {
            Value::Scalar(s) => Ok(s),
            other => Err(Error::evaluation(format!(
                "expected a scalar argument, got {}",
                other.shape()
            ))),
        }
    }

    /// Returns the vector, or an evaluation error for any other kind.
    pub fn as_vector(&self) -> Result<&DVector<S>> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(Error::evaluation(format!(
                "expected a vector argument, got {}",
                other.shape()
            ))),
        }
    }

    /// Returns the vector if it has exactly `n` entries.
    pub fn as_vector_of(&self, n: usize) -> Result<&DVector<S>> {
        let v = self.as_vector()?;
        if v.len() != n {
            return Err(Error::evaluation(format!(
                "expected a vector of length {}, got length {}",
                n,
                v.len()
            )));
        }
        Ok(v)
    }

    /// Returns the matrix, or an evaluation error for any other kind.
    pub fn as_matrix(&self) -> Result<&DMatrix<S>> {
        match self {
            Value::Matrix(m) => Ok(m),
            other => Err(Error::evaluation(format!(
                "expected a matrix argument, got {}",
                other.shape()
            ))),
        }
    }

    /// Copies the entries out in row-major order.
    pub fn flatten(&self) -> Vec<S> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::Vector(v) => v.iter().cloned().collect(),
            Value::Matrix(m) => {
                let mut out = Vec::with_capacity(m.len());
                for i in 0..m.nrows() {
                    for j in 0..m.ncols() {
                        out.push(m[(i, j)].clone());
                    }
                }
                out
            }
            Value::Tensor { data, .. } => data.clone(),
        }
    }

    /// Overwrites the entries from row-major data without reallocating.
    pub fn write_flat(&mut self, data: &[S]) -> Result<()> {
        if data.len() != self.len() {
            return Err(Error::shape_mismatch(
                format!("{} elements for {}", self.len(), self.shape()),
                format!("{} elements", data.len()),
            ));
        }
        for (k, src) in data.iter().enumerate() {
            self.set_flat(k, src.clone());
        }
        Ok(())
    }

    /// Sets the entry with row-major index `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k` is not below [`Value::len`].
    pub fn set_flat(&mut self, k: usize, value: S) {
        match self {
            Value::Scalar(s) => {
                assert_eq!(k, 0, "index {} out of range for a scalar", k);
                *s = value;
            }
            Value::Vector(v) => v[k] = value,
            Value::Matrix(m) => {
                let ncols = m.ncols();
                m[(k / ncols, k % ncols)] = value;
            }
            Value::Tensor { data, .. } => data[k] = value,
        }
    }

    /// Copies `src` into `self`, failing if the shapes differ.
    pub fn assign(&mut self, src: &Value<S>) -> Result<()> {
        let (expected, actual) = (src.shape(), self.shape());
        if expected != actual {
            return Err(Error::shape_mismatch(expected, actual));
        }
        self.write_flat(&src.flatten())
    }

    /// Applies `f` to every entry, keeping the structure.
    pub fn map<T: Real>(&self, mut f: impl FnMut(&S) -> T) -> Value<T> {
        match self {
            Value::Scalar(s) => Value::Scalar(f(s)),
            Value::Vector(v) => Value::Vector(DVector::from_iterator(v.len(), v.iter().map(f))),
            Value::Matrix(m) => {
                Value::Matrix(DMatrix::from_iterator(m.nrows(), m.ncols(), m.iter().map(f)))
            }
            Value::Tensor { shape, data } => {
                Value::build(&Shape::from_dims(shape.clone()), data.iter().map(f).collect())
            }
        }
    }

    /// Applies `f` to every entry together with its row-major index.
    pub fn map_indexed<T: Real>(&self, mut f: impl FnMut(usize, &S) -> T) -> Value<T> {
        let shape = self.shape();
        let data: Vec<T> = self
            .flatten()
            .iter()
            .enumerate()
            .map(|(k, s)| f(k, s))
            .collect();
        Value::build(&shape, data)
    }
}

impl<S: Real> From<DVector<S>> for Value<S> {
    fn from(v: DVector<S>) -> Self {
        Value::Vector(v)
    }
}

impl<S: Real> From<DMatrix<S>> for Value<S> {
    fn from(m: DMatrix<S>) -> Self {
        Value::Matrix(m)
    }
}

impl<S: Real> From<Vec<S>> for Value<S> {
    fn from(v: Vec<S>) -> Self {
        Value::from_vec(v)
    }
}

impl From<f64> for Value<f64> {
    fn from(s: f64) -> Self {
        Value::Scalar(s)
    }
}
