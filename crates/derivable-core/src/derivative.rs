//! Derivative kinds and ready-to-call derivative functions.

use crate::error::{Error, Result};
use crate::value::{Shape, Value};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The derivative operations offered by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DerivKind {
    /// First derivative of a function of one scalar variable.
    Derivative,
    /// Second derivative of a function of one scalar variable.
    SecondDerivative,
    /// Gradient of a scalar-valued function.
    Gradient,
    /// Jacobian of a scalar- or vector-valued function.
    Jacobian,
    /// Jacobian of an array-valued function.
    MatrixJacobian,
    /// Hessian of a scalar-valued function.
    Hessian,
    /// Jacobian of the Jacobian of a scalar- or vector-valued function.
    DoubleJacobian,
}

impl DerivKind {
    /// All kinds, first order first.
    pub const ALL: [DerivKind; 7] = [
        DerivKind::Derivative,
        DerivKind::Gradient,
        DerivKind::Jacobian,
        DerivKind::MatrixJacobian,
        DerivKind::SecondDerivative,
        DerivKind::Hessian,
        DerivKind::DoubleJacobian,
    ];

    /// Order of differentiation (1 or 2).
    pub fn order(self) -> usize {
        match self {
            DerivKind::Derivative
            | DerivKind::Gradient
            | DerivKind::Jacobian
            | DerivKind::MatrixJacobian => 1,
            DerivKind::SecondDerivative | DerivKind::Hessian | DerivKind::DoubleJacobian => 2,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            DerivKind::Derivative => "derivative",
            DerivKind::SecondDerivative => "second derivative",
            DerivKind::Gradient => "gradient",
            DerivKind::Jacobian => "jacobian",
            DerivKind::MatrixJacobian => "matrix jacobian",
            DerivKind::Hessian => "hessian",
            DerivKind::DoubleJacobian => "double jacobian",
        }
    }

    /// Shape of the result for a function `input -> output`.
    ///
    /// With `n` the input length and `O` the output dimensions, first-order
    /// results have shape `O ++ [n]` and second-order results `O ++ [n, n]`.
    /// Derivatives with respect to a scalar drop the trailing axes.
    pub fn result_shape(self, input: &Shape, output: &Shape) -> Result<Shape> {
        let unsupported = || Error::unsupported_shape(self.name(), input, output);
        if input.rank() > 1 {
            return Err(unsupported());
        }
        let n = input.len();
        match self {
            DerivKind::Derivative | DerivKind::SecondDerivative => {
                if input.is_scalar() {
                    Ok(output.clone())
                } else {
                    Err(unsupported())
                }
            }
            DerivKind::Gradient => {
                if output.is_scalar() {
                    Ok(Shape::Vector(n))
                } else {
                    Err(unsupported())
                }
            }
            DerivKind::Jacobian => {
                if output.rank() <= 1 {
                    Ok(Shape::Array(vec![output.len(), n]))
                } else {
                    Err(unsupported())
                }
            }
            DerivKind::MatrixJacobian => Ok(output.extend(&[n])),
            DerivKind::Hessian => {
                if output.is_scalar() {
                    Ok(Shape::Array(vec![n, n]))
                } else {
                    Err(unsupported())
                }
            }
            DerivKind::DoubleJacobian => {
                if output.rank() <= 1 {
                    Ok(Shape::Array(vec![output.len(), n, n]))
                } else {
                    Err(unsupported())
                }
            }
        }
    }

    /// The natural first derivative of a function `input -> output`.
    pub fn first_order_for(input: &Shape, output: &Shape) -> DerivKind {
        if input.is_scalar() {
            DerivKind::Derivative
        } else if output.is_scalar() {
            DerivKind::Gradient
        } else if output.rank() == 1 {
            DerivKind::Jacobian
        } else {
            DerivKind::MatrixJacobian
        }
    }

    /// The natural second derivative of a function `input -> output`.
    pub fn second_order_for(input: &Shape, output: &Shape) -> Result<DerivKind> {
        if input.is_scalar() {
            Ok(DerivKind::SecondDerivative)
        } else if output.is_scalar() {
            Ok(DerivKind::Hessian)
        } else if output.rank() == 1 {
            Ok(DerivKind::DoubleJacobian)
        } else {
            Err(Error::unsupported_shape("second derivative", input, output))
        }
    }
}

impl fmt::Display for DerivKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Allocating derivative function `y = df(x)`.
pub type AllocatingFn = Arc<dyn Fn(&Value<f64>) -> Result<Value<f64>> + Send + Sync>;

/// In-place derivative function `df(y, x)`.
pub type InPlaceFn = Arc<dyn Fn(&mut Value<f64>, &Value<f64>) -> Result<()> + Send + Sync>;

/// A ready-to-call derivative with allocating and in-place entry points.
///
/// Cloning is cheap; clones share the underlying closures.
#[derive(Clone)]
pub struct DerivativeFn {
    kind: DerivKind,
    result_shape: Option<Shape>,
    eval: AllocatingFn,
    eval_into: Option<InPlaceFn>,
}

impl DerivativeFn {
    /// Wraps an allocating closure.
    pub fn new(kind: DerivKind, eval: AllocatingFn) -> Self {
        Self {
            kind,
            result_shape: None,
            eval,
            eval_into: None,
        }
    }

    /// Wraps a plain closure.
    pub fn from_fn<F>(kind: DerivKind, f: F) -> Self
    where
        F: Fn(&Value<f64>) -> Result<Value<f64>> + Send + Sync + 'static,
    {
        Self::new(kind, Arc::new(f))
    }

    /// Attaches a native in-place implementation.
    pub fn with_in_place(mut self, eval_into: InPlaceFn) -> Self {
        self.eval_into = Some(eval_into);
        self
    }

    /// Declares the shape every result must have.
    pub fn with_result_shape(mut self, shape: Shape) -> Self {
        self.result_shape = Some(shape.normalized());
        self
    }

    /// The derivative operation this function computes.
    pub fn kind(&self) -> DerivKind {
        self.kind
    }

    /// The declared result shape, if known.
    pub fn result_shape(&self) -> Option<&Shape> {
        self.result_shape.as_ref()
    }

    /// Returns true if a native in-place implementation is attached.
    pub fn has_native_in_place(&self) -> bool {
        self.eval_into.is_some()
    }

    /// Evaluates the derivative, allocating the result.
    pub fn call(&self, x: &Value<f64>) -> Result<Value<f64>> {
        let y = (self.eval)(x)?;
        if let Some(expected) = &self.result_shape {
            let actual = y.shape();
            if &actual != expected {
                return Err(Error::shape_mismatch(expected, actual));
            }
        }
        Ok(y)
    }

    /// Evaluates the derivative into `out`.
    ///
    /// The buffer shape is checked before anything is written.
    pub fn call_into(&self, out: &mut Value<f64>, x: &Value<f64>) -> Result<()> {
        if let Some(expected) = &self.result_shape {
            let actual = out.shape();
            if &actual != expected {
                return Err(Error::shape_mismatch(expected, actual));
            }
        }
        match &self.eval_into {
            Some(eval_into) => eval_into(out, x),
            None => {
                let y = self.call(x)?;
                out.assign(&y)
            }
        }
    }

    /// Returns true if both handles share the same underlying function.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.eval, &other.eval)
    }
}

impl fmt::Debug for DerivativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivativeFn")
            .field("kind", &self.kind)
            .field("result_shape", &self.result_shape)
            .field("native_in_place", &self.eval_into.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_order_shapes() {
        let v2 = Shape::Vector(2);
        assert_eq!(
            DerivKind::Gradient.result_shape(&v2, &Shape::Scalar).unwrap(),
            Shape::Vector(2)
        );
        assert_eq!(
            DerivKind::Jacobian.result_shape(&v2, &Shape::Vector(3)).unwrap(),
            Shape::Array(vec![3, 2])
        );
        assert_eq!(
            DerivKind::MatrixJacobian
                .result_shape(&v2, &Shape::Array(vec![2, 2]))
                .unwrap(),
            Shape::Array(vec![2, 2, 2])
        );
        assert_eq!(
            DerivKind::Derivative
                .result_shape(&Shape::Scalar, &Shape::Vector(4))
                .unwrap(),
            Shape::Vector(4)
        );
    }

    #[test]
    fn test_second_order_shapes() {
        let v3 = Shape::Vector(3);
        assert_eq!(
            DerivKind::Hessian.result_shape(&v3, &Shape::Scalar).unwrap(),
            Shape::Array(vec![3, 3])
        );
        assert_eq!(
            DerivKind::DoubleJacobian
                .result_shape(&v3, &Shape::Vector(2))
                .unwrap(),
            Shape::Array(vec![2, 3, 3])
        );
    }

    #[test]
    fn test_unsupported_shapes() {
        let v2 = Shape::Vector(2);
        assert!(DerivKind::Gradient.result_shape(&v2, &Shape::Vector(2)).is_err());
        assert!(DerivKind::Derivative.result_shape(&v2, &Shape::Scalar).is_err());
        assert!(DerivKind::Hessian.result_shape(&v2, &Shape::Vector(1)).is_err());
        assert!(DerivKind::Jacobian
            .result_shape(&v2, &Shape::Array(vec![2, 2]))
            .is_err());
        assert!(DerivKind::Jacobian
            .result_shape(&Shape::Array(vec![2, 2]), &Shape::Scalar)
            .is_err());
    }

    #[test]
    fn test_natural_kinds() {
        let s = Shape::Scalar;
        let v = Shape::Vector(2);
        let m = Shape::Array(vec![2, 2]);
        assert_eq!(DerivKind::first_order_for(&s, &s), DerivKind::Derivative);
        assert_eq!(DerivKind::first_order_for(&v, &s), DerivKind::Gradient);
        assert_eq!(DerivKind::first_order_for(&v, &v), DerivKind::Jacobian);
        assert_eq!(DerivKind::first_order_for(&v, &m), DerivKind::MatrixJacobian);
        assert_eq!(
            DerivKind::second_order_for(&v, &s).unwrap(),
            DerivKind::Hessian
        );
        assert_eq!(
            DerivKind::second_order_for(&v, &v).unwrap(),
            DerivKind::DoubleJacobian
        );
        assert!(DerivKind::second_order_for(&v, &m).is_err());
    }

    #[test]
    fn test_derivative_fn_checks_shapes() {
        let df = DerivativeFn::from_fn(DerivKind::Gradient, |x| {
            let v = x.as_vector()?;
            Ok(Value::Vector(v * 2.0))
        })
        .with_result_shape(Shape::Vector(2));

        let x = Value::from_vec(vec![1.0, 3.0]);
        assert_eq!(df.call(&x).unwrap().flatten(), vec![2.0, 6.0]);

        let mut out = Value::zeros(&Shape::Vector(2));
        df.call_into(&mut out, &x).unwrap();
        assert_eq!(out.flatten(), vec![2.0, 6.0]);

        let mut wrong = Value::zeros(&Shape::Vector(3));
        assert!(matches!(
            df.call_into(&mut wrong, &x),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(wrong.flatten(), vec![0.0; 3]);
    }

    #[test]
    fn test_ptr_eq_follows_clones() {
        let df = DerivativeFn::from_fn(DerivKind::Derivative, |x| Ok(x.clone()));
        let other = DerivativeFn::from_fn(DerivKind::Derivative, |x| Ok(x.clone()));
        assert!(df.ptr_eq(&df.clone()));
        assert!(!df.ptr_eq(&other));
    }

    proptest! {
        #[test]
        fn prop_result_len_is_output_times_input_powers(
            n in 1usize..6,
            out_dims in prop::collection::vec(1usize..4, 0..3),
        ) {
            let input = Shape::Vector(n);
            let output = Shape::from_dims(out_dims);
            let first = DerivKind::first_order_for(&input, &output);
            let shape = first.result_shape(&input, &output).unwrap();
            prop_assert_eq!(shape.len(), output.len() * n);
            prop_assert_eq!(&shape, &output.extend(&[n]));

            match DerivKind::second_order_for(&input, &output) {
                Ok(second) => {
                    let shape = second.result_shape(&input, &output).unwrap();
                    prop_assert_eq!(shape.len(), output.len() * n * n);
                }
                Err(err) => {
                    prop_assert!(output.rank() > 1);
                    prop_assert!(matches!(err, Error::UnsupportedShape { .. }), "{}", err);
                }
            }
        }

        #[test]
        fn prop_scalar_input_keeps_output_shape(out_dims in prop::collection::vec(1usize..4, 0..4)) {
            let output = Shape::from_dims(out_dims);
            for kind in [DerivKind::Derivative, DerivKind::SecondDerivative] {
                prop_assert_eq!(kind.result_shape(&Shape::Scalar, &output).unwrap(), output.clone());
            }
        }
    }
}
