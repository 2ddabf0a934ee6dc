//! Central finite differences as a [`NumericBackend`].

use crate::target::Target;
use derivable_core::backend::NumericBackend;
use derivable_core::derivative::DerivKind;
use derivable_core::error::{Error, Result};
use derivable_core::function::NumericFn;
use derivable_core::value::{Shape, Value};
use log::trace;

/// Finite-difference differentiation on `f64` evaluations.
///
/// The step for coordinate `j` is `h * max(1, |x_j|)`, with `h` either the
/// configured step or `sqrt(ε)` for first-order and `ε^(1/4)` for
/// second-order derivatives.
#[derive(Debug, Clone, Default)]
pub struct FiniteDifferences {
    step: Option<f64>,
}

impl FiniteDifferences {
    /// Backend name.
    pub const NAME: &'static str = "finite-diff";

    /// Creates a backend choosing its step from machine epsilon.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with a fixed relative step.
    pub fn with_step(step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(Error::invalid_configuration(
                "step must be positive and finite",
                "fd_step",
                step.to_string(),
            ));
        }
        Ok(Self { step: Some(step) })
    }

    fn step_for(&self, order: usize, xj: f64) -> f64 {
        let h = self.step.unwrap_or(match order {
            1 => f64::EPSILON.sqrt(),
            _ => f64::EPSILON.powf(0.25),
        });
        h * xj.abs().max(1.0)
    }
}

struct Stencil<'a> {
    f: &'a NumericFn,
    shape: Shape,
    base: Vec<f64>,
    output: Option<Shape>,
}

impl<'a> Stencil<'a> {
    fn new(f: &'a NumericFn, x: &Value<f64>) -> Self {
        Self {
            f,
            shape: x.shape(),
            base: x.flatten(),
            output: None,
        }
    }

    /// Evaluates `f` at the base point shifted by `(index, delta)` pairs.
    fn eval(&mut self, shifts: &[(usize, f64)]) -> Result<Vec<f64>> {
        let mut data = self.base.clone();
        for &(index, delta) in shifts {
            data[index] += delta;
        }
        let y = (self.f)(&Value::from_flat(&self.shape, data)?)?;
        let shape = y.shape();
        match &self.output {
            Some(expected) if *expected != shape => {
                return Err(Error::evaluation(format!(
                    "output shape changed between evaluations ({} vs {})",
                    expected, shape
                )))
            }
            Some(_) => {}
            None => self.output = Some(shape),
        }
        Ok(y.flatten())
    }
}

impl FiniteDifferences {
    fn fill(&self, kind: DerivKind, f: &NumericFn, point: &Value<f64>, target: &mut Target<'_>) -> Result<()> {
        let mut stencil = Stencil::new(f, point);
        let center = stencil.eval(&[])?;
        let input = point.shape();
        let output = stencil.output.clone().unwrap_or(Shape::Scalar);
        let result_shape = kind.result_shape(&input, &output)?;
        let out = target.buffer(&result_shape)?;

        let n = point.len();
        let m = center.len();
        let base = point.flatten();

        if kind.order() == 1 {
            for j in 0..n {
                let h = self.step_for(1, base[j]);
                let plus = stencil.eval(&[(j, h)])?;
                let minus = stencil.eval(&[(j, -h)])?;
                for o in 0..m {
                    out.set_flat(o * n + j, (plus[o] - minus[o]) / (2.0 * h));
                }
            }
        } else {
            for i in 0..n {
                let hi = self.step_for(2, base[i]);
                let plus = stencil.eval(&[(i, hi)])?;
                let minus = stencil.eval(&[(i, -hi)])?;
                for o in 0..m {
                    out.set_flat(
                        o * n * n + i * n + i,
                        (plus[o] - 2.0 * center[o] + minus[o]) / (hi * hi),
                    );
                }
                for j in (i + 1)..n {
                    let hj = self.step_for(2, base[j]);
                    let pp = stencil.eval(&[(i, hi), (j, hj)])?;
                    let pm = stencil.eval(&[(i, hi), (j, -hj)])?;
                    let mp = stencil.eval(&[(i, -hi), (j, hj)])?;
                    let mm = stencil.eval(&[(i, -hi), (j, -hj)])?;
                    for o in 0..m {
                        let mixed = (pp[o] - pm[o] - mp[o] + mm[o]) / (4.0 * hi * hj);
                        out.set_flat(o * n * n + i * n + j, mixed);
                        out.set_flat(o * n * n + j * n + i, mixed);
                    }
                }
            }
        }

        trace!("finite differences: {} of {} -> {}", kind, input, output);
        Ok(())
    }
}

impl NumericBackend for FiniteDifferences {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn differentiate(&self, kind: DerivKind, f: &NumericFn, point: &Value<f64>) -> Result<Value<f64>> {
        let mut target = Target::Fresh(None);
        self.fill(kind, f, point, &mut target)?;
        target.into_value()
    }

    fn differentiate_into(
        &self,
        kind: DerivKind,
        f: &NumericFn,
        out: &mut Value<f64>,
        point: &Value<f64>,
    ) -> Result<()> {
        self.fill(kind, f, point, &mut Target::Into(out))
    }

    fn writes_in_place(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use derivable_core::function::numeric_view;
    use derivable_core::test_utils::{FixedLength, Square, SquareCube};
    use std::sync::Arc;

    #[test]
    fn test_first_order() {
        let fd = FiniteDifferences::new();
        let f = numeric_view(Arc::new(SquareCube));
        let jac = fd
            .differentiate(DerivKind::Jacobian, &f, &Value::from_vec(vec![2.0, 1.0]))
            .unwrap();
        assert_eq!(jac.shape(), Shape::Array(vec![2, 2]));
        for (a, b) in jac.flatten().iter().zip([4.0, 0.0, 1.0, 6.0].iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }

        let sq = numeric_view(Arc::new(Square));
        let d = fd.differentiate(DerivKind::Derivative, &sq, &Value::scalar(0.0)).unwrap();
        assert_relative_eq!(*d.as_scalar().unwrap(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_second_order() {
        let fd = FiniteDifferences::new();
        let f = numeric_view(Arc::new(FixedLength(2)));
        let h = fd
            .differentiate(DerivKind::Hessian, &f, &Value::from_vec(vec![0.3, -1.2]))
            .unwrap();
        for (a, b) in h.flatten().iter().zip([2.0, 0.0, 0.0, 2.0].iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }

        let dj = fd
            .differentiate(
                DerivKind::DoubleJacobian,
                &numeric_view(Arc::new(SquareCube)),
                &Value::from_vec(vec![2.0, 1.0]),
            )
            .unwrap();
        let expected = [2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 3.0, 12.0];
        for (a, b) in dj.flatten().iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_invalid_step_and_shapes() {
        assert!(FiniteDifferences::with_step(0.0).is_err());
        assert!(FiniteDifferences::with_step(1e-5).is_ok());

        let fd = FiniteDifferences::new();
        let f = numeric_view(Arc::new(SquareCube));
        assert!(matches!(
            fd.differentiate(DerivKind::Gradient, &f, &Value::from_vec(vec![2.0, 1.0])),
            Err(Error::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn test_differentiate_into_writes_the_buffer() {
        let fd = FiniteDifferences::new();
        assert!(fd.writes_in_place());
        let f = numeric_view(Arc::new(SquareCube));
        let x = Value::from_vec(vec![2.0, 1.0]);

        let mut out = Value::zeros(&Shape::Array(vec![2, 2]));
        let before = out.as_matrix().unwrap().as_ptr();
        fd.differentiate_into(DerivKind::Jacobian, &f, &mut out, &x).unwrap();
        assert_eq!(out.as_matrix().unwrap().as_ptr(), before);
        assert_eq!(out, fd.differentiate(DerivKind::Jacobian, &f, &x).unwrap());

        let mut wrong = Value::zeros(&Shape::Vector(4));
        assert!(matches!(
            fd.differentiate_into(DerivKind::Jacobian, &f, &mut wrong, &x),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
