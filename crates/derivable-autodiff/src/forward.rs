//! Forward-mode differentiation of [`NumericFunction`]s.
//!
//! First-order derivatives take one dual-number pass per input coordinate.
//! Second-order derivatives use nested duals and one pass per unordered
//! pair of coordinates; the mixed partials are mirrored across the
//! diagonal.

use crate::dual::Dual;
use crate::target::Target;
use derivable_core::derivative::DerivKind;
use derivable_core::error::{Error, Result};
use derivable_core::function::{catch_eval, NumericFunction};
use derivable_core::value::{Shape, Value};
use log::trace;

/// Output shape of `f` at `x`.
fn output_of<F: NumericFunction>(f: &F, x: &Value<f64>) -> Result<Shape> {
    Ok(catch_eval(f, x)?.shape())
}

fn first_order<F: NumericFunction>(
    f: &F,
    kind: DerivKind,
    x: &Value<f64>,
    target: &mut Target<'_>,
) -> Result<()> {
    let input = x.shape();
    let n = x.len();
    let tangent = |j: usize| -> Result<Value<f64>> {
        let seeded = x.map_indexed(|k, v| Dual::new(*v, if k == j { 1.0 } else { 0.0 }));
        Ok(catch_eval(f, &seeded)?.map(|d| d.eps))
    };

    let mut pending = if n > 0 { Some(tangent(0)?) } else { None };
    let output = match &pending {
        Some(column) => column.shape(),
        None => output_of(f, x)?,
    };
    let result_shape = kind.result_shape(&input, &output)?;
    let out = target.buffer(&result_shape)?;
    trace!("forward {} of {} -> {}: {} passes", kind, input, output, n);

    let m = output.len();
    for j in 0..n {
        let column = match pending.take() {
            Some(column) => column,
            None => tangent(j)?,
        }
        .flatten();
        if column.len() != m {
            return Err(Error::evaluation(format!(
                "output length changed between passes ({} vs {})",
                column.len(),
                m
            )));
        }
        for (o, value) in column.into_iter().enumerate() {
            out.set_flat(o * n + j, value);
        }
    }
    Ok(())
}

// Entry (o, i, j) of the flat result is d2 f_o / dx_i dx_j.
fn second_order<F: NumericFunction>(
    f: &F,
    kind: DerivKind,
    x: &Value<f64>,
    target: &mut Target<'_>,
) -> Result<()> {
    let input = x.shape();
    let n = x.len();
    let output = output_of(f, x)?;
    let result_shape = kind.result_shape(&input, &output)?;
    let out = target.buffer(&result_shape)?;
    let m = output.len();

    for i in 0..n {
        for j in i..n {
            let seeded = x.map_indexed(|k, v| {
                let inner = Dual::new(*v, if k == j { 1.0 } else { 0.0 });
                let outer = Dual::constant(if k == i { 1.0 } else { 0.0 });
                Dual::new(inner, outer)
            });
            let y = catch_eval(f, &seeded)?;
            let flat = y.flatten();
            if flat.len() != m {
                return Err(Error::evaluation(format!(
                    "output length changed between passes ({} vs {})",
                    flat.len(),
                    m
                )));
            }
            for (o, value) in flat.into_iter().enumerate() {
                let mixed = value.eps.eps;
                out.set_flat(o * n * n + i * n + j, mixed);
                out.set_flat(o * n * n + j * n + i, mixed);
            }
        }
    }
    trace!("forward {} of {} -> {}: {} passes", kind, input, output, n * (n + 1) / 2);
    Ok(())
}

fn fill<F: NumericFunction>(f: &F, kind: DerivKind, x: &Value<f64>, target: &mut Target<'_>) -> Result<()> {
    match kind.order() {
        1 => first_order(f, kind, x, target),
        _ => second_order(f, kind, x, target),
    }
}

/// Computes a derivative of `f` at `x`.
///
/// The result has the shape given by [`DerivKind::result_shape`]; kinds
/// that do not apply to the shapes of `f` fail with
/// [`Error::UnsupportedShape`].
pub fn derivative<F: NumericFunction>(f: &F, kind: DerivKind, x: &Value<f64>) -> Result<Value<f64>> {
    let mut target = Target::Fresh(None);
    fill(f, kind, x, &mut target)?;
    target.into_value()
}

/// Computes a derivative of `f` at `x` directly into `out`.
///
/// `out` must already have the result shape. Its storage is reused; a
/// buffer of another shape fails with [`Error::ShapeMismatch`] before any
/// entry is written.
pub fn derivative_into<F: NumericFunction>(
    f: &F,
    kind: DerivKind,
    out: &mut Value<f64>,
    x: &Value<f64>,
) -> Result<()> {
    fill(f, kind, x, &mut Target::Into(out))
}

/// Evaluates `f` at `x` together with its directional derivative along `v`.
pub fn jvp<F: NumericFunction>(f: &F, x: &Value<f64>, v: &Value<f64>) -> Result<(Value<f64>, Value<f64>)> {
    if x.shape() != v.shape() {
        return Err(Error::shape_mismatch(x.shape(), v.shape()));
    }
    let tangent = v.flatten();
    let seeded = x.map_indexed(|k, value| Dual::new(*value, tangent[k]));
    let y = catch_eval(f, &seeded)?;
    Ok((y.map(|d| d.re), y.map(|d| d.eps)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use derivable_core::test_utils::{FixedLength, MatrixValued, Square, SquareCube};

    #[test]
    fn test_jacobian_of_square_cube() {
        let x = Value::from_vec(vec![2.0, 1.0]);
        let jac = derivative(&SquareCube, DerivKind::Jacobian, &x).unwrap();
        assert_eq!(jac.shape(), Shape::Array(vec![2, 2]));
        assert_eq!(jac.flatten(), vec![4.0, 0.0, 1.0, 6.0]);
    }

    #[test]
    fn test_scalar_derivatives() {
        let d = derivative(&Square, DerivKind::Derivative, &Value::scalar(3.0)).unwrap();
        assert_eq!(d, Value::scalar(6.0));
        let dd = derivative(&Square, DerivKind::SecondDerivative, &Value::scalar(3.0)).unwrap();
        assert_eq!(dd, Value::scalar(2.0));
        let at_zero = derivative(&Square, DerivKind::Derivative, &Value::scalar(0.0)).unwrap();
        assert_eq!(at_zero, Value::scalar(0.0));
    }

    #[test]
    fn test_gradient_and_hessian() {
        let x = Value::from_vec(vec![1.0, -2.0, 0.5]);
        let g = derivative(&FixedLength(3), DerivKind::Gradient, &x).unwrap();
        assert_eq!(g.flatten(), vec![2.0, -4.0, 1.0]);

        let h = derivative(&FixedLength(3), DerivKind::Hessian, &x).unwrap();
        assert_eq!(h.shape(), Shape::Array(vec![3, 3]));
        assert_eq!(
            h.flatten(),
            vec![2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_double_jacobian() {
        // F = [x1^2, x1 x2^3]; d2F1 = [[2,0],[0,0]], d2F2 = [[0,3x2^2],[3x2^2,6x1x2]]
        let x = Value::from_vec(vec![2.0, 1.0]);
        let dj = derivative(&SquareCube, DerivKind::DoubleJacobian, &x).unwrap();
        assert_eq!(dj.shape(), Shape::Array(vec![2, 2, 2]));
        let flat = dj.flatten();
        let expected = [2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 3.0, 12.0];
        for (a, b) in flat.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_matrix_jacobian() {
        let x = Value::from_vec(vec![2.0, 0.0]);
        let mj = derivative(&MatrixValued, DerivKind::MatrixJacobian, &x).unwrap();
        assert_eq!(mj.shape(), Shape::Array(vec![2, 2, 2]));
        // d/dx of [[a, ab], [sin b, a^2]] at (2, 0)
        assert_eq!(mj.flatten(), vec![1.0, 0.0, 0.0, 2.0, 0.0, 1.0, 4.0, 0.0]);
    }

    #[test]
    fn test_unsupported_kinds_are_rejected() {
        let x = Value::from_vec(vec![2.0, 1.0]);
        assert!(matches!(
            derivative(&SquareCube, DerivKind::Gradient, &x),
            Err(Error::UnsupportedShape { .. })
        ));
        assert!(matches!(
            derivative(&SquareCube, DerivKind::Hessian, &x),
            Err(Error::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn test_derivative_into_reuses_the_buffer() {
        let x = Value::from_vec(vec![2.0, 1.0]);
        let mut out = Value::zeros(&Shape::Array(vec![2, 2]));
        let before = out.as_matrix().unwrap().as_ptr();
        derivative_into(&SquareCube, DerivKind::Jacobian, &mut out, &x).unwrap();
        assert_eq!(out.as_matrix().unwrap().as_ptr(), before);
        assert_eq!(out, derivative(&SquareCube, DerivKind::Jacobian, &x).unwrap());

        let mut hessian = Value::zeros(&Shape::Array(vec![3, 3]));
        derivative_into(&FixedLength(3), DerivKind::Hessian, &mut hessian, &Value::from_vec(vec![1.0, 2.0, 3.0]))
            .unwrap();
        assert_eq!(hessian.flatten(), vec![2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0]);

        let mut wrong = Value::zeros(&Shape::Vector(4));
        assert!(matches!(
            derivative_into(&SquareCube, DerivKind::Jacobian, &mut wrong, &x),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(wrong, Value::zeros(&Shape::Vector(4)));
    }

    #[test]
    fn test_jvp() {
        let x = Value::from_vec(vec![2.0, 1.0]);
        let v = Value::from_vec(vec![1.0, 1.0]);
        let (y, dy) = jvp(&SquareCube, &x, &v).unwrap();
        assert_eq!(y.flatten(), vec![4.0, 2.0]);
        assert_eq!(dy.flatten(), vec![4.0, 7.0]);
    }
}
