//! Symbolic derivatives of traced functions.
//!
//! Results follow the canonical layout: for an output of shape `O` and an
//! input of length `n`, entry `(o, j)` of a first-order result is
//! `d y_o / d x_j` and entry `(o, i, j)` of a second-order result is
//! `d2 y_o / d x_i d x_j`.

use crate::expr::{chain, BinaryOp, Expr, Node};
use crate::trace::trace;
use derivable_core::derivative::DerivKind;
use derivable_core::error::Result;
use derivable_core::function::NumericFunction;
use derivable_core::guard::CancelFlag;
use derivable_core::types::Real;
use derivable_core::value::{Shape, Value};
use log::trace as log_trace;
use num_traits::{One, Zero};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Differentiates traced outputs.
///
/// `cancel` is polled once per output entry.
pub fn differentiate(
    outputs: &Value<Expr>,
    input: &Shape,
    kind: DerivKind,
    cancel: Option<&CancelFlag>,
) -> Result<Value<Expr>> {
    let result_shape = kind.result_shape(input, &outputs.shape())?;
    let n = input.len();
    let flat = outputs.flatten();

    let mut data = Vec::with_capacity(result_shape.len());
    for y in &flat {
        if let Some(flag) = cancel {
            flag.checkpoint()?;
        }
        if kind.order() == 1 {
            data.extend(gradient(y, n));
        } else {
            data.extend(hessian(y, n));
        }
    }
    log_trace!(
        "symbolic {} of {} outputs over {} inputs",
        kind,
        flat.len(),
        n
    );
    Value::from_flat(&result_shape, data)
}

/// Jacobian of `outputs` with respect to `n` variables, as flat row-major
/// entries.
pub fn jacobian(outputs: &[Expr], n: usize) -> Vec<Expr> {
    outputs.iter().flat_map(|y| gradient(y, n)).collect()
}

/// Gradient of a single expression with respect to `n` variables.
///
/// Adjoints are accumulated in one reverse sweep over the distinct nodes
/// of `y`, so the cost does not grow with `n`. Variables at or beyond `n`
/// are ignored.
pub fn gradient(y: &Expr, n: usize) -> Vec<Expr> {
    let mut grad = vec![Expr::zero(); n];
    let mut adjoint: HashMap<*const Node, Expr> = HashMap::new();
    adjoint.insert(y.key(), Expr::one());

    for e in y.post_order().into_iter().rev() {
        let Some(bar) = adjoint.remove(&e.key()) else {
            continue;
        };
        if bar.is_zero() {
            continue;
        }
        match e.node() {
            Node::Const(_) => {}
            Node::Var(i) => {
                if let Some(slot) = grad.get_mut(*i) {
                    accumulate_into(slot, bar);
                }
            }
            Node::Unary(op, a) => {
                let contribution = chain(*op, a, e, bar);
                accumulate(&mut adjoint, a, contribution);
            }
            Node::Binary(op, a, b) => {
                let (ca, cb) = match op {
                    BinaryOp::Add => (bar.clone(), bar),
                    BinaryOp::Sub => (bar.clone(), -bar),
                    BinaryOp::Mul => (bar.clone() * b.clone(), bar * a.clone()),
                    BinaryOp::Div => (
                        bar.clone() / b.clone(),
                        -(bar * a.clone()) / b.clone().powi(2),
                    ),
                };
                accumulate(&mut adjoint, a, ca);
                accumulate(&mut adjoint, b, cb);
            }
            Node::Powi(a, k) => {
                let contribution = bar * Expr::constant(f64::from(*k)) * a.clone().powi(k - 1);
                accumulate(&mut adjoint, a, contribution);
            }
            Node::Powf(a, p) => {
                let contribution = bar * Expr::constant(*p) * a.clone().powf(p - 1.0);
                accumulate(&mut adjoint, a, contribution);
            }
        }
    }
    grad
}

fn accumulate(adjoint: &mut HashMap<*const Node, Expr>, target: &Expr, contribution: Expr) {
    match adjoint.entry(target.key()) {
        Entry::Occupied(mut slot) => accumulate_into(slot.get_mut(), contribution),
        Entry::Vacant(slot) => {
            slot.insert(contribution);
        }
    }
}

fn accumulate_into(slot: &mut Expr, contribution: Expr) {
    let current = std::mem::replace(slot, Expr::zero());
    *slot = current + contribution;
}

/// Hessian of a single expression, as flat row-major entries.
///
/// Entries below the diagonal mirror those above it, so the result is
/// exactly symmetric.
pub fn hessian(y: &Expr, n: usize) -> Vec<Expr> {
    let rows = jacobian(&gradient(y, n), n);
    let mut block = rows.clone();
    for i in 0..n {
        for j in i + 1..n {
            block[j * n + i] = rows[i * n + j].clone();
        }
    }
    block
}

/// Traces `f` and returns its derivative expressions before compilation.
///
/// `input` must be a shape `f` accepts; it is not probed.
pub fn symbolic_passthrough<F: NumericFunction>(
    f: &F,
    kind: DerivKind,
    input: &Shape,
) -> Result<Value<Expr>> {
    let outputs = trace(f, input)?;
    differentiate(&outputs, input, kind, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use derivable_core::error::Error;
    use derivable_core::test_utils::{FixedLength, MatrixValued, Square, SquareCube};

    fn eval_all(v: &Value<Expr>, x: &[f64]) -> Vec<f64> {
        v.flatten().iter().map(|e| e.eval(x).unwrap()).collect()
    }

    #[test]
    fn test_jacobian_of_square_cube() {
        let jac = symbolic_passthrough(&SquareCube, DerivKind::Jacobian, &Shape::Vector(2)).unwrap();
        assert_eq!(jac.shape(), Shape::Array(vec![2, 2]));
        assert_eq!(eval_all(&jac, &[2.0, 1.0]), vec![4.0, 0.0, 1.0, 6.0]);
    }

    #[test]
    fn test_scalar_derivatives() {
        let d = symbolic_passthrough(&Square, DerivKind::Derivative, &Shape::Scalar).unwrap();
        assert_eq!(d.shape(), Shape::Scalar);
        assert_eq!(eval_all(&d, &[0.0]), vec![0.0]);
        assert_eq!(eval_all(&d, &[3.0]), vec![6.0]);

        let dd = symbolic_passthrough(&Square, DerivKind::SecondDerivative, &Shape::Scalar).unwrap();
        assert_eq!(eval_all(&dd, &[5.0]), vec![2.0]);
    }

    #[test]
    fn test_second_order_layout() {
        let dj = symbolic_passthrough(&SquareCube, DerivKind::DoubleJacobian, &Shape::Vector(2))
            .unwrap();
        assert_eq!(dj.shape(), Shape::Array(vec![2, 2, 2]));
        assert_eq!(
            eval_all(&dj, &[2.0, 1.0]),
            vec![2.0, 0.0, 0.0, 0.0, 0.0, 3.0, 3.0, 12.0]
        );

        let h = symbolic_passthrough(&FixedLength(3), DerivKind::Hessian, &Shape::Vector(3)).unwrap();
        assert_eq!(
            eval_all(&h, &[1.0, 2.0, 3.0]),
            vec![2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_matrix_jacobian() {
        let mj = symbolic_passthrough(&MatrixValued, DerivKind::MatrixJacobian, &Shape::Vector(2))
            .unwrap();
        assert_eq!(mj.shape(), Shape::Array(vec![2, 2, 2]));
        assert_eq!(
            eval_all(&mj, &[2.0, 0.0]),
            vec![1.0, 0.0, 0.0, 2.0, 0.0, 1.0, 4.0, 0.0]
        );
    }

    #[test]
    fn test_helpers_agree_with_differentiate() {
        let y = trace(&FixedLength(2), &Shape::Vector(2)).unwrap();
        let y = y.as_scalar().unwrap();
        let g = gradient(y, 2);
        assert_eq!(g.iter().map(|e| e.eval(&[1.5, -1.0]).unwrap()).collect::<Vec<_>>(), vec![3.0, -2.0]);
        let h = hessian(y, 2);
        assert_eq!(h.iter().map(|e| e.eval(&[1.5, -1.0]).unwrap()).collect::<Vec<_>>(), vec![2.0, 0.0, 0.0, 2.0]);
        assert_eq!(jacobian(&g, 2), h);
    }

    #[test]
    fn test_gradient_matches_partial_derivatives() {
        let x = |i| Expr::var(i);
        let shared = (x(0) * x(1)).sin();
        let y = shared.clone() * shared.clone().exp() / (x(2).powi(2) + x(0).sqrt()) - x(1).tanh().powf(1.5);
        let point = [0.7, 0.3, -1.2];
        for (j, g) in gradient(&y, 3).iter().enumerate() {
            let expected = y.diff(j).eval(&point).unwrap();
            approx::assert_relative_eq!(g.eval(&point).unwrap(), expected, epsilon = 1e-12, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_gradient_of_a_long_sum() {
        let n = 50_000;
        let y = trace(&FixedLength(n), &Shape::Vector(n)).unwrap();
        let g = gradient(y.as_scalar().unwrap(), n);
        assert_eq!(g.len(), n);
        let point: Vec<f64> = (0..n).map(|i| i as f64).collect();
        assert_eq!(g[n - 1].eval(&point).unwrap(), 2.0 * (n - 1) as f64);
    }

    #[test]
    fn test_unsupported_and_cancelled() {
        assert!(matches!(
            symbolic_passthrough(&SquareCube, DerivKind::Hessian, &Shape::Vector(2)),
            Err(Error::UnsupportedShape { .. })
        ));

        let outputs = trace(&SquareCube, &Shape::Vector(2)).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        assert!(differentiate(&outputs, &Shape::Vector(2), DerivKind::Jacobian, Some(&flag)).is_err());
    }
}
