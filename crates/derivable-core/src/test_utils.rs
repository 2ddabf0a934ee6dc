//! Test functions and instrumentation shared by the workspace's tests.
//!
//! Enabled for this crate's own tests and, for other crates, through the
//! `test-utils` feature.

use crate::error::{Error, Result};
use crate::function::NumericFunction;
use crate::types::Real;
use crate::value::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Wraps a function and counts its evaluations.
///
/// Every call is counted whatever the scalar type, so shape probes,
/// symbolic traces and dual-number passes all show up.
#[derive(Debug, Default)]
pub struct CountingFunction<F> {
    /// The wrapped function
    pub inner: F,
    evals: AtomicUsize,
}

impl<F> CountingFunction<F> {
    /// Creates a new counting wrapper.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            evals: AtomicUsize::new(0),
        }
    }

    /// Number of evaluations so far.
    pub fn count(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    /// Resets the counter to zero.
    pub fn reset_count(&self) {
        self.evals.store(0, Ordering::SeqCst);
    }
}

impl<F: NumericFunction> NumericFunction for CountingFunction<F> {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        self.evals.fetch_add(1, Ordering::SeqCst);
        self.inner.eval(x)
    }

    fn arities(&self) -> &[usize] {
        self.inner.arities()
    }

    fn eval_in_place<S: Real>(&self, out: &mut Value<S>, x: &Value<S>) -> Result<()> {
        self.evals.fetch_add(1, Ordering::SeqCst);
        self.inner.eval_in_place(out, x)
    }
}

/// `f(x) = x^2` on a scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct Square;

impl NumericFunction for Square {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        Ok(Value::scalar(x.as_scalar()?.clone().powi(2)))
    }
}

/// `F(x) = [x1^2, x1 * x2^3]` on vectors of length two.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareCube;

impl NumericFunction for SquareCube {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        let x = x.as_vector_of(2)?;
        Ok(Value::from_vec(vec![
            x[0].clone().powi(2),
            x[0].clone() * x[1].clone().powi(3),
        ]))
    }
}

/// `f(x) = sum(x_i^2)` on vectors of exactly `k` entries.
#[derive(Debug, Clone, Copy)]
pub struct FixedLength(pub usize);

impl NumericFunction for FixedLength {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        let x = x.as_vector_of(self.0)?;
        let sum = x
            .iter()
            .fold(S::zero(), |acc, xi| acc + xi.clone() * xi.clone());
        Ok(Value::scalar(sum))
    }
}

/// `F(x) = [[x1, x1*x2], [sin(x2), x1^2]]` on vectors of length two.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixValued;

impl NumericFunction for MatrixValued {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        let x = x.as_vector_of(2)?;
        let (a, b) = (x[0].clone(), x[1].clone());
        Ok(Value::from_row_slice(
            2,
            2,
            &[
                a.clone(),
                a.clone() * b.clone(),
                b.sin(),
                a.powi(2),
            ],
        ))
    }
}

/// [`SquareCube`] with a native in-place form.
#[derive(Debug, Clone, Copy, Default)]
pub struct InPlaceSquareCube;

impl NumericFunction for InPlaceSquareCube {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        SquareCube.eval(x)
    }

    fn arities(&self) -> &[usize] {
        &[1, 2]
    }

    fn eval_in_place<S: Real>(&self, out: &mut Value<S>, x: &Value<S>) -> Result<()> {
        let x = x.as_vector_of(2)?;
        let data = [
            x[0].clone().powi(2),
            x[0].clone() * x[1].clone().powi(3),
        ];
        out.write_flat(&data)
    }
}

/// A scalar function that sleeps before computing `x^2`.
#[derive(Debug, Clone, Copy)]
pub struct Slow(pub Duration);

impl NumericFunction for Slow {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        thread::sleep(self.0);
        Square.eval(x)
    }
}

/// A function that rejects every input.
#[derive(Debug, Clone, Copy, Default)]
pub struct Failing;

impl NumericFunction for Failing {
    fn eval<S: Real>(&self, _x: &Value<S>) -> Result<Value<S>> {
        Err(Error::evaluation("rejects every input"))
    }
}
