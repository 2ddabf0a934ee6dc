//! User function interface.
//!
//! A [`NumericFunction`] is written once, generically over the scalar type,
//! so that the same definition can be evaluated numerically, with dual
//! numbers and with symbolic placeholders.
//!
//! # Example
//!
//! ```
//! use derivable_core::prelude::*;
//!
//! struct Model;
//!
//! impl NumericFunction for Model {
//!     fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
//!         let x = x.as_vector_of(2)?;
//!         Ok(Value::from_vec(vec![
//!             x[0].clone().powi(2),
//!             x[0].clone() * x[1].clone().powi(3),
//!         ]))
//!     }
//! }
//!
//! let y = Model.eval(&Value::from_vec(vec![2.0, 1.0])).unwrap();
//! assert_eq!(y.flatten(), vec![4.0, 2.0]);
//! ```

use crate::error::{panic_message, Error, Result};
use crate::types::Real;
use crate::value::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A numeric function `y = f(x)` that can be evaluated with any [`Real`].
///
/// Returning an `Err` (or panicking, e.g. on an out-of-bounds index) marks
/// the input as unacceptable. Shape inference relies on this to discover
/// the argument structure.
pub trait NumericFunction: Send + Sync {
    /// Evaluates the function out-of-place.
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>>;

    /// Positional argument counts this function accepts.
    ///
    /// `1` stands for `y = f(x)`, `2` for the in-place form `f(y, x)`
    /// implemented by [`eval_in_place`](Self::eval_in_place).
    fn arities(&self) -> &[usize] {
        &[1]
    }

    /// Evaluates the function into a caller-supplied buffer.
    ///
    /// The default implementation allocates through [`eval`](Self::eval) and
    /// copies the result.
    fn eval_in_place<S: Real>(&self, out: &mut Value<S>, x: &Value<S>) -> Result<()> {
        let y = self.eval(x)?;
        out.assign(&y)
    }
}

impl<F: NumericFunction> NumericFunction for Arc<F> {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        (**self).eval(x)
    }

    fn arities(&self) -> &[usize] {
        (**self).arities()
    }

    fn eval_in_place<S: Real>(&self, out: &mut Value<S>, x: &Value<S>) -> Result<()> {
        (**self).eval_in_place(out, x)
    }
}

impl<F: NumericFunction> NumericFunction for &F {
    fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
        (**self).eval(x)
    }

    fn arities(&self) -> &[usize] {
        (**self).arities()
    }

    fn eval_in_place<S: Real>(&self, out: &mut Value<S>, x: &Value<S>) -> Result<()> {
        (**self).eval_in_place(out, x)
    }
}

/// Type-erased numeric view of a function, as consumed by numeric backends.
pub type NumericFn = Arc<dyn Fn(&Value<f64>) -> Result<Value<f64>> + Send + Sync>;

/// Evaluates `f`, turning a panic into an [`Error::Evaluation`].
pub fn catch_eval<F, S>(f: &F, x: &Value<S>) -> Result<Value<S>>
where
    F: NumericFunction,
    S: Real,
{
    match panic::catch_unwind(AssertUnwindSafe(|| f.eval(x))) {
        Ok(result) => result,
        Err(payload) => Err(Error::evaluation(format!(
            "function panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Returns the `f64` view of a shared function.
pub fn numeric_view<F: NumericFunction + 'static>(f: Arc<F>) -> NumericFn {
    Arc::new(move |x: &Value<f64>| catch_eval(&*f, x))
}
