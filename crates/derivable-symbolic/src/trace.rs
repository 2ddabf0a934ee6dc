//! Turning numeric functions into expressions.

use crate::expr::Expr;
use derivable_core::error::Result;
use derivable_core::function::{catch_eval, NumericFunction};
use derivable_core::value::{Shape, Value};

/// Placeholder input of the given shape: entry `k` (row-major) is `x{k}`.
pub fn placeholders(input: &Shape) -> Value<Expr> {
    Value::<Expr>::zeros(input).map_indexed(|k, _| Expr::var(k))
}

/// Evaluates `f` on symbolic placeholders of shape `input`.
///
/// Fails if `f` rejects the input or branches on the value of its
/// argument in a way that needs a concrete number.
pub fn trace<F: NumericFunction>(f: &F, input: &Shape) -> Result<Value<Expr>> {
    catch_eval(f, &placeholders(input))
}
