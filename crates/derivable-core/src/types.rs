//! Numeric scalar abstraction.
//!
//! User functions are written once, generically over [`Real`], and are then
//! evaluated with plain `f64`, with dual numbers (automatic differentiation)
//! or with symbolic expressions (tracing), depending on the backend.

use num_traits::{One, Zero};
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Trait for scalar types a [`NumericFunction`](crate::function::NumericFunction)
/// can be evaluated with.
///
/// Unlike `num_traits::Float`, this trait does not require `Copy` or
/// `PartialOrd`: symbolic expressions are reference-counted trees and have
/// no total order. Functions that branch on the value of their input cannot
/// be traced symbolically.
pub trait Real:
    Clone
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// Lifts a constant into this scalar type.
    fn from_f64(v: f64) -> Self;

    /// Sine.
    fn sin(self) -> Self;

    /// Cosine.
    fn cos(self) -> Self;

    /// Tangent.
    fn tan(self) -> Self;

    /// Natural exponential.
    fn exp(self) -> Self;

    /// Natural logarithm.
    fn ln(self) -> Self;

    /// Square root.
    fn sqrt(self) -> Self;

    /// Hyperbolic tangent.
    fn tanh(self) -> Self;

    /// Integer power.
    fn powi(self, n: i32) -> Self;

    /// Real power with a constant exponent.
    fn powf(self, p: f64) -> Self;

    /// Reciprocal `1 / self`.
    fn recip(self) -> Self {
        Self::one() / self
    }

    /// `self * self`.
    fn square(self) -> Self {
        self.clone() * self
    }
}

impl Real for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }

    fn tan(self) -> Self {
        f64::tan(self)
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    fn powf(self, p: f64) -> Self {
        f64::powf(self, p)
    }

    fn recip(self) -> Self {
        f64::recip(self)
    }
}
