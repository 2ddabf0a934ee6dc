//! Dual numbers for forward-mode differentiation.
//!
//! `Dual { re, eps }` represents `re + eps·ε` with `ε² = 0`. The component
//! type is itself any [`Real`], so `Dual<Dual<f64>>` carries second-order
//! information: seeding the inner and outer tangents with two coordinate
//! directions yields the mixed second partial in `eps.eps`.

use derivable_core::types::Real;
use num_traits::{One, Zero};
use std::fmt::{self, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Forward-mode dual number: a value paired with its tangent.
#[derive(Clone, Debug, PartialEq)]
pub struct Dual<T: Real> {
    /// Primal value.
    pub re: T,
    /// Tangent value.
    pub eps: T,
}

impl<T: Real + Display> Display for Dual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl<T: Real> Dual<T> {
    /// Create a new dual number.
    pub fn new(re: T, eps: T) -> Self {
        Dual { re, eps }
    }

    /// Create a constant (zero tangent).
    pub fn constant(re: T) -> Self {
        Dual { re, eps: T::zero() }
    }

    /// Create a variable (unit tangent).
    pub fn variable(re: T) -> Self {
        Dual { re, eps: T::one() }
    }

    /// Apply the chain rule given `f(re)` and `f'(re)`.
    fn chain(self, f_val: T, f_deriv: T) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }
}

impl<T: Real> Add for Dual<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Dual {
            re: self.re + rhs.re,
            eps: self.eps + rhs.eps,
        }
    }
}

impl<T: Real> Sub for Dual<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Dual {
            re: self.re - rhs.re,
            eps: self.eps - rhs.eps,
        }
    }
}

impl<T: Real> Mul for Dual<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Dual {
            re: self.re.clone() * rhs.re.clone(),
            eps: self.eps * rhs.re + self.re * rhs.eps,
        }
    }
}

impl<T: Real> Div for Dual<T> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let inv = T::one() / rhs.re.clone();
        let re = self.re * inv.clone();
        Dual {
            eps: (self.eps - re.clone() * rhs.eps) * inv,
            re,
        }
    }
}

impl<T: Real> Neg for Dual<T> {
    type Output = Self;

    fn neg(self) -> Self {
        Dual {
            re: -self.re,
            eps: -self.eps,
        }
    }
}

impl<T: Real> Zero for Dual<T> {
    fn zero() -> Self {
        Dual::constant(T::zero())
    }

    fn is_zero(&self) -> bool {
        self.re.is_zero() && self.eps.is_zero()
    }
}

impl<T: Real> One for Dual<T> {
    fn one() -> Self {
        Dual::constant(T::one())
    }
}

impl<T: Real> Real for Dual<T> {
    fn from_f64(v: f64) -> Self {
        Dual::constant(T::from_f64(v))
    }

    fn sin(self) -> Self {
        let (s, c) = (self.re.clone().sin(), self.re.clone().cos());
        self.chain(s, c)
    }

    fn cos(self) -> Self {
        let (c, s) = (self.re.clone().cos(), self.re.clone().sin());
        self.chain(c, -s)
    }

    fn tan(self) -> Self {
        let t = self.re.clone().tan();
        let deriv = T::one() + t.clone() * t.clone();
        self.chain(t, deriv)
    }

    fn exp(self) -> Self {
        let e = self.re.clone().exp();
        self.chain(e.clone(), e)
    }

    fn ln(self) -> Self {
        let (l, inv) = (self.re.clone().ln(), self.re.clone().recip());
        self.chain(l, inv)
    }

    fn sqrt(self) -> Self {
        let s = self.re.clone().sqrt();
        let deriv = (T::from_f64(2.0) * s.clone()).recip();
        self.chain(s, deriv)
    }

    fn tanh(self) -> Self {
        let t = self.re.clone().tanh();
        let deriv = T::one() - t.clone() * t.clone();
        self.chain(t, deriv)
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        let val = self.re.clone().powi(n);
        let deriv = T::from_f64(f64::from(n)) * self.re.clone().powi(n - 1);
        self.chain(val, deriv)
    }

    fn powf(self, p: f64) -> Self {
        let val = self.re.clone().powf(p);
        let deriv = T::from_f64(p) * self.re.clone().powf(p - 1.0);
        self.chain(val, deriv)
    }
}
