//! Differentiation backend identifiers and the numeric backend trait.
//!
//! Backends that need to evaluate a function with their own scalar type
//! (dual numbers, symbolic placeholders) are dispatched on [`BackendTag`]
//! by the dispatcher. Backends that only need `f64` evaluations implement
//! [`NumericBackend`] and can be supplied by the user at runtime.

use crate::derivative::DerivKind;
use crate::error::Result;
use crate::function::NumericFn;
use crate::value::Value;
use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifier selecting a differentiation method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BackendTag {
    /// Trace the function symbolically, differentiate and compile.
    Symbolic,
    /// Forward-mode automatic differentiation with dual numbers.
    ForwardDiff,
    /// Central finite differences.
    FiniteDiff,
    /// Use an already-known derivative.
    Passthrough,
    /// A user-registered [`NumericBackend`], addressed by name.
    Custom(String),
}

impl BackendTag {
    /// Canonical name of the backend.
    pub fn name(&self) -> &str {
        match self {
            BackendTag::Symbolic => "symbolic",
            BackendTag::ForwardDiff => "forward-diff",
            BackendTag::FiniteDiff => "finite-diff",
            BackendTag::Passthrough => "passthrough",
            BackendTag::Custom(name) => name,
        }
    }
}

impl fmt::Display for BackendTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendTag {
    type Err = Infallible;

    /// Parses a backend name; unrecognised names become [`BackendTag::Custom`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "symbolic" | "symbolics" => BackendTag::Symbolic,
            "forwarddiff" | "forward" => BackendTag::ForwardDiff,
            "finitediff" | "finitedifferences" => BackendTag::FiniteDiff,
            "passthrough" => BackendTag::Passthrough,
            _ => BackendTag::Custom(s.to_string()),
        })
    }
}

/// Trait for differentiation backends that work on `f64` evaluations only.
///
/// Implementations receive the derivative kind, the type-erased function
/// and the evaluation point, and return the derivative with the shape given
/// by [`DerivKind::result_shape`].
pub trait NumericBackend: Debug + Send + Sync {
    /// Backend name, used as the [`BackendTag::Custom`] key.
    fn name(&self) -> &str;

    /// Check if this backend can be used on the current system.
    fn is_available(&self) -> bool {
        true
    }

    /// Computes the derivative of `f` at `point`.
    fn differentiate(&self, kind: DerivKind, f: &NumericFn, point: &Value<f64>)
        -> Result<Value<f64>>;

    /// Computes the derivative of `f` at `point` into `out`.
    ///
    /// The default computes a fresh result and copies it over. Backends
    /// that fill `out` directly override this together with
    /// [`NumericBackend::writes_in_place`].
    fn differentiate_into(
        &self,
        kind: DerivKind,
        f: &NumericFn,
        out: &mut Value<f64>,
        point: &Value<f64>,
    ) -> Result<()> {
        let y = self.differentiate(kind, f, point)?;
        out.assign(&y)
    }

    /// Returns true if [`NumericBackend::differentiate_into`] writes into
    /// the caller's buffer without allocating the result.
    fn writes_in_place(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names_round_trip() {
        for tag in [
            BackendTag::Symbolic,
            BackendTag::ForwardDiff,
            BackendTag::FiniteDiff,
            BackendTag::Passthrough,
        ] {
            let parsed: BackendTag = tag.name().parse().unwrap();
            assert_eq!(parsed, tag);
        }
    }

    #[test]
    fn test_tag_parsing_is_lenient() {
        assert_eq!("ForwardDiff".parse::<BackendTag>().unwrap(), BackendTag::ForwardDiff);
        assert_eq!(
            "FiniteDifferences".parse::<BackendTag>().unwrap(),
            BackendTag::FiniteDiff
        );
        assert_eq!(
            "zygote".parse::<BackendTag>().unwrap(),
            BackendTag::Custom("zygote".to_string())
        );
    }

    #[derive(Debug)]
    struct Doubling;

    impl NumericBackend for Doubling {
        fn name(&self) -> &str {
            "doubling"
        }

        fn differentiate(&self, _kind: DerivKind, _f: &NumericFn, point: &Value<f64>) -> Result<Value<f64>> {
            Ok(point.map(|x| 2.0 * x))
        }
    }

    #[test]
    fn test_default_in_place_copies_the_result() {
        let f: NumericFn = std::sync::Arc::new(|x: &Value<f64>| -> Result<Value<f64>> { Ok(x.clone()) });
        let backend = Doubling;
        assert!(!backend.writes_in_place());

        let mut out = Value::zeros(&crate::value::Shape::Vector(2));
        backend
            .differentiate_into(DerivKind::Gradient, &f, &mut out, &Value::from_vec(vec![1.0, 3.0]))
            .unwrap();
        assert_eq!(out.flatten(), vec![2.0, 6.0]);

        let mut wrong = Value::scalar(0.0);
        assert!(backend
            .differentiate_into(DerivKind::Gradient, &f, &mut wrong, &Value::from_vec(vec![1.0, 3.0]))
            .is_err());
    }
}
