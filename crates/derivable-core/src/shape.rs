//! Shape inference by probing.
//!
//! A function's argument structure is discovered by evaluating it on
//! random inputs of increasing size until one evaluation succeeds. Probing
//! is optional: every consumer also accepts declared shapes.
//!
//! Two policies exist. The strict one, [`ShapeProbe::infer_arg_shape`],
//! tries a scalar first and reports it as [`Shape::Scalar`], keeping it
//! apart from a vector of length one. The legacy policy,
//! [`ShapeProbe::infer_arg_length_legacy`], collapses both to `1` and is
//! only kept for callers that want the plain length.

use crate::error::{Error, Result};
use crate::function::{catch_eval, NumericFunction};
use crate::value::{Shape, Value};
use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Default upper bound on probed vector lengths.
pub const DEFAULT_MAX_PROBE: usize = 100;

/// Default seed for the random probe inputs.
pub const DEFAULT_PROBE_SEED: u64 = 0x5eed_d1ff;

/// Strategy object that infers argument and output shapes by evaluation.
#[derive(Debug, Clone)]
pub struct ShapeProbe {
    max_probe: usize,
    seed: u64,
}

impl Default for ShapeProbe {
    fn default() -> Self {
        Self {
            max_probe: DEFAULT_MAX_PROBE,
            seed: DEFAULT_PROBE_SEED,
        }
    }
}

impl ShapeProbe {
    /// Creates a probe trying vector lengths up to `max_probe`.
    pub fn new(max_probe: usize) -> Self {
        Self {
            max_probe,
            ..Self::default()
        }
    }

    /// Sets the seed of the random probe inputs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Largest vector length that is tried.
    pub fn max_probe(&self) -> usize {
        self.max_probe
    }

    /// Generates a random input of the given shape with entries in `[0, 1)`.
    pub fn sample_input(&self, shape: &Shape) -> Value<f64> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        Self::random_input(&mut rng, shape)
    }

    fn random_input(rng: &mut SmallRng, shape: &Shape) -> Value<f64> {
        let data: Vec<f64> = (0..shape.len()).map(|_| rng.gen::<f64>()).collect();
        match Value::from_flat(shape, data) {
            Ok(value) => value,
            Err(_) => Value::zeros(shape),
        }
    }

    /// Infers the argument shape of `f`, keeping scalars distinct.
    ///
    /// Tries a scalar, then vectors of length `1..=max_probe`, and returns
    /// the first shape for which `f` evaluates without error.
    pub fn infer_arg_shape<F: NumericFunction>(&self, f: &F) -> Result<Shape> {
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let candidates =
            std::iter::once(Shape::Scalar).chain((1..=self.max_probe).map(Shape::Vector));

        let mut last_error = None;
        for shape in candidates {
            let input = Self::random_input(&mut rng, &shape);
            match catch_eval(f, &input) {
                Ok(_) => {
                    debug!("inferred argument shape {}", shape);
                    return Ok(shape);
                }
                Err(err) => {
                    trace!("probe with {} failed: {}", shape, err);
                    last_error = Some(err);
                }
            }
        }

        Err(Error::shape_inference(format!(
            "function failed on scalars and on vectors of length 1..={} (last error: {})",
            self.max_probe,
            last_error.map_or_else(|| "none".to_string(), |e| e.to_string())
        )))
    }

    /// Infers the argument length of `f`, reporting scalars as length `1`.
    ///
    /// This cannot tell a scalar argument from a vector of length one; use
    /// [`infer_arg_shape`](Self::infer_arg_shape) where that matters.
    pub fn infer_arg_length_legacy<F: NumericFunction>(&self, f: &F) -> Result<usize> {
        match self.infer_arg_shape(f)? {
            Shape::Scalar => Ok(1),
            shape => Ok(shape.len()),
        }
    }
}

/// Infers the strict argument shape with the default probe.
pub fn infer_arg_shape<F: NumericFunction>(f: &F) -> Result<Shape> {
    ShapeProbe::default().infer_arg_shape(f)
}

/// Infers the legacy argument length, probing up to `max_probe`.
pub fn infer_arg_length_legacy<F: NumericFunction>(f: &F, max_probe: usize) -> Result<usize> {
    ShapeProbe::new(max_probe).infer_arg_length_legacy(f)
}

/// Reports the output shape of `f` from exactly one evaluation at `sample`.
///
/// Evaluation errors are returned unchanged; no other input is tried.
pub fn infer_out_shape<F: NumericFunction>(f: &F, sample: &Value<f64>) -> Result<Shape> {
    let y = catch_eval(f, sample)?;
    Ok(y.shape())
}

/// Maximum number of positional arguments any calling form of `f` accepts.
pub fn max_accepted_argument_count<F: NumericFunction>(f: &F) -> usize {
    f.arities().iter().copied().max().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Real;
    use nalgebra::DVector;

    struct ScalarSquare;

    impl NumericFunction for ScalarSquare {
        fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
            let x = x.as_scalar()?;
            Ok(Value::scalar(x.clone() * x.clone()))
        }
    }

    struct ExactLength(usize);

    impl NumericFunction for ExactLength {
        fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
            let v = x.as_vector_of(self.0)?;
            Ok(Value::Vector(DVector::from_iterator(
                v.len(),
                v.iter().map(|e| e.clone() * e.clone()),
            )))
        }
    }

    struct Never;

    impl NumericFunction for Never {
        fn eval<S: Real>(&self, _x: &Value<S>) -> Result<Value<S>> {
            Err(Error::evaluation("never accepts anything"))
        }
    }

    struct TwoForms;

    impl NumericFunction for TwoForms {
        fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
            Ok(x.clone())
        }

        fn arities(&self) -> &[usize] {
            &[1, 2]
        }
    }

    #[test]
    fn test_scalar_is_not_a_length_one_vector() {
        assert_eq!(infer_arg_shape(&ScalarSquare).unwrap(), Shape::Scalar);
        assert_eq!(ShapeProbe::default().infer_arg_length_legacy(&ScalarSquare).unwrap(), 1);
        assert_eq!(infer_arg_shape(&ExactLength(1)).unwrap(), Shape::Vector(1));
    }

    #[test]
    fn test_exact_length_is_found() {
        assert_eq!(infer_arg_shape(&ExactLength(7)).unwrap(), Shape::Vector(7));
        assert_eq!(infer_arg_length_legacy(&ExactLength(7), 10).unwrap(), 7);
    }

    #[test]
    fn test_probe_bound_is_respected() {
        let err = ShapeProbe::new(5).infer_arg_shape(&ExactLength(6)).unwrap_err();
        assert!(matches!(err, Error::ShapeInference { .. }));
        assert!(err.to_string().contains("1..=5"));

        let err = infer_arg_shape(&Never).unwrap_err();
        assert!(matches!(err, Error::ShapeInference { .. }));
    }

    #[test]
    fn test_out_shape() {
        let out = infer_out_shape(&ExactLength(3), &Value::from_vec(vec![0.1, 0.2, 0.3])).unwrap();
        assert_eq!(out, Shape::Vector(3));

        let out = infer_out_shape(&ScalarSquare, &Value::scalar(0.5)).unwrap();
        assert_eq!(out, Shape::Scalar);

        let one = infer_out_shape(&ExactLength(1), &Value::from_vec(vec![0.5])).unwrap();
        assert_eq!(one, Shape::Vector(1));
        assert_ne!(one, Shape::Scalar);
    }

    #[test]
    fn test_out_shape_surfaces_failures() {
        let err = infer_out_shape(&ExactLength(3), &Value::scalar(1.0)).unwrap_err();
        assert!(matches!(err, Error::Evaluation { .. }));
    }

    #[test]
    fn test_sample_input_is_deterministic() {
        let probe = ShapeProbe::default().with_seed(7);
        let a = probe.sample_input(&Shape::Vector(4));
        let b = probe.sample_input(&Shape::Vector(4));
        assert_eq!(a, b);
        assert!(a.flatten().iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_max_accepted_argument_count() {
        assert_eq!(max_accepted_argument_count(&ScalarSquare), 1);
        assert_eq!(max_accepted_argument_count(&TwoForms), 2);
    }
}
