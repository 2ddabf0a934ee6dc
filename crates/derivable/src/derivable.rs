//! Functions bundled with their derivatives.
//!
//! A [`DerivableFunction`] owns a numeric function, its resolved input and
//! output shapes, and two set-once slots for its first and second
//! derivatives. A slot is filled either at construction, with a derivative
//! the caller already knows, or on first request through a [`Dispatcher`].
//! Once filled, a slot never changes and later requests do no backend work.
//!
//! # Example
//!
//! ```
//! use derivable::prelude::*;
//! use std::sync::Arc;
//!
//! struct Cube;
//!
//! impl NumericFunction for Cube {
//!     fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
//!         Ok(Value::scalar(x.as_scalar()?.clone().powi(3)))
//!     }
//! }
//!
//! let f = DerivableFunction::builder(Cube)
//!     .backend(BackendTag::Symbolic)
//!     .build(Arc::new(Dispatcher::default()))?;
//! assert_eq!(f.input_shape(), &Shape::Scalar);
//!
//! let df = f.eval_derivative(&Value::scalar(2.0))?.completed().unwrap();
//! assert_eq!(df, Value::scalar(12.0));
//! # Ok::<(), derivable::Error>(())
//! ```

use crate::dispatch::Dispatcher;
use derivable_core::backend::BackendTag;
use derivable_core::derivative::{DerivKind, DerivativeFn};
use derivable_core::error::{Error, Result};
use derivable_core::function::{catch_eval, NumericFunction};
use derivable_core::guard::Guarded;
use derivable_core::shape::{infer_out_shape, max_accepted_argument_count};
use derivable_core::value::{Shape, Value};
use log::debug;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// A numeric function with memoised derivatives.
pub struct DerivableFunction<F> {
    f: Arc<F>,
    first: OnceCell<DerivativeFn>,
    second: OnceCell<DerivativeFn>,
    input_shape: Shape,
    output_shape: Shape,
    backend: BackendTag,
    dispatcher: Arc<Dispatcher>,
}

impl<F> fmt::Debug for DerivableFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivableFunction")
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("backend", &self.backend)
            .field("first", &self.first.get())
            .field("second", &self.second.get())
            .finish()
    }
}

/// Builder for [`DerivableFunction`].
pub struct DerivableFunctionBuilder<F> {
    f: Arc<F>,
    derivative: Option<DerivativeFn>,
    second_derivative: Option<DerivativeFn>,
    input_shape: Option<Shape>,
    output_shape: Option<Shape>,
    test_input: Option<Value<f64>>,
    backend: Option<BackendTag>,
}

impl<F: NumericFunction + 'static> DerivableFunction<F> {
    /// Starts building a derivable function around `f`.
    pub fn builder(f: F) -> DerivableFunctionBuilder<F> {
        DerivableFunctionBuilder::from_shared(Arc::new(f))
    }

    /// The wrapped function.
    pub fn function(&self) -> &Arc<F> {
        &self.f
    }

    /// Resolved input shape.
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Resolved output shape.
    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    /// Backend used when none is named.
    pub fn backend(&self) -> &BackendTag {
        &self.backend
    }

    /// The dispatcher derivatives are requested from.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The first derivative, if it has been supplied or computed.
    pub fn known_first_derivative(&self) -> Option<&DerivativeFn> {
        self.first.get()
    }

    /// The second derivative, if it has been supplied or computed.
    pub fn known_second_derivative(&self) -> Option<&DerivativeFn> {
        self.second.get()
    }

    /// Kind of the first derivative for this function's shapes.
    pub fn first_kind(&self) -> DerivKind {
        DerivKind::first_order_for(&self.input_shape, &self.output_shape)
    }

    /// Kind of the second derivative for this function's shapes.
    pub fn second_kind(&self) -> Result<DerivKind> {
        DerivKind::second_order_for(&self.input_shape, &self.output_shape)
    }

    /// First derivative with the default backend.
    pub fn first_derivative(&self) -> Result<Guarded<&DerivativeFn>> {
        self.first_derivative_with(&self.backend)
    }

    /// First derivative (derivative, gradient, Jacobian or matrix Jacobian,
    /// depending on the shapes) with backend `tag`.
    ///
    /// A stored derivative is returned whatever the tag, as long as the tag
    /// is registered.
    pub fn first_derivative_with(&self, tag: &BackendTag) -> Result<Guarded<&DerivativeFn>> {
        self.resolve(&self.first, self.first_kind(), tag)
    }

    /// Second derivative with the default backend.
    pub fn second_derivative(&self) -> Result<Guarded<&DerivativeFn>> {
        self.second_derivative_with(&self.backend)
    }

    /// Second derivative (second derivative, Hessian or double Jacobian)
    /// with backend `tag`.
    pub fn second_derivative_with(&self, tag: &BackendTag) -> Result<Guarded<&DerivativeFn>> {
        self.resolve(&self.second, self.second_kind()?, tag)
    }

    fn resolve<'a>(
        &'a self,
        slot: &'a OnceCell<DerivativeFn>,
        kind: DerivKind,
        tag: &BackendTag,
    ) -> Result<Guarded<&'a DerivativeFn>> {
        self.dispatcher.registry().validate(tag)?;
        if let Some(known) = slot.get() {
            debug!("{} already known", kind);
            return Ok(Guarded::Completed(known));
        }

        let built = self.dispatcher.get(
            kind,
            tag,
            Arc::clone(&self.f),
            Some(self.input_shape.clone()),
            true,
        )?;
        Ok(built.map(|derivative| slot.get_or_init(|| derivative)))
    }

    /// Evaluates the function.
    pub fn eval(&self, x: &Value<f64>) -> Result<Value<f64>> {
        catch_eval(&*self.f, x)
    }

    /// Evaluates the function into `out`.
    ///
    /// Uses the function's own in-place form when it has one.
    pub fn eval_into(&self, out: &mut Value<f64>, x: &Value<f64>) -> Result<()> {
        let actual = out.shape();
        if actual != self.output_shape {
            return Err(Error::shape_mismatch(&self.output_shape, actual));
        }
        if max_accepted_argument_count(&*self.f) >= 2 {
            self.f.eval_in_place(out, x)
        } else {
            let y = self.eval(x)?;
            out.assign(&y)
        }
    }

    /// Evaluates the first derivative at `x`.
    pub fn eval_derivative(&self, x: &Value<f64>) -> Result<Guarded<Value<f64>>> {
        self.first_derivative()?.map(|d| d.call(x)).transpose()
    }

    /// Evaluates the first derivative at `x` into `out`.
    pub fn eval_derivative_into(&self, out: &mut Value<f64>, x: &Value<f64>) -> Result<Guarded<()>> {
        self.first_derivative()?.map(|d| d.call_into(out, x)).transpose()
    }

    /// Evaluates the second derivative at `x`.
    pub fn eval_second_derivative(&self, x: &Value<f64>) -> Result<Guarded<Value<f64>>> {
        self.second_derivative()?.map(|d| d.call(x)).transpose()
    }
}

impl<F: NumericFunction + 'static> DerivableFunctionBuilder<F> {
    /// Starts from a function that is already shared.
    pub fn from_shared(f: Arc<F>) -> Self {
        Self {
            f,
            derivative: None,
            second_derivative: None,
            input_shape: None,
            output_shape: None,
            test_input: None,
            backend: None,
        }
    }

    /// Supplies a known first derivative.
    pub fn derivative(mut self, df: DerivativeFn) -> Self {
        self.derivative = Some(df);
        self
    }

    /// Supplies a known second derivative.
    pub fn second_derivative(mut self, ddf: DerivativeFn) -> Self {
        self.second_derivative = Some(ddf);
        self
    }

    /// Declares the input shape, skipping inference.
    pub fn input_shape(mut self, shape: Shape) -> Self {
        self.input_shape = Some(shape.normalized());
        self
    }

    /// Declares the output shape, skipping the sample evaluation.
    pub fn output_shape(mut self, shape: Shape) -> Self {
        self.output_shape = Some(shape.normalized());
        self
    }

    /// Supplies an input the function is known to accept.
    pub fn test_input(mut self, x: Value<f64>) -> Self {
        self.test_input = Some(x);
        self
    }

    /// Sets the default backend.
    ///
    /// Defaults to forward mode when it is registered, symbolic otherwise.
    pub fn backend(mut self, tag: BackendTag) -> Self {
        self.backend = Some(tag);
        self
    }

    /// Resolves shapes and builds the function.
    ///
    /// The input shape is the declared one, else the shape of the test
    /// input, else the result of probing. The output shape is the declared
    /// one, else the shape of one evaluation. Any failure here fails the
    /// whole construction with [`Error::ShapeInference`].
    pub fn build(self, dispatcher: Arc<Dispatcher>) -> Result<DerivableFunction<F>> {
        let registry = dispatcher.registry();
        let backend = match self.backend {
            Some(tag) => tag,
            None if registry.is_registered(&BackendTag::ForwardDiff) => BackendTag::ForwardDiff,
            None => BackendTag::Symbolic,
        };
        registry.validate(&backend)?;

        let probe = dispatcher.config().probe();
        let input_shape = match (self.input_shape, &self.test_input) {
            (Some(declared), Some(x)) if declared != x.shape() => {
                return Err(Error::shape_inference(format!(
                    "declared input shape {} does not match test input of shape {}",
                    declared,
                    x.shape()
                )));
            }
            (Some(declared), _) => declared,
            (None, Some(x)) => x.shape(),
            (None, None) => probe.infer_arg_shape(&*self.f)?,
        };

        let output_shape = match self.output_shape {
            Some(declared) => declared,
            None => {
                let sample = match self.test_input {
                    Some(x) => x,
                    None => probe.sample_input(&input_shape),
                };
                infer_out_shape(&*self.f, &sample).map_err(|err| {
                    Error::shape_inference(format!(
                        "function failed on an input of shape {}: {}",
                        input_shape, err
                    ))
                })?
            }
        };
        debug!("derivable function {} -> {}", input_shape, output_shape);

        let first = OnceCell::new();
        if let Some(df) = self.derivative {
            let kind = DerivKind::first_order_for(&input_shape, &output_shape);
            let _ = first.set(known(df, kind, &input_shape, &output_shape)?);
        }
        let second = OnceCell::new();
        if let Some(ddf) = self.second_derivative {
            let kind = DerivKind::second_order_for(&input_shape, &output_shape)?;
            let _ = second.set(known(ddf, kind, &input_shape, &output_shape)?);
        }

        Ok(DerivableFunction {
            f: self.f,
            first,
            second,
            input_shape,
            output_shape,
            backend,
            dispatcher,
        })
    }
}

/// Checks a caller-supplied derivative against the resolved shapes.
fn known(df: DerivativeFn, kind: DerivKind, input: &Shape, output: &Shape) -> Result<DerivativeFn> {
    if df.kind() != kind {
        return Err(Error::invalid_configuration(
            format!("a function {} -> {} needs a {}", input, output, kind),
            "derivative",
            df.kind().name(),
        ));
    }
    let shape = kind.result_shape(input, output)?;
    match df.result_shape() {
        Some(declared) if *declared != shape => Err(Error::shape_mismatch(shape, declared)),
        Some(_) => Ok(df),
        None => Ok(df.with_result_shape(shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BackendRegistry, Capabilities};
    use derivable_core::config::DeriveConfig;
    use derivable_core::test_utils::{
        CountingFunction, Failing, FixedLength, InPlaceSquareCube, MatrixValued, Square, SquareCube,
    };
    use pretty_assertions::assert_eq;

    fn symbolic_dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            BackendRegistry::new(Capabilities::symbolic_only()),
            DeriveConfig::default(),
        ))
    }

    #[test]
    fn test_shape_resolution_order() {
        let probed = DerivableFunction::builder(FixedLength(4))
            .build(symbolic_dispatcher())
            .unwrap();
        assert_eq!(probed.input_shape(), &Shape::Vector(4));
        assert_eq!(probed.output_shape(), &Shape::Scalar);

        let from_test_input = DerivableFunction::builder(SquareCube)
            .test_input(Value::from_vec(vec![1.0, 1.0]))
            .build(symbolic_dispatcher())
            .unwrap();
        assert_eq!(from_test_input.input_shape(), &Shape::Vector(2));
        assert_eq!(from_test_input.output_shape(), &Shape::Vector(2));

        let declared = DerivableFunction::builder(MatrixValued)
            .input_shape(Shape::Vector(2))
            .output_shape(Shape::Array(vec![2, 2]))
            .build(symbolic_dispatcher())
            .unwrap();
        assert_eq!(declared.first_kind(), DerivKind::MatrixJacobian);
        assert!(declared.second_kind().is_err());
    }

    #[test]
    fn test_construction_fails_without_shapes() {
        let err = DerivableFunction::builder(Failing)
            .build(symbolic_dispatcher())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeInference { .. }));

        let err = DerivableFunction::builder(SquareCube)
            .input_shape(Shape::Vector(5))
            .build(symbolic_dispatcher())
            .unwrap_err();
        assert!(matches!(err, Error::ShapeInference { .. }));
    }

    #[test]
    fn test_default_backend_follows_registry() {
        let f = DerivableFunction::builder(Square)
            .build(symbolic_dispatcher())
            .unwrap();
        assert_eq!(f.backend(), &BackendTag::Symbolic);
    }

    #[test]
    fn test_first_derivative_is_memoised() {
        let f = DerivableFunction::builder(SquareCube)
            .backend(BackendTag::Symbolic)
            .build(symbolic_dispatcher())
            .unwrap();
        assert!(f.known_first_derivative().is_none());
        let a = f.first_derivative().unwrap().completed().unwrap();
        let b = f.first_derivative().unwrap().completed().unwrap();
        assert!(a.ptr_eq(b));
        assert_eq!(a.kind(), DerivKind::Jacobian);
        assert!(f.known_first_derivative().is_some());
    }

    #[test]
    fn test_supplied_derivative_is_passed_through() {
        let counted = Arc::new(CountingFunction::new(Square));
        let df = DerivativeFn::from_fn(DerivKind::Derivative, |x: &Value<f64>| {
            Ok(Value::scalar(2.0 * x.as_scalar()?))
        });
        let f = DerivableFunctionBuilder::from_shared(Arc::clone(&counted))
            .input_shape(Shape::Scalar)
            .output_shape(Shape::Scalar)
            .derivative(df.clone())
            .build(symbolic_dispatcher())
            .unwrap();

        let stored = f
            .first_derivative_with(&BackendTag::Passthrough)
            .unwrap()
            .completed()
            .unwrap();
        assert!(stored.ptr_eq(&df));
        assert_eq!(stored.call(&Value::scalar(3.0)).unwrap(), Value::scalar(6.0));
        assert_eq!(counted.count(), 0);

        assert!(matches!(
            f.second_derivative_with(&BackendTag::Passthrough),
            Err(Error::DerivativeUnavailable { .. })
        ));
    }

    #[test]
    fn test_supplied_derivative_of_wrong_kind_is_rejected() {
        let df = DerivativeFn::from_fn(DerivKind::Gradient, |x: &Value<f64>| Ok(x.clone()));
        let err = DerivableFunction::builder(Square)
            .derivative(df)
            .build(symbolic_dispatcher())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_eval_into_uses_native_in_place() {
        let f = DerivableFunction::builder(InPlaceSquareCube)
            .input_shape(Shape::Vector(2))
            .build(symbolic_dispatcher())
            .unwrap();
        let x = Value::from_vec(vec![2.0, 3.0]);
        let mut out = Value::zeros(&Shape::Vector(2));
        f.eval_into(&mut out, &x).unwrap();
        assert_eq!(out, f.eval(&x).unwrap());

        let mut wrong = Value::zeros(&Shape::Vector(3));
        assert!(matches!(
            f.eval_into(&mut wrong, &x),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_eval_second_derivative() {
        let f = DerivableFunction::builder(FixedLength(2))
            .backend(BackendTag::Symbolic)
            .build(symbolic_dispatcher())
            .unwrap();
        let h = f
            .eval_second_derivative(&Value::from_vec(vec![0.5, -1.0]))
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(h.flatten(), vec![2.0, 0.0, 0.0, 2.0]);
    }
}
