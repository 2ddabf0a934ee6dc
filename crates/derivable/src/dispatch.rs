//! Selecting and building derivative functions.
//!
//! The [`Dispatcher`] turns a function, a derivative kind and a backend tag
//! into a ready-to-call [`DerivativeFn`]. The symbolic backend does its work
//! once, under the configured deadline; the numeric backends do theirs on
//! every call of the returned function.

use crate::registry::BackendRegistry;
use derivable_core::backend::{BackendTag, NumericBackend};
use derivable_core::config::DeriveConfig;
use derivable_core::derivative::{DerivKind, DerivativeFn};
use derivable_core::error::{Error, Result};
use derivable_core::function::{numeric_view, NumericFunction};
use derivable_core::guard::Guarded;
use derivable_core::shape::infer_out_shape;
use derivable_core::value::{Shape, Value};
use derivable_symbolic::{derive_symbolic, SymbolicOptions};
use log::debug;
use std::sync::Arc;

/// Builds derivatives with the backends of a registry.
#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: BackendRegistry,
    config: DeriveConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(registry: BackendRegistry, config: DeriveConfig) -> Self {
        Self { registry, config }
    }

    /// The backends this dispatcher can use.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// The configuration applied to every request.
    pub fn config(&self) -> &DeriveConfig {
        &self.config
    }

    /// Builds the `kind` derivative of `f` with backend `tag`.
    ///
    /// The tag is validated before anything else, so an unknown tag never
    /// evaluates `f`. When `input` is given, `f` is evaluated once on a
    /// random input of that shape to fix the result shape (skipped for the
    /// symbolic backend when input validation is switched off). When it is
    /// not, the symbolic backend probes for it and the numeric backends
    /// take the shape of each call's argument.
    ///
    /// `in_place` requests a native in-place form. Forward mode, finite
    /// differences and the symbolic backend provide one; a custom backend
    /// provides one when it reports [`NumericBackend::writes_in_place`].
    /// Without it [`DerivativeFn::call_into`] still works through a copy.
    pub fn get<F>(
        &self,
        kind: DerivKind,
        tag: &BackendTag,
        f: Arc<F>,
        input: Option<Shape>,
        in_place: bool,
    ) -> Result<Guarded<DerivativeFn>>
    where
        F: NumericFunction + 'static,
    {
        self.registry.validate(tag)?;
        if *tag == BackendTag::Passthrough {
            return Err(Error::derivative_unavailable(kind.name()));
        }
        let input = input.map(|shape| shape.normalized());

        let check = match &input {
            Some(_) => *tag != BackendTag::Symbolic || self.config.validate_input,
            None => false,
        };
        let result_shape = match &input {
            Some(shape) if check => Some(self.result_shape(kind, &*f, shape)?),
            _ => None,
        };
        debug!(
            "dispatching {} to `{}` (input {:?}, in place: {})",
            kind, tag, input, in_place
        );

        let derivative = match tag {
            BackendTag::Symbolic => return self.symbolic(kind, f, input, in_place),
            BackendTag::ForwardDiff => forward_diff(kind, f, in_place)?,
            BackendTag::FiniteDiff => numeric(kind, finite_diff(&self.config)?, f, in_place),
            BackendTag::Custom(name) => {
                let backend = self
                    .registry
                    .custom(name)
                    .ok_or_else(|| Error::unknown_backend(tag, &self.registry.list_backends()))?;
                numeric(kind, backend, f, in_place)
            }
            BackendTag::Passthrough => return Err(Error::derivative_unavailable(kind.name())),
        };

        Ok(Guarded::Completed(match result_shape {
            Some(shape) => derivative.with_result_shape(shape),
            None => derivative,
        }))
    }

    /// Evaluates `f` once on `input` and returns the shape of the result.
    fn result_shape<F: NumericFunction>(&self, kind: DerivKind, f: &F, input: &Shape) -> Result<Shape> {
        let sample = self.config.probe().sample_input(input);
        let output = infer_out_shape(f, &sample).map_err(|err| {
            let cause = match err {
                Error::Evaluation { reason } => reason,
                other => other.to_string(),
            };
            Error::evaluation(format!(
                "the function rejected an input of shape {}: {}",
                input, cause
            ))
        })?;
        kind.result_shape(input, &output)
    }

    fn symbolic<F>(
        &self,
        kind: DerivKind,
        f: Arc<F>,
        input: Option<Shape>,
        in_place: bool,
    ) -> Result<Guarded<DerivativeFn>>
    where
        F: NumericFunction + 'static,
    {
        let input = match input {
            Some(shape) => shape,
            None => self.config.probe().infer_arg_shape(&*f)?,
        };
        let options = SymbolicOptions::from_config(&self.config, in_place);
        let callable = derive_symbolic(f, input, kind, options)?;
        Ok(callable.map(|c| c.into_derivative_fn(kind)))
    }
}

/// Wraps a numeric backend call around the type-erased view of `f`.
fn numeric<F>(kind: DerivKind, backend: Arc<dyn NumericBackend>, f: Arc<F>, in_place: bool) -> DerivativeFn
where
    F: NumericFunction + 'static,
{
    let view = numeric_view(f);
    let df = {
        let (backend, view) = (Arc::clone(&backend), view.clone());
        DerivativeFn::from_fn(kind, move |x| backend.differentiate(kind, &view, x))
    };
    if in_place && backend.writes_in_place() {
        df.with_in_place(Arc::new(move |out: &mut Value<f64>, x: &Value<f64>| {
            backend.differentiate_into(kind, &view, out, x)
        }))
    } else {
        df
    }
}

#[cfg(feature = "autodiff")]
fn forward_diff<F>(kind: DerivKind, f: Arc<F>, in_place: bool) -> Result<DerivativeFn>
where
    F: NumericFunction + 'static,
{
    let df = {
        let f = Arc::clone(&f);
        DerivativeFn::from_fn(kind, move |x| derivable_autodiff::derivative(&*f, kind, x))
    };
    Ok(if in_place {
        df.with_in_place(Arc::new(move |out: &mut Value<f64>, x: &Value<f64>| {
            derivable_autodiff::derivative_into(&*f, kind, out, x)
        }))
    } else {
        df
    })
}

#[cfg(not(feature = "autodiff"))]
fn forward_diff<F>(_kind: DerivKind, _f: Arc<F>, _in_place: bool) -> Result<DerivativeFn>
where
    F: NumericFunction + 'static,
{
    Err(Error::unknown_backend(
        BackendTag::ForwardDiff,
        &[BackendTag::Symbolic, BackendTag::Passthrough],
    ))
}

#[cfg(feature = "autodiff")]
fn finite_diff(config: &DeriveConfig) -> Result<Arc<dyn NumericBackend>> {
    let backend = match config.fd_step {
        Some(step) => derivable_autodiff::FiniteDifferences::with_step(step)?,
        None => derivable_autodiff::FiniteDifferences::new(),
    };
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "autodiff"))]
fn finite_diff(_config: &DeriveConfig) -> Result<Arc<dyn NumericBackend>> {
    Err(Error::unknown_backend(
        BackendTag::FiniteDiff,
        &[BackendTag::Symbolic, BackendTag::Passthrough],
    ))
}

macro_rules! named_operations {
    ($(($name:ident, $in_place:ident, $kind:expr)),* $(,)?) => {
        impl Dispatcher {
            $(
                #[doc = concat!("Builds the allocating `", stringify!($name), "` of `f`.")]
                pub fn $name<F>(
                    &self,
                    tag: &BackendTag,
                    f: Arc<F>,
                    input: Option<Shape>,
                ) -> Result<Guarded<DerivativeFn>>
                where
                    F: NumericFunction + 'static,
                {
                    self.get($kind, tag, f, input, false)
                }

                #[doc = concat!("Builds the in-place `", stringify!($name), "` of `f`.")]
                pub fn $in_place<F>(
                    &self,
                    tag: &BackendTag,
                    f: Arc<F>,
                    input: Option<Shape>,
                ) -> Result<Guarded<DerivativeFn>>
                where
                    F: NumericFunction + 'static,
                {
                    self.get($kind, tag, f, input, true)
                }
            )*
        }
    };
}

named_operations!(
    (derivative, derivative_in_place, DerivKind::Derivative),
    (second_derivative, second_derivative_in_place, DerivKind::SecondDerivative),
    (gradient, gradient_in_place, DerivKind::Gradient),
    (jacobian, jacobian_in_place, DerivKind::Jacobian),
    (matrix_jacobian, matrix_jacobian_in_place, DerivKind::MatrixJacobian),
    (hessian, hessian_in_place, DerivKind::Hessian),
    (double_jacobian, double_jacobian_in_place, DerivKind::DoubleJacobian),
);
