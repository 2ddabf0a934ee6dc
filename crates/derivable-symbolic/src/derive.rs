//! Deadline-bounded symbolic derivation.

use crate::compile::{build_callable, BuildOptions, Callable};
use crate::diff::differentiate;
use crate::trace::trace;
use derivable_core::config::DeriveConfig;
use derivable_core::derivative::DerivKind;
use derivable_core::error::Result;
use derivable_core::function::NumericFunction;
use derivable_core::guard::{Guarded, GuardedExecutor};
use derivable_core::value::Shape;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// Options for [`derive_symbolic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolicOptions {
    /// Deadline for trace, differentiation and compilation together.
    pub timeout: Duration,
    /// Build the in-place form.
    pub in_place: bool,
    /// Evaluate outputs in parallel.
    pub parallel: bool,
    /// Log start, finish and timeout.
    pub verbose: bool,
}

impl Default for SymbolicOptions {
    fn default() -> Self {
        Self {
            timeout: GuardedExecutor::DEFAULT_TIMEOUT,
            in_place: false,
            parallel: false,
            verbose: false,
        }
    }
}

impl SymbolicOptions {
    /// Options taken from a configuration.
    pub fn from_config(config: &DeriveConfig, in_place: bool) -> Self {
        Self {
            timeout: config.timeout,
            in_place,
            parallel: config.parallel,
            verbose: config.verbose,
        }
    }
}

/// Traces, differentiates and compiles `f` on a worker thread.
///
/// Returns [`Guarded::TimedOut`] if the deadline passes; there is no
/// fallback to another backend. `input` is trusted: a shape `f` cannot
/// handle surfaces as the evaluation error raised during tracing.
pub fn derive_symbolic<F>(
    f: Arc<F>,
    input: Shape,
    kind: DerivKind,
    options: SymbolicOptions,
) -> Result<Guarded<Callable>>
where
    F: NumericFunction + 'static,
{
    debug!("symbolic {} over {} (deadline {:?})", kind, input, options.timeout);
    let executor = GuardedExecutor::new(options.timeout).verbose(options.verbose);
    let build = BuildOptions {
        in_place: options.in_place,
        parallel: options.parallel,
    };
    executor
        .run_cancellable(move |flag| -> Result<Callable> {
            let outputs = trace(&*f, &input)?;
            flag.checkpoint()?;
            let derivative = differentiate(&outputs, &input, kind, Some(&flag))?;
            flag.checkpoint()?;
            build_callable(&derivative, input, build)
        })?
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use derivable_core::test_utils::{FixedLength, Slow, Square, SquareCube};
    use derivable_core::value::Value;
    use std::time::Instant;

    #[test]
    fn test_jacobian_and_in_place() {
        let options = SymbolicOptions {
            in_place: true,
            ..SymbolicOptions::default()
        };
        let callable = derive_symbolic(Arc::new(SquareCube), Shape::Vector(2), DerivKind::Jacobian, options)
            .unwrap()
            .completed()
            .unwrap();
        assert!(callable.is_in_place());
        let mut out = Value::zeros(&Shape::Array(vec![2, 2]));
        callable.call_into(&mut out, &Value::from_vec(vec![2.0, 1.0])).unwrap();
        assert_eq!(out.flatten(), vec![4.0, 0.0, 1.0, 6.0]);
    }

    #[test]
    fn test_square_at_zero() {
        let callable = derive_symbolic(
            Arc::new(Square),
            Shape::Scalar,
            DerivKind::Derivative,
            SymbolicOptions::default(),
        )
        .unwrap()
        .completed()
        .unwrap();
        assert_eq!(callable.call(&Value::scalar(0.0)).unwrap(), Value::scalar(0.0));
    }

    #[test]
    fn test_gradient_of_a_long_sum_on_the_worker_thread() {
        let n = 50_000;
        let callable = derive_symbolic(
            Arc::new(FixedLength(n)),
            Shape::Vector(n),
            DerivKind::Gradient,
            SymbolicOptions {
                timeout: Duration::from_secs(60),
                ..SymbolicOptions::default()
            },
        )
        .unwrap()
        .completed()
        .unwrap();
        let g = callable.call(&Value::from_vec(vec![1.0; n])).unwrap();
        assert_eq!(g.len(), n);
        assert!(g.flatten().iter().all(|&d| d == 2.0));
    }

    #[test]
    fn test_deadline() {
        let options = SymbolicOptions {
            timeout: Duration::from_millis(50),
            ..SymbolicOptions::default()
        };
        let start = Instant::now();
        let out = derive_symbolic(
            Arc::new(Slow(Duration::from_secs(2))),
            Shape::Scalar,
            DerivKind::Derivative,
            options,
        )
        .unwrap();
        assert!(out.is_timed_out());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wrong_input_shape_is_an_error() {
        let err = derive_symbolic(
            Arc::new(SquareCube),
            Shape::Vector(3),
            DerivKind::Jacobian,
            SymbolicOptions::default(),
        )
        .unwrap_err();
        assert!(err.is_evaluation_failure());
    }

    #[test]
    fn test_options_from_config() {
        let config = DeriveConfig::builder().parallel(true).build().unwrap();
        let options = SymbolicOptions::from_config(&config, true);
        assert!(options.parallel && options.in_place);
        assert_eq!(options.timeout, config.timeout);
    }
}
