//! Error types for derivative dispatch.
//!
//! This module defines the error type shared by every crate of the
//! workspace. Timeouts of guarded computations are not part of the normal
//! error flow: they are reported as [`Guarded::TimedOut`] values, and only
//! become an [`Error::TimedOut`] when a caller opts in via
//! [`Guarded::into_result`].
//!
//! [`Guarded::TimedOut`]: crate::guard::Guarded::TimedOut
//! [`Guarded::into_result`]: crate::guard::Guarded::into_result

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while inferring shapes or building derivatives.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The input or output structure of a function could not be determined.
    ///
    /// Raised when every probed input up to the probe bound made the
    /// function fail, or when the output of the function could not be
    /// classified.
    #[error("Shape inference failed: {reason}")]
    ShapeInference {
        /// Description of what could not be inferred
        reason: String,
    },

    /// The requested differentiation backend is not registered.
    #[error("Unknown differentiation backend `{tag}` (available: {available})")]
    UnknownBackend {
        /// The rejected backend tag
        tag: String,
        /// Comma-separated list of registered backends
        available: String,
    },

    /// A value or buffer does not have the expected shape.
    ///
    /// This is the error returned by in-place derivative functions when the
    /// caller-supplied output buffer is sized incorrectly.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape
        expected: String,
        /// Actual shape
        actual: String,
    },

    /// A symbolic expression could not be compiled into a callable.
    #[error("Failed to build callable: {reason}")]
    Build {
        /// Description of the build failure
        reason: String,
    },

    /// The user function failed during evaluation.
    #[error("Function evaluation failed: {reason}")]
    Evaluation {
        /// Description of the evaluation failure
        reason: String,
    },

    /// The requested derivative does not apply to a function of this shape.
    #[error("Cannot compute {operation} for a function {input} -> {output}")]
    UnsupportedShape {
        /// The derivative operation that was requested
        operation: String,
        /// Input shape of the function
        input: String,
        /// Output shape of the function
        output: String,
    },

    /// No stored derivative exists to pass through.
    #[error("No known {which} derivative to pass through")]
    DerivativeUnavailable {
        /// Which derivative slot was empty
        which: String,
    },

    /// A guarded task panicked instead of producing a value.
    #[error("Guarded task panicked: {reason}")]
    TaskPanicked {
        /// Panic payload, if it was a string
        reason: String,
    },

    /// The execution context for a guarded task could not be started.
    #[error("Failed to start guarded task: {reason}")]
    Spawn {
        /// Description of the failure
        reason: String,
    },

    /// A guarded computation did not finish within its deadline.
    #[error("Computation did not finish within {timeout:?}")]
    TimedOut {
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {parameter} = {value} ({reason})")]
    InvalidConfiguration {
        /// Description of the configuration error
        reason: String,
        /// Name of the invalid parameter
        parameter: String,
        /// Value that was invalid
        value: String,
    },
}

impl Error {
    /// Create a ShapeInference error with a custom reason.
    pub fn shape_inference<S: Into<String>>(reason: S) -> Self {
        Self::ShapeInference {
            reason: reason.into(),
        }
    }

    /// Create an UnknownBackend error.
    pub fn unknown_backend<S1, S2>(tag: S1, available: &[S2]) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::UnknownBackend {
            tag: tag.to_string(),
            available: available
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Create a ShapeMismatch error.
    pub fn shape_mismatch<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a Build error with a custom reason.
    pub fn build<S: Into<String>>(reason: S) -> Self {
        Self::Build {
            reason: reason.into(),
        }
    }

    /// Create an Evaluation error with a custom reason.
    pub fn evaluation<S: Into<String>>(reason: S) -> Self {
        Self::Evaluation {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedShape error.
    pub fn unsupported_shape<S1, S2, S3>(operation: S1, input: S2, output: S3) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
        S3: std::fmt::Display,
    {
        Self::UnsupportedShape {
            operation: operation.to_string(),
            input: input.to_string(),
            output: output.to_string(),
        }
    }

    /// Create a DerivativeUnavailable error.
    pub fn derivative_unavailable<S: Into<String>>(which: S) -> Self {
        Self::DerivativeUnavailable {
            which: which.into(),
        }
    }

    /// Create a TaskPanicked error.
    pub fn task_panicked<S: Into<String>>(reason: S) -> Self {
        Self::TaskPanicked {
            reason: reason.into(),
        }
    }

    /// Create a Spawn error.
    pub fn spawn<S: Into<String>>(reason: S) -> Self {
        Self::Spawn {
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfiguration error.
    pub fn invalid_configuration<S1, S2, S3>(reason: S1, parameter: S2, value: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidConfiguration {
            reason: reason.into(),
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    /// Returns true if the error originates from the evaluated function itself.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(self, Self::Evaluation { .. } | Self::TaskPanicked { .. })
    }
}

/// Turns a panic payload into a readable message.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result type alias for derivative dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
