//! Core traits and types for backend-agnostic derivative dispatch.
//!
//! This crate defines what a differentiable function looks like and the
//! machinery shared by every differentiation backend: shape inference by
//! probing, derivative kinds and their result shapes, deadline-bounded
//! execution and runtime configuration.
//!
//! # Modules
//!
//! - [`backend`]: Backend identifiers and the numeric backend trait
//! - [`config`]: Runtime configuration
//! - [`derivative`]: Derivative kinds and ready-to-call derivatives
//! - [`error`]: Error type shared by the workspace
//! - [`function`]: The user function interface
//! - [`guard`]: Deadline-bounded execution
//! - [`shape`]: Shape inference by probing
//! - [`types`]: The numeric scalar abstraction
//! - [`value`]: Argument and result containers

pub mod backend;
pub mod config;
pub mod derivative;
pub mod error;
pub mod function;
pub mod guard;
pub mod shape;
pub mod types;
pub mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used items at the crate root
pub use error::{Error, Result};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use derivable_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backend::{BackendTag, NumericBackend};
    pub use crate::config::{default_config, DeriveConfig, DeriveConfigBuilder};
    pub use crate::derivative::{DerivKind, DerivativeFn};
    pub use crate::error::{Error, Result};
    pub use crate::function::{NumericFn, NumericFunction};
    pub use crate::guard::{run_with_deadline, CancelFlag, Guarded, GuardedExecutor};
    pub use crate::shape::{
        infer_arg_length_legacy, infer_arg_shape, infer_out_shape, max_accepted_argument_count,
        ShapeProbe,
    };
    pub use crate::types::Real;
    pub use crate::value::{Shape, Value};
}
