//! Backend-agnostic derivative dispatch.
//!
//! `derivable` computes derivatives of plain Rust numeric functions with a
//! backend chosen at runtime:
//!
//! - [`BackendTag::Symbolic`]: trace, differentiate and compile once, under
//!   a deadline
//! - [`BackendTag::ForwardDiff`]: dual numbers on every call (feature
//!   `autodiff`)
//! - [`BackendTag::FiniteDiff`]: central differences on every call (feature
//!   `autodiff`)
//! - [`BackendTag::Custom`]: any registered [`NumericBackend`]
//!
//! A [`DerivableFunction`] infers the shapes of a function and memoises its
//! first and second derivatives.
//!
//! # Example
//!
//! ```
//! use derivable::prelude::*;
//! use std::sync::Arc;
//!
//! struct Model;
//!
//! impl NumericFunction for Model {
//!     fn eval<S: Real>(&self, x: &Value<S>) -> Result<Value<S>> {
//!         let x = x.as_vector_of(2)?;
//!         Ok(Value::from_vec(vec![
//!             x[0].clone().powi(2),
//!             x[0].clone() * x[1].clone().powi(3),
//!         ]))
//!     }
//! }
//!
//! let dispatcher = Dispatcher::default();
//! let jac = dispatcher
//!     .jacobian(&BackendTag::Symbolic, Arc::new(Model), None)?
//!     .completed()
//!     .expect("deadline");
//! let y = jac.call(&Value::from_vec(vec![2.0, 1.0]))?;
//! assert_eq!(y.flatten(), vec![4.0, 0.0, 1.0, 6.0]);
//! # Ok::<(), derivable::Error>(())
//! ```

pub mod derivable;
pub mod dispatch;
pub mod registry;

pub use crate::derivable::{DerivableFunction, DerivableFunctionBuilder};
pub use dispatch::Dispatcher;
pub use registry::{BackendRegistry, Capabilities};

// Re-export the workspace crates
pub use derivable_core;
pub use derivable_symbolic;

#[cfg(feature = "autodiff")]
pub use derivable_autodiff;

pub use derivable_core::backend::{BackendTag, NumericBackend};
pub use derivable_core::error::{Error, Result};

// Re-export key dependencies
pub use nalgebra;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::derivable::{DerivableFunction, DerivableFunctionBuilder};
    pub use crate::dispatch::Dispatcher;
    pub use crate::registry::{BackendRegistry, Capabilities};
    pub use derivable_core::prelude::*;
}
