//! Numeric differentiation backends.
//!
//! This crate provides the two backends that work without symbolic
//! manipulation:
//!
//! - **Forward mode**: dual numbers, exact to machine precision. First
//!   order uses one pass per input coordinate, second order uses nested
//!   duals ([`forward`]).
//! - **Finite differences**: central differences on plain `f64`
//!   evaluations, usable with any function through its type-erased view
//!   ([`finite_diff`]).
//!
//! Both return results in the canonical row-major layout, so a Jacobian
//! computed here can be compared entry by entry with a symbolic one.

pub mod dual;
pub mod finite_diff;
pub mod forward;
mod target;

// Re-export key types
pub use dual::Dual;
pub use finite_diff::FiniteDifferences;
pub use forward::{derivative, derivative_into, jvp};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dual::Dual;
    pub use crate::finite_diff::FiniteDifferences;
    pub use crate::forward::{derivative, jvp};
}
