//! Symbolic differentiation backend.
//!
//! A numeric function is traced by evaluating it on symbolic placeholders,
//! differentiated exactly, and compiled into register programs:
//!
//! 1. [`trace()`] produces one [`Expr`] per output entry.
//! 2. [`diff`] differentiates them in the canonical result layout.
//! 3. [`compile`] turns the derivative expressions into a [`Callable`].
//!
//! [`derive_symbolic`] runs all three steps under a deadline.
//!
//! Functions that branch on the numeric value of their argument cannot be
//! traced.

pub mod compile;
pub mod derive;
pub mod diff;
pub mod expr;
pub mod trace;

// Re-export key types
pub use compile::{build_callable, BuildOptions, Callable, CompiledFunction, Program};
pub use derive::{derive_symbolic, SymbolicOptions};
pub use diff::{differentiate, symbolic_passthrough};
pub use expr::{BinaryOp, Expr, Node, UnaryOp};
pub use trace::{placeholders, trace};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::compile::{build_callable, BuildOptions, Callable};
    pub use crate::derive::{derive_symbolic, SymbolicOptions};
    pub use crate::diff::symbolic_passthrough;
    pub use crate::expr::Expr;
}
