//! CEL (Common Expression Language) evaluation for dynamic group predicates
//!
//! Compiled programs are cached per expression string, so re-evaluating the same
//! membership expression for every request only pays for execution.

pub mod engine;
pub mod context;
pub mod error;
pub mod convert;

pub use engine::Engine;
pub use context::EvalContext;
pub use error::{CelError, Result};
