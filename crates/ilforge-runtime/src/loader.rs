//! The pluggable "load into executable form" step.
//!
//! A [`Loader`] turns a finalized method into an [`EntryPoint`]. The default
//! backend is [`crate::Interpreter`]; a JIT could stand in its place.

use std::sync::Arc;

use thiserror::Error;

use ilforge_emit::{EmitResult, MethodDescriptor};

use crate::value::Value;

/// Runtime fault raised by an entry point.
///
/// Bodies are verified before loading, so a trap reaching a typed handle is
/// an invariant violation, not a caller error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trap in `{method}` at pc {pc}: {reason}")]
pub struct Trap {
    /// `Type::method`.
    pub method: String,
    /// Faulting instruction.
    pub pc: usize,
    /// What went wrong.
    pub reason: String,
}

/// Invocable form of one method.
pub trait EntryPoint: Send + Sync {
    /// Runs the method on `args` (already in parameter order).
    fn call(&self, args: Vec<Value>) -> Result<Value, Trap>;
}

/// Produces entry points from finalized methods.
pub trait Loader: Send + Sync {
    /// Loads `method`; fails with `LoadFailed` when the backend cannot run it.
    fn load(&self, method: &Arc<MethodDescriptor>) -> EmitResult<Arc<dyn EntryPoint>>;
}

impl<F> EntryPoint for F
where
    F: Fn(Vec<Value>) -> Result<Value, Trap> + Send + Sync,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, Trap> { self(args) }
}
