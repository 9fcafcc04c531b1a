//! Seeding.
//!
//! Seeding fixes the key stream of a computation. Re-running a seeded
//! computation with the same key replays every draw; a [`SeededKernel`] is
//! the deterministic function a staged graph becomes once its key is fixed.

use std::sync::Arc;

use stoch_foundation::{Key, Value};
use stoch_ir::{Graph, Kernel};
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::interpret::eval::evaluate;

/// Run `f` with every draw derived from `key`.
pub fn seed<T>(ctx: &mut Context, key: Key, f: impl FnOnce(&mut Context) -> Result<T>) -> Result<T> {
    ctx.scoped(Some(key), f)
}

/// A graph with its key stream fixed.
///
/// Calls are pure: the same arguments always produce the same outputs.
#[derive(Debug, Clone)]
pub struct SeededKernel {
    graph: Arc<Graph>,
    key: Key,
}

impl SeededKernel {
    pub fn new(graph: Arc<Graph>, key: Key) -> Self {
        Self { graph, key }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        evaluate(&mut Context::seeded(self.key), &self.graph, args)
    }

    /// Compile to a deterministic kernel.
    ///
    /// Only graphs without sampling nodes compile; seeded graphs that do
    /// sample are run through [`SeededKernel::call`] instead.
    pub fn compile(&self) -> Result<Kernel> {
        debug!(key = self.key.state(), "compiling seeded graph");
        Ok(stoch_ir::compile(Arc::clone(&self.graph))?)
    }
}
