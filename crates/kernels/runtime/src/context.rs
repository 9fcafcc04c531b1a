//! Execution context.
//!
//! A [`Context`] carries everything an interpreter pass needs beyond the
//! graph itself:
//!
//! - the **entropy** source: a seeded key that is split once per sampling
//!   site, or nothing, in which case sampling falls back to a process-wide
//!   counter under the [`UnseededPolicy`]
//! - the **lane count** of the enclosing vectorised pass, if any
//! - the **handler stack** that gives trace nodes their meaning
//! - the **lane mask** of a branch whose index varies across lanes: lanes
//!   that did not take the branch still run it, but contribute nothing to
//!   any score
//!
//! Keys are consumed in graph order. A branch or loop takes one key from its
//! parent and runs its body in a scope of that key, so the keys seen inside a
//! body never depend on how many sites were visited before it elsewhere.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use stoch_foundation::{BinaryOp, Key, RuntimePolicy, Slot, UnseededPolicy, Value};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::handlers::Handler;

static FALLBACK_DRAWS: AtomicU64 = AtomicU64::new(0);
static WARNED_UNSEEDED: AtomicBool = AtomicBool::new(false);

/// Where a context draws its randomness from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entropy {
    Unseeded,
    Seeded(Key),
}

/// Interpreter state shared by one top-level call.
#[derive(Debug, Default)]
pub struct Context {
    entropy: Option<Key>,
    lanes: Option<usize>,
    mask: Option<Slot>,
    policy: RuntimePolicy,
    handlers: Vec<Handler>,
    splits: u64,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RuntimePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// A context seeded with `key`.
    pub fn seeded(key: Key) -> Self {
        Self {
            entropy: Some(key),
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    pub fn entropy(&self) -> Entropy {
        match self.entropy {
            Some(key) => Entropy::Seeded(key),
            None => Entropy::Unseeded,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.entropy.is_some()
    }

    /// Keys split off in the current scope.
    pub fn splits(&self) -> u64 {
        self.splits
    }

    pub fn lanes(&self) -> Option<usize> {
        self.lanes
    }

    /// Key for one sampling site.
    ///
    /// Seeded contexts split their key. Unseeded contexts consult the policy
    /// and then draw a fallback key from a process-wide counter.
    pub fn next_key(&mut self, site: &str) -> Result<Key> {
        if let Some(key) = self.entropy {
            let (carry, sub) = key.split();
            self.entropy = Some(carry);
            self.splits += 1;
            return Ok(sub);
        }
        match self.policy.unseeded {
            UnseededPolicy::Fatal => {
                return Err(Error::UnseededSampling {
                    site: site.to_string(),
                })
            }
            UnseededPolicy::Warn => {
                if !WARNED_UNSEEDED.swap(true, Ordering::Relaxed) {
                    warn!(%site, "sampling without a seed; draws are not reproducible");
                }
            }
            UnseededPolicy::Ignore => {}
        }
        let n = FALLBACK_DRAWS.fetch_add(1, Ordering::Relaxed);
        trace!(%site, draw = n, "fallback key");
        Ok(Key::from_label("stoch.fallback").fold_in(n))
    }

    /// Key for a nested scope, or `None` when unseeded.
    pub fn scope_key(&mut self) -> Option<Key> {
        let key = self.entropy?;
        let (carry, sub) = key.split();
        self.entropy = Some(carry);
        self.splits += 1;
        Some(sub)
    }

    /// Run `f` with `key` as the entropy source, restoring the current one after.
    ///
    /// `None` leaves the entropy as it is.
    pub fn scoped<T>(&mut self, key: Option<Key>, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = (self.entropy, self.splits);
        if key.is_some() {
            self.entropy = key;
            self.splits = 0;
        }
        let result = f(self);
        (self.entropy, self.splits) = saved;
        result
    }

    /// Run `f` with a lane count, restoring the current one after.
    pub fn with_lanes<T>(
        &mut self,
        lanes: Option<usize>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.lanes, lanes);
        let result = f(self);
        self.lanes = saved;
        result
    }

    /// Lanes of the current pass that are live, or `None` when all are.
    pub(crate) fn mask(&self) -> Option<&Slot> {
        self.mask.as_ref()
    }

    /// Run `f` with only the lanes in `mask` live, restoring the current mask
    /// after. Nested masks intersect.
    pub(crate) fn with_mask<T>(&mut self, mask: Slot, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let combined = match &self.mask {
            Some(outer) => Slot::binary(BinaryOp::And, outer, &mask)?,
            None => mask,
        };
        self.replacing_mask(Some(combined), f)
    }

    /// Run `f` under exactly `mask`, restoring the current one after.
    pub(crate) fn replacing_mask<T>(
        &mut self,
        mask: Option<Slot>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.mask, mask);
        let result = f(self);
        self.mask = saved;
        result
    }

    /// Whether lane `l` is live.
    pub(crate) fn lane_live(&self, l: usize) -> Result<bool> {
        match &self.mask {
            Some(mask) => Ok(mask.lane(l)?.scalar_f64()? != 0.0),
            None => Ok(true),
        }
    }

    /// `contribution` in live lanes and zero elsewhere.
    pub(crate) fn masked(&self, contribution: &Slot) -> Result<Slot> {
        match &self.mask {
            Some(mask) => Ok(Slot::select(mask, contribution, &Slot::Uniform(Value::f64(0.0)))?),
            None => Ok(contribution.clone()),
        }
    }

    /// Run `f` with `handler` installed and hand it back afterwards.
    ///
    /// The handler is removed even when `f` fails.
    pub(crate) fn with_handler<T>(
        &mut self,
        handler: Handler,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<(T, Handler)> {
        let depth = self.handlers.len();
        self.handlers.push(handler);
        let result = f(self);
        if self.handlers.len() != depth + 1 {
            self.handlers.truncate(depth);
            return Err(Error::Internal("handler stack unbalanced".to_string()));
        }
        let handler = self
            .handlers
            .pop()
            .ok_or_else(|| Error::Internal("handler stack empty".to_string()))?;
        Ok((result?, handler))
    }

    /// Take the innermost handler off the stack for the duration of `f`.
    ///
    /// Sub-programs invoked by `f` see the handlers below it, and the
    /// handler is pushed back whether `f` succeeds or not. Returns `None`
    /// without running `f` when no handler is installed.
    pub(crate) fn dispatch<T>(
        &mut self,
        f: impl FnOnce(&mut Handler, &mut Self) -> Result<T>,
    ) -> Option<Result<T>> {
        let mut handler = self.handlers.pop()?;
        let result = f(&mut handler, self);
        self.handlers.push(handler);
        Some(result)
    }

    pub fn handler_depth(&self) -> usize {
        self.handlers.len()
    }
}
