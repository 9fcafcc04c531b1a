//! Program kinds.
//!
//! - [`DistributionProgram`]: one choice drawn from a [`Dist`](crate::distributions::Dist)
//! - [`FnProgram`]: a graph staged from a host closure, built with [`gen`]
//! - [`VmapProgram`]: an inner program mapped over an axis
//! - [`Marginal`]: one address of a program with the rest integrated out

pub mod distribution;
pub mod function;
pub mod marginal;
pub mod vmap;

pub use distribution::{ConstrainedLeaf, DistributionProgram};
pub use function::{gen, ConstrainedFn, FnProgram, HostFn};
pub use marginal::{estimate_log_marginal, Importance, Marginal};
pub use vmap::{VmapMeasure, VmapProgram};
