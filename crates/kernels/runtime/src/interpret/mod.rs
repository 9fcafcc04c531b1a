//! Interpreters over staged graphs.
//!
//! Each interpreter gives the same graph a different meaning:
//!
//! - [`eval`]: forward execution, optionally over lanes
//! - [`seed`]: execution under an explicit key
//! - [`vmap`]: execution mapped over an axis of the inputs
//! - [`enumerate`]: every combination of finite-support choices, by
//!   continuation frames
//! - [`eliminate`]: the same combinations, by tagged broadcasting

pub mod eliminate;
pub mod enumerate;
pub mod eval;
pub mod seed;
pub mod vmap;

pub use eliminate::eliminate;
pub use enumerate::{enumerate, Enumeration};
pub use eval::evaluate;
pub use seed::{seed, SeededKernel};
pub use vmap::modular_vmap;
