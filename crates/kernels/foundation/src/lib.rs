//! Stoch Foundation
//!
//! Core building blocks shared by the stoch crates: dense values and their
//! lane slots, deterministic PRNG keys, stable hashing, choice addresses,
//! elementwise operators and runtime policy.

pub mod address;
pub mod operators;
pub mod policy;
pub mod rng;
pub mod slot;
pub mod stable_hash;
pub mod value;

pub use address::Address;
pub use operators::{BinaryOp, UnaryOp};
pub use policy::{RuntimePolicy, UnseededPolicy};
pub use rng::{Key, RngStream};
pub use slot::Slot;
pub use stable_hash::{fnv1a64, fnv1a64_address, fnv1a64_mix, fnv1a64_str, FNV1A_OFFSET_BASIS_64, FNV1A_PRIME_64};
pub use value::{DType, Shape, Value, ValueError};
