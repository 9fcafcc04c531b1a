//! Runtime errors for generative-function execution and interpretation.
//!
//! # Error Categories
//!
//! - **Protocol errors**: [`Error::AddressNotFound`], [`Error::DuplicateAddress`], [`Error::TypeMismatch`]
//! - **Determinism errors**: [`Error::UnseededSampling`]
//! - **Interpreter errors**: [`Error::NotEnumerable`], [`Error::ShapeMismatch`], [`Error::Unsupported`]
//! - **Reflection errors**: [`Error::SelectionMismatch`]
//! - **Model errors**: [`Error::InvalidArgument`]
//! - **Lower layers**: [`Error::Ir`], [`Error::Value`]
//! - **Consistency errors**: [`Error::Internal`]
//!
//! # Error Handling Policy
//!
//! Every error is a defect in the model or in the calling code and is raised
//! synchronously where it is detected. A failing `simulate`, `assess`,
//! `update` or `generate` returns no partial trace: its handler is removed
//! from the context before the error propagates, so the context stays usable.

use stoch_foundation::ValueError;
use stoch_ir::IrError;
use thiserror::Error;

/// Runtime result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An IR-level failure: missing rule, unbound variable, malformed graph.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Array manipulation failed.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A sampling site ran without a seeded key under a fatal policy.
    #[error("unseeded sampling at {site}")]
    UnseededSampling {
        /// Sampler or address that tried to draw.
        site: String,
    },

    /// `assess` or `update` referenced an address absent from the choices.
    #[error("address not found: {address}")]
    AddressNotFound { address: String },

    /// The same address was recorded twice in one execution.
    #[error("address recorded twice: {0}")]
    DuplicateAddress(String),

    /// A supplied choice disagrees in dtype or shape with the site.
    #[error("type mismatch at {address}: expected {expected}, found {found}")]
    TypeMismatch {
        address: String,
        expected: String,
        found: String,
    },

    /// Exact enumeration reached a node it cannot expand.
    ///
    /// Raised for sampling nodes without a finite support, for trace nodes
    /// that were not lowered first, and when expansion exceeds the lane cap.
    #[error("not enumerable at {site}: {reason}")]
    NotEnumerable { site: String, reason: String },

    /// A rewrite could not honour what the selection demands.
    #[error("selection mismatch at {address}: {message}")]
    SelectionMismatch { address: String, message: String },

    /// Mapped axes or lane counts disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A distribution received arguments outside its domain.
    #[error("invalid argument to {dist}: {message}")]
    InvalidArgument { dist: String, message: String },

    /// The operation is not defined for this program or node.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Handler stack corruption or another broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Fold a runtime error into the IR error space, for custom-op rules.
    pub fn into_ir(self, op: &str) -> IrError {
        match self {
            Error::Ir(inner) => inner,
            Error::Value(inner) => IrError::Value(inner),
            Error::UnseededSampling { .. } => IrError::UnseededSampling { op: op.to_string() },
            other => IrError::Rule {
                op: op.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Prefix the address carried by the error with the call site `addr`.
    pub fn under(self, addr: &str) -> Error {
        let join = |inner: String| {
            if inner.is_empty() {
                addr.to_string()
            } else {
                format!("{addr}/{inner}")
            }
        };
        match self {
            Error::AddressNotFound { address } => Error::AddressNotFound { address: join(address) },
            Error::TypeMismatch {
                address,
                expected,
                found,
            } => Error::TypeMismatch {
                address: join(address),
                expected,
                found,
            },
            Error::SelectionMismatch { address, message } => Error::SelectionMismatch {
                address: join(address),
                message,
            },
            Error::DuplicateAddress(address) => Error::DuplicateAddress(join(address)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_prefixes_addresses() {
        let err = Error::AddressNotFound { address: "x".into() }.under("sub");
        assert_eq!(err, Error::AddressNotFound { address: "sub/x".into() });

        let err = Error::AddressNotFound { address: String::new() }.under("sub");
        assert_eq!(err.to_string(), "address not found: sub");

        let other = Error::Unsupported("x".into());
        assert_eq!(other.clone().under("sub"), other);
    }
}
