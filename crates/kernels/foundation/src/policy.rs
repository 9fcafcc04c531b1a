//! Runtime policy configuration.
//!
//! Defines how the runtime treats sampling that happens outside a seeded
//! scope, and the limits enforced by the exact interpreters. Policies are
//! plain serde values so they can be loaded from a config file and handed to
//! a context at construction.

use serde::{Deserialize, Serialize};

/// Default cap on the number of lanes an enumeration may expand to.
pub const DEFAULT_MAX_ENUMERATION_LANES: usize = 1 << 20;

/// Runtime policy for one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimePolicy {
    /// Behavior when a sampling site runs without a seeded key
    pub unseeded: UnseededPolicy,

    /// Upper bound on lanes produced by enumeration
    pub max_enumeration_lanes: usize,

    /// Validate every freshly staged graph before use
    pub validate_graphs: bool,
}

/// Behavior when sampling happens without a seeded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnseededPolicy {
    /// Refuse to sample and raise an error.
    Fatal,
    /// Log once and draw from the fallback counter.
    #[default]
    Warn,
    /// Silently draw from the fallback counter.
    Ignore,
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self {
            unseeded: UnseededPolicy::Warn,
            max_enumeration_lanes: DEFAULT_MAX_ENUMERATION_LANES,
            validate_graphs: true,
        }
    }
}

impl RuntimePolicy {
    /// Policy that refuses unseeded sampling.
    pub fn strict() -> Self {
        Self {
            unseeded: UnseededPolicy::Fatal,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RuntimePolicy::default();
        assert_eq!(policy.unseeded, UnseededPolicy::Warn);
        assert!(policy.validate_graphs);
        assert_eq!(RuntimePolicy::strict().unseeded, UnseededPolicy::Fatal);
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: RuntimePolicy =
            serde_json::from_str(r#"{ "unseeded": "fatal", "max_enumeration_lanes": 64 }"#).unwrap();
        assert_eq!(policy.unseeded, UnseededPolicy::Fatal);
        assert_eq!(policy.max_enumeration_lanes, 64);
        assert!(policy.validate_graphs);
    }

    #[test]
    fn test_serialize_lowercase() {
        let json = serde_json::to_string(&UnseededPolicy::Ignore).unwrap();
        assert_eq!(json, "\"ignore\"");
    }
}
