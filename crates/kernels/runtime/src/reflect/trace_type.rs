//! Trace types.
//!
//! The static shape of what a program records: per address, the dtype and
//! shape of the choice and whether its support is finite.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stoch_foundation::{Address, DType, Shape};
use stoch_ir::Aval;

/// Support of one choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    Real,
    Finite(usize),
}

/// Static description of a program's choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    /// Records nothing.
    Bottom,
    /// One choice.
    Shaped {
        dtype: DType,
        shape: Shape,
        support: Support,
    },
    /// Sub-programs by address.
    Map(IndexMap<String, TraceType>),
}

impl TraceType {
    pub fn shaped(aval: &Aval, support: Support) -> Self {
        TraceType::Shaped {
            dtype: aval.dtype,
            shape: aval.shape.clone(),
            support,
        }
    }

    /// Trace type at `addr`, walking `/`-separated levels.
    pub fn get(&self, addr: &str) -> Option<&TraceType> {
        let mut at = self;
        for segment in Address::parse(addr).segments() {
            match at {
                TraceType::Map(entries) => at = entries.get(segment)?,
                _ => return None,
            }
        }
        Some(at)
    }

    /// True when every choice has a finite support.
    pub fn is_finite(&self) -> bool {
        match self {
            TraceType::Bottom => true,
            TraceType::Shaped { support, .. } => matches!(support, Support::Finite(_)),
            TraceType::Map(entries) => entries.values().all(TraceType::is_finite),
        }
    }

    /// Number of joint outcomes, if finite.
    ///
    /// A choice of shape `s` with `n` outcomes per element counts `n^|s|`.
    pub fn num_outcomes(&self) -> Option<usize> {
        match self {
            TraceType::Bottom => Some(1),
            TraceType::Shaped {
                support: Support::Finite(n),
                shape,
                ..
            } => n.checked_pow(u32::try_from(shape.numel()).ok()?),
            TraceType::Shaped { .. } => None,
            TraceType::Map(entries) => entries
                .values()
                .try_fold(1usize, |acc, t| acc.checked_mul(t.num_outcomes()?)),
        }
    }

    /// Same type without the addresses in `remove`.
    pub(crate) fn without(&self, remove: &[Address]) -> TraceType {
        if remove.iter().any(Address::is_root) {
            return TraceType::Bottom;
        }
        match self {
            TraceType::Map(entries) => {
                let mut kept = IndexMap::new();
                for (key, sub) in entries {
                    let below: Vec<Address> = remove
                        .iter()
                        .filter_map(|a| match a.split_first() {
                            Some((head, rest)) if head == key.as_str() => Some(rest),
                            _ => None,
                        })
                        .collect();
                    match sub.without(&below) {
                        TraceType::Bottom => {}
                        other => {
                            kept.insert(key.clone(), other);
                        }
                    }
                }
                TraceType::Map(kept)
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for TraceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceType::Bottom => write!(f, "⊥"),
            TraceType::Shaped {
                dtype,
                shape,
                support: Support::Real,
            } => write!(f, "{}{}", dtype, shape),
            TraceType::Shaped {
                dtype,
                shape,
                support: Support::Finite(n),
            } => write!(f, "{}{}{{{}}}", dtype, shape, n),
            TraceType::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type() -> TraceType {
        let mut entries = IndexMap::new();
        entries.insert(
            "a".to_string(),
            TraceType::shaped(&Aval::scalar(DType::Bool), Support::Finite(2)),
        );
        entries.insert(
            "b".to_string(),
            TraceType::shaped(&Aval::new(DType::I64, vec![2]), Support::Finite(3)),
        );
        TraceType::Map(entries)
    }

    #[test]
    fn test_outcome_count() {
        let t = sample_type();
        assert!(t.is_finite());
        assert_eq!(t.num_outcomes(), Some(2 * 9));
        assert_eq!(t.to_string(), "{a: bool[]{2}, b: i64[2]{3}}");
    }

    #[test]
    fn test_without_drops_addresses() {
        let t = sample_type().without(&[Address::parse("a")]);
        assert!(t.get("a").is_none());
        assert!(t.get("b").is_some());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&TraceType::Bottom).unwrap();
        assert_eq!(json, "\"bottom\"");
    }
}
