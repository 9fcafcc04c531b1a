//! Hierarchical choice addresses.
//!
//! Every random choice of a program is recorded under an address. Nested
//! programs extend the address of their call site, so `outer/x` names the
//! choice `x` recorded by the sub-program traced at `outer`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stable_hash::fnv1a64_address;

/// A `/`-separated address path. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// The root address.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse a `/`-separated string. Empty segments are dropped.
    pub fn parse(s: &str) -> Self {
        Self {
            segments: s
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment and the remaining path.
    pub fn split_first(&self) -> Option<(&str, Address)> {
        self.segments
            .split_first()
            .map(|(head, rest)| (head.as_str(), Address::new(rest.to_vec())))
    }

    /// Extend the path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Stable hash of the joined path.
    pub fn stable_hash(&self) -> u64 {
        fnv1a64_address(&self.segments)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl PartialEq<&str> for Address {
    fn eq(&self, other: &&str) -> bool {
        self.to_string() == *other
    }
}
