//! Address selections.
//!
//! A [`Selection`] is a predicate over hierarchical addresses. Matching one
//! address level at a time yields a verdict for that level and a residual
//! selection for the level below:
//!
//! ```text
//! sel("x").matches("x")            -> (true,  All)
//! sel("x").matches("y")            -> (false, None)
//! (!sel("x")).matches("y")         -> (true,  !None)
//! sel("a/b").matches("a")          -> (true,  sel("b"))
//! ```

use std::fmt;
use std::ops::{BitAnd, Not};

use indexmap::IndexMap;

/// A predicate over addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    None,
    /// One address, possibly `/`-separated.
    Str(String),
    /// Per-key residual selections.
    Dict(IndexMap<String, Selection>),
    Complement(Box<Selection>),
    Intersection(Box<Selection>, Box<Selection>),
}

impl Selection {
    /// Selection of the keys in `entries`, each with its residual.
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Selection)>) -> Self {
        Selection::Dict(entries.into_iter().map(|(k, s)| (k.into(), s)).collect())
    }

    /// Verdict for `key` at this level and the residual below it.
    pub fn matches(&self, key: &str) -> (bool, Selection) {
        match self {
            Selection::All => (true, Selection::All),
            Selection::None => (false, Selection::None),
            Selection::Str(path) => {
                let (head, rest) = match path.split_once('/') {
                    Some((head, rest)) => (head, rest.trim_matches('/')),
                    None => (path.as_str(), ""),
                };
                if head != key {
                    (false, Selection::None)
                } else if rest.is_empty() {
                    (true, Selection::All)
                } else {
                    (true, Selection::Str(rest.to_string()))
                }
            }
            Selection::Dict(entries) => match entries.get(key) {
                Some(sub) => (true, sub.clone()),
                None => (false, Selection::None),
            },
            Selection::Complement(inner) => {
                let (hit, residual) = inner.matches(key);
                (!hit, Selection::Complement(Box::new(residual)))
            }
            Selection::Intersection(a, b) => {
                let (hit_a, res_a) = a.matches(key);
                let (hit_b, res_b) = b.matches(key);
                (
                    hit_a && hit_b,
                    Selection::Intersection(Box::new(res_a), Box::new(res_b)),
                )
            }
        }
    }

    /// Whether the current position itself is selected.
    pub fn matches_root(&self) -> bool {
        match self {
            Selection::All => true,
            Selection::None | Selection::Str(_) | Selection::Dict(_) => false,
            Selection::Complement(inner) => !inner.matches_root(),
            Selection::Intersection(a, b) => a.matches_root() && b.matches_root(),
        }
    }

    /// True when nothing at or below this position can be selected.
    pub fn is_empty(&self) -> bool {
        match self {
            Selection::None => true,
            Selection::Dict(entries) => entries.values().all(Selection::is_empty),
            Selection::Intersection(a, b) => a.is_empty() || b.is_empty(),
            Selection::Complement(inner) => matches!(**inner, Selection::All),
            Selection::All | Selection::Str(_) => false,
        }
    }
}

impl Not for Selection {
    type Output = Selection;

    fn not(self) -> Selection {
        match self {
            Selection::Complement(inner) => *inner,
            other => Selection::Complement(Box::new(other)),
        }
    }
}

impl BitAnd for Selection {
    type Output = Selection;

    fn bitand(self, rhs: Selection) -> Selection {
        Selection::Intersection(Box::new(self), Box::new(rhs))
    }
}

impl From<&str> for Selection {
    fn from(path: &str) -> Self {
        Selection::Str(path.to_string())
    }
}

impl From<String> for Selection {
    fn from(path: String) -> Self {
        Selection::Str(path)
    }
}

/// The empty path selects everything.
impl From<()> for Selection {
    fn from(_: ()) -> Self {
        Selection::All
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "*"),
            Selection::None => write!(f, "{{}}"),
            Selection::Str(path) => write!(f, "{}", path),
            Selection::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Selection::Complement(inner) => write!(f, "!({})", inner),
            Selection::Intersection(a, b) => write!(f, "({} & {})", a, b),
        }
    }
}

/// Selection of one address; `sel(())` selects every address.
pub fn sel(path: impl Into<Selection>) -> Selection {
    path.into()
}

pub fn sel_all() -> Selection {
    Selection::All
}

pub fn sel_none() -> Selection {
    Selection::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_selection() {
        assert_eq!(sel("x").matches("x"), (true, Selection::All));
        assert_eq!(sel("x").matches("y"), (false, Selection::None));
        assert_eq!(sel("a/b").matches("a"), (true, sel("b")));
        assert!(!sel("x").matches_root());
    }

    #[test]
    fn test_unit_selects_everything() {
        assert_eq!(sel(()), sel_all());
        assert!(sel(()).matches_root());
        assert_eq!(sel(()).matches("a"), (true, Selection::All));
    }

    #[test]
    fn test_complement_totality() {
        let s = sel("x");
        for key in ["x", "y", "z"] {
            let (hit, _) = s.matches(key);
            let (miss, _) = (!s.clone()).matches(key);
            assert_ne!(hit, miss, "{}", key);
        }
        assert!((!sel_none()).matches_root());
        assert!(!(!sel_all()).matches_root());
    }

    #[test]
    fn test_double_complement_collapses() {
        assert_eq!(!!sel("x"), sel("x"));
    }

    #[test]
    fn test_intersection() {
        let s = Selection::dict([("x", sel_all()), ("y", sel_all())]) & !sel("y");
        assert!(s.matches("x").0);
        assert!(!s.matches("y").0);
        assert!(!s.matches("z").0);
    }

    #[test]
    fn test_nested_residual() {
        let s = !Selection::dict([("a", sel("b"))]);
        let (_, residual) = s.matches("a");
        assert!(!residual.matches("b").0);
        assert!(residual.matches("c").0);
        assert!(residual.matches("c").1.matches_root());
    }

    #[test]
    fn test_emptiness() {
        assert!(sel_none().is_empty());
        assert!((!sel_all()).is_empty());
        assert!(!sel("x").is_empty());
        assert!(Selection::dict([("a", sel_none())]).is_empty());
    }
}
