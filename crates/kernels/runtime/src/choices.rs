//! Choice trees.
//!
//! A [`ChoiceTree`] records random choices by address: leaves hold values,
//! nodes map address segments to sub-trees in insertion order. A
//! [`ChoiceMap`] is a tree of lane slots, so the same structure carries the
//! choices of a single execution and of a vectorised one.

use indexmap::IndexMap;
use serde::Serialize;
use stoch_foundation::{Address, Slot, Value, ValueError};

use crate::selection::Selection;

/// Hierarchical record of choices.
///
/// Serialises as the bare leaf value or as an object keyed by segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChoiceTree<T> {
    Leaf(T),
    Node(IndexMap<String, ChoiceTree<T>>),
}

/// Choices of one execution.
pub type ChoiceMap = ChoiceTree<Slot>;

impl<T> Default for ChoiceTree<T> {
    fn default() -> Self {
        ChoiceTree::Node(IndexMap::new())
    }
}

impl<T: Clone> ChoiceTree<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn leaf(value: T) -> Self {
        ChoiceTree::Leaf(value)
    }

    /// True for a node without entries.
    pub fn is_empty(&self) -> bool {
        matches!(self, ChoiceTree::Node(entries) if entries.is_empty())
    }

    pub fn leaf_value(&self) -> Option<&T> {
        match self {
            ChoiceTree::Leaf(v) => Some(v),
            ChoiceTree::Node(_) => None,
        }
    }

    /// Sub-tree at one key; `/`-separated keys walk several levels.
    pub fn get(&self, key: &str) -> Option<&ChoiceTree<T>> {
        self.get_path(&Address::parse(key))
    }

    pub fn get_path(&self, address: &Address) -> Option<&ChoiceTree<T>> {
        let mut tree = self;
        for segment in address.segments() {
            match tree {
                ChoiceTree::Node(entries) => tree = entries.get(segment)?,
                ChoiceTree::Leaf(_) => return None,
            }
        }
        Some(tree)
    }

    /// Insert `tree` at `key`, turning a leaf into a node first.
    pub fn insert(&mut self, key: impl Into<String>, tree: ChoiceTree<T>) {
        if let ChoiceTree::Leaf(_) = self {
            *self = ChoiceTree::empty();
        }
        if let ChoiceTree::Node(entries) = self {
            entries.insert(key.into(), tree);
        }
    }

    /// Builder form of [`ChoiceTree::insert`].
    pub fn with(mut self, key: impl Into<String>, tree: ChoiceTree<T>) -> Self {
        self.insert(key, tree);
        self
    }

    /// Entries of a node, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &ChoiceTree<T>)> {
        let entries = match self {
            ChoiceTree::Node(entries) => Some(entries.iter()),
            ChoiceTree::Leaf(_) => None,
        };
        entries.into_iter().flatten()
    }

    /// Union of two trees. Where both hold an entry, `self` wins.
    pub fn merge(&self, other: &ChoiceTree<T>) -> ChoiceTree<T> {
        match (self, other) {
            (ChoiceTree::Node(mine), ChoiceTree::Node(theirs)) => {
                let mut out = mine.clone();
                for (key, tree) in theirs {
                    match out.get_mut(key) {
                        Some(existing) => *existing = existing.merge(tree),
                        None => {
                            out.insert(key.clone(), tree.clone());
                        }
                    }
                }
                ChoiceTree::Node(out)
            }
            (ChoiceTree::Leaf(_), _) => self.clone(),
            (ChoiceTree::Node(mine), ChoiceTree::Leaf(_)) if mine.is_empty() => other.clone(),
            (ChoiceTree::Node(_), ChoiceTree::Leaf(_)) => self.clone(),
        }
    }

    /// The part of the tree whose addresses `selection` contains.
    pub fn filter(&self, selection: &Selection) -> ChoiceTree<T> {
        match self {
            ChoiceTree::Leaf(_) if selection.matches_root() => self.clone(),
            ChoiceTree::Leaf(_) => ChoiceTree::empty(),
            ChoiceTree::Node(entries) => {
                let mut out = IndexMap::new();
                for (key, tree) in entries {
                    let (_, residual) = selection.matches(key);
                    if residual.is_empty() {
                        continue;
                    }
                    let kept = tree.filter(&residual);
                    if !kept.is_empty() {
                        out.insert(key.clone(), kept);
                    }
                }
                ChoiceTree::Node(out)
            }
        }
    }

    /// Leaves with their addresses, depth first in insertion order.
    pub fn leaves(&self) -> Vec<(Address, &T)> {
        let mut out = Vec::new();
        self.collect_leaves(Address::root(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, at: Address, out: &mut Vec<(Address, &'a T)>) {
        match self {
            ChoiceTree::Leaf(v) => out.push((at, v)),
            ChoiceTree::Node(entries) => {
                for (key, tree) in entries {
                    tree.collect_leaves(at.child(key.clone()), out);
                }
            }
        }
    }

    /// Same structure with every leaf mapped.
    pub fn try_map<U, E>(&self, f: &mut impl FnMut(&T) -> Result<U, E>) -> Result<ChoiceTree<U>, E> {
        Ok(match self {
            ChoiceTree::Leaf(v) => ChoiceTree::Leaf(f(v)?),
            ChoiceTree::Node(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, tree) in entries {
                    out.insert(key.clone(), tree.try_map(f)?);
                }
                ChoiceTree::Node(out)
            }
        })
    }

    /// Same structure with leaves taken, in [`ChoiceTree::leaves`] order, from `values`.
    pub fn refill<U>(&self, values: &mut impl Iterator<Item = U>) -> Option<ChoiceTree<U>> {
        Some(match self {
            ChoiceTree::Leaf(_) => ChoiceTree::Leaf(values.next()?),
            ChoiceTree::Node(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, tree) in entries {
                    out.insert(key.clone(), tree.refill(values)?);
                }
                ChoiceTree::Node(out)
            }
        })
    }
}

impl ChoiceMap {
    /// Choice map from `(address, value)` pairs; addresses may be `/`-separated.
    pub fn from_values<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let mut map = ChoiceMap::empty();
        for (addr, value) in pairs {
            map.insert_path(&Address::parse(addr), ChoiceTree::Leaf(Slot::Uniform(value)));
        }
        map
    }

    /// Lane-wise union of two maps: where both hold a leaf, lanes where
    /// `mask` holds come from `on_true`.
    pub(crate) fn select_lanes(mask: &Slot, on_true: &ChoiceMap, on_false: &ChoiceMap) -> Result<ChoiceMap, ValueError> {
        Ok(match (on_true, on_false) {
            (ChoiceTree::Leaf(a), ChoiceTree::Leaf(b)) => ChoiceTree::Leaf(Slot::select(mask, a, b)?),
            (ChoiceTree::Node(a), ChoiceTree::Node(b)) => {
                let mut out = b.clone();
                for (key, tree) in a {
                    let merged = match b.get(key) {
                        Some(other) => ChoiceMap::select_lanes(mask, tree, other)?,
                        None => tree.clone(),
                    };
                    out.insert(key.clone(), merged);
                }
                ChoiceTree::Node(out)
            }
            _ => on_true.merge(on_false),
        })
    }

    /// Value of the leaf at `addr`.
    pub fn value(&self, addr: &str) -> Option<&Value> {
        self.get(addr)?.leaf_value().map(Slot::value)
    }
}

impl<T: Clone> ChoiceTree<T> {
    /// Insert `tree` at a full address, creating nodes along the way.
    pub fn insert_path(&mut self, address: &Address, tree: ChoiceTree<T>) {
        match address.split_first() {
            None => *self = tree,
            Some((head, rest)) => {
                if let ChoiceTree::Leaf(_) = self {
                    *self = ChoiceTree::empty();
                }
                if let ChoiceTree::Node(entries) = self {
                    entries
                        .entry(head.to_string())
                        .or_insert_with(ChoiceTree::empty)
                        .insert_path(&rest, tree);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::sel;

    fn sample_map() -> ChoiceMap {
        ChoiceMap::from_values([
            ("x", Value::f64(1.0)),
            ("y", Value::f64(2.0)),
            ("sub/z", Value::bool(true)),
        ])
    }

    #[test]
    fn test_paths() {
        let map = sample_map();
        assert_eq!(map.value("x"), Some(&Value::f64(1.0)));
        assert_eq!(map.value("sub/z"), Some(&Value::bool(true)));
        assert!(map.get("sub").unwrap().leaf_value().is_none());
        assert!(map.get("w").is_none());
    }

    #[test]
    fn test_filter_and_complement_partition() {
        let map = sample_map();
        let picked = map.filter(&sel("x"));
        let rest = map.filter(&!sel("x"));
        assert_eq!(picked.leaves().len(), 1);
        assert_eq!(rest.leaves().len(), 2);
        assert_eq!(picked.merge(&rest).leaves().len(), 3);
    }

    #[test]
    fn test_nested_filter() {
        let map = sample_map();
        let z = map.filter(&sel("sub/z"));
        assert_eq!(z.value("sub/z"), Some(&Value::bool(true)));
        assert_eq!(z.leaves().len(), 1);
    }

    #[test]
    fn test_merge_prefers_self() {
        let a = ChoiceMap::from_values([("x", Value::f64(1.0))]);
        let b = ChoiceMap::from_values([("x", Value::f64(5.0)), ("y", Value::f64(6.0))]);
        let merged = a.merge(&b);
        assert_eq!(merged.value("x"), Some(&Value::f64(1.0)));
        assert_eq!(merged.value("y"), Some(&Value::f64(6.0)));
    }

    #[test]
    fn test_refill_follows_leaf_order() {
        let map = sample_map();
        let shape: Vec<String> = map.leaves().iter().map(|(a, _)| a.to_string()).collect();
        assert_eq!(shape, vec!["x", "y", "sub/z"]);
        let numbered = map.refill(&mut (0..3)).unwrap();
        assert_eq!(numbered.get("sub/z"), Some(&ChoiceTree::Leaf(2)));
    }
}
