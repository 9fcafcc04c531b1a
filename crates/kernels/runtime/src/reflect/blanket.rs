//! Markov blanket analysis.
//!
//! `blanket` runs in two passes. The first is a pure taint analysis over a
//! recorded trace: starting from the selected choices (and any tainted
//! arguments), it marks which sites the selection can influence. The second
//! rewrites the program so that only those sites remain random; every other
//! site is replaced by the values it returned in the trace.

use indexmap::IndexMap;

/// Result of the taint pass for one program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlanketFlags {
    /// The site stays in the blanket.
    pub retain: bool,
    /// The site's own choice is selected.
    pub tagged: bool,
    /// Per output: depends on the selection.
    pub out_flows: Vec<bool>,
    /// Flags of the sub-sites of a composite program, by address.
    pub children: IndexMap<String, BlanketFlags>,
}

impl BlanketFlags {
    /// A site the selection does not reach.
    pub fn dropped(num_outputs: usize) -> Self {
        Self {
            retain: false,
            tagged: false,
            out_flows: vec![false; num_outputs],
            children: IndexMap::new(),
        }
    }

    /// Number of retained leaf sites, this one included.
    pub fn retained_sites(&self) -> usize {
        if self.children.is_empty() {
            usize::from(self.retain)
        } else {
            self.children.values().map(BlanketFlags::retained_sites).sum()
        }
    }

    pub fn child(&self, addr: &str) -> Option<&BlanketFlags> {
        self.children.get(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retained_sites_counts_leaves() {
        let mut root = BlanketFlags {
            retain: true,
            ..BlanketFlags::default()
        };
        root.children.insert(
            "x".into(),
            BlanketFlags {
                retain: true,
                tagged: true,
                out_flows: vec![true],
                children: IndexMap::new(),
            },
        );
        root.children.insert("y".into(), BlanketFlags::dropped(1));
        assert_eq!(root.retained_sites(), 1);
        assert!(!root.child("y").unwrap().retain);
    }
}
