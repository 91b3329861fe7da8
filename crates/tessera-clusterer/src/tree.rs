//! Prefix-tree clustering of transaction names.
//!
//! Names are split into path segments and inserted into a trie. Any node whose
//! fan-out reaches the merge threshold has its children folded into a single
//! wildcard child; each path that ends in a wildcard becomes a replacement
//! rule. For example, with a threshold of 2:
//!
//! ```text
//! /a/b1/c        a ─┬─ b1 ── c        a ── * ── c
//! /a/b2/c    =>     └─ b2 ── c   =>
//! ```
//!
//! yields the single rule `/a/*/**`.

use crate::ReplacementRule;
use std::collections::BTreeMap;
use tracing::warn;

/// Threshold used when a caller asks for zero
pub const DEFAULT_MERGE_THRESHOLD: usize = 100;

/// Infers replacement rules from a sample of names.
pub trait Clusterer {
    fn add_input<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>;

    /// Rules for the input seen so far, most specific first
    fn get_rules(&self) -> Vec<ReplacementRule>;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Edge {
    Literal(String),
    /// Several literal segments folded together
    Merged,
}

impl Edge {
    fn as_segment(&self) -> &str {
        match self {
            Edge::Literal(segment) => segment,
            Edge::Merged => "*",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    children: BTreeMap<Edge, Node>,
    count: u64,
}

impl Node {
    /// How many inserted names passed through this node
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn children(&self) -> &BTreeMap<Edge, Node> {
        &self.children
    }

    fn insert<'a>(&mut self, segments: impl IntoIterator<Item = &'a str>) {
        let mut node = self;
        for segment in segments {
            node = node
                .children
                .entry(Edge::Literal(segment.to_string()))
                .or_default();
            node.count += 1;
        }
    }

    fn merge(&mut self, threshold: usize) {
        for child in self.children.values_mut() {
            child.merge(threshold);
        }

        if self.children.len() >= threshold {
            let mut merged = Node::default();
            for (_, child) in std::mem::take(&mut self.children) {
                merged.absorb(child);
            }
            // Folding can create new fan-out further down
            merged.merge(threshold);
            self.children.insert(Edge::Merged, merged);
        }
    }

    /// Union `other` into this node, summing counts
    fn absorb(&mut self, other: Node) {
        self.count += other.count;
        for (edge, child) in other.children {
            self.children.entry(edge).or_default().absorb(child);
        }
    }

    fn collect_rules(&self, path: &mut Vec<String>, rules: &mut Vec<ReplacementRule>) {
        for (edge, child) in &self.children {
            path.push(edge.as_segment().to_string());
            if *edge == Edge::Merged {
                rules.push(ReplacementRule::new(format!("/{}/**", path.join("/"))));
            }
            child.collect_rules(path, rules);
            path.pop();
        }
    }
}

/// Clusterer backed by a segment trie.
#[derive(Debug, Clone)]
pub struct TreeClusterer {
    merge_threshold: usize,
    root: Node,
}

impl TreeClusterer {
    pub fn new(merge_threshold: usize) -> Self {
        let merge_threshold = if merge_threshold == 0 {
            warn!(
                "Merge threshold of 0 would collapse everything, using {}",
                DEFAULT_MERGE_THRESHOLD
            );
            DEFAULT_MERGE_THRESHOLD
        } else {
            merge_threshold
        };

        Self {
            merge_threshold,
            root: Node::default(),
        }
    }

    pub fn merge_threshold(&self) -> usize {
        self.merge_threshold
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

impl Default for TreeClusterer {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_THRESHOLD)
    }
}

impl Clusterer for TreeClusterer {
    fn add_input<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let mut segments = name
                .as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .peekable();
            if segments.peek().is_none() {
                continue;
            }
            self.root.count += 1;
            self.root.insert(segments);
        }
    }

    fn get_rules(&self) -> Vec<ReplacementRule> {
        let mut tree = self.root.clone();
        tree.merge(self.merge_threshold);

        let mut rules = Vec::new();
        tree.collect_rules(&mut Vec::new(), &mut rules);
        rules.sort_by(|a, b| b.as_str().len().cmp(&a.as_str().len()));
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let mut clusterer = TreeClusterer::new(10);
        clusterer.add_input(["/a/b", "/a/c"]);
        clusterer.add_input(vec!["/a/b".to_string()]);

        let a = &clusterer.root().children()[&Edge::Literal("a".to_string())];
        assert_eq!(a.count(), 3);
        assert_eq!(a.children()[&Edge::Literal("b".to_string())].count(), 2);
    }

    #[test]
    fn test_segmentless_names_are_ignored() {
        let mut clusterer = TreeClusterer::new(1);
        clusterer.add_input(["", "/", "//"]);
        assert_eq!(clusterer.root().count(), 0);
        assert!(clusterer.get_rules().is_empty());
    }

    #[test]
    fn test_zero_threshold_uses_default() {
        assert_eq!(TreeClusterer::new(0).merge_threshold(), DEFAULT_MERGE_THRESHOLD);
    }

    #[test]
    fn test_leaves_do_not_produce_rules() {
        let mut clusterer = TreeClusterer::new(3);
        clusterer.add_input(["/a/1", "/a/2"]);
        assert!(clusterer.get_rules().is_empty());
    }
}
