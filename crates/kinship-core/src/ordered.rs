//! Insertion-ordered node sets.
//!
//! Local indexing inside a subgraph must not depend on hash iteration order,
//! otherwise two runs over the same data produce differently laid out
//! tensors. [`OrderedNodeSet`] keeps the first-insertion order of global node
//! indices together with the reverse map from global index to local position.

use std::collections::HashMap;

/// A deduplicated list of global node indices plus its inverse map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedNodeSet {
    nodes: Vec<usize>,
    index: HashMap<usize, usize>,
}

impl OrderedNodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a node, returning its local position.
    ///
    /// Re-inserting a node keeps its first position.
    pub fn insert(&mut self, node: usize) -> usize {
        if let Some(&pos) = self.index.get(&node) {
            return pos;
        }
        let pos = self.nodes.len();
        self.index.insert(node, pos);
        self.nodes.push(node);
        pos
    }

    /// Local position of a global node, if present.
    pub fn index_of(&self, node: usize) -> Option<usize> {
        self.index.get(&node).copied()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.index.contains_key(&node)
    }

    /// Global node at a local position.
    pub fn get(&self, pos: usize) -> Option<usize> {
        self.nodes.get(pos).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Global indices in local order.
    pub fn as_slice(&self) -> &[usize] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().copied()
    }
}

impl Extend<usize> for OrderedNodeSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for node in iter {
            self.insert(node);
        }
    }
}

impl FromIterator<usize> for OrderedNodeSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
