//! Union-find over operation identities.

use crate::core::CairnError;
use anyhow::Result;
use std::collections::HashMap;
use std::hash::Hash;

/// A disjoint-set (union-find) structure with union-by-rank and path
/// compression.
///
/// Internal tree shape depends on call order, but the logical grouping never
/// does: two items end up in the same set exactly when a chain of `union`
/// calls connects them.
pub struct DisjointSet<T> {
    parent: HashMap<T, T>,
    rank: HashMap<T, u32>,
}

impl<T: Copy + Eq + Hash> DisjointSet<T> {
    /// Create an empty structure.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parent: HashMap::new(),
            rank: HashMap::new(),
        }
    }

    /// Register `item` as a singleton set. Idempotent.
    pub fn add(&mut self, item: T) {
        self.parent.entry(item).or_insert(item);
        self.rank.entry(item).or_insert(0);
    }

    /// Whether `item` has been registered.
    #[must_use]
    pub fn contains(&self, item: T) -> bool {
        self.parent.contains_key(&item)
    }

    /// Merge the sets containing `a` and `b`. A no-op when they are already
    /// joined; fails if either item was never added.
    pub fn union(&mut self, a: T, b: T) -> Result<()> {
        if !self.contains(a) || !self.contains(b) {
            return Err(CairnError::invariant(
                "union() called with an item that was never added to the disjoint set",
            )
            .into());
        }
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return Ok(());
        }
        let rank_a = self.rank[&root_a];
        let rank_b = self.rank[&root_b];
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b);
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a);
        } else {
            self.parent.insert(root_b, root_a);
            self.rank.insert(root_a, rank_a + 1);
        }
        Ok(())
    }

    /// Root of the set containing `item`, compressing the path on the way up.
    fn find(&mut self, item: T) -> T {
        let parent = self.parent[&item];
        if parent == item {
            return item;
        }
        let root = self.find(parent);
        self.parent.insert(item, root);
        root
    }

    /// Yield every set, one `Vec` per connected component.
    ///
    /// The sets partition all added items. The iterator is finite and
    /// consumed once; it borrows the structure mutably because grouping
    /// compresses paths.
    pub fn all_sets(&mut self) -> impl Iterator<Item = Vec<T>> {
        let items: Vec<T> = self.parent.keys().copied().collect();
        let mut by_root: HashMap<T, Vec<T>> = HashMap::new();
        for item in items {
            let root = self.find(item);
            by_root.entry(root).or_default().push(item);
        }
        by_root.into_values()
    }
}

impl<T: Copy + Eq + Hash> Default for DisjointSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
