//! Prefix index for subscription matching.
//!
//! A byte trie keyed by subscribed prefixes. Each node remembers which
//! holders (connections) subscribed to exactly the prefix spelled by the path
//! to it. Given a point ID, walking the trie along the ID's bytes visits every
//! subscribed prefix of that ID, so matching costs O(len(id) + matches)
//! regardless of how many subscriptions exist.
//!
//! Matching is plain string prefix, not segment aware: `"test"` matches
//! `"test.point1"` and also `"testing"`.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

#[derive(Debug)]
struct Node<H> {
    children: BTreeMap<u8, Node<H>>,
    holders: HashSet<H>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
            holders: HashSet::new(),
        }
    }
}

impl<H> Node<H> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.holders.is_empty()
    }
}

/// Reference-counted set of subscribed prefixes.
///
/// The reference count of a prefix is the number of distinct holders that
/// subscribed to it. A prefix leaves the index when its count drops to zero.
#[derive(Debug)]
pub struct PrefixIndex<H> {
    root: Node<H>,
    prefixes: usize,
}

impl<H> Default for PrefixIndex<H> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            prefixes: 0,
        }
    }
}

impl<H: Eq + Hash + Clone> PrefixIndex<H> {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct prefixes with at least one holder.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes
    }

    /// Check if no prefix is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes == 0
    }

    /// Record `holder` as a subscriber of `prefix`.
    ///
    /// Returns `false` if the holder already had this prefix.
    pub fn insert_subscription_prefix(&mut self, prefix: &str, holder: H) -> bool {
        let mut node = &mut self.root;
        for byte in prefix.bytes() {
            node = node.children.entry(byte).or_default();
        }

        let was_unused = node.holders.is_empty();
        let inserted = node.holders.insert(holder);
        if inserted && was_unused {
            self.prefixes += 1;
        }
        inserted
    }

    /// Drop `holder` from `prefix`, pruning branches that become empty.
    ///
    /// Returns `false` if the holder did not have this prefix.
    pub fn remove_subscription_prefix(&mut self, prefix: &str, holder: &H) -> bool {
        let removed = remove_in(&mut self.root, prefix.as_bytes(), holder);
        if removed && self.refcount(prefix) == 0 {
            self.prefixes -= 1;
        }
        removed
    }

    /// Number of holders subscribed to exactly `prefix`.
    #[must_use]
    pub fn refcount(&self, prefix: &str) -> usize {
        let mut node = &self.root;
        for byte in prefix.bytes() {
            match node.children.get(&byte) {
                Some(child) => node = child,
                None => return 0,
            }
        }
        node.holders.len()
    }

    /// Every subscribed prefix that `id` starts with, shortest first.
    #[must_use]
    pub fn matching_prefixes<'a>(&self, id: &'a str) -> Vec<&'a str> {
        let mut matches = Vec::new();
        self.walk(id, |len, _| {
            // A subscribed prefix is valid UTF-8, so `len` is a char boundary.
            if let Some(prefix) = id.get(..len) {
                matches.push(prefix);
            }
        });
        matches
    }

    /// Holders of any prefix of `id`, each reported once.
    #[must_use]
    pub fn holders_matching(&self, id: &str) -> HashSet<H> {
        let mut holders = HashSet::new();
        self.walk(id, |_, node_holders| {
            holders.extend(node_holders.iter().cloned());
        });
        holders
    }

    fn walk<'s>(&'s self, id: &str, mut visit: impl FnMut(usize, &'s HashSet<H>)) {
        let mut node = &self.root;
        if !node.holders.is_empty() {
            visit(0, &node.holders);
        }
        for (i, byte) in id.bytes().enumerate() {
            match node.children.get(&byte) {
                Some(child) => node = child,
                None => return,
            }
            if !node.holders.is_empty() {
                visit(i + 1, &node.holders);
            }
        }
    }
}

fn remove_in<H: Eq + Hash>(node: &mut Node<H>, path: &[u8], holder: &H) -> bool {
    match path.split_first() {
        None => node.holders.remove(holder),
        Some((byte, rest)) => {
            let Some(child) = node.children.get_mut(byte) else {
                return false;
            };
            let removed = remove_in(child, rest, holder);
            if child.is_empty() {
                node.children.remove(byte);
            }
            removed
        }
    }
}
