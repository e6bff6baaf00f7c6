// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The recursive frequency-count tree that windows accumulate into.
//!
//! A [`StatsNode`] maps bucket labels to either a plain count or a nested
//! node, mirroring the shape of the events it absorbed. The JSON form is
//! exactly the in-memory form: numbers for counts, objects for children,
//! keys in sorted order. That keeps checkpoints diffable run to run and lets
//! a loaded checkpoint continue accumulating as if the process never
//! restarted.

use std::collections::{btree_map, BTreeMap};

use serde::{Deserialize, Serialize};

/// One level of the frequency tree: bucket label to entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsNode(BTreeMap<String, StatsEntry>);

/// A single entry in a [`StatsNode`].
///
/// The untagged representation is unambiguous because a JSON number can only
/// be a count and a JSON object can only be a nested node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatsEntry {
    /// How many times this bucket label was observed.
    Count(u64),
    /// A nested tree, for labels that held structured values.
    Node(StatsNode),
}

impl StatsNode {
    /// An empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the count behind `label` by one.
    ///
    /// Returns `false` without touching anything when `label` already holds a
    /// nested node; the caller decides how loudly to report the shape clash.
    #[must_use]
    pub fn increment(&mut self, label: &str) -> bool {
        match self.0.get_mut(label) {
            Some(StatsEntry::Count(count)) => {
                *count = count.saturating_add(1);
                true
            }
            Some(StatsEntry::Node(_)) => false,
            None => {
                self.0.insert(label.to_string(), StatsEntry::Count(1));
                true
            }
        }
    }

    /// The nested node behind `label`, created empty if absent.
    ///
    /// Returns `None` when `label` already holds a plain count.
    pub fn child_mut(&mut self, label: &str) -> Option<&mut StatsNode> {
        let entry = self
            .0
            .entry(label.to_string())
            .or_insert_with(|| StatsEntry::Node(StatsNode::new()));
        match entry {
            StatsEntry::Node(node) => Some(node),
            StatsEntry::Count(_) => None,
        }
    }

    /// The entry behind `label`, if any.
    pub fn get(&self, label: &str) -> Option<&StatsEntry> {
        self.0.get(label)
    }

    /// The nested node behind `label`, if that is what it holds.
    pub fn child(&self, label: &str) -> Option<&StatsNode> {
        match self.0.get(label) {
            Some(StatsEntry::Node(node)) => Some(node),
            _ => None,
        }
    }

    /// The count behind `label`, if that is what it holds.
    pub fn count(&self, label: &str) -> Option<u64> {
        match self.0.get(label) {
            Some(StatsEntry::Count(count)) => Some(*count),
            _ => None,
        }
    }

    /// Walks `path` through nested nodes and returns the final count.
    ///
    /// Convenient in assertions: `root.count_at(&["network", "bridge0",
    /// "mtu", "1500"])`.
    pub fn count_at(&self, path: &[&str]) -> Option<u64> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for label in parents {
            node = node.child(label)?;
        }
        node.count(last)
    }

    /// Number of entries directly in this node.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this node has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the entries in label order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, StatsEntry> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a StatsNode {
    type Item = (&'a String, &'a StatsEntry);
    type IntoIter = btree_map::Iter<'a, String, StatsEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use serde_json::json;

    use super::*;

    #[test]
    fn increment_creates_then_bumps() {
        let mut node = StatsNode::new();
        check!(node.increment("FreeNAS"));
        check!(node.increment("FreeNAS"));
        check!(node.increment("TrueNAS"));
        check!(node.count("FreeNAS") == Some(2));
        check!(node.count("TrueNAS") == Some(1));
        check!(node.len() == 2);
    }

    #[test]
    fn increment_refuses_to_replace_a_subtree() {
        let mut node = StatsNode::new();
        check!(node.child_mut("network").unwrap().increment("up"));
        check!(!node.increment("network"));
        check!(node.child("network").is_some());
    }

    #[test]
    fn child_mut_refuses_to_replace_a_count() {
        let mut node = StatsNode::new();
        check!(node.increment("cores"));
        check!(node.child_mut("cores").is_none());
        check!(node.count("cores") == Some(1));
    }

    #[test]
    fn count_at_walks_nested_nodes() {
        let mut node = StatsNode::new();
        let mtu = node
            .child_mut("bridge0")
            .and_then(|n| n.child_mut("mtu"))
            .unwrap();
        check!(mtu.increment("1500"));
        check!(node.count_at(&["bridge0", "mtu", "1500"]) == Some(1));
        check!(node.count_at(&["bridge0", "mtu", "9000"]) == None);
        check!(node.count_at(&["bridge0", "missing", "1500"]) == None);
    }

    #[test]
    fn serializes_counts_and_children_untagged() {
        let mut node = StatsNode::new();
        check!(node.increment("11.2"));
        check!(node.increment("11.2"));
        check!(node.child_mut("iscsi").unwrap().increment("enabled"));

        let encoded = serde_json::to_value(&node).unwrap();
        check!(encoded == json!({"11.2": 2, "iscsi": {"enabled": 1}}));

        let decoded: StatsNode = serde_json::from_value(encoded).unwrap();
        check!(decoded == node);
    }

    #[test]
    fn deserializes_deeply_nested_checkpoint_fragments() {
        let decoded: StatsNode =
            serde_json::from_value(json!({"pools": {"tank": {"vdevs": 2}}, "systems": 4}))
                .unwrap();
        check!(decoded.count_at(&["pools", "tank", "vdevs"]) == Some(2));
        check!(decoded.count("systems") == Some(4));
    }
}
