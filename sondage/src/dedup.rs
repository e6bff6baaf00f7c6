// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-window suppression of repeated submissions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Whether a window insists on one submission per identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Submissions must carry an identifier, and each identifier is counted
    /// at most once per window.
    #[default]
    Required,
    /// Every submission is counted. Senders that report on a faster cadence
    /// than the window length are weighted accordingly.
    Disabled,
}

/// The identifiers already counted in one window.
///
/// Persisted next to the window's checkpoint as a sorted JSON array so a
/// restart cannot double-count a sender that already reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupSet(BTreeSet<String>);

impl DedupSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id`, returning `true` if it had not been seen before.
    pub fn admit(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }

    /// Whether `id` has already been admitted.
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Number of admitted identifiers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no identifiers have been admitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
