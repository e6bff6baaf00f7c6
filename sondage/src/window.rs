// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Calendar windows and the aggregate record each one owns.
//!
//! Windows are purely a function of the clock: the daily window `2024-07-01`
//! is whatever arrived while UTC said July 1st. A window is mutable only
//! while it is current. The first submission that observes a newer key
//! retires the old window to disk and starts the new one empty, so the
//! on-disk history is one immutable record per calendar unit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    dedup::{DedupPolicy, DedupSet},
    error::StoreError,
    reduce::{self, DerivedTotals, ReducePolicy},
    stats::StatsNode,
    store::CheckpointStore,
};

/// Calendar granularity of an aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// One window per UTC calendar day.
    Daily,
    /// One window per UTC calendar month.
    Monthly,
}

impl WindowKind {
    /// The canonical key of the window containing `at`.
    pub fn key_for(self, at: DateTime<Utc>) -> WindowKey {
        let label = match self {
            WindowKind::Daily => at.format("%Y-%m-%d"),
            WindowKind::Monthly => at.format("%Y-%m"),
        };
        WindowKey {
            kind: self,
            label: label.to_string(),
        }
    }

    /// Name of the stable link pointing at this kind's active checkpoint.
    pub fn latest_link(self) -> &'static str {
        match self {
            WindowKind::Daily => "latest.json",
            WindowKind::Monthly => "latest-month.json",
        }
    }
}

/// Canonical identifier of one window, such as `2024-07-01` or `2024-07`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    kind: WindowKind,
    label: String,
}

impl WindowKey {
    /// The granularity this key belongs to.
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// The date portion, as it appears in file names.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// File name of this window's checkpoint.
    pub(crate) fn checkpoint_name(&self) -> String {
        format!("{}.json", self.label)
    }

    /// File name of this window's deduplication sidecar.
    pub(crate) fn id_sidecar_name(&self) -> String {
        format!("{}.json.id", self.label)
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// The aggregate record a window accumulates and checkpoints.
///
/// Field names here are the checkpoint schema; external consumers read these
/// files directly, so renames are breaking changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    /// Number of submissions merged into this window.
    #[serde(rename = "systemCount", default)]
    pub system_count: u64,
    /// Submissions tallied by reported country code.
    #[serde(default)]
    pub country: BTreeMap<String, u64>,
    /// Scalar totals derived during reduction.
    #[serde(flatten)]
    pub totals: DerivedTotals,
    /// The frequency tree of everything else the events carried.
    #[serde(default)]
    pub stats: StatsNode,
}

impl WindowAggregate {
    /// Folds one admitted submission into this record.
    pub fn record(
        &mut self,
        event: &Map<String, Value>,
        country: &str,
        policy: &ReducePolicy,
        skip: Option<&str>,
    ) {
        self.system_count += 1;
        if !country.is_empty() {
            *self.country.entry(country.to_string()).or_insert(0) += 1;
        }
        reduce::merge_event(&mut self.stats, &mut self.totals, event, policy, skip);
    }
}

/// One window's full in-memory state.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Which window this is.
    pub key: WindowKey,
    /// Everything accumulated so far.
    pub aggregate: WindowAggregate,
    /// Submission identifiers admitted so far.
    pub seen: DedupSet,
}

impl Window {
    /// A fresh window with zeroed counters.
    pub fn empty(key: WindowKey) -> Self {
        Window {
            key,
            aggregate: WindowAggregate::default(),
            seen: DedupSet::new(),
        }
    }
}

/// Per-window outcome of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The submission was folded into the window.
    Merged,
    /// The window had already counted this identifier.
    Duplicate,
    /// The window requires identifiers and the submission carried none.
    MissingId,
}

/// The active window of one granularity, kept current against the clock.
#[derive(Debug)]
pub(crate) struct WindowSlot {
    kind: WindowKind,
    dedup: DedupPolicy,
    window: Window,
}

impl WindowSlot {
    /// Loads the window containing `now` from the store.
    ///
    /// A load failure here is propagated: at startup, building on top of
    /// state we cannot read would corrupt history silently.
    pub(crate) fn open(
        kind: WindowKind,
        dedup: DedupPolicy,
        store: &CheckpointStore,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let key = kind.key_for(now);
        let window = store.load(&key)?;
        if let Err(err) = store.point_latest(&key) {
            warn!(window = %key, error = %err, "could not update latest link");
        }
        debug!(
            window = %key,
            submissions = window.aggregate.system_count,
            "window opened"
        );
        Ok(WindowSlot { kind, dedup, window })
    }

    /// Retires the held window if `now` falls outside it.
    ///
    /// The completed window is flushed best-effort; a checkpoint that fails
    /// to load for the new key degrades to an empty window rather than
    /// taking the process down mid-flight.
    pub(crate) fn roll_if_needed(&mut self, store: &CheckpointStore, now: DateTime<Utc>) -> bool {
        let next = self.kind.key_for(now);
        if next == self.window.key {
            return false;
        }
        info!(from = %self.window.key, to = %next, "window rolled over");
        if let Err(err) = store.flush(&self.window, self.persists_ids()) {
            warn!(window = %self.window.key, error = %err, "could not flush completed window");
        }
        self.window = match store.load(&next) {
            Ok(window) => window,
            Err(err) => {
                error!(window = %next, error = %err, "ignoring unreadable window state, starting empty");
                Window::empty(next)
            }
        };
        if let Err(err) = store.point_latest(&self.window.key) {
            warn!(window = %self.window.key, error = %err, "could not update latest link");
        }
        true
    }

    /// Applies one submission to the held window.
    pub(crate) fn apply(
        &mut self,
        event: &Map<String, Value>,
        id: &str,
        country: &str,
        policy: &ReducePolicy,
        skip: Option<&str>,
    ) -> MergeOutcome {
        match self.dedup {
            DedupPolicy::Required if id.is_empty() => MergeOutcome::MissingId,
            DedupPolicy::Required if !self.window.seen.admit(id) => MergeOutcome::Duplicate,
            DedupPolicy::Required | DedupPolicy::Disabled => {
                self.window.aggregate.record(event, country, policy, skip);
                MergeOutcome::Merged
            }
        }
    }

    /// The held window.
    pub(crate) fn window(&self) -> &Window {
        &self.window
    }

    /// Whether this slot's dedup set is worth persisting.
    pub(crate) fn persists_ids(&self) -> bool {
        self.dedup == DedupPolicy::Required
    }
}
