// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The reduction walk that folds one event into a window.
//!
//! Reduction is schema-less: the walk recurses over whatever structure the
//! event has, creating tree nodes as it goes. Lists of objects are the one
//! place with real policy. Counting `{"name": "tank", ...}` under the label
//! `tank` is what turns "a list of pools" into per-pool histograms, so each
//! object element is first probed for a unique key (see [`unique_keys`]) and
//! merged under every key it yields.
//!
//! A handful of scalar totals (overall capacity, overall disk count) are
//! derived in the same pass, because they need the raw numeric values that
//! bucketing deliberately throws away.

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    stats::StatsNode,
    value::{classify, plain_label, FieldMatcher, Shape},
};

const BYTES_PER_GIB_F: f64 = (1u64 << 30) as f64;

/// The tunable parts of the reduction walk.
///
/// The defaults encode the conventions of the storage-appliance telemetry
/// this crate grew up on; every knob exists because some fleet's events
/// spell these fields differently.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducePolicy {
    byte_scale: FieldMatcher,
    key_priority: Vec<String>,
    capacity_fields: FieldMatcher,
    disk_list_fields: FieldMatcher,
}

impl Default for ReducePolicy {
    fn default() -> Self {
        ReducePolicy {
            byte_scale: FieldMatcher::exact(["memory", "capacity"]).with_prefix("used-by-"),
            key_priority: ["name", "release", "members", "type"]
                .map(String::from)
                .into(),
            capacity_fields: FieldMatcher::exact(["capacity"]),
            disk_list_fields: FieldMatcher::exact(["disks"]),
        }
    }
}

impl ReducePolicy {
    /// Replaces the fields whose numbers are bucketed in whole gibibytes.
    pub fn byte_scale(mut self, fields: FieldMatcher) -> Self {
        self.byte_scale = fields;
        self
    }

    /// Replaces the ordered list of fields probed for a unique key.
    pub fn key_priority(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.key_priority = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the numeric fields summed into the capacity total.
    pub fn capacity_fields(mut self, fields: FieldMatcher) -> Self {
        self.capacity_fields = fields;
        self
    }

    /// Replaces the list fields whose lengths are summed into the disk total.
    pub fn disk_list_fields(mut self, fields: FieldMatcher) -> Self {
        self.disk_list_fields = fields;
        self
    }
}

/// Scalar totals accumulated alongside the frequency tree.
///
/// Capacity stays a float of unrounded gibibytes: these are fleet-wide sums,
/// and bucketing them per event the way labels are bucketed would discard
/// most of the signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DerivedTotals {
    /// Sum of every matched capacity field, in gibibytes.
    #[serde(rename = "totalCapacityGB", default)]
    pub capacity_gb: f64,
    /// Sum of the lengths of every matched disk-list field.
    #[serde(rename = "totalDisks", default)]
    pub disks: u64,
}

/// Folds one event object into `tree` and `totals`.
///
/// `skip` names a field ignored at the top level only, used to keep the
/// submission identifier out of the histograms.
pub(crate) fn merge_event(
    tree: &mut StatsNode,
    totals: &mut DerivedTotals,
    event: &Map<String, Value>,
    policy: &ReducePolicy,
    skip: Option<&str>,
) {
    for (field, value) in event {
        if skip == Some(field.as_str()) {
            continue;
        }
        scan_totals(totals, field, value, policy);
        merge_field(tree, field, value, policy);
    }
}

/// Accumulates derived totals from `value`, visiting each event value once.
///
/// This runs independently of the tree merge so totals stay exact even where
/// the merge counts an object under several unique keys.
fn scan_totals(totals: &mut DerivedTotals, field: &str, value: &Value, policy: &ReducePolicy) {
    if policy.capacity_fields.matches(field) {
        if let Some(bytes) = value.as_f64() {
            totals.capacity_gb += bytes / BYTES_PER_GIB_F;
        }
    }
    if policy.disk_list_fields.matches(field) {
        if let Value::Array(items) = value {
            totals.disks += items.len() as u64;
        }
    }
    match value {
        Value::Object(members) => {
            for (nested_field, nested) in members {
                scan_totals(totals, nested_field, nested, policy);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_totals(totals, field, item, policy);
            }
        }
        _ => {}
    }
}

fn merge_field(node: &mut StatsNode, field: &str, value: &Value, policy: &ReducePolicy) {
    match classify(field, value, &policy.byte_scale) {
        Shape::Nothing => {}
        Shape::Leaf(label) => match node.child_mut(field) {
            Some(buckets) => {
                if !buckets.increment(&label) {
                    debug!(field, label, "dropping scalar that collides with a subtree");
                }
            }
            None => debug!(field, "dropping value under a label already holding a count"),
        },
        Shape::Object(members) => merge_object(node, field, members, policy),
        Shape::List(items) => merge_list(node, field, items, policy),
    }
}

/// Merges the members of one object under `node[label]`.
fn merge_object(
    node: &mut StatsNode,
    label: &str,
    members: &Map<String, Value>,
    policy: &ReducePolicy,
) {
    let Some(child) = node.child_mut(label) else {
        debug!(label, "dropping object that collides with a plain count");
        return;
    };
    for (field, value) in members {
        merge_field(child, field, value, policy);
    }
    if child.is_empty() {
        debug!(label, "object contributed no observable fields");
    }
}

fn merge_list(node: &mut StatsNode, field: &str, items: &[Value], policy: &ReducePolicy) {
    for item in items {
        let Value::Object(members) = item else {
            // Scalars, nulls and nested lists behave as if they appeared
            // directly under the list's field.
            merge_field(node, field, item, policy);
            continue;
        };
        let keys = unique_keys(members, &policy.key_priority);
        if keys.is_empty() {
            merge_object(node, field, members, policy);
            continue;
        }
        let Some(list_node) = node.child_mut(field) else {
            debug!(field, "dropping keyed list that collides with a plain count");
            continue;
        };
        for key in &keys {
            merge_object(list_node, key, members, policy);
        }
    }
}

/// Selects the labels a list-element object is counted under.
///
/// The first priority field *present* in the object wins, even when its value
/// then yields nothing usable; later priority fields are not consulted, so an
/// object is never keyed by a field the sender ranked lower than one they
/// actually set. A matched array contributes one key per scalar element,
/// which files shared records (a bridge and its member interfaces) under
/// every participant.
pub(crate) fn unique_keys(members: &Map<String, Value>, priority: &[String]) -> Vec<String> {
    let Some(selected) = priority.iter().find_map(|field| members.get(field)) else {
        return Vec::new();
    };
    match selected {
        Value::Array(items) => items.iter().filter_map(plain_label).collect(),
        other => plain_label(other).into_iter().collect(),
    }
}
