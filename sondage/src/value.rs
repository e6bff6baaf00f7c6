// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Classification of decoded JSON values into histogram contributions.
//!
//! Nothing here assumes a schema. Every value an event can carry maps to
//! exactly one [`Shape`], and every scalar maps to exactly one bucket label,
//! so the reducer never has to reject a well-formed event for being novel.

use std::collections::BTreeSet;

use serde_json::{Map, Number, Value};

const BYTES_PER_GIB: i128 = 1 << 30;

/// Matches field names against a set of exact names and name prefixes.
///
/// Used for the policy knobs that key off field *names* rather than values:
/// byte-scale bucketing, capacity totals, and disk-list totals. Matching is
/// case-sensitive, like every other field lookup in this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMatcher {
    exact: BTreeSet<String>,
    prefixes: Vec<String>,
}

impl FieldMatcher {
    /// A matcher that matches nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// A matcher for the given exact field names.
    pub fn exact(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        FieldMatcher {
            exact: names.into_iter().map(Into::into).collect(),
            prefixes: Vec::new(),
        }
    }

    /// Extends this matcher to also match any field starting with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Whether `field` is matched.
    pub fn matches(&self, field: &str) -> bool {
        self.exact.contains(field) || self.prefixes.iter().any(|p| field.starts_with(p))
    }
}

/// One event value, classified by what it contributes to the histogram tree.
#[derive(Debug)]
pub(crate) enum Shape<'a> {
    /// JSON `null`. Contributes nothing at all.
    Nothing,
    /// A scalar, already rendered to its bucket label.
    Leaf(String),
    /// A nested object whose members each contribute under a child node.
    Object(&'a Map<String, Value>),
    /// An array whose elements are classified one by one.
    List(&'a Vec<Value>),
}

/// Classifies `value` as observed under the field named `field`.
///
/// `byte_scale` selects the fields whose numbers are bucketed in whole
/// gibibytes instead of raw magnitude.
pub(crate) fn classify<'a>(field: &str, value: &'a Value, byte_scale: &FieldMatcher) -> Shape<'a> {
    match value {
        Value::Null => Shape::Nothing,
        Value::Bool(b) => Shape::Leaf(bool_label(*b).to_string()),
        Value::Number(n) => Shape::Leaf(number_label(field, n, byte_scale)),
        Value::String(s) => Shape::Leaf(s.clone()),
        Value::Array(items) => Shape::List(items),
        Value::Object(members) => Shape::Object(members),
    }
}

/// Renders a scalar to a label without any field-name context.
///
/// This is the form used for unique keys pulled out of list elements:
/// strings are taken verbatim, booleans and numbers get their canonical
/// label, and composite values yield no key at all.
pub(crate) fn plain_label(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(bool_label(*b).to_string()),
        Value::Number(n) => Some(whole_part(n).to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn number_label(field: &str, value: &Number, byte_scale: &FieldMatcher) -> String {
    let whole = whole_part(value);
    if byte_scale.matches(field) {
        format!("{}GB", whole / BYTES_PER_GIB)
    } else {
        whole.to_string()
    }
}

/// The whole part of a JSON number, with the fraction truncated toward zero.
///
/// Widening to `i128` keeps every `u64` and `i64` exact; floats beyond that
/// range saturate, which still yields a stable label.
fn whole_part(value: &Number) -> i128 {
    if let Some(n) = value.as_i64() {
        n as i128
    } else if let Some(n) = value.as_u64() {
        n as i128
    } else {
        value.as_f64().unwrap_or(0.0) as i128
    }
}
