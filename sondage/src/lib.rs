// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod config;
pub mod dedup;
pub mod error;
pub mod reduce;
pub mod stats;
pub mod store;
pub mod time;
pub mod value;
pub mod window;

pub use aggregator::{Aggregator, SubmitReceipt};
pub use config::AggregatorConfig;
pub use dedup::{DedupPolicy, DedupSet};
pub use error::{StoreError, SubmitError};
pub use reduce::{DerivedTotals, ReducePolicy};
pub use stats::{StatsEntry, StatsNode};
pub use store::CheckpointStore;
pub use time::TimeSource;
pub use value::FieldMatcher;
pub use window::{MergeOutcome, Window, WindowAggregate, WindowKey, WindowKind};
