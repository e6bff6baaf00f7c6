// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Construction and tuning of an [`Aggregator`].

use std::path::PathBuf;

use crate::{
    aggregator::Aggregator,
    dedup::DedupPolicy,
    error::StoreError,
    reduce::ReducePolicy,
    time::TimeSource,
};

/// Builder for an [`Aggregator`].
///
/// Only the data directory is required; everything else defaults to the
/// production configuration of the telemetry service this crate was written
/// for: daily and monthly windows, deduplication required in both, and the
/// submission identifier read from the event's `uuid` field.
///
/// ```no_run
/// use sondage::{AggregatorConfig, DedupPolicy};
///
/// # fn main() -> Result<(), sondage::StoreError> {
/// let aggregator = AggregatorConfig::new("/var/db/sondage")
///     .daily_dedup(DedupPolicy::Disabled)
///     .flush_every(10)
///     .initialize()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) flush_every: u32,
    pub(crate) daily_dedup: DedupPolicy,
    pub(crate) monthly_dedup: DedupPolicy,
    pub(crate) monthly_window: bool,
    pub(crate) id_field: String,
    pub(crate) policy: ReducePolicy,
    pub(crate) clock: TimeSource,
}

impl AggregatorConfig {
    /// Checkpoints written between flushes, unless overridden.
    pub const DEFAULT_FLUSH_EVERY: u32 = 5;

    /// A configuration that checkpoints under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        AggregatorConfig {
            data_dir: data_dir.into(),
            flush_every: Self::DEFAULT_FLUSH_EVERY,
            daily_dedup: DedupPolicy::default(),
            monthly_dedup: DedupPolicy::default(),
            monthly_window: true,
            id_field: "uuid".to_string(),
            policy: ReducePolicy::default(),
            clock: TimeSource::system(),
        }
    }

    /// Sets how many merged submissions may accumulate before a checkpoint
    /// is written.
    ///
    /// A lower value bounds data loss on crash; a higher one amortises the
    /// write. Must be at least 1.
    pub fn flush_every(mut self, merges: u32) -> Self {
        assert!(merges > 0, "flush_every must be at least 1");
        self.flush_every = merges;
        self
    }

    /// Sets the deduplication policy of the daily window.
    pub fn daily_dedup(mut self, policy: DedupPolicy) -> Self {
        self.daily_dedup = policy;
        self
    }

    /// Sets the deduplication policy of the monthly window.
    pub fn monthly_dedup(mut self, policy: DedupPolicy) -> Self {
        self.monthly_dedup = policy;
        self
    }

    /// Enables or disables the monthly window entirely.
    pub fn monthly_window(mut self, enabled: bool) -> Self {
        self.monthly_window = enabled;
        self
    }

    /// Sets the top-level event field holding the submission identifier.
    ///
    /// The field is excluded from the frequency tree so identifiers do not
    /// accumulate as one-count buckets.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Replaces the reduction policy.
    pub fn reduce_policy(mut self, policy: ReducePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the clock. Tests use this to steer window rollover.
    pub fn clock(mut self, clock: TimeSource) -> Self {
        self.clock = clock;
        self
    }

    /// Opens the store, loads the current windows, and returns the running
    /// [`Aggregator`].
    ///
    /// Fails if the checkpoint directory cannot be prepared or an existing
    /// checkpoint for a current window cannot be read. Later load failures
    /// (at rollover) degrade to an empty window instead; only at startup is
    /// unreadable state grounds to refuse service.
    pub fn initialize(self) -> Result<Aggregator, StoreError> {
        Aggregator::from_config(self)
    }
}
