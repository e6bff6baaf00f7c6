// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The aggregator: one lock, one or two live windows, a flush counter.
//!
//! All mutation is serialized through a single mutex. Submissions are merged
//! in lock-acquisition order, which is the only ordering this crate
//! guarantees; what it buys is that no increment is ever lost or applied
//! twice. The expected load is a fleet heartbeating on a daily cadence, so
//! the simplicity is worth far more than the parallelism it forgoes.
//!
//! The only I/O performed under the lock is the periodic checkpoint flush
//! and the rollover load, both bounded to a file per window.

use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::AggregatorConfig,
    error::{StoreError, SubmitError},
    reduce::ReducePolicy,
    store::CheckpointStore,
    time::TimeSource,
    window::{MergeOutcome, WindowAggregate, WindowKey, WindowKind, WindowSlot},
};

/// Per-window outcomes for one accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Outcome in the daily window.
    pub daily: MergeOutcome,
    /// Outcome in the monthly window, when one is configured.
    pub monthly: Option<MergeOutcome>,
}

impl SubmitReceipt {
    /// Whether at least one window absorbed the submission.
    pub fn merged_any(&self) -> bool {
        self.outcomes().any(|outcome| outcome == MergeOutcome::Merged)
    }

    fn rejected_everywhere_for_missing_id(&self) -> bool {
        self.outcomes().all(|outcome| outcome == MergeOutcome::MissingId)
    }

    fn outcomes(&self) -> impl Iterator<Item = MergeOutcome> + '_ {
        std::iter::once(self.daily).chain(self.monthly)
    }
}

#[derive(Debug)]
struct State {
    daily: WindowSlot,
    monthly: Option<WindowSlot>,
    merges_since_flush: u32,
}

/// Accumulates submissions into the current windows and checkpoints them.
///
/// Shared by reference across whatever transport feeds it; every method
/// takes `&self` and serializes internally.
#[derive(Debug)]
pub struct Aggregator {
    store: CheckpointStore,
    policy: ReducePolicy,
    id_field: String,
    flush_every: u32,
    clock: TimeSource,
    state: Mutex<State>,
}

impl Aggregator {
    pub(crate) fn from_config(config: AggregatorConfig) -> Result<Self, StoreError> {
        let store = CheckpointStore::open(config.data_dir)?;
        let now = config.clock.now_utc();
        let daily = WindowSlot::open(WindowKind::Daily, config.daily_dedup, &store, now)?;
        let monthly = config
            .monthly_window
            .then(|| WindowSlot::open(WindowKind::Monthly, config.monthly_dedup, &store, now))
            .transpose()?;
        info!(root = %store.root().display(), "aggregation state loaded");
        Ok(Aggregator {
            store,
            policy: config.policy,
            id_field: config.id_field,
            flush_every: config.flush_every,
            clock: config.clock,
            state: Mutex::new(State {
                daily,
                monthly,
                merges_since_flush: 0,
            }),
        })
    }

    /// Merges one submission into every current window.
    ///
    /// `country` is an ISO country code attributed by the transport; an
    /// empty string means unattributed and tallies nothing.
    ///
    /// Duplicates are not errors: the receipt reports them and the windows
    /// are left untouched. A submission is only rejected when it is not an
    /// object, or when every window demanded an identifier it did not have.
    pub fn submit(&self, event: &Value, country: &str) -> Result<SubmitReceipt, SubmitError> {
        let Some(object) = event.as_object() else {
            debug!("rejecting submission that is not a JSON object");
            return Err(SubmitError::NotAnObject);
        };
        let id = object
            .get(&self.id_field)
            .and_then(Value::as_str)
            .unwrap_or("");

        let mut state = self.state.lock().unwrap();
        // Rollover is checked on every submission: the one that crosses
        // midnight is the one that retires yesterday's window.
        let now = self.clock.now_utc();
        state.daily.roll_if_needed(&self.store, now);
        if let Some(monthly) = &mut state.monthly {
            monthly.roll_if_needed(&self.store, now);
        }

        let skip = Some(self.id_field.as_str());
        let receipt = SubmitReceipt {
            daily: state.daily.apply(object, id, country, &self.policy, skip),
            monthly: state
                .monthly
                .as_mut()
                .map(|slot| slot.apply(object, id, country, &self.policy, skip)),
        };
        if receipt.rejected_everywhere_for_missing_id() {
            return Err(SubmitError::MissingSubmissionId {
                field: self.id_field.clone(),
            });
        }
        if receipt.merged_any() {
            state.merges_since_flush += 1;
            if state.merges_since_flush >= self.flush_every {
                self.flush_locked(&mut state);
            }
        }
        Ok(receipt)
    }

    /// Writes the current windows to disk, as they stand.
    ///
    /// Write failures are logged and swallowed; in-memory state is the
    /// source of truth and the next flush carries the backlog.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }

    /// Final flush on termination. The caller exits afterwards.
    pub fn shutdown(&self) {
        info!("shutting down, writing final checkpoint");
        self.flush();
    }

    /// A copy of the current window of the given granularity.
    ///
    /// `None` when that granularity is not configured.
    pub fn snapshot(&self, kind: WindowKind) -> Option<(WindowKey, WindowAggregate)> {
        let state = self.state.lock().unwrap();
        let slot = match kind {
            WindowKind::Daily => Some(&state.daily),
            WindowKind::Monthly => state.monthly.as_ref(),
        }?;
        let window = slot.window();
        Some((window.key.clone(), window.aggregate.clone()))
    }

    fn flush_locked(&self, state: &mut State) {
        Self::flush_slot(&self.store, &state.daily);
        if let Some(monthly) = &state.monthly {
            Self::flush_slot(&self.store, monthly);
        }
        state.merges_since_flush = 0;
    }

    fn flush_slot(store: &CheckpointStore, slot: &WindowSlot) {
        if let Err(err) = store.flush(slot.window(), slot.persists_ids()) {
            warn!(
                window = %slot.window().key,
                error = %err,
                "checkpoint write failed, keeping state in memory"
            );
        }
    }
}
