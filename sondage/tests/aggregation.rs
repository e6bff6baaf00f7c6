// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end aggregation scenarios: submissions in, checkpoints out.

use std::{
    fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use assert2::check;
use assert_json_diff::{assert_json_eq, assert_json_include};
use serde_json::{json, Value};
use tempfile::TempDir;

use sondage::{
    time::fakes::ManualClock, AggregatorConfig, CheckpointStore, DedupPolicy, MergeOutcome,
    TimeSource, WindowKind,
};

// 2018-12-09T22:00:00Z, late in a day near the end of a month.
const DEC_9_EVENING: u64 = 1544392800;
// 2018-12-10T00:30:00Z, just across midnight.
const DEC_10_NIGHT: u64 = 1544401800;
// 2019-01-01T01:00:00Z, across the month (and year) boundary.
const JAN_1_NIGHT: u64 = 1546304400;

fn instant(epoch_secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(epoch_secs)
}

fn appliance_event(uuid: &str) -> Value {
    json!({
        "uuid": uuid,
        "platform": "FreeNAS",
        "version": "11.2-RELEASE",
        "memory": 17179869184u64,
        "pools": [
            {"name": "tank", "capacity": 3221225472u64, "disks": ["ada0", "ada1"]},
        ],
        "network": [
            {"members": ["em0", "em1"], "mtu": 1500},
        ],
    })
}

fn read_checkpoint(dir: &TempDir, name: &str) -> Value {
    let bytes = fs::read(dir.path().join(name)).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn a_days_submissions_checkpoint_with_the_full_schema() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(clock))
        .initialize()
        .unwrap();

    aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();
    aggregator.submit(&appliance_event("sys-2"), "DE").unwrap();
    aggregator.submit(&appliance_event("sys-3"), "US").unwrap();
    aggregator.flush();

    let checkpoint = read_checkpoint(&dir, "2018-12-09.json");
    assert_json_eq!(
        checkpoint,
        json!({
            "systemCount": 3,
            "country": {"DE": 2, "US": 1},
            "totalCapacityGB": 9.0,
            "totalDisks": 6,
            "stats": {
                "platform": {"FreeNAS": 3},
                "version": {"11.2-RELEASE": 3},
                "memory": {"16GB": 3},
                "pools": {
                    "tank": {
                        "name": {"tank": 3},
                        "capacity": {"3GB": 3},
                        "disks": {"ada0": 3, "ada1": 3},
                    },
                },
                "network": {
                    "em0": {"members": {"em0": 3, "em1": 3}, "mtu": {"1500": 3}},
                    "em1": {"members": {"em0": 3, "em1": 3}, "mtu": {"1500": 3}},
                },
            },
        })
    );

    // The identifiers ride along in the sidecar, sorted.
    let ids = read_checkpoint(&dir, "2018-12-09.json.id");
    assert_json_eq!(ids, json!(["sys-1", "sys-2", "sys-3"]));
}

#[test]
fn crossing_midnight_retires_the_day_and_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(clock.clone()))
        .initialize()
        .unwrap();

    aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();
    aggregator.submit(&appliance_event("sys-2"), "US").unwrap();

    clock.set(instant(DEC_10_NIGHT));
    let receipt = aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();

    // The submission that crossed midnight went into the new day, and the
    // monthly window deduplicated it while the fresh daily window did not.
    check!(receipt.daily == MergeOutcome::Merged);
    check!(receipt.monthly == Some(MergeOutcome::Duplicate));

    // Day 9 was flushed complete at rollover, without the day-10 arrival.
    let retired = read_checkpoint(&dir, "2018-12-09.json");
    assert_json_include!(
        actual: retired,
        expected: json!({"systemCount": 2, "country": {"DE": 1, "US": 1}})
    );

    let (key, fresh) = aggregator.snapshot(WindowKind::Daily).unwrap();
    check!(key.label() == "2018-12-10");
    check!(fresh.system_count == 1);
    check!(fresh.stats.count_at(&["platform", "FreeNAS"]) == Some(1));

    let (month_key, month) = aggregator.snapshot(WindowKind::Monthly).unwrap();
    check!(month_key.label() == "2018-12");
    check!(month.system_count == 2);
}

#[cfg(unix)]
#[test]
fn latest_links_follow_rollover() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(clock.clone()))
        .initialize()
        .unwrap();

    check!(
        fs::read_link(dir.path().join("latest.json")).unwrap()
            == std::path::PathBuf::from("2018-12-09.json")
    );

    clock.set(instant(DEC_10_NIGHT));
    aggregator.submit(&appliance_event("sys-1"), "").unwrap();

    check!(
        fs::read_link(dir.path().join("latest.json")).unwrap()
            == std::path::PathBuf::from("2018-12-10.json")
    );
    check!(
        fs::read_link(dir.path().join("latest-month.json")).unwrap()
            == std::path::PathBuf::from("2018-12.json")
    );
}

#[test]
fn crossing_the_month_boundary_rolls_both_windows() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(clock.clone()))
        .initialize()
        .unwrap();

    aggregator.submit(&appliance_event("sys-1"), "FR").unwrap();

    clock.set(instant(JAN_1_NIGHT));
    let receipt = aggregator.submit(&appliance_event("sys-1"), "FR").unwrap();
    check!(receipt.daily == MergeOutcome::Merged);
    check!(receipt.monthly == Some(MergeOutcome::Merged));

    assert_json_include!(
        actual: read_checkpoint(&dir, "2018-12-09.json"),
        expected: json!({"systemCount": 1})
    );
    assert_json_include!(
        actual: read_checkpoint(&dir, "2018-12.json"),
        expected: json!({"systemCount": 1})
    );

    let (key, _) = aggregator.snapshot(WindowKind::Monthly).unwrap();
    check!(key.label() == "2019-01");
}

#[test]
fn without_dedup_every_submission_counts() {
    let dir = TempDir::new().unwrap();
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(ManualClock::starting_at(instant(
            DEC_9_EVENING,
        ))))
        .daily_dedup(DedupPolicy::Disabled)
        .monthly_dedup(DedupPolicy::Disabled)
        .initialize()
        .unwrap();

    for _ in 0..3 {
        let receipt = aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();
        check!(receipt.daily == MergeOutcome::Merged);
    }

    let (_, daily) = aggregator.snapshot(WindowKind::Daily).unwrap();
    check!(daily.system_count == 3);
    check!(daily.country.get("DE") == Some(&3));
    check!(daily.stats.count_at(&["memory", "16GB"]) == Some(3));
    check!(daily.stats.count_at(&["pools", "tank", "capacity", "3GB"]) == Some(3));
    check!(daily.totals.capacity_gb == 9.0);

    // No identifiers are tracked, so nothing to persist beside the record.
    aggregator.flush();
    check!(!dir.path().join("2018-12-09.json.id").exists());
}

#[test]
fn checkpoints_round_trip_through_the_store() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(clock))
        .initialize()
        .unwrap();

    aggregator.submit(&appliance_event("sys-1"), "NL").unwrap();
    aggregator.submit(&appliance_event("sys-2"), "").unwrap();
    let (key, aggregate) = aggregator.snapshot(WindowKind::Daily).unwrap();
    aggregator.flush();

    let store = CheckpointStore::open(dir.path()).unwrap();
    let reloaded = store.load(&key).unwrap();
    check!(reloaded.aggregate == aggregate);
    check!(reloaded.seen.contains("sys-1"));
    check!(reloaded.seen.contains("sys-2"));
}

#[test]
fn unrecognised_structures_never_poison_their_siblings() {
    let dir = TempDir::new().unwrap();
    let aggregator = AggregatorConfig::new(dir.path())
        .clock(TimeSource::custom(ManualClock::starting_at(instant(
            DEC_9_EVENING,
        ))))
        .initialize()
        .unwrap();

    let awkward = json!({
        "uuid": "sys-1",
        "platform": "FreeNAS",
        "oddity": {},
        "nulls": [null, null],
        "mixed": [1, "one", {"name": "n1", "x": true}, [2]],
    });
    aggregator.submit(&awkward, "").unwrap();

    let (_, daily) = aggregator.snapshot(WindowKind::Daily).unwrap();
    check!(daily.system_count == 1);
    check!(daily.stats.count_at(&["platform", "FreeNAS"]) == Some(1));
    check!(daily.stats.child("oddity").is_some());
    check!(daily.stats.get("nulls").is_none());
    check!(daily.stats.count_at(&["mixed", "1"]) == Some(1));
    check!(daily.stats.count_at(&["mixed", "one"]) == Some(1));
    check!(daily.stats.count_at(&["mixed", "2"]) == Some(1));
    check!(daily.stats.count_at(&["mixed", "n1", "x", "true"]) == Some(1));
}

#[test]
fn resubmission_after_restart_is_still_deduplicated() {
    let dir = TempDir::new().unwrap();
    let open = |clock: &ManualClock| {
        AggregatorConfig::new(dir.path())
            .clock(TimeSource::custom(clock.clone()))
            .initialize()
            .unwrap()
    };

    let clock = ManualClock::starting_at(instant(DEC_9_EVENING));
    {
        let aggregator = open(&clock);
        aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();
        aggregator.shutdown();
    }

    let aggregator = open(&clock);
    let receipt = aggregator.submit(&appliance_event("sys-1"), "DE").unwrap();
    check!(receipt.daily == MergeOutcome::Duplicate);
    check!(receipt.monthly == Some(MergeOutcome::Duplicate));

    let (_, daily) = aggregator.snapshot(WindowKind::Daily).unwrap();
    check!(daily.system_count == 1);
}
