//! End-to-end run tests with in-memory collaborators
//!
//! One select-then-terminate pass, checked through the public `run_at`
//! entry point the CLI and any scheduler binding use.

mod common;

use common::*;
use reapctl::reaper::{self, Collaborators};
use std::collections::HashMap;

#[tokio::test]
async fn test_full_run_terminates_idle_instances() {
    let now = fixed_now();
    let policy = default_policy();
    let inventory = FakeInventory::single_page(vec![
        instance("i-idle", 10, now),
        instance("i-young", 3, now),
        instance("i-busy", 10, now),
        instance("i-silent", 10, now),
    ]);
    let metrics = FakeMetrics::new()
        .with_series("i-idle", &[2.0; 7])
        .with_series("i-busy", &[55.0; 7]);
    let sink = FakeSink::succeeding();
    let hook = reapctl::provider::NoopHook;

    let summary = reaper::run_at(
        &policy,
        &Collaborators {
            inventory: &inventory,
            metrics: &metrics,
            sink: &sink,
            hook: &hook,
        },
        now,
    )
    .await
    .unwrap();

    assert_eq!(summary.checked_count, 4);
    assert_eq!(summary.terminated_ids, vec!["i-idle".to_string()]);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.status_code, 200);
    assert_eq!(sink.last_batch().unwrap(), vec!["i-idle".to_string()]);
}

#[tokio::test]
async fn test_run_with_no_candidates_touches_nothing() {
    let now = fixed_now();
    let policy = default_policy();
    let inventory = FakeInventory::single_page(vec![instance("i-young", 1, now)]);
    let metrics = FakeMetrics::new();
    let sink = FakeSink::succeeding();
    let hook = reapctl::provider::NoopHook;

    let summary = reaper::run_at(
        &policy,
        &Collaborators {
            inventory: &inventory,
            metrics: &metrics,
            sink: &sink,
            hook: &hook,
        },
        now,
    )
    .await
    .unwrap();

    assert!(summary.terminated_ids.is_empty());
    assert_eq!(summary.checked_count, 1);
    assert_eq!(sink.call_count(), 0);
}

#[tokio::test]
async fn test_run_reports_partial_termination_failures() {
    let now = fixed_now();
    let policy = default_policy();
    let inventory = FakeInventory::single_page(vec![
        instance("i-a", 10, now),
        instance("i-b", 10, now),
    ]);
    let metrics = FakeMetrics::new()
        .with_series("i-a", &[0.5])
        .with_series("i-b", &[0.5]);
    let failures: HashMap<String, String> =
        [("i-b".to_string(), "dependency violation".to_string())].into();
    let sink = FakeSink::new(SinkBehavior::PartialFailure(failures));
    let hook = reapctl::provider::NoopHook;

    let summary = reaper::run_at(
        &policy,
        &Collaborators {
            inventory: &inventory,
            metrics: &metrics,
            sink: &sink,
            hook: &hook,
        },
        now,
    )
    .await
    .unwrap();

    // Run still reports overall success, with the failure listed
    assert_eq!(summary.status_code, 200);
    assert_eq!(summary.terminated_ids, vec!["i-a".to_string()]);
    assert_eq!(
        summary.failed,
        vec![("i-b".to_string(), "dependency violation".to_string())]
    );
}

#[tokio::test]
async fn test_run_aborts_on_total_termination_failure() {
    let now = fixed_now();
    let policy = default_policy();
    let inventory = FakeInventory::single_page(vec![instance("i-a", 10, now)]);
    let metrics = FakeMetrics::new().with_series("i-a", &[0.5]);
    let sink = FakeSink::new(SinkBehavior::TotalFailure);
    let hook = reapctl::provider::NoopHook;

    let result = reaper::run_at(
        &policy,
        &Collaborators {
            inventory: &inventory,
            metrics: &metrics,
            sink: &sink,
            hook: &hook,
        },
        now,
    )
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_plan_never_calls_the_sink() {
    let now = fixed_now();
    let policy = default_policy();
    let inventory = FakeInventory::single_page(vec![instance("i-idle", 10, now)]);
    let metrics = FakeMetrics::new().with_series("i-idle", &[0.1]);
    let sink = FakeSink::succeeding();
    let hook = reapctl::provider::NoopHook;

    let report = reaper::plan(
        &policy,
        &Collaborators {
            inventory: &inventory,
            metrics: &metrics,
            sink: &sink,
            hook: &hook,
        },
        now,
    )
    .await
    .unwrap();

    assert_eq!(report.candidates, vec!["i-idle".to_string()]);
    assert_eq!(sink.call_count(), 0);
}
