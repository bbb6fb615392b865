//! End-to-end automation-cycle scenarios against an in-memory store.

use copilot_core::coordinator::{AutomationCoordinator, CycleOutcome};
use copilot_core::dispatch::NoopBroadcaster;
use copilot_core::model::{Forecast, GlucosePoint, GlucoseQuality};
use copilot_core::storage::sqlite::SqliteStore;
use copilot_core::storage::{ActionRepository, ForecastRepository, GlucoseRepository};
use std::sync::Arc;

fn now() -> i64 {
    1_700_000_000_000
}

fn gp(ts: i64, mmol: f64) -> GlucosePoint {
    GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
}

fn seeded_store(point_count: i64) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let now = now();
    let points: Vec<GlucosePoint> =
        (0..point_count).map(|i| gp(now - (point_count - i) * 5 * 60_000, 6.0 + (i % 5) as f64 * 0.1)).collect();
    store.insert_glucose(&points).unwrap();
    store
}

#[tokio::test]
async fn s4_replayed_cycle_does_not_duplicate_sent_actions() {
    let store = seeded_store(30);
    let coordinator = AutomationCoordinator::new(store.clone(), "", "");

    let first = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
    assert!(matches!(first, CycleOutcome::Completed { .. }));

    // Re-running immediately within the same minute must not duplicate
    // any already-SENT command: idempotency keys bucket by time window,
    // so a same-bucket rerun either no-ops or hits the dedup path.
    let second = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
    assert!(matches!(second, CycleOutcome::Completed { .. }));
}

// Kill-switch gating (S5) and COB-forced base target (S6) both hinge on
// `Settings::load()` reading process-global env vars; unit tests in
// rules::tests::kill_switch_blocks_every_triggered_decision and
// config::tests::cob_forces_base_target_to_4_2 cover them directly
// without racing other tests in this binary over shared env state.

#[tokio::test]
async fn dry_run_never_dispatches() {
    let store = seeded_store(30);
    let coordinator = AutomationCoordinator::new(store, "", "").with_dry_run(true);
    let outcome = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
    if let CycleOutcome::Completed { actions_dispatched } = outcome {
        assert_eq!(actions_dispatched, 0);
    }
}

#[tokio::test]
async fn invariant_8_concurrent_cycle_trigger_is_dropped_not_queued() {
    let store = seeded_store(20);
    let coordinator = Arc::new(AutomationCoordinator::new(store, "", ""));

    // Hold the cycle's own try-lock externally is not possible from here
    // (it's a private field of a different crate), so instead race two
    // cycles against each other: the mutex guarantees at most one runs
    // to completion concurrently, and the loser reports "already_running"
    // rather than blocking until the winner frees the lock.
    let a = coordinator.clone();
    let b = coordinator.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.run_cycle(&NoopBroadcaster).await.unwrap() }),
        tokio::spawn(async move { b.run_cycle(&NoopBroadcaster).await.unwrap() }),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let skipped = outcomes.iter().filter(|o| matches!(o, CycleOutcome::Skipped { reason: "already_running" })).count();
    let completed = outcomes.iter().filter(|o| matches!(o, CycleOutcome::Completed { .. })).count();
    assert!(completed >= 1, "at least one racing cycle must complete");
    assert!(completed + skipped == 2);
}

#[tokio::test]
async fn invariant_7_replayed_trigger_within_same_bucket_does_not_double_dispatch() {
    let store = seeded_store(30);
    let coordinator = AutomationCoordinator::new(store.clone(), "", "");

    let first = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
    assert!(matches!(first, CycleOutcome::Completed { .. }));
    let sent_after_first = store.count_sent_since(0).unwrap();

    // Re-running against the same millisecond-stamped cycle falls in the
    // same idempotency bucket: the dispatcher's find-then-insert-pending
    // lookup must dedup, not send a second SENT row for the same key.
    let second = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
    assert!(matches!(second, CycleOutcome::Completed { .. }));
    let sent_after_second = store.count_sent_since(0).unwrap();
    assert_eq!(sent_after_second, sent_after_first);
}

#[test]
fn invariant_10_forecast_round_trip_preserves_all_fields() {
    let store = SqliteStore::open_in_memory().unwrap();
    let original = Forecast {
        ts: 123_456,
        horizon_minutes: 30,
        value_mmol: 6.7,
        ci_low: 5.9,
        ci_high: 7.5,
        model_version: "copilot-enhanced-v3".to_string(),
    };
    store.insert_forecasts(std::slice::from_ref(&original)).unwrap();
    let reloaded = store.forecast_since(0).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0], original);
}
