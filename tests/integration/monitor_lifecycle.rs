//! Monitor task behavior over several ticks
//!
//! Ticks are driven directly through `MonitorTask::tick` where exact sequences matter
//! and through spawned actors where lifecycle and cancellation matter.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use httpmon::{
    UserId,
    actors::{
        messages::{MonitorEvent, StopReason, TaskState, TickOutcome},
        monitor::{MonitorHandle, MonitorTask},
        supervisor::SupervisorHandle,
    },
    monitors::FailureEvaluation,
    probe::ProbeOutcome,
    storage::{AggregateStore, MemoryBackend},
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

use crate::helpers::*;

const URL: &str = "https://status.example.com";

fn alice() -> UserId {
    UserId::new("alice")
}

async fn store_with_watch(threshold: u32) -> Arc<MemoryBackend> {
    let store = Arc::new(MemoryBackend::new());
    store.insert_watch(&alice(), URL, threshold, 20).await.unwrap();
    store
}

fn task(store: Arc<MemoryBackend>, prober: ScriptedProber) -> MonitorTask {
    MonitorTask::new(alice(), URL, store, Arc::new(prober), 3)
}

#[tokio::test]
async fn test_failure_run_alerts_once_per_threshold() {
    let store = store_with_watch(2).await;
    let task = task(
        store.clone(),
        ScriptedProber::new([down(), down(), ok(), down(), down()], ok()),
    );

    let mut evaluations = Vec::new();
    for _ in 0..5 {
        evaluations.push(completed(task.tick().await.unwrap()).evaluation);
    }

    assert_eq!(
        evaluations,
        vec![
            FailureEvaluation::Failing,
            FailureEvaluation::ThresholdReached,
            FailureEvaluation::Healthy,
            FailureEvaluation::Failing,
            FailureEvaluation::ThresholdReached,
        ]
    );

    let aggregate = store.load_aggregate(&alice()).await.unwrap();
    assert_eq!(aggregate.history.len(), 5);
    assert_eq!(aggregate.alerts.len(), 2);
    assert_eq!(aggregate.urls[0].consecutive_failures, 0);
    assert_eq!(aggregate.urls[0].success_count, 1);
    assert_eq!(aggregate.urls[0].version, 5);
}

#[tokio::test]
async fn test_threshold_one_alerts_on_every_failure() {
    let store = store_with_watch(1).await;
    let task = task(store.clone(), ScriptedProber::always(down()));

    for _ in 0..3 {
        let report = completed(task.tick().await.unwrap());
        assert!(report.alert.is_some());
        assert_eq!(report.counters.consecutive_failures, 0);
    }

    let aggregate = store.load_aggregate(&alice()).await.unwrap();
    assert_eq!(aggregate.alerts.len(), 3);
}

#[tokio::test]
async fn test_transport_errors_count_as_failures() {
    let store = store_with_watch(2).await;
    let refused = ProbeOutcome::TransportError("connection refused".to_string());
    let task = task(
        store.clone(),
        ScriptedProber::new([refused.clone(), down()], ok()),
    );

    task.tick().await.unwrap();
    let report = completed(task.tick().await.unwrap());
    assert_eq!(report.evaluation, FailureEvaluation::ThresholdReached);

    let aggregate = store.load_aggregate(&alice()).await.unwrap();
    assert_eq!(aggregate.history[0].status_code, None);
    assert_eq!(aggregate.history[0].error.as_deref(), Some("connection refused"));
    assert!(aggregate.history[0].is_transport_failure());
    assert_eq!(aggregate.history[1].status_code, Some(503));
    assert_eq!(aggregate.alerts[0].status_code, Some(503));
}

#[tokio::test]
async fn test_history_snapshots_state_before_the_tick() {
    let store = store_with_watch(2).await;
    let task = task(store.clone(), ScriptedProber::new([ok(), ok(), down()], ok()));

    for _ in 0..3 {
        task.tick().await.unwrap();
    }

    let history = store.load_aggregate(&alice()).await.unwrap().history;
    let snapshots: Vec<_> = history
        .iter()
        .map(|record| (record.url.succeeded, record.url.failed))
        .collect();
    assert_eq!(snapshots, vec![(0, 0), (1, 0), (2, 0)]);
    assert!(history.iter().all(|record| record.url.threshold == 2));
}

#[tokio::test]
async fn test_stop_interrupts_hanging_probe() {
    let store = store_with_watch(1).await;
    let (event_tx, mut events) = broadcast::channel(16);
    let task = MonitorTask::new(alice(), URL, store.clone(), Arc::new(HangingProber), 3);

    let handle = MonitorHandle::spawn(task, &test_settings(), event_tx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), TaskState::Active);

    let reason = tokio::time::timeout(Duration::from_secs(1), handle.stop(StopReason::Cancelled))
        .await
        .expect("stop must not wait for the probe");
    assert_eq!(reason, StopReason::Cancelled);

    assert_matches!(
        events.recv().await.unwrap(),
        MonitorEvent::Stopped {
            reason: StopReason::Cancelled,
            ..
        }
    );

    let aggregate = store.load_aggregate(&alice()).await.unwrap();
    assert!(aggregate.history.is_empty());
    assert_eq!(aggregate.urls[0].version, 0);
}

#[tokio::test]
async fn test_remove_during_hanging_probe_completes() {
    let store = Arc::new(MemoryBackend::new());
    let (event_tx, _events) = broadcast::channel(16);
    let supervisor = SupervisorHandle::spawn(
        store.clone(),
        Arc::new(HangingProber),
        test_settings(),
        event_tx,
    );

    supervisor.register(alice(), URL, 1).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), supervisor.remove(alice(), URL))
        .await
        .expect("removal must not wait for the probe")
        .unwrap();

    assert!(supervisor.running().await.unwrap().is_empty());
    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_tick_now_after_removal_stops_task() {
    let store = store_with_watch(1).await;
    let (event_tx, mut events) = broadcast::channel(16);
    let prober = Arc::new(ScriptedProber::always(ok()));
    let task = MonitorTask::new(alice(), URL, store.clone(), prober.clone(), 3);

    let handle = MonitorHandle::spawn(task, &test_settings(), event_tx);
    wait_for_probes(&mut events, 1).await;

    assert_matches!(handle.tick_now().await, Ok(TickOutcome::Completed(_)));
    store.remove_watch(&alice(), URL).await.unwrap();
    assert_matches!(handle.tick_now().await, Ok(TickOutcome::Unregistered));

    assert_eq!(handle.stop(StopReason::Cancelled).await, StopReason::Unregistered);
    // the unregistered tick never probed
    assert_eq!(prober.calls(), 2);
}
