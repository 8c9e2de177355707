//! Monitoring state surviving restarts of the SQLite store

use std::sync::Arc;

use httpmon::{
    UserId,
    actors::{monitor::MonitorTask, supervisor::SupervisorHandle},
    storage::{AggregateStore, Retention, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::concurrency::{register_all, tick_concurrently};
use crate::helpers::*;

async fn open(dir: &TempDir) -> Arc<SqliteBackend> {
    Arc::new(
        SqliteBackend::new(dir.path().join("httpmon.db"), Retention::default())
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_recover_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let alice = UserId::new("alice");

    {
        let store = open(&dir).await;
        let (event_tx, mut events) = broadcast::channel(64);
        let supervisor = SupervisorHandle::spawn(
            store.clone(),
            Arc::new(ScriptedProber::always(down())),
            test_settings(),
            event_tx,
        );

        supervisor
            .register(alice.clone(), "https://a.example.com", 1)
            .await
            .unwrap();
        supervisor
            .register(UserId::new("bob"), "https://b.example.com", 2)
            .await
            .unwrap();
        wait_for_probes(&mut events, 2).await;

        supervisor.shutdown().await.unwrap();
        store.close().await.unwrap();
    }

    let store = open(&dir).await;
    let aggregate = store.load_aggregate(&alice).await.unwrap();
    assert_eq!(aggregate.history.len(), 1);
    assert_eq!(aggregate.alerts.len(), 1);
    assert_eq!(aggregate.urls[0].version, 1);

    let (event_tx, mut events) = broadcast::channel(64);
    let supervisor = SupervisorHandle::spawn(
        store.clone(),
        Arc::new(ScriptedProber::always(ok())),
        test_settings(),
        event_tx,
    );
    assert_eq!(supervisor.recover().await.unwrap(), 2);
    wait_for_probes(&mut events, 2).await;

    let aggregate = store.load_aggregate(&alice).await.unwrap();
    assert_eq!(aggregate.history.len(), 2);
    assert_eq!(aggregate.urls[0].success_count, 1);

    let bob = store.load_aggregate(&UserId::new("bob")).await.unwrap();
    // one failure below threshold 2, then a success resets it
    assert_eq!(bob.urls[0].consecutive_failures, 0);
    assert_eq!(bob.history[0].url.failed, 0);
    assert_eq!(bob.history[1].url.failed, 1);

    supervisor.shutdown().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_lose_no_updates_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    register_all(store.as_ref(), 5).await;

    tick_concurrently(store.clone(), 5, 4).await;

    let aggregate = store.load_aggregate(&UserId::new("alice")).await.unwrap();
    assert_eq!(aggregate.history.len(), 20);
    for watch in &aggregate.urls {
        assert_eq!(watch.success_count, 4);
        assert_eq!(watch.version, 4);
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_removed_url_stops_ticking_but_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let alice = UserId::new("alice");
    store
        .insert_watch(&alice, "https://a.example.com", 1, 20)
        .await
        .unwrap();

    let task = MonitorTask::new(
        alice.clone(),
        "https://a.example.com",
        store.clone(),
        Arc::new(ScriptedProber::always(down())),
        3,
    );
    completed(task.tick().await.unwrap());

    assert!(store.remove_watch(&alice, "https://a.example.com").await.unwrap());
    assert!(matches!(
        task.tick().await.unwrap(),
        httpmon::actors::messages::TickOutcome::Unregistered
    ));

    let aggregate = store.load_aggregate(&alice).await.unwrap();
    assert!(aggregate.urls.is_empty());
    assert_eq!(aggregate.history.len(), 1);
    assert_eq!(aggregate.alerts.len(), 1);

    store.close().await.unwrap();
}
