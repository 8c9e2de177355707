//! Concurrency tests
//!
//! - Many monitor tasks of one user writing into the same aggregate
//! - Racing registrations against the per-user quota and uniqueness rules

use std::sync::Arc;

use futures::future::join_all;
use httpmon::{
    UserId,
    actors::{monitor::MonitorTask, supervisor::SupervisorHandle},
    error::{MonitorError, ValidationError},
    storage::{AggregateStore, MemoryBackend},
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

use crate::helpers::*;

const TASKS: usize = 20;
const TICKS: usize = 10;

fn url(i: usize) -> String {
    format!("https://site-{i}.example.com")
}

/// Run `TICKS` ticks on `TASKS` urls of one user concurrently
pub async fn tick_concurrently(store: Arc<dyn AggregateStore>, tasks: usize, ticks: usize) {
    let user = UserId::new("alice");

    let runs = (0..tasks).map(|i| {
        let task = MonitorTask::new(
            user.clone(),
            url(i),
            store.clone(),
            Arc::new(ScriptedProber::always(ok())),
            3,
        );
        tokio::spawn(async move {
            for _ in 0..ticks {
                completed(task.tick().await.unwrap());
            }
        })
    });

    for result in join_all(runs).await {
        result.unwrap();
    }
}

pub async fn register_all(store: &dyn AggregateStore, tasks: usize) {
    let user = UserId::new("alice");
    for i in 0..tasks {
        store.insert_watch(&user, &url(i), 1, tasks).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_lose_no_updates() {
    let store = Arc::new(MemoryBackend::new());
    register_all(store.as_ref(), TASKS).await;

    tick_concurrently(store.clone(), TASKS, TICKS).await;

    let aggregate = store.load_aggregate(&UserId::new("alice")).await.unwrap();
    assert_eq!(aggregate.history.len(), TASKS * TICKS);
    for watch in &aggregate.urls {
        assert_eq!(watch.success_count, TICKS as u64);
        assert_eq!(watch.version, TICKS as u64);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_registrations_respect_quota() {
    let store = Arc::new(MemoryBackend::new());
    let (event_tx, _events) = broadcast::channel(256);
    let supervisor = SupervisorHandle::spawn(
        store.clone(),
        Arc::new(ScriptedProber::always(ok())),
        test_settings(),
        event_tx,
    );

    let attempts = (0..30).map(|i| {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.register(UserId::new("alice"), url(i), 1).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted = results.iter().filter(|result| result.is_ok()).count();
    let over_quota = results
        .iter()
        .filter(|result| {
            matches!(
                result,
                Err(MonitorError::Validation(ValidationError::QuotaExceeded { max: 20 }))
            )
        })
        .count();
    assert_eq!(accepted, 20);
    assert_eq!(over_quota, 10);
    assert_eq!(supervisor.running().await.unwrap().len(), 20);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicate_registrations() {
    let store = Arc::new(MemoryBackend::new());
    let (event_tx, _events) = broadcast::channel(256);
    let supervisor = SupervisorHandle::spawn(
        store.clone(),
        Arc::new(ScriptedProber::always(ok())),
        test_settings(),
        event_tx,
    );

    let attempts = (0..10).map(|_| {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            supervisor
                .register(UserId::new("alice"), "https://same.example.com", 1)
                .await
        })
    });
    let results = join_all(attempts).await;

    let accepted = results
        .iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    assert_eq!(accepted, 1);

    let aggregate = store.load_aggregate(&UserId::new("alice")).await.unwrap();
    assert_eq!(aggregate.urls.len(), 1);

    supervisor.shutdown().await.unwrap();
}
