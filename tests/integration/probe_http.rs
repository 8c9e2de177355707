//! Real HTTP probes against a mock server

use std::sync::Arc;
use std::time::Duration;

use httpmon::{
    UserId,
    actors::monitor::MonitorTask,
    probe::{HttpProber, ProbeOutcome, Prober},
    storage::{AggregateStore, MemoryBackend},
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::completed;

fn prober() -> HttpProber {
    HttpProber::new(Duration::from_millis(500)).unwrap()
}

async fn server_responding(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_no_content_is_success() {
    let server = server_responding(204).await;

    let outcome = prober().probe(&format!("{}/health", server.uri())).await;

    assert_eq!(outcome, ProbeOutcome::Success(204));
}

#[tokio::test]
async fn test_service_unavailable_is_failure() {
    let server = server_responding(503).await;

    let outcome = prober().probe(&format!("{}/health", server.uri())).await;

    assert_eq!(outcome, ProbeOutcome::Failure(503));
}

#[tokio::test]
async fn test_client_error_is_failure() {
    let server = server_responding(404).await;

    let outcome = prober().probe(&format!("{}/health", server.uri())).await;

    assert_eq!(outcome, ProbeOutcome::Failure(404));
}

#[tokio::test]
async fn test_slow_response_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let outcome = prober().probe(&server.uri()).await;

    assert!(matches!(outcome, ProbeOutcome::TransportError(_)));
    assert_eq!(outcome.status_code(), None);
}

#[tokio::test]
async fn test_failing_endpoint_raises_alert_end_to_end() {
    let server = server_responding(500).await;
    let url = format!("{}/health", server.uri());
    let user = UserId::new("alice");

    let store = Arc::new(MemoryBackend::new());
    store.insert_watch(&user, &url, 2, 20).await.unwrap();
    let task = MonitorTask::new(user.clone(), url.as_str(), store.clone(), Arc::new(prober()), 3);

    assert!(completed(task.tick().await.unwrap()).alert.is_none());
    assert!(completed(task.tick().await.unwrap()).alert.is_some());

    let aggregate = store.load_aggregate(&user).await.unwrap();
    assert_eq!(aggregate.history.len(), 2);
    assert_eq!(aggregate.alerts.len(), 1);
    assert_eq!(aggregate.alerts[0].status_code, Some(500));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
