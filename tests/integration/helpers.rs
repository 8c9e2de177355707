//! Helper functions for integration tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use httpmon::{
    actors::messages::{MonitorEvent, TickOutcome, TickReport},
    config::MonitorSettings,
    probe::{ProbeOutcome, Prober},
};
use tokio::sync::broadcast;

/// Replays a fixed sequence of outcomes, then repeats `fallback`
pub struct ScriptedProber {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(script: impl IntoIterator<Item = ProbeOutcome>, fallback: ProbeOutcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: ProbeOutcome) -> Self {
        Self::new([], outcome)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Never answers, like a server that accepts and then hangs
pub struct HangingProber;

#[async_trait]
impl Prober for HangingProber {
    async fn probe(&self, _url: &str) -> ProbeOutcome {
        std::future::pending().await
    }
}

pub fn ok() -> ProbeOutcome {
    ProbeOutcome::Success(200)
}

pub fn down() -> ProbeOutcome {
    ProbeOutcome::Failure(503)
}

/// Long interval: only the immediate first tick and explicit ticks run
pub fn test_settings() -> MonitorSettings {
    MonitorSettings {
        interval_secs: 3600,
        probe_timeout_secs: 5,
        ..MonitorSettings::default()
    }
}

pub fn completed(outcome: TickOutcome) -> TickReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        TickOutcome::Unregistered => panic!("expected a completed tick"),
    }
}

/// Wait until `count` Probed events were seen
pub async fn wait_for_probes(events: &mut broadcast::Receiver<MonitorEvent>, count: usize) {
    let mut seen = 0;
    while seen < count {
        match tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await {
            Ok(Ok(MonitorEvent::Probed { .. })) => seen += 1,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => panic!("event channel failed: {e}"),
            Err(_) => panic!("timed out after {seen} of {count} probes"),
        }
    }
}
