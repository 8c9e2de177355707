//! Single outbound health check against a watched URL
//!
//! A probe issues one GET request with a bounded timeout and folds every result,
//! including transport failures, into a [`ProbeOutcome`]. Retries and backoff are
//! the monitor task's business, never the probe's.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{instrument, trace, warn};

/// Classified result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Response with a status code in `200..=299`
    Success(u16),

    /// Response with any other status code
    Failure(u16),

    /// No response obtained (timeout, refused connection, DNS, TLS, ...)
    TransportError(String),
}

impl ProbeOutcome {
    /// Classify a received HTTP status code
    pub fn classify(status_code: u16) -> Self {
        if (200..=299).contains(&status_code) {
            ProbeOutcome::Success(status_code)
        } else {
            ProbeOutcome::Failure(status_code)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success(_))
    }

    /// Failures and transport errors count against the same threshold
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Success(code) | ProbeOutcome::Failure(code) => Some(*code),
            ProbeOutcome::TransportError(_) => None,
        }
    }
}

/// Something that can check a URL
///
/// Implemented by [`HttpProber`] in production; tests plug in scripted probers.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// HTTP prober backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self))]
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                trace!("{url} answered with {status_code}");
                ProbeOutcome::classify(status_code)
            }
            Err(e) => {
                warn!("{url}: request failed: {e}");
                ProbeOutcome::TransportError(e.to_string())
            }
        }
    }
}
