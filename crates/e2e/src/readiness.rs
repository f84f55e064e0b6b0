//! Readiness polling - waiting for the app to answer HTTP

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::E2eResult;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessResult {
    pub ready: bool,
    pub attempts: u32,
}

/// One readiness check against some endpoint.
///
/// `Ok(false)` and `Err(_)` both count as a failed attempt.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> E2eResult<bool>;

    /// What is being probed, for log lines.
    fn target(&self) -> &str;
}

/// Poll `probe` up to `max_attempts` times, sleeping `interval` between
/// attempts. Stops at the first successful attempt. Never fails.
pub async fn poll(probe: &dyn Probe, max_attempts: u32, interval: Duration) -> ReadinessResult {
    let mut attempts = 0;

    while attempts < max_attempts {
        attempts += 1;

        match probe.check().await {
            Ok(true) => {
                info!("{} is ready after {} attempt(s)", probe.target(), attempts);
                return ReadinessResult { ready: true, attempts };
            }
            Ok(false) => debug!("{} not ready (attempt {})", probe.target(), attempts),
            Err(e) => debug!("{} unreachable (attempt {}): {}", probe.target(), attempts, e),
        }

        if attempts < max_attempts {
            sleep(interval).await;
        }
    }

    warn!("{} not ready after {} attempt(s)", probe.target(), attempts);
    ReadinessResult { ready: false, attempts }
}

/// HTTP GET probe; any 2xx status is ready.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> E2eResult<Self> {
        // The app is local; never route probes through a proxy
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> E2eResult<bool> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            debug!("{} returned {}", self.url, resp.status());
        }
        Ok(resp.status().is_success())
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// Poll `url` over HTTP until it answers 2xx or the attempts run out.
pub async fn wait_until_ready(url: &str, max_attempts: u32, interval: Duration) -> ReadinessResult {
    match HttpProbe::new(url, DEFAULT_REQUEST_TIMEOUT) {
        Ok(probe) => poll(&probe, max_attempts, interval).await,
        Err(e) => {
            warn!("Could not build HTTP client for {}: {}", url, e);
            ReadinessResult { ready: false, attempts: 0 }
        }
    }
}
