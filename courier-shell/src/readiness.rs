//! Readiness gate: hold the UI back until the backend answers its health
//! check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_config::ReadinessConfig;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

/// The only status code that counts as healthy.
pub const HEALTHY_STATUS: u16 = 200;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("health probe timed out")]
    Timeout,
    #[error("health probe failed: {0}")]
    Http(#[source] reqwest::Error),
}

/// One bounded health request against the backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns the HTTP status of the health endpoint.
    async fn probe(&self) -> Result<u16, ProbeError>;
}

/// `GET` the health URL with a per-request timeout. Redirects are not
/// followed, so a 3xx is reported as-is.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpHealthProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(ProbeError::Http)?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Http(err)
                }
            })?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    TransientFailure,
    Exhausted,
}

/// One probe cycle inside [`ReadinessGate::wait_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessAttempt {
    pub number: u32,
    pub outcome: AttemptOutcome,
}

impl ReadinessAttempt {
    fn first() -> Self {
        Self {
            number: 1,
            outcome: AttemptOutcome::Pending,
        }
    }

    fn next(self) -> Self {
        Self {
            number: self.number + 1,
            outcome: AttemptOutcome::Pending,
        }
    }

    fn resolve(
        &mut self,
        response: &Result<u16, ProbeError>,
        max_attempts: u32,
    ) {
        self.outcome = match response {
            Ok(HEALTHY_STATUS) => AttemptOutcome::Success,
            _ if self.number >= max_attempts => AttemptOutcome::Exhausted,
            _ => AttemptOutcome::TransientFailure,
        };
    }
}

/// Result of a readiness wait. Exactly one is produced per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

/// Sequential, fixed-interval health polling with a bounded attempt budget.
#[derive(Clone)]
pub struct ReadinessGate {
    probe: Arc<dyn HealthProbe>,
    url: Url,
    max_attempts: u32,
    interval: Duration,
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("url", &self.url)
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ReadinessGate {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        url: Url,
        max_attempts: u32,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            url,
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Gate backed by [`HttpHealthProbe`] using the configured URL and
    /// timings.
    pub fn from_config(config: &ReadinessConfig) -> Result<Self, ProbeError> {
        let probe = HttpHealthProbe::new(
            config.health_url.clone(),
            config.probe_timeout,
        )?;
        Ok(Self::new(
            Arc::new(probe),
            config.health_url.clone(),
            config.max_attempts,
            config.interval,
        ))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Probe until the backend answers 200 or the attempt budget runs out.
    ///
    /// Attempt `n + 1` starts `interval` after attempt `n` resolved; there is
    /// no wait after the final attempt.
    pub async fn wait_until_ready(&self) -> Readiness {
        let mut attempt = ReadinessAttempt::first();
        loop {
            let response = self.probe.probe().await;
            attempt.resolve(&response, self.max_attempts);

            match attempt.outcome {
                AttemptOutcome::Success => {
                    info!(url = %self.url, attempt = attempt.number, "backend is ready");
                    return Readiness::Ready {
                        attempts: attempt.number,
                    };
                }
                AttemptOutcome::Exhausted => {
                    error!(
                        url = %self.url,
                        attempts = attempt.number,
                        "backend never became ready"
                    );
                    return Readiness::TimedOut {
                        attempts: attempt.number,
                    };
                }
                AttemptOutcome::TransientFailure | AttemptOutcome::Pending => {
                    match &response {
                        Ok(status) => debug!(
                            url = %self.url,
                            attempt = attempt.number,
                            status,
                            "backend not ready yet"
                        ),
                        Err(err) => debug!(
                            url = %self.url,
                            attempt = attempt.number,
                            error = %err,
                            "backend not reachable yet"
                        ),
                    }
                    tokio::time::sleep(self.interval).await;
                    attempt = attempt.next();
                }
            }
        }
    }
}
