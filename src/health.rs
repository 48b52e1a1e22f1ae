//! # Health probe.
//!
//! [`HealthProbe`] performs one liveness check; the control loop schedules it
//! on a fixed interval and runs it off-loop so process output keeps flowing
//! while a request is in flight.
//!
//! [`HttpProbe`] issues `GET http://localhost:<port><path>` with a bounded
//! timeout. Any 2xx is healthy; a non-2xx status, a timeout or a connection
//! failure is unhealthy.
//!
//! ```text
//! HealthTick{generation} ──► spawn(probe.check())  ──► HealthResult{generation, outcome}
//!                              └─ cancelled on cleanup ──► Cancelled (ignored)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ConfigError;

/// Result of one probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The service answered with a success status.
    Healthy,
    /// The service answered with a failure status.
    Status(u16),
    /// The request did not complete within the probe timeout.
    TimedOut,
    /// The request failed (connection refused, reset, ...).
    Unreachable(String),
    /// The probe was aborted by the supervisor; never treated as a failure.
    Cancelled,
}

impl ProbeOutcome {
    /// Returns `true` for [`ProbeOutcome::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }

    /// Human-readable failure description.
    pub fn describe(&self) -> String {
        match self {
            ProbeOutcome::Healthy => "healthy".to_string(),
            ProbeOutcome::Status(code) => format!("health check failed: status {code}"),
            ProbeOutcome::TimedOut => "health check timed out".to_string(),
            ProbeOutcome::Unreachable(e) => format!("health check failed: {e}"),
            ProbeOutcome::Cancelled => "health check cancelled".to_string(),
        }
    }
}

/// One liveness check against the supervised service.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Performs the check. Implementations must bound their own duration.
    async fn check(&self) -> ProbeOutcome;
}

/// HTTP `GET` probe built on `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    /// Creates a probe for `http://localhost:<port><path>`.
    pub fn new(port: u16, path: &str, timeout: Duration) -> Result<Self, ConfigError> {
        Self::with_url(format!("http://localhost:{port}{path}"), timeout)
    }

    /// Creates a probe for an explicit URL.
    ///
    /// Fails when the HTTP client cannot be initialised (TLS backend, resolver).
    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> ProbeOutcome {
        let request = self.client.get(&self.url).timeout(self.timeout).send();
        // Outer bound in case the client was built without the timeout.
        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => return ProbeOutcome::TimedOut,
            Ok(Err(e)) if e.is_timeout() => return ProbeOutcome::TimedOut,
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "health request failed");
                return ProbeOutcome::Unreachable(e.to_string());
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::Status(status.as_u16())
        }
    }
}
