//! HTTP probes against a host that may still be starting
//!
//! A launched host binds its listener some time after the process starts,
//! so every request is retried on transport errors and non-success statuses.

use reqwest::{Client, Url};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::error::{HarnessError, HarnessResult};

/// Outcome of a single probe attempt
enum Attempt {
    Success(String),
    Status(u16, String),
    Transport(reqwest::Error),
}

/// Issues GET requests with bounded retries
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    policy: ProbeConfig,
    shutdown: Option<CancellationToken>,
}

impl HttpProbe {
    pub fn new(policy: ProbeConfig) -> HarnessResult<Self> {
        let client = Client::builder()
            .timeout(policy.request_timeout())
            .build()?;
        Ok(Self {
            client,
            policy,
            shutdown: None,
        })
    }

    /// Stop retrying once `token` is cancelled, typically a host's shutdown
    pub fn until(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn policy(&self) -> &ProbeConfig {
        &self.policy
    }

    /// GET `url` with the configured number of attempts
    pub async fn get(&self, url: &str) -> HarnessResult<String> {
        self.get_with_retry(url, self.policy.max_attempts).await
    }

    /// GET `path` resolved against `base`; absolute URLs are used as-is
    pub async fn get_path(&self, base: &Url, path: &str) -> HarnessResult<String> {
        let url = base
            .join(path)
            .map_err(|e| HarnessError::Configuration(format!("Invalid probe path '{}': {}", path, e)))?;
        self.get(url.as_str()).await
    }

    /// GET `url`, retrying up to `max_attempts` total attempts.
    ///
    /// Returns the body of the first 2xx response. After the last attempt the
    /// error carries the last status (or transport error) and body.
    pub async fn get_with_retry(&self, url: &str, max_attempts: usize) -> HarnessResult<String> {
        let max_attempts = max_attempts.max(1);
        let mut last_status = None;
        let mut last_body = None;
        let mut last_transport = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;

            match self.attempt(url).await {
                Attempt::Success(body) => {
                    debug!("GET {} succeeded on attempt {}", url, attempts);
                    return Ok(body);
                }
                Attempt::Status(status, body) => {
                    warn!("GET {} returned {} (attempt {}/{})", url, status, attempts, max_attempts);
                    last_status = Some(status);
                    last_body = Some(body);
                    last_transport = None;
                }
                Attempt::Transport(e) => {
                    // Connection refused is expected while the host is starting
                    if e.is_connect() {
                        info!("Waiting for {} (attempt {}/{})", url, attempts, max_attempts);
                    } else {
                        warn!("GET {} failed: {} (attempt {}/{})", url, e, attempts, max_attempts);
                    }
                    last_status = None;
                    last_body = None;
                    last_transport = Some(e.to_string());
                }
            }

            if attempts == max_attempts {
                break;
            }
            if !self.pause(attempts).await {
                warn!("Host shut down while probing {}", url);
                last_transport.get_or_insert_with(|| "host process exited".to_string());
                break;
            }
        }

        Err(HarnessError::ProbeFailure {
            url: url.to_string(),
            attempts,
            status: last_status,
            body: last_body,
            transport: last_transport,
        })
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Transport(e),
        };
        let status = response.status();
        match response.text().await {
            Ok(body) if status.is_success() => Attempt::Success(body),
            Ok(body) => Attempt::Status(status.as_u16(), body),
            Err(e) => Attempt::Transport(e),
        }
    }

    /// Sleep before the next attempt; false if the host went away meanwhile
    async fn pause(&self, attempt: usize) -> bool {
        let delay = self.policy.delay_after(attempt);
        match &self.shutdown {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = sleep(delay) => true,
                }
            }
            None => {
                sleep(delay).await;
                true
            }
        }
    }
}

/// GET `url` with a default policy, retrying up to `max_attempts` times
pub async fn get_with_retry(url: &str, max_attempts: usize) -> HarnessResult<String> {
    HttpProbe::new(ProbeConfig::default())?
        .get_with_retry(url, max_attempts)
        .await
}
