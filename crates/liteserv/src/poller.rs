//! Reachability polling of a LiteServ management endpoint
//!
//! A connection-level failure (refused, reset, DNS) means "not up yet" and is
//! consumed here. Anything else, such as a body that is not JSON, is returned
//! to the caller immediately.

use crate::config::PollConfig;
use std::time::Duration;
use testkit_common::{Error, Result, ServerStatus};
use tokio::time::sleep;
use tracing::{debug, info, trace};

/// Outcome of a single request
enum Attempt {
    Answered(reqwest::Response),
    NotYetReachable,
}

/// Bounded, fixed-interval reachability poller
#[derive(Debug, Clone)]
pub struct ReachabilityPoller {
    client: reqwest::Client,
    max_retries: u32,
    interval: Duration,
}

impl ReachabilityPoller {
    /// Create a poller from the harness poll settings
    pub fn new(config: &PollConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .no_proxy()
            // A pooled connection would keep answering after the listener is gone
            .pool_max_idle_per_host(0)
            // TLS-enabled test servers use self-signed certificates
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            interval: config.interval(),
        })
    }

    /// Create a poller with explicit bounds
    pub fn with_retries(max_retries: u32, interval: Duration) -> Result<Self> {
        Self::new(&PollConfig {
            max_retries,
            interval_ms: interval.as_millis() as u64,
            ..Default::default()
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn attempt(&self, url: &str) -> Result<Attempt> {
        match self.client.get(url).send().await {
            Ok(resp) => Ok(Attempt::Answered(resp)),
            Err(e) if is_connection_failure(&e) => {
                trace!("{} not reachable: {}", url, e);
                Ok(Attempt::NotYetReachable)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Single request. Any HTTP response counts as reachable, whatever its status.
    pub async fn is_reachable(&self, url: &str) -> Result<bool> {
        Ok(matches!(self.attempt(url).await?, Attempt::Answered(_)))
    }

    /// Single request that decodes the status payload
    pub async fn fetch_status(&self, url: &str) -> Result<ServerStatus> {
        match self.attempt(url).await? {
            Attempt::Answered(resp) => decode_status(resp).await,
            Attempt::NotYetReachable => Err(Error::Unreachable {
                url: url.to_string(),
                attempts: 1,
            }),
        }
    }

    /// Poll until `url` answers, sleeping a fixed interval between attempts.
    ///
    /// Gives up with [`Error::Unreachable`] after `max_retries` consecutive
    /// connection failures.
    pub async fn poll(&self, url: &str) -> Result<ServerStatus> {
        let attempts = self.max_retries();
        info!("Waiting for LiteServ at {}", url);

        for attempt in 1..=attempts {
            match self.attempt(url).await? {
                Attempt::Answered(resp) => {
                    debug!("{} reachable after {} attempt(s)", url, attempt);
                    return decode_status(resp).await;
                }
                Attempt::NotYetReachable => {
                    debug!("LiteServ may not be launched (attempt {}/{})", attempt, attempts);
                    if attempt < attempts {
                        sleep(self.interval).await;
                    }
                }
            }
        }

        Err(Error::Unreachable {
            url: url.to_string(),
            attempts,
        })
    }

    /// Wait for `url` to stop answering, within the same retry bound.
    pub async fn wait_until_unreachable(&self, url: &str) -> Result<()> {
        let attempts = self.max_retries();

        for attempt in 1..=attempts {
            if !self.is_reachable(url).await? {
                return Ok(());
            }
            debug!("{} still answering (attempt {}/{})", url, attempt, attempts);
            if attempt < attempts {
                sleep(self.interval).await;
            }
        }

        Err(Error::StopVerification {
            url: url.to_string(),
        })
    }
}

async fn decode_status(resp: reqwest::Response) -> Result<ServerStatus> {
    let body = resp.bytes().await?;
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| Error::MalformedStatus(format!("{}: {}", e, String::from_utf8_lossy(&body))))?;
    Ok(ServerStatus::from_payload(payload))
}

/// Whether a request failed before any HTTP exchange took place
pub fn is_connection_failure(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            if matches!(
                io.kind(),
                ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
            ) {
                return true;
            }
        }
        source = cause.source();
    }

    false
}
