//! Waiting for a freshly started server to accept connections

use crate::core::{Result, UpgradeError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Retry policy for [`ReadinessWaiter`]
///
/// `deadline: None` polls until the port opens, however long that takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub host: String,
    pub attempt_timeout: Duration,
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl ReadinessPolicy {
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn forever(mut self) -> Self {
        self.deadline = None;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(UpgradeError::Config("readiness host cannot be empty".to_string()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(UpgradeError::Config(
                "readiness attempt timeout must be > 0".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(UpgradeError::Config("readiness interval must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            attempt_timeout: Duration::from_secs(2),
            interval: Duration::from_secs(1),
            deadline: None,
        }
    }
}

/// A single "is anything listening there?" check
#[async_trait]
pub trait ConnectProbe: Send + Sync {
    async fn is_open(&self, host: &str, port: u16) -> bool;
}

/// Probe that opens (and immediately closes) a TCP connection
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl ConnectProbe for TcpProbe {
    async fn is_open(&self, host: &str, port: u16) -> bool {
        match TcpStream::connect((host, port)).await {
            Ok(mut stream) => {
                if let Err(e) = stream.shutdown().await {
                    debug!("Error while shutting down probe socket: {}", e);
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => false,
            Err(e) => {
                warn!("Probe of {}:{} failed: {}", host, port, e);
                false
            }
        }
    }
}

/// Result of a successful wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub attempts: u64,
    pub waited: Duration,
}

pub struct ReadinessWaiter {
    policy: ReadinessPolicy,
    probe: Arc<dyn ConnectProbe>,
}

impl ReadinessWaiter {
    pub fn new(policy: ReadinessPolicy) -> Self {
        Self::with_probe(policy, Arc::new(TcpProbe))
    }

    pub fn with_probe(policy: ReadinessPolicy, probe: Arc<dyn ConnectProbe>) -> Self {
        Self { policy, probe }
    }

    /// Block until a connection to `port` succeeds.
    ///
    /// Returns only after a successful attempt, or with
    /// [`UpgradeError::ReadinessTimeout`] once the policy deadline (if any)
    /// has passed.
    pub async fn wait_until_up(&self, port: u16) -> Result<Ready> {
        let started = Instant::now();
        let mut attempts = 0u64;

        loop {
            attempts += 1;
            let open = timeout(
                self.policy.attempt_timeout,
                self.probe.is_open(&self.policy.host, port),
            )
            .await
            .unwrap_or(false);

            if open {
                let waited = started.elapsed();
                info!("Server on port {} is up after {} attempt(s)", port, attempts);
                return Ok(Ready { attempts, waited });
            }

            if let Some(deadline) = self.policy.deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(UpgradeError::ReadinessTimeout { port, waited });
                }
            }

            info!("Waiting for PostgreSQL to come up on port {}...", port);
            sleep(self.policy.interval).await;
        }
    }
}
