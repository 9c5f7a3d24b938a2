//! Reconnection Policy
//!
//! A Closed manager is never resurrected; reconnecting means a fresh
//! `ConnectionManager`. This module layers that loop above the core
//! state machine as a pluggable policy, so embedders can choose their
//! own (or none).

use crate::config::BinderConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use std::time::Duration;
use tracing::warn;

/// Decides whether and when to retry a failed connection attempt
pub trait ReconnectPolicy: Send {
    /// Delay before attempt `attempt + 1`, or `None` to give up.
    /// `attempt` counts failed attempts so far, starting at 0.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// Never retries; the first failure is final
pub struct NoRetry;

impl ReconnectPolicy for NoRetry {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Bounded doubling backoff
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some((self.base.saturating_mul(factor)).min(self.max))
    }
}

/// Connect with retries, returning the first manager that reaches
/// Ready. Each attempt is a fresh manager; the failed ones stay Closed.
pub async fn connect_with_policy(
    address: &str,
    config: BinderConfig,
    mut policy: impl ReconnectPolicy,
) -> Result<ConnectionManager> {
    let mut attempt = 0u32;
    loop {
        let manager = ConnectionManager::new(config.clone());
        // Address parse failures are permanent, not retried
        manager.connect(address)?;
        match manager.wait_ready().await {
            Ok(()) => return Ok(manager),
            Err(e) => match policy.next_delay(attempt) {
                Some(delay) => {
                    warn!(attempt, ?delay, error = %e, "connect attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
        }
    }
}
