use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::controller::RetryPolicy;

/// Smart plug switching the boiler's power relay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlugClient: Send + Sync {
    async fn set_relay(&self, on: bool) -> Result<()>;
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Retries relay commands on connectivity failures and gives up quietly.
#[derive(Clone)]
pub struct RelaySwitch {
    plug: Arc<dyn PlugClient>,
    policy: RetryPolicy,
}

impl RelaySwitch {
    pub fn new(plug: Arc<dyn PlugClient>, policy: RetryPolicy) -> Self {
        Self { plug, policy }
    }

    /// Returns `true` once the plug acknowledged the command, `false` after
    /// every attempt failed.
    pub async fn switch(&self, on: bool) -> bool {
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            match self.plug.set_relay(on).await {
                Ok(()) => {
                    info!(relay = on_off(on), "relay switched");
                    return true;
                }
                Err(e) => {
                    warn!(attempt, relay = on_off(on), error = %e, "connecting to plug was not successful");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff()).await;
            }
        }
        error!(attempts, relay = on_off(on), "giving up on relay command");
        false
    }
}

/// Relay exposed over a plain HTTP endpoint: `GET {base_url}/relay/0?turn=on|off`
#[derive(Clone)]
pub struct HttpRelayPlug {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRelayPlug {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("energy-flow/0.2"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { base_url, client })
    }

    fn url(&self, on: bool) -> String {
        format!(
            "{}/relay/0?turn={}",
            self.base_url.trim_end_matches('/'),
            on_off(on)
        )
    }
}

#[async_trait]
impl PlugClient for HttpRelayPlug {
    async fn set_relay(&self, on: bool) -> Result<()> {
        let resp = self
            .client
            .get(self.url(on))
            .send()
            .await
            .with_context(|| format!("relay request to {} failed", self.base_url))?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("relay error: HTTP {status}");
        }
        Ok(())
    }
}

/// Records relay commands; can be told to fail the next few calls
#[derive(Debug, Default)]
pub struct SimulatedPlug {
    commands: Mutex<Vec<bool>>,
    failures_remaining: AtomicU32,
}

impl SimulatedPlug {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail as if the plug were unreachable
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<bool> {
        self.commands.lock().clone()
    }

    pub fn relay(&self) -> Option<bool> {
        self.commands.lock().last().copied()
    }
}

#[async_trait]
impl PlugClient for SimulatedPlug {
    async fn set_relay(&self, on: bool) -> Result<()> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("simulated plug unreachable");
        }
        self.commands.lock().push(on);
        Ok(())
    }
}
