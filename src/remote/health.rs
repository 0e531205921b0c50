use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use super::join_under_base;

pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub connected: bool,
    pub checked_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    fn unknown() -> Self {
        Self {
            connected: false,
            checked_at: now_rfc3339(),
            status_code: None,
            detail: None,
            error: Some(String::from("not checked yet")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    url: Url,
}

impl HealthProbe {
    pub fn new(api_base: &Url, health_path: &str, timeout: Duration) -> Result<Self, HealthError> {
        let url = join_under_base(api_base, health_path)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealthError::ClientInit(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn check(&self) -> HealthStatus {
        let checked_at = now_rfc3339();
        let resp = match self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(error) => {
                return HealthStatus {
                    connected: false,
                    checked_at,
                    status_code: None,
                    detail: None,
                    error: Some(error.to_string()),
                };
            }
        };
        let status = resp.status();
        let detail = resp.json::<Value>().await.ok();
        HealthStatus {
            connected: status.is_success(),
            checked_at,
            status_code: Some(status.as_u16()),
            detail,
            error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
        }
    }

    pub async fn poll_until_connected(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<HealthStatus, HealthError> {
        let attempts = attempts.max(1);
        let mut last = HealthStatus::unknown();
        for attempt in 1..=attempts {
            last = self.check().await;
            if last.connected {
                return Ok(last);
            }
            warn!(
                url = %self.url,
                attempt,
                attempts,
                error = last.error.as_deref().unwrap_or(""),
                "edit service not reachable yet"
            );
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(HealthError::Unavailable {
            attempts,
            last_error: last.error.unwrap_or_else(|| String::from("unknown")),
        })
    }

    /// Re-checks on every tick until all receivers are dropped.
    pub fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
    ) -> (watch::Receiver<HealthStatus>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(HealthStatus::unknown());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut was_connected = None::<bool>;
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let status = self.check().await;
                if was_connected != Some(status.connected) {
                    if status.connected {
                        info!(url = %self.url, "edit service connected");
                    } else {
                        warn!(
                            url = %self.url,
                            error = status.error.as_deref().unwrap_or(""),
                            "edit service disconnected"
                        );
                    }
                    was_connected = Some(status.connected);
                }
                tx.send_replace(status);
            }
        });
        (rx, handle)
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid health url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http client init failed: {0}")]
    ClientInit(String),
    #[error("edit service still unreachable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
