//! Reachability probes behind the health monitor

use crate::config::{Config, ProbeMode};
use crate::errors::{NavError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Url};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

/// What a probe learned about a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub response_time: Duration,
}

/// Checks whether a URL is reachable
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &Url) -> Result<ProbeOutcome>;
}

/// Build the probe selected by the configuration
pub fn probe_from_config(config: &Config) -> Result<Arc<dyn HealthProbe>> {
    Ok(match config.probe_mode {
        ProbeMode::Simulated => Arc::new(SimulatedProbe::default()),
        ProbeMode::Http => Arc::new(HttpProbe::new(config.probe_timeout)?),
    })
}

/// Accept bare `host:port` by assuming http
pub fn parse_service_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    Url::parse(&candidate).map_err(|e| NavError::InvalidOperation(format!("invalid URL {:?}: {}", raw, e)))
}

const COMMON_PORTS: [u16; 7] = [80, 443, 3000, 3001, 5000, 8000, 8080];

/// Stand-in probe: random latency and outcome, no network traffic
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    latency_ms: Range<u64>,
    outage_rate: f64,
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        Self {
            latency_ms: 50..150,
            outage_rate: 0.2,
        }
    }
}

impl SimulatedProbe {
    pub fn new(latency_ms: Range<u64>, outage_rate: f64) -> Self {
        Self {
            latency_ms,
            outage_rate: outage_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self, url: &Url) -> Result<ProbeOutcome> {
        let (delay, outage) = {
            let mut rng = rand::rng();
            let delay = if self.latency_ms.is_empty() {
                self.latency_ms.start
            } else {
                rng.random_range(self.latency_ms.clone())
            };
            (delay, rng.random_bool(self.outage_rate))
        };

        let started = Instant::now();
        sleep(Duration::from_millis(delay)).await;

        let port = url.port_or_known_default().unwrap_or(80);
        let reachable = COMMON_PORTS.contains(&port) && !outage;

        Ok(ProbeOutcome {
            reachable,
            response_time: started.elapsed(),
        })
    }
}

/// Real probe: a GET request, success status means reachable
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("service-nav-probe/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NavError::Http)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &Url) -> Result<ProbeOutcome> {
        let started = Instant::now();

        let reachable = match self.client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("Probe of {} returned {}", url, response.status());
                false
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", url, e);
                false
            }
        };

        Ok(ProbeOutcome {
            reachable,
            response_time: started.elapsed(),
        })
    }
}
