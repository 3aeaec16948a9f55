//! HTTP client for the REST backend holding the authoritative collections

use crate::errors::{NavError, Result};
use crate::models::{Category, CollectionKind, Service, SyncUpdate};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Client for `GET/POST /api/{services,categories}` and `GET /api/health`
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

/// Both collections as currently held by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSnapshot {
    pub services: Vec<Service>,
    pub categories: Vec<Category>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, http_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("service-nav/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NavError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: http_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Replace a whole collection on the backend
    pub async fn push(&self, update: &SyncUpdate) -> Result<()> {
        let kind = update.kind();
        let url = self.url(kind.endpoint());
        let body = update.collection_json()?;

        debug!("Posting {} {} to {}", update.len(), kind, url);

        let response = timeout(self.timeout, self.client.post(&url).json(&body).send())
            .await
            .map_err(|_| NavError::Backend("request timeout".to_string()))?
            .map_err(|e| NavError::Backend(e.to_string()))?;

        check_status(response, kind).await?;
        info!("Synced {} to backend", kind);
        Ok(())
    }

    pub async fn fetch_services(&self) -> Result<Vec<Service>> {
        self.fetch(CollectionKind::Services).await
    }

    pub async fn fetch_categories(&self) -> Result<Vec<Category>> {
        self.fetch(CollectionKind::Categories).await
    }

    async fn fetch<T: DeserializeOwned>(&self, kind: CollectionKind) -> Result<Vec<T>> {
        let url = self.url(kind.endpoint());
        debug!("Loading {} from {}", kind, url);

        let response = timeout(self.timeout, self.client.get(&url).send())
            .await
            .map_err(|_| NavError::Backend(format!("{}: request timeout", kind)))?
            .map_err(|e| NavError::Backend(format!("{}: {}", kind, e)))?;

        let response = check_status(response, kind).await?;
        response
            .json()
            .await
            .map_err(|e| NavError::Backend(format!("{}: invalid response body: {}", kind, e)))
    }

    /// Load both collections concurrently; fails unless both succeed
    pub async fn fetch_snapshot(&self) -> Result<BackendSnapshot> {
        let (services, categories) =
            futures::join!(self.fetch_services(), self.fetch_categories());

        match (services, categories) {
            (Ok(services), Ok(categories)) => Ok(BackendSnapshot {
                services,
                categories,
            }),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(services), Err(categories)) => Err(NavError::Backend(format!(
                "{}; {}",
                strip_prefix(&services),
                strip_prefix(&categories)
            ))),
        }
    }

    /// Liveness probe against `GET /api/health`
    pub async fn health(&self) -> bool {
        let url = self.url("/api/health");
        match timeout(self.timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!("Backend at {} is healthy", self.base_url);
                true
            }
            Ok(Ok(response)) => {
                warn!("Backend health check returned {}", response.status());
                false
            }
            Ok(Err(e)) => {
                warn!("Backend health check failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Backend health check timed out");
                false
            }
        }
    }
}

async fn check_status(response: Response, kind: CollectionKind) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("");
    let message = match status.as_u16() {
        404 => format!("{}: endpoint not found (HTTP {})", kind, status.as_u16()),
        500..=599 => format!("{}: server error HTTP {} {}", kind, status.as_u16(), reason),
        _ => format!("{}: HTTP {} {}", kind, status.as_u16(), reason),
    };

    Err(NavError::Backend(message.trim_end().to_string()))
}

fn strip_prefix(err: &NavError) -> String {
    match err {
        NavError::Backend(msg) => msg.clone(),
        other => other.to_string(),
    }
}
