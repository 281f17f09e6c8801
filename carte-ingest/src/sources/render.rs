//! Page fetching behind a swappable renderer
//!
//! Marketplace pages are JavaScript-rendered and sit behind anti-bot
//! vendors, so production deployments point `render.endpoint` at a headless
//! browser service and get the settled DOM back. Without an endpoint a
//! plain HTTP fetch is used, which is enough for server-rendered brand
//! sites and for local experiments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use carte_common::config::RenderConfig;
use carte_common::{Error, Result};

use super::FetchError;

/// A fetched page: final URL after redirects plus settled HTML.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
}

/// Fetches a URL and returns its rendered HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> std::result::Result<RenderedPage, FetchError>;
}

/// Pick the renderer implementation for this deployment.
pub fn build_renderer(config: &RenderConfig) -> Result<Arc<dyn Renderer>> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(RemoteRenderer::new(config, endpoint.clone())?)),
        None => Ok(Arc::new(HttpRenderer::new(config)?)),
    }
}

fn build_client(config: &RenderConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::Internal(format!("HTTP client build failed: {}", e)))
}

/// Map an upstream HTTP status to a fetch failure, or None for success.
fn status_failure(status: StatusCode, url: &str) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
        return Some(FetchError::RateLimited);
    }
    if status.is_server_error() {
        return Some(FetchError::ServiceUnavailable(format!("{} from {}", status, url)));
    }
    Some(FetchError::Network(format!("unexpected status {} from {}", status, url)))
}

/// Plain HTTP fetch with browser-like headers. No script execution, so
/// only server-rendered pages come back with usable content.
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &str) -> std::result::Result<RenderedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(FetchError::from)?;
        let final_url = response.url().to_string();
        if let Some(failure) = status_failure(response.status(), &final_url) {
            return Err(failure);
        }
        let html = response.text().await.map_err(FetchError::from)?;
        Ok(RenderedPage { final_url, html })
    }
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    /// How long the service lets client-side scripts settle before snapshotting
    settle_ms: u64,
}

#[derive(Deserialize)]
struct RenderResponse {
    html: String,
    #[serde(default)]
    final_url: Option<String>,
    /// Status the headless browser saw on the target page
    #[serde(default)]
    status: Option<u16>,
}

/// Client for a headless-browser render service.
///
/// POSTs `{url, settle_ms}` to the endpoint and gets the settled DOM back.
/// The service owns the anti-bot plumbing (real browser, proxy rotation);
/// this client only speaks its JSON contract.
pub struct RemoteRenderer {
    client: Client,
    endpoint: String,
    settle_ms: u64,
}

impl RemoteRenderer {
    pub fn new(config: &RenderConfig, endpoint: String) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoint,
            settle_ms: config.settle_ms,
        })
    }
}

#[async_trait]
impl Renderer for RemoteRenderer {
    async fn render(&self, url: &str) -> std::result::Result<RenderedPage, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RenderRequest {
                url,
                settle_ms: self.settle_ms,
            })
            .send()
            .await
            .map_err(FetchError::from)?;

        // A failing status here is the render service itself misbehaving.
        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(FetchError::RateLimited);
            }
            return Err(FetchError::ServiceUnavailable(format!(
                "render service returned {}",
                status
            )));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| FetchError::ServiceUnavailable(format!("render response decode: {}", e)))?;

        // The target page's own status rides inside the body.
        if let Some(code) = body.status {
            let target_status =
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if let Some(failure) = status_failure(target_status, url) {
                return Err(failure);
            }
        }

        Ok(RenderedPage {
            final_url: body.final_url.unwrap_or_else(|| url.to_string()),
            html: body.html,
        })
    }
}
