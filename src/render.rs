use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{RendererKind, Settings};
use crate::error::{Result, ScrapeError};
use crate::parser::cards::{self, RawCard};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Turns a URL into HTML reflecting the post-script DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;

    /// Release whatever the renderer holds. Called once at session end.
    async fn close(&mut self) {}
}

/// Acquire the renderer named in settings. Failure here is fatal for the session.
pub async fn connect(settings: &Settings) -> Result<Box<dyn PageRenderer>> {
    match settings.renderer {
        RendererKind::Browserless => {
            let r = BrowserlessRenderer::connect(
                &settings.browserless_url,
                settings.browserless_token.as_deref(),
            )
            .await?;
            Ok(Box::new(r))
        }
        RendererKind::Http => Ok(Box::new(HttpRenderer::new()?)),
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ScrapeError::Init(format!("failed to build HTTP client: {}", e)))
}

// ── Browserless ──

/// Headless Chrome behind a Browserless `/content` endpoint.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessRenderer {
    pub async fn connect(base_url: &str, token: Option<&str>) -> Result<Self> {
        let renderer = Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        };

        let probe = renderer.endpoint("json/version");
        let resp = renderer
            .client
            .get(&probe)
            .send()
            .await
            .map_err(|e| ScrapeError::Init(format!("browser at {} unreachable: {}", renderer.base_url, e)))?;
        if !resp.status().is_success() {
            return Err(ScrapeError::Init(format!(
                "browser at {} answered {}",
                renderer.base_url,
                resp.status()
            )));
        }

        info!("Browser ready at {}", renderer.base_url);
        Ok(renderer)
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });

        let start = Instant::now();
        let resp = self
            .client
            .post(self.endpoint("content"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ScrapeError::fetch(url, format!("status {}: {}", status, message)));
        }

        let html = resp.text().await.map_err(|e| ScrapeError::fetch(url, e))?;
        debug!("Rendered {} in {}ms ({} bytes)", url, start.elapsed().as_millis(), html.len());
        Ok(html)
    }

    async fn close(&mut self) {
        debug!("Released browser at {}", self.base_url);
    }
}

// ── Plain HTTP ──

/// GET without script execution. Only useful when the board serves cards server-side.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::fetch(url, format!("status {}", status)));
        }
        resp.text().await.map_err(|e| ScrapeError::fetch(url, e))
    }
}

// ── Readiness ──

/// Render until the markup yields job cards or `timeout` runs out, returning the
/// cards from the last render. Each render is parsed once; on timeout the result
/// is whatever the last markup held, and a page with no cards is not an error.
pub async fn render_when_ready(
    renderer: &dyn PageRenderer,
    url: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<RawCard>> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 1u32;

    loop {
        let html = renderer.render(url).await?;
        let found = cards::extract(&html);
        if !found.is_empty() {
            return Ok(found);
        }

        let now = Instant::now();
        if now >= deadline {
            if !timeout.is_zero() {
                warn!("No job cards on {} after {} renders", url, attempts);
            }
            return Ok(found);
        }

        tokio::time::sleep(poll_interval.min(deadline - now)).await;
        attempts += 1;
    }
}
