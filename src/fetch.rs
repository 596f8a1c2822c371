use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use scraper::{Html, Selector};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};

use tracing::warn;

use crate::config::{FetchSettings, RendererKind, Settings};
use crate::discovery::listing_api::build_client;
use crate::error::ScrapeError;

/// Longest single wait between retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// A fetched, fully rendered document.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

impl RenderedPage {
    /// `href` of every anchor, in document order.
    pub fn anchor_hrefs(&self) -> Vec<String> {
        let doc = Html::parse_document(&self.html);
        doc.select(&ANCHOR)
            .filter_map(|a| a.value().attr("href"))
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Anything that can turn a URL into a rendered page.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RenderedPage>>;
}

/// Fetch with a hard deadline. Expiry surfaces as `ScrapeError::Timeout`.
pub async fn fetch_with_timeout<F: PageFetcher>(fetcher: &F, url: &str, ms: u64) -> Result<RenderedPage> {
    let page = tokio::time::timeout(Duration::from_millis(ms), fetcher.fetch(url))
        .await
        .map_err(|_| ScrapeError::Timeout { url: url.to_string(), ms })??;
    if page.html.trim().is_empty() {
        return Err(ScrapeError::EmptyPage { url: url.to_string() }.into());
    }
    Ok(page)
}

/// Rate limits, server errors and timeouts are worth another attempt.
fn is_retryable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<ScrapeError>() {
        Some(ScrapeError::Http { status, .. }) => *status == 429 || *status >= 500,
        Some(ScrapeError::Timeout { .. }) => true,
        _ => false,
    }
}

/// `base_ms * 2^attempt`, saturating, never above `MAX_BACKOFF`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

/// `fetch_with_timeout` plus exponential backoff on retryable failures.
pub async fn fetch_page<F: PageFetcher>(fetcher: &F, url: &str, settings: &FetchSettings) -> Result<RenderedPage> {
    let mut attempt = 0;
    loop {
        match fetch_with_timeout(fetcher, url, settings.page_timeout_ms).await {
            Err(e) if attempt < settings.max_retries && is_retryable(&e) => {
                let backoff = backoff_delay(settings.retry_backoff_ms, attempt);
                attempt += 1;
                warn!(
                    "{} on {} (attempt {}/{}), backing off {:.1}s",
                    e,
                    url,
                    attempt,
                    settings.max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

// ── spider.cloud ──

/// Renders pages through spider.cloud and returns the raw HTML.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| anyhow!("SPIDER_API_KEY environment variable must be set"))?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| ScrapeError::Renderer(format!("Failed to create Spider client: {}", e)))?;
        Ok(SpiderFetcher { spider })
    }
}

impl PageFetcher for SpiderFetcher {
    async fn fetch(&self, url: &str) -> Result<RenderedPage> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| ScrapeError::Renderer(format!("Spider scrape failed: {}", e)))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        let status = first
            .and_then(|obj| obj.get("status"))
            .and_then(|s| s.as_u64())
            .map(|s| s as u16);
        if let Some(status) = status.filter(|s| !(200..300).contains(s)) {
            return Err(ScrapeError::Http { url: url.to_string(), status }.into());
        }

        let html = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ScrapeError::EmptyPage { url: url.to_string() })?;

        Ok(RenderedPage {
            url: url.to_string(),
            html: html.to_string(),
        })
    }
}

// ── Plain HTTP ──

/// Static fetch without script execution, for sites that render server-side.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(HttpFetcher { client: build_client(settings)? })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RenderedPage> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::Http { url: url.to_string(), status: status.as_u16() }.into());
        }
        let final_url = resp.url().to_string();
        let html = resp.text().await?;
        Ok(RenderedPage { url: final_url, html })
    }
}

/// The configured fetcher.
pub enum Renderer {
    Spider(SpiderFetcher),
    Http(HttpFetcher),
}

impl Renderer {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(match settings.fetch.renderer {
            RendererKind::Spider => Renderer::Spider(SpiderFetcher::from_env()?),
            RendererKind::Http => Renderer::Http(HttpFetcher::new(settings)?),
        })
    }
}

impl PageFetcher for Renderer {
    async fn fetch(&self, url: &str) -> Result<RenderedPage> {
        match self {
            Renderer::Spider(f) => f.fetch(url).await,
            Renderer::Http(f) => f.fetch(url).await,
        }
    }
}
