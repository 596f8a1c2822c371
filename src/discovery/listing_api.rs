use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{info, warn};

use super::{page_url, ProductLink};
use crate::config::{FetchSettings, Settings};
use crate::error::ScrapeError;
use crate::fetch::{fetch_page, PageFetcher};

#[derive(Deserialize)]
struct ListingResponse {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    products: Vec<ListingProduct>,
}

#[derive(Deserialize)]
struct ListingProduct {
    #[serde(default)]
    url: Option<ProductUri>,
}

#[derive(Deserialize)]
struct ProductUri {
    #[serde(default)]
    uri: Option<String>,
}

/// What one listing request produced.
pub enum ListingPage {
    Products(Vec<String>),
    /// Non-200 status; normal end of pagination.
    End(u16),
}

/// Parse `data.products[].url.uri` into absolute URLs. Entries without a
/// uri are skipped.
pub fn urls_from_listing(body: &str, domain: &str) -> Result<Vec<String>> {
    let parsed: ListingResponse =
        serde_json::from_str(body).context("Unexpected listing response shape")?;
    let domain = domain.trim_end_matches('/');
    Ok(parsed
        .data
        .products
        .into_iter()
        .filter_map(|p| p.url?.uri)
        .filter(|uri| !uri.is_empty())
        .map(|uri| format!("{}{}", domain, uri))
        .collect())
}

/// Walk listing pages `start..=max` until one is empty, ends with a non-200
/// status, or fails. Everything gathered before the stop is returned.
pub async fn paginate<F, Fut>(start: u32, max: u32, delay: Duration, mut fetch_page: F) -> Vec<ProductLink>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ListingPage>>,
{
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut page = start;

    while page <= max {
        match fetch_page(page).await {
            Ok(ListingPage::Products(urls)) if urls.is_empty() => {
                info!(page, "No more products found");
                break;
            }
            Ok(ListingPage::Products(urls)) => {
                let before = links.len();
                for url in urls {
                    if seen.insert(url.clone()) {
                        links.push(ProductLink { url, page });
                    }
                }
                info!(page, new_links = links.len() - before, total = links.len(), "Listing page parsed");
            }
            Ok(ListingPage::End(status)) => {
                warn!(page, status, "Listing request rejected, ending pagination");
                break;
            }
            Err(e) => {
                warn!(page, "Error reading listing page: {:#}", e);
                break;
            }
        }

        page += 1;
        if page <= max && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    links
}

pub fn build_client(settings: &Settings) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.fetch.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ScrapeError::Config(format!("header {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ScrapeError::Config(format!("header value for {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    let client = reqwest::Client::builder()
        .user_agent(&settings.fetch.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_millis(settings.fetch.page_timeout_ms))
        .build()?;
    Ok(client)
}

/// Request one listing page. Retryable failures are retried first; an HTTP
/// status that survives the retries ends pagination rather than failing it.
pub async fn fetch_listing_page<F: PageFetcher>(
    fetcher: &F,
    url: &str,
    domain: &str,
    settings: &FetchSettings,
) -> Result<ListingPage> {
    match fetch_page(fetcher, url, settings).await {
        Ok(page) => Ok(ListingPage::Products(urls_from_listing(&page.html, domain)?)),
        Err(e) => match e.downcast_ref::<ScrapeError>() {
            Some(ScrapeError::Http { status, .. }) => Ok(ListingPage::End(*status)),
            _ => Err(e),
        },
    }
}

/// Discover product URLs through the category's JSON listing endpoint.
pub async fn fetch_listing_urls<F: PageFetcher>(settings: &Settings, fetcher: &F) -> Result<Vec<ProductLink>> {
    let base = settings.listing_url();
    let domain = settings.discovery.domain.as_str();
    let d = &settings.discovery;

    info!(category = %settings.category, base = %base, "Discovering products via listing API");
    let links = paginate(d.start_page, d.max_pages, Duration::from_millis(d.delay_ms), |page| {
        let url = page_url(&base, page);
        async move {
            info!(page, "Requesting listing page");
            fetch_listing_page(fetcher, &url, domain, &settings.fetch).await
        }
    })
    .await;

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::StaticFetcher;

    const BASE: &str = "https://shop.example/api/search/perfume/";

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.category = "perfume".into();
        s.discovery.mode = crate::config::DiscoveryMode::ListingApi;
        s.discovery.base_url_template = "https://shop.example/api/search/{category}/".into();
        s.discovery.domain = "https://shop.example".into();
        s.discovery.max_pages = 5;
        s.discovery.delay_ms = 0;
        s.fetch.retry_backoff_ms = 1;
        s
    }

    fn listing(uris: &[&str]) -> String {
        let products: Vec<String> = uris.iter().map(|u| format!(r#"{{"url":{{"uri":"{}"}}}}"#, u)).collect();
        format!(r#"{{"data":{{"products":[{}]}}}}"#, products.join(","))
    }

    #[test]
    fn parses_listing_shape() {
        let body = r#"{"data":{"products":[
            {"url":{"uri":"/product/dkp-1/"}},
            {"url":{}},
            {"id":5},
            {"url":{"uri":"/product/dkp-2/"}}
        ]}}"#;
        let urls = urls_from_listing(body, "https://shop.example/").unwrap();
        assert_eq!(
            urls,
            vec!["https://shop.example/product/dkp-1/", "https://shop.example/product/dkp-2/"]
        );
    }

    #[test]
    fn empty_products_parse_to_empty() {
        let urls = urls_from_listing(r#"{"data":{"products":[]}}"#, "https://x").unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn wrong_shape_is_error() {
        assert!(urls_from_listing(r#"{"status":500}"#, "https://x").is_err());
        assert!(urls_from_listing("<html>", "https://x").is_err());
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let mut requested = Vec::new();
        let links = paginate(1, 10, Duration::ZERO, |page| {
            requested.push(page);
            async move {
                let urls = match page {
                    1 => vec!["https://x/a".to_string(), "https://x/b".to_string()],
                    2 => vec!["https://x/b".to_string(), "https://x/c".to_string()],
                    _ => vec![],
                };
                Ok(ListingPage::Products(urls))
            }
        })
        .await;

        assert_eq!(requested, vec![1, 2, 3]);
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/a", "https://x/b", "https://x/c"]);
        assert_eq!(links[2].page, 2);
    }

    #[tokio::test]
    async fn stops_on_status_and_keeps_results() {
        let links = paginate(1, 10, Duration::ZERO, |page| async move {
            if page == 1 {
                Ok(ListingPage::Products(vec!["https://x/a".to_string()]))
            } else {
                Ok(ListingPage::End(404))
            }
        })
        .await;
        assert_eq!(links.len(), 1);
    }

    #[tokio::test]
    async fn error_keeps_previous_results() {
        let links = paginate(1, 10, Duration::ZERO, |page| async move {
            if page < 3 {
                Ok(ListingPage::Products(vec![format!("https://x/{}", page)]))
            } else {
                Err(anyhow::anyhow!("connection reset"))
            }
        })
        .await;
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn honours_max_page() {
        let mut calls = 0;
        let links = paginate(2, 4, Duration::ZERO, |page| {
            calls += 1;
            async move { Ok(ListingPage::Products(vec![format!("https://x/{}", page)])) }
        })
        .await;
        assert_eq!(calls, 3);
        assert_eq!(links.first().map(|l| l.page), Some(2));
    }

    #[tokio::test]
    async fn transient_listing_error_is_retried() {
        let fetcher = StaticFetcher::new()
            .flaky_page(&page_url(BASE, 1), &listing(&["/product/dkp-1/", "/product/dkp-2/"]), 503, 1)
            .page(&page_url(BASE, 2), &listing(&[]));

        let links = fetch_listing_urls(&settings(), &fetcher).await.unwrap();
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.example/product/dkp-1/", "https://shop.example/product/dkp-2/"]);
        assert_eq!(fetcher.hits(&page_url(BASE, 1)), 2);
        assert_eq!(fetcher.hits(&page_url(BASE, 2)), 1);
    }

    #[tokio::test]
    async fn missing_page_ends_pagination_with_results() {
        // page 2 is absent, so the fake answers 404
        let fetcher = StaticFetcher::new().page(&page_url(BASE, 1), &listing(&["/product/dkp-1/"]));

        let links = fetch_listing_urls(&settings(), &fetcher).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(fetcher.requests(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_map_to_end() {
        let mut s = settings();
        s.fetch.max_retries = 1;
        let fetcher = StaticFetcher::new().flaky_page(&page_url(BASE, 1), &listing(&["/p/dkp-1/"]), 429, 5);

        let page = fetch_listing_page(&fetcher, &page_url(BASE, 1), "https://shop.example", &s.fetch)
            .await
            .unwrap();
        assert!(matches!(page, ListingPage::End(429)));
        assert_eq!(fetcher.hits(&page_url(BASE, 1)), 2);
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let fetcher = StaticFetcher::new().page(&page_url(BASE, 1), "<html>not json</html>");
        let result = fetch_listing_page(&fetcher, &page_url(BASE, 1), "https://shop.example", &settings().fetch).await;
        assert!(result.is_err());
    }
}
