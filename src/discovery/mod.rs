pub mod links;
pub mod listing_api;
pub mod ngram;
pub mod tokens;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::config::{DiscoveryMode, Settings, TokenScope};
use crate::fetch::{fetch_page, PageFetcher};
use links::{clean_hrefs, discover_product_links, links_matching_tokens};
use tokens::identify_product_tokens;

/// A discovered product page and the listing page it was first seen on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductLink {
    pub url: String,
    pub page: u32,
}

/// Listing URL for page `n`.
pub fn page_url(base: &str, page: u32) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{}{}page={}", base, sep, page)
}

/// Run whichever discovery mode is configured.
pub async fn discover<F: PageFetcher>(settings: &Settings, fetcher: &F) -> Result<Vec<ProductLink>> {
    let links = match settings.discovery.mode {
        DiscoveryMode::Heuristic => discover_heuristic(settings, fetcher).await,
        DiscoveryMode::ListingApi => listing_api::fetch_listing_urls(settings, fetcher).await?,
    };
    info!(category = %settings.category, links = links.len(), "Discovery finished");
    Ok(links)
}

/// Render each listing page, gather its anchors and let the token
/// heuristic pick out product links. A failed listing page ends the walk;
/// pages already read still count.
pub async fn discover_heuristic<F: PageFetcher>(settings: &Settings, fetcher: &F) -> Vec<ProductLink> {
    let d = &settings.discovery;
    let base = settings.listing_url();
    let delay = Duration::from_millis(d.delay_ms);
    let mut pages: Vec<(u32, Vec<String>)> = Vec::new();

    for page in d.start_page..=d.max_pages {
        let url = page_url(&base, page);
        info!(page, url = %url, "Processing listing page");

        let rendered = match fetch_page(fetcher, &url, &settings.fetch).await {
            Ok(r) => r,
            Err(e) => {
                warn!(page, "Listing page failed, ending pagination: {:#}", e);
                break;
            }
        };
        let hrefs = rendered.anchor_hrefs();
        let cleaned = clean_hrefs(&hrefs);
        info!(page, hrefs = hrefs.len(), cleaned = cleaned.len(), "Collected anchors");
        pages.push((page, cleaned));

        if page < d.max_pages && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    let per_page: Vec<(u32, Vec<String>)> = match d.token_scope {
        TokenScope::Page => pages
            .iter()
            .map(|(page, cleaned)| {
                let urls = info_span!("listing", page).in_scope(|| {
                    discover_product_links(
                        &d.domain,
                        cleaned,
                        d.min_ngram_len,
                        d.max_ngram_len,
                        d.min_token_freq,
                    )
                });
                (*page, urls)
            })
            .collect(),
        TokenScope::Run => {
            let all: Vec<String> = pages.iter().flat_map(|(_, c)| c.iter().cloned()).collect();
            let tokens =
                identify_product_tokens(&all, d.min_ngram_len, d.max_ngram_len, d.min_token_freq);
            info!(tokens = tokens.len(), hrefs = all.len(), "Identified product tokens over all pages");
            pages
                .iter()
                .map(|(page, cleaned)| (*page, links_matching_tokens(&d.domain, cleaned, &tokens)))
                .collect()
        }
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for (page, urls) in per_page {
        info!(page, links = urls.len(), "Product links detected");
        for url in urls {
            if seen.insert(url.clone()) {
                links.push(ProductLink { url, page });
            }
        }
    }
    links
}

/// Overwrite `path` with the discovered links as `url,page` CSV.
pub fn write_links(path: &Path, links: &[ProductLink]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to open links file {:?}", path))?;
    for link in links {
        wtr.serialize(link)?;
    }
    wtr.flush()?;
    info!(path = ?path, links = links.len(), "Saved product links");
    Ok(())
}

pub fn read_links(path: &Path) -> Result<Vec<ProductLink>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open links file {:?}", path))?;
    let links = rdr.deserialize().collect::<Result<Vec<ProductLink>, _>>()?;
    Ok(links)
}
