use std::collections::HashSet;

use tracing::info;

use super::tokens::identify_product_tokens;

/// Hrefs this short cannot carry a meaningful product path.
const MIN_HREF_LEN: usize = 10;

/// Drop script hrefs and anything too short to be a product path.
pub fn clean_hrefs<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .map(|h| h.as_ref().trim())
        .filter(|h| !h.to_ascii_lowercase().starts_with("javascript"))
        .filter(|h| h.chars().count() > MIN_HREF_LEN)
        .map(String::from)
        .collect()
}

/// Make an href absolute against `domain`.
pub fn resolve_url(domain: &str, href: &str) -> String {
    let domain = domain.trim_end_matches('/');
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if href.starts_with('/') {
        format!("{}{}", domain, href)
    } else {
        format!("{}/{}", domain, href)
    }
}

/// Resolve every cleaned href containing one of `tokens`, deduplicated in
/// first-seen order.
pub fn links_matching_tokens(domain: &str, cleaned: &[String], tokens: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for href in cleaned {
        if !tokens.iter().any(|t| href.contains(t.as_str())) {
            continue;
        }
        let url = resolve_url(domain, href);
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}

/// Learn product tokens from `cleaned` and return the product URLs they
/// select. One call is one discovery pass.
pub fn discover_product_links(
    domain: &str,
    cleaned: &[String],
    min_len: usize,
    max_len: usize,
    min_freq: usize,
) -> Vec<String> {
    let tokens = identify_product_tokens(cleaned, min_len, max_len, min_freq);
    info!(tokens = tokens.len(), hrefs = cleaned.len(), "Identified product tokens");
    links_matching_tokens(domain, cleaned, &tokens)
}
