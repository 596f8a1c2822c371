use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{FetchSettings, Settings};
use crate::discovery::{self, ProductLink};
use crate::extract::SpecExtractor;
use crate::fetch::{fetch_page, PageFetcher, RenderedPage};
use crate::normalize::Normalizer;
use crate::record::ProductRecord;
use crate::storage::Storage;

/// Counts reported after a specs run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpecsSummary {
    pub urls: usize,
    pub fetch_failed: usize,
    pub extract_failed: usize,
    pub extracted: usize,
    pub saved: usize,
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Discover product links and write them to the links file.
pub async fn collect_links<F: PageFetcher>(settings: &Settings, fetcher: &F) -> Result<Vec<ProductLink>> {
    let links = discovery::discover(settings, fetcher).await?;
    discovery::write_links(Path::new(&settings.links_path()), &links)?;
    Ok(links)
}

/// Fetch every link, at most `concurrency` at a time. Results keep input
/// order; failed pages are logged and left out.
pub async fn fetch_pages<'a, F: PageFetcher>(
    fetcher: &F,
    links: &'a [ProductLink],
    settings: &FetchSettings,
) -> Result<Vec<(&'a ProductLink, RenderedPage)>> {
    let delay = Duration::from_millis(settings.delay_ms);
    let pb = progress_bar(links.len())?;

    let results: Vec<(&ProductLink, Result<RenderedPage>)> = stream::iter(links)
        .map(|link| {
            let pb = &pb;
            async move {
                let result = fetch_page(fetcher, &link.url, settings).await;
                pb.inc(1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (link, result)
            }
        })
        .buffered(settings.concurrency.max(1))
        .collect()
        .await;
    pb.finish_and_clear();

    let mut pages = Vec::with_capacity(results.len());
    for (link, result) in results {
        match result {
            Ok(page) => pages.push((link, page)),
            Err(e) => warn!(url = %link.url, "Skipping product page: {:#}", e),
        }
    }
    Ok(pages)
}

/// Parse fetched pages in parallel. Order follows `pages`; pages that fail
/// to extract are logged and dropped. Records carry the address the page
/// was finally served from.
pub fn extract_pages(extractor: &SpecExtractor, pages: &[(&ProductLink, RenderedPage)]) -> Vec<ProductRecord> {
    let results: Vec<_> = pages
        .par_iter()
        .map(|(link, page)| {
            if page.url != link.url {
                debug!(from = %link.url, to = %page.url, "Product page redirected");
            }
            (*link, extractor.extract(&page.html, &page.url))
        })
        .collect();

    results
        .into_iter()
        .filter_map(|(link, result)| match result {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(url = %link.url, "Extraction failed: {:#}", e);
                None
            }
        })
        .collect()
}

/// Fetch, extract, normalize and save. The sink is left open; closing it
/// is the caller's job.
pub async fn scrape_specs<F: PageFetcher, S: Storage>(
    settings: &Settings,
    fetcher: &F,
    sink: &mut S,
    links: &[ProductLink],
) -> Result<SpecsSummary> {
    let extractor = SpecExtractor::new(&settings.extract)?;
    let normalizer = Normalizer::from_settings(&settings.extract);

    info!(urls = links.len(), concurrency = settings.fetch.concurrency, "Fetching product pages");
    let pages = fetch_pages(fetcher, links, &settings.fetch).await?;
    let fetch_failed = links.len() - pages.len();

    let records = extract_pages(&extractor, &pages);
    let extract_failed = pages.len() - records.len();
    info!(records = records.len(), fetch_failed, extract_failed, "Extracted product records");

    let rows = normalizer.normalize(&records);
    let saved = sink.save(&settings.category, &normalizer.columns(), &rows)?;
    info!(saved, "Records saved");

    Ok(SpecsSummary {
        urls: links.len(),
        fetch_failed,
        extract_failed,
        extracted: records.len(),
        saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::StaticFetcher;
    use crate::record::NA;

    /// Keeps the last saved batch in memory.
    #[derive(Default)]
    struct MemorySink {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        closed: bool,
    }

    impl Storage for MemorySink {
        fn save(&mut self, _category: &str, columns: &[String], rows: &[Vec<String>]) -> Result<usize> {
            self.columns = columns.to_vec();
            self.rows = rows.to_vec();
            Ok(rows.len())
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    const LISTING: &str = "https://shop.example/search/perfume/?page=1";

    fn settings(dir: &Path) -> Settings {
        let mut s = Settings::default();
        s.category = "perfume".into();
        s.discovery.base_url_template = "https://shop.example/search/{category}/".into();
        s.discovery.domain = "https://shop.example".into();
        s.discovery.max_pages = 1;
        s.discovery.delay_ms = 0;
        s.discovery.links_output = dir.join("{category}_links.csv").display().to_string();
        s.fetch.delay_ms = 0;
        s.fetch.retry_backoff_ms = 1;
        s.extract.spec_keys = vec!["Volume".into(), "Scent family".into()];
        s
    }

    fn listing() -> String {
        r#"<html><body>
             <a href="javascript:void(0)">menu</a>
             <a href="/product/dkp-501/rose-water/">Rose Water</a>
             <a href="/product/dkp-502/oud-intense/">Oud Intense</a>
             <a href="/product/dkp-503/amber-night/">Amber Night</a>
             <a href="/about-us/company">About</a>
             <a href="/help/shipping-policy">Shipping</a>
           </body></html>"#
            .to_string()
    }

    fn product(title: &str, specs: &[(&str, &str)]) -> String {
        let items: String = specs
            .iter()
            .map(|(k, v)| format!(r#"<li class="spec-item"><span class="spec-key">{}</span><span class="spec-value">{}</span></li>"#, k, v))
            .collect();
        format!(
            r#"<html><body><h1 class="product-title">{}</h1><span>$45.00</span>
               <section class="specifications"><ul>{}</ul></section></body></html>"#,
            title, items
        )
    }

    fn link(url: &str) -> ProductLink {
        ProductLink { url: url.to_string(), page: 1 }
    }

    #[tokio::test]
    async fn end_to_end_listing_to_rows() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let fetcher = StaticFetcher::new()
            .page(LISTING, &listing())
            .page(
                "https://shop.example/product/dkp-501/rose-water/",
                &product("Rose Water", &[("Volume", "100 ml"), ("Scent family", "Floral")]),
            )
            .page(
                "https://shop.example/product/dkp-502/oud-intense/",
                &product("Oud Intense", &[("Volume", "75 ml"), ("Gender", "Unisex")]),
            )
            .page("https://shop.example/product/dkp-503/amber-night/", &product("Amber Night", &[]));

        let links = collect_links(&s, &fetcher).await.unwrap();
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.example/product/dkp-501/rose-water/",
                "https://shop.example/product/dkp-502/oud-intense/",
                "https://shop.example/product/dkp-503/amber-night/",
            ]
        );
        assert_eq!(discovery::read_links(&dir.path().join("perfume_links.csv")).unwrap(), links);

        let mut sink = MemorySink::default();
        let summary = scrape_specs(&s, &fetcher, &mut sink, &links).await.unwrap();
        for url in urls {
            assert_eq!(fetcher.hits(url), 1);
        }
        assert_eq!(summary.urls, 3);
        assert_eq!(summary.saved, 3);

        assert_eq!(sink.columns.len(), 9);
        assert_eq!(&sink.columns[7..], ["Volume", "Scent family"]);
        assert!(sink.rows.iter().all(|r| r.len() == 9));

        let titles: Vec<&str> = sink.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(titles, vec!["Rose Water", "Oud Intense", "Amber Night"]);
        assert_eq!(sink.rows[0][3], "$45.00");
        assert_eq!(&sink.rows[0][7..], ["100 ml", "Floral"]);
        assert_eq!(&sink.rows[1][7..], ["75 ml", NA]);
        assert_eq!(&sink.rows[2][7..], [NA, NA]);
        assert!(!sink.rows[1].iter().any(|c| c == "Unisex"));
        assert!(!sink.closed);
    }

    #[tokio::test]
    async fn failed_page_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let fetcher = StaticFetcher::new()
            .page("https://shop.example/p/a", &product("A", &[]))
            .page("https://shop.example/p/c", &product("C", &[]));
        let links = vec![
            link("https://shop.example/p/a"),
            link("https://shop.example/p/b"),
            link("https://shop.example/p/c"),
        ];

        let mut sink = MemorySink::default();
        let summary = scrape_specs(&s, &fetcher, &mut sink, &links).await.unwrap();
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.saved, 2);
        let titles: Vec<&str> = sink.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn concurrent_fetches_keep_input_order() {
        let mut s = settings(Path::new("."));
        s.fetch.concurrency = 3;
        let fetcher = StaticFetcher::new()
            .slow_page("https://shop.example/p/1", &product("One", &[]), Duration::from_millis(60))
            .slow_page("https://shop.example/p/2", &product("Two", &[]), Duration::from_millis(30))
            .page("https://shop.example/p/3", &product("Three", &[]));
        let links = vec![
            link("https://shop.example/p/1"),
            link("https://shop.example/p/2"),
            link("https://shop.example/p/3"),
        ];

        let pages = fetch_pages(&fetcher, &links, &s.fetch).await.unwrap();
        let urls: Vec<&str> = pages.iter().map(|(l, _)| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://shop.example/p/1", "https://shop.example/p/2", "https://shop.example/p/3"]);
    }

    #[tokio::test]
    async fn empty_link_list_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let mut sink = MemorySink::default();
        let summary = scrape_specs(&s, &StaticFetcher::new(), &mut sink, &[]).await.unwrap();
        assert_eq!(summary, SpecsSummary::default());
        assert_eq!(sink.columns.len(), 9);
    }

    #[tokio::test]
    async fn records_keep_the_redirected_address() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.extract.scalar_fields = vec![crate::config::ScalarField::Url, crate::config::ScalarField::Title];
        let fetcher = StaticFetcher::new()
            .page("https://shop.example/p/new", &product("Moved", &[]))
            .redirect("https://shop.example/p/old", "https://shop.example/p/new");

        let mut sink = MemorySink::default();
        scrape_specs(&s, &fetcher, &mut sink, &[link("https://shop.example/p/old")])
            .await
            .unwrap();
        assert_eq!(sink.rows[0][0], "https://shop.example/p/new");
        assert_eq!(sink.rows[0][1], "Moved");
    }
}
