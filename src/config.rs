use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use config::Config;
use regex::Regex;
use serde::Deserialize;

use crate::error::ScrapeError;
use crate::extract::SpecExtractor;
use crate::storage::sqlite::invalid_chars;

pub const DEFAULT_CONFIG_PATH: &str = "config/scraper.yaml";

/// Upper bound for `fetch.max_retries`; backoff is capped well before this matters.
pub const MAX_RETRIES_LIMIT: u32 = 10;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Load settings from an optional file plus `SCRAPER__*` environment
/// overrides, then validate. Any failure here is fatal for the run.
pub fn load(path: &Path) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("SCRAPER")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {:?}", path))?
        .try_deserialize()
        .map_err(|e| ScrapeError::Config(e.to_string()))?;

    settings.validate()?;
    Ok(settings)
}

/// Substitute `{category}` in a URL or path template.
pub fn render(template: &str, category: &str) -> String {
    template.replace("{category}", category)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub category: String,
    pub discovery: DiscoverySettings,
    pub fetch: FetchSettings,
    pub extract: ExtractSettings,
    pub storage: StorageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            category: "women-perfume".into(),
            discovery: DiscoverySettings::default(),
            fetch: FetchSettings::default(),
            extract: ExtractSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ScrapeError> {
        let d = &self.discovery;
        if self.category.trim().is_empty() {
            return Err(ScrapeError::Config("category must not be empty".into()));
        }
        if d.min_ngram_len < 1 || d.max_ngram_len < d.min_ngram_len {
            return Err(ScrapeError::Config(format!(
                "ngram bounds must satisfy 1 <= min <= max (got {}..={})",
                d.min_ngram_len, d.max_ngram_len
            )));
        }
        if d.start_page < 1 || d.start_page > d.max_pages {
            return Err(ScrapeError::Config(format!(
                "page bounds must satisfy 1 <= start <= max (got {}..={})",
                d.start_page, d.max_pages
            )));
        }
        if d.domain.trim().is_empty() {
            return Err(ScrapeError::Config("discovery.domain must not be empty".into()));
        }
        if self.fetch.concurrency < 1 {
            return Err(ScrapeError::Config("fetch.concurrency must be at least 1".into()));
        }
        if self.fetch.max_retries > MAX_RETRIES_LIMIT {
            return Err(ScrapeError::Config(format!(
                "fetch.max_retries must be at most {} (got {})",
                MAX_RETRIES_LIMIT, self.fetch.max_retries
            )));
        }
        if self.extract.mode == SpecMode::Strict && self.extract.spec_container_id.trim().is_empty() {
            return Err(ScrapeError::Config(
                "extract.spec_container_id is required in strict mode".into(),
            ));
        }
        let db = &self.storage.database;
        for name in [&db.table_name, &db.metadata_table] {
            if !IDENT_RE.is_match(name) {
                return Err(ScrapeError::Config(format!(
                    "table name {:?} is not a plain SQL identifier",
                    name
                )));
            }
        }
        if db.table_name == db.metadata_table {
            return Err(ScrapeError::Config(
                "database.table_name and database.metadata_table must differ".into(),
            ));
        }
        // Compile every pattern now so a typo fails before any network work.
        SpecExtractor::new(&self.extract)?;
        invalid_chars(&db.column_alphabet)?;
        Ok(())
    }

    pub fn listing_url(&self) -> String {
        render(&self.discovery.base_url_template, &self.category)
    }

    pub fn links_path(&self) -> String {
        render(&self.discovery.links_output, &self.category)
    }

    pub fn output_csv_path(&self) -> String {
        render(&self.storage.output_csv, &self.category)
    }
}

// ── Discovery ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    Heuristic,
    ListingApi,
}

/// Whether product tokens are learned per listing page or over all pages at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Page,
    Run,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub mode: DiscoveryMode,
    pub base_url_template: String,
    pub domain: String,
    pub start_page: u32,
    pub max_pages: u32,
    pub delay_ms: u64,
    pub min_ngram_len: usize,
    pub max_ngram_len: usize,
    pub min_token_freq: usize,
    pub token_scope: TokenScope,
    pub links_output: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            mode: DiscoveryMode::Heuristic,
            base_url_template: "https://www.digikala.com/search/category-{category}/".into(),
            domain: "https://www.digikala.com".into(),
            start_page: 1,
            max_pages: 3,
            delay_ms: 1000,
            min_ngram_len: 4,
            max_ngram_len: 12,
            min_token_freq: 3,
            token_scope: TokenScope::Page,
            links_output: "data/{category}_links.csv".into(),
        }
    }
}

// ── Fetching ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    Spider,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub renderer: RendererKind,
    pub page_timeout_ms: u64,
    pub user_agent: String,
    pub headers: HashMap<String, String>,
    pub concurrency: usize,
    pub delay_ms: u64,
    /// Extra attempts after a rate-limit, server error or timeout.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            renderer: RendererKind::Spider,
            page_timeout_ms: 30_000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            headers: HashMap::new(),
            concurrency: 1,
            delay_ms: 1000,
            max_retries: 2,
            retry_backoff_ms: 2000,
        }
    }
}

// ── Extraction ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecMode {
    /// Class-pattern container lookup with structural fallbacks.
    Flexible,
    /// Container by element id, label/value paragraphs, allow-listed keys only.
    Strict,
}

/// Ordered lookup for one scalar field: text pattern, then class pattern,
/// then the listed tags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    pub text_pattern: Option<String>,
    pub class_pattern: Option<String>,
    pub tags: Vec<String>,
}

impl FieldRule {
    fn new(text: Option<&str>, class: Option<&str>, tags: &[&str]) -> Self {
        FieldRule {
            text_pattern: text.map(String::from),
            class_pattern: class.map(String::from),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub rating: FieldRule,
    pub reviews: FieldRule,
    pub final_price: FieldRule,
    pub original_price: FieldRule,
    pub discount: FieldRule,
    pub seller: FieldRule,
}

impl Default for FieldRules {
    fn default() -> Self {
        FieldRules {
            rating: FieldRule::new(
                Some(r"\d+\.?\d*\s*(?:out of|/|\|)\s*\d+"),
                Some("rating|score"),
                &[],
            ),
            reviews: FieldRule::new(
                Some(r"\d+\s*(?:review|comment|نظر)"),
                Some("review|comment|count"),
                &[],
            ),
            final_price: FieldRule::new(
                Some(r"[$€£]\s?[\d,.]+|[\d,.]+\s*(?:تومان|USD|EUR)"),
                Some("price|cost|value"),
                &[],
            ),
            original_price: FieldRule::new(
                None,
                Some("original|list-price|strikethrough"),
                &["s", "del"],
            ),
            discount: FieldRule::new(Some(r"\d+%"), Some("discount|sale|off"), &[]),
            seller: FieldRule::new(
                Some("sold by|فروشنده"),
                Some("seller|vendor|merchant"),
                &[],
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    Title,
    Rating,
    Reviews,
    FinalPrice,
    OriginalPrice,
    Discount,
    Seller,
    Url,
}

impl ScalarField {
    pub const DEFAULTS: [ScalarField; 7] = [
        ScalarField::Title,
        ScalarField::Rating,
        ScalarField::Reviews,
        ScalarField::FinalPrice,
        ScalarField::OriginalPrice,
        ScalarField::Discount,
        ScalarField::Seller,
    ];

    pub fn column(self) -> &'static str {
        match self {
            ScalarField::Title => "title",
            ScalarField::Rating => "rating",
            ScalarField::Reviews => "reviews",
            ScalarField::FinalPrice => "final_price",
            ScalarField::OriginalPrice => "original_price",
            ScalarField::Discount => "discount",
            ScalarField::Seller => "seller",
            ScalarField::Url => "url",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    pub mode: SpecMode,
    pub spec_container_id: String,
    pub container_pattern: String,
    pub container_tags: Vec<String>,
    pub item_pattern: String,
    pub item_tags: Vec<String>,
    pub label_pattern: String,
    pub value_pattern: String,
    pub pair_tags: Vec<String>,
    pub title_pattern: String,
    pub fields: FieldRules,
    pub spec_keys: Vec<String>,
    pub scalar_fields: Vec<ScalarField>,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        let tags = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        ExtractSettings {
            mode: SpecMode::Flexible,
            spec_container_id: "specification".into(),
            container_pattern: "spec|info|details".into(),
            container_tags: tags(&["div", "section", "ul"]),
            item_pattern: "spec|item|detail".into(),
            item_tags: tags(&["li", "div", "p"]),
            label_pattern: "key|label|title".into(),
            value_pattern: "value|content|data".into(),
            pair_tags: tags(&["p", "span", "div"]),
            title_pattern: "title|product|name".into(),
            fields: FieldRules::default(),
            spec_keys: Vec::new(),
            scalar_fields: ScalarField::DEFAULTS.to_vec(),
        }
    }
}

// ── Storage ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub table_name: String,
    pub metadata_table: String,
    /// Extra characters kept in column names, as a regex class body.
    pub column_alphabet: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: "data/products.sqlite".into(),
            table_name: "products".into(),
            metadata_table: "scrape_metadata".into(),
            column_alphabet: r"\x{0600}-\x{06FF}".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub kind: StorageKind,
    pub output_csv: String,
    pub database: DatabaseSettings,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            kind: StorageKind::Csv,
            output_csv: "data/{category}_products.csv".into(),
            database: DatabaseSettings::default(),
        }
    }
}
