use thiserror::Error;

/// Failures the pipeline distinguishes between. Per-page variants are
/// logged and skipped by callers; `Config` and `Schema` abort the run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid pattern for {field}: {source}")]
    Pattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("{url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("timed out after {ms}ms fetching {url}")]
    Timeout { url: String, ms: u64 },

    #[error("empty document from {url}")]
    EmptyPage { url: String },

    #[error("renderer error: {0}")]
    Renderer(String),
}
