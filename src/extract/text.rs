use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::record::NA;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to one space and trim. Blank input becomes `N/A`.
pub fn clean_text(s: &str) -> String {
    let collapsed = WS_RE.replace_all(s.trim(), " ");
    if collapsed.is_empty() {
        NA.to_string()
    } else {
        collapsed.into_owned()
    }
}

/// Cleaned text content of an element and its descendants.
pub fn element_text(el: ElementRef) -> String {
    clean_text(&el.text().collect::<String>())
}

pub fn is_missing(s: &str) -> bool {
    s == NA
}
