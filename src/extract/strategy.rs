use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Node};

use super::text::{clean_text, element_text, is_missing};
use crate::error::ScrapeError;

/// Text under these tags is never page content.
const SKIP_TEXT_IN: &[&str] = &["script", "style", "noscript"];

/// Case-insensitive pattern, tagged with the setting it came from.
pub fn compile(field: &str, pattern: &str) -> Result<Regex, ScrapeError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ScrapeError::Pattern { field: field.to_string(), source })
}

/// One way of locating a value in a document.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// First text node whose content matches.
    TextPattern(Regex),
    /// First element whose `class` matches, optionally limited to `tags`.
    ClassPattern { pattern: Regex, tags: Vec<String> },
    /// First element with one of these names.
    Tag(Vec<String>),
}

impl Strategy {
    pub fn class(pattern: Regex) -> Self {
        Strategy::ClassPattern { pattern, tags: Vec::new() }
    }

    pub fn tags(names: &[&str]) -> Self {
        Strategy::Tag(names.iter().map(|n| n.to_string()).collect())
    }

    /// Cleaned text of the first hit. Hits that clean to nothing count as misses.
    pub fn find(&self, doc: &Html) -> Option<String> {
        match self {
            Strategy::TextPattern(re) => doc
                .root_element()
                .descendants()
                .filter_map(|node| {
                    let Node::Text(t) = node.value() else {
                        return None;
                    };
                    let skipped = node
                        .parent()
                        .and_then(|p| p.value().as_element().map(|e| SKIP_TEXT_IN.contains(&e.name())))
                        .unwrap_or(false);
                    (!skipped && re.is_match(t)).then(|| clean_text(t))
                })
                .find(|t| !is_missing(t)),
            Strategy::ClassPattern { pattern, tags } => elements(doc)
                .filter(|el| tag_allowed(el, tags))
                .filter(|el| class_matches(el, pattern))
                .map(element_text)
                .find(|t| !is_missing(t)),
            Strategy::Tag(names) => elements(doc)
                .filter(|el| tag_allowed(el, names))
                .map(element_text)
                .find(|t| !is_missing(t)),
        }
    }
}

/// Try each strategy in order; the first hit wins.
pub fn first_match(doc: &Html, chain: &[Strategy]) -> Option<String> {
    chain.iter().find_map(|s| s.find(doc))
}

pub fn elements(doc: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    doc.root_element().descendants().filter_map(ElementRef::wrap)
}

pub fn tag_allowed(el: &ElementRef, tags: &[String]) -> bool {
    tags.is_empty() || tags.iter().any(|t| t.eq_ignore_ascii_case(el.value().name()))
}

pub fn class_matches(el: &ElementRef, pattern: &Regex) -> bool {
    el.value().attr("class").is_some_and(|c| pattern.is_match(c))
}
