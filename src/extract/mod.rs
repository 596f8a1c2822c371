pub mod specs;
pub mod strategy;
pub mod text;

use anyhow::Result;
use scraper::Html;

use crate::config::{ExtractSettings, FieldRule, ScalarField, SpecMode};
use crate::error::ScrapeError;
use crate::record::ProductRecord;
use specs::{FlexibleLayout, SpecLayout, StrictLayout};
use strategy::{compile, first_match, Strategy};

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3"];

/// Turns one product page into a `ProductRecord`. Holds only compiled
/// configuration, so one instance serves every page.
#[derive(Debug, Clone)]
pub struct SpecExtractor {
    title: Vec<Strategy>,
    fields: Vec<(ScalarField, Vec<Strategy>)>,
    layout: SpecLayout,
}

impl SpecExtractor {
    pub fn new(s: &ExtractSettings) -> Result<Self, ScrapeError> {
        let title = vec![
            Strategy::ClassPattern {
                pattern: compile("title_pattern", &s.title_pattern)?,
                tags: HEADING_TAGS.iter().map(|t| t.to_string()).collect(),
            },
            Strategy::tags(HEADING_TAGS),
            Strategy::tags(&["title"]),
        ];

        let rules = &s.fields;
        let fields = vec![
            (ScalarField::Rating, chain("rating", &rules.rating)?),
            (ScalarField::Reviews, chain("reviews", &rules.reviews)?),
            (ScalarField::FinalPrice, chain("final_price", &rules.final_price)?),
            (ScalarField::OriginalPrice, chain("original_price", &rules.original_price)?),
            (ScalarField::Discount, chain("discount", &rules.discount)?),
            (ScalarField::Seller, chain("seller", &rules.seller)?),
        ];

        let layout = match s.mode {
            SpecMode::Flexible => SpecLayout::Flexible(FlexibleLayout::new(s)?),
            SpecMode::Strict => SpecLayout::Strict(StrictLayout::new(s)),
        };

        Ok(SpecExtractor { title, fields, layout })
    }

    /// Extract scalars and specification pairs. Fields that cannot be
    /// found stay `N/A`; only an empty document is an error.
    pub fn extract(&self, html: &str, url: &str) -> Result<ProductRecord> {
        if html.trim().is_empty() {
            return Err(ScrapeError::EmptyPage { url: url.to_string() }.into());
        }
        let doc = Html::parse_document(html);
        let mut record = ProductRecord::empty(url);

        if let Some(title) = first_match(&doc, &self.title) {
            record.title = title;
        }
        for (field, strategies) in &self.fields {
            if let Some(value) = first_match(&doc, strategies) {
                *record.scalar_mut(*field) = value;
            }
        }
        record.specs = self.layout.pairs(&doc);

        Ok(record)
    }
}

/// Text pattern, then class pattern, then plain tags.
fn chain(field: &str, rule: &FieldRule) -> Result<Vec<Strategy>, ScrapeError> {
    let mut out = Vec::new();
    if let Some(p) = rule.text_pattern.as_deref().filter(|p| !p.is_empty()) {
        out.push(Strategy::TextPattern(compile(field, p)?));
    }
    if let Some(p) = rule.class_pattern.as_deref().filter(|p| !p.is_empty()) {
        out.push(Strategy::class(compile(field, p)?));
    }
    if !rule.tags.is_empty() {
        out.push(Strategy::Tag(rule.tags.clone()));
    }
    Ok(out)
}
