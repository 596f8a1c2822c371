use std::collections::{HashMap, HashSet};

use regex::Regex;
use scraper::{ElementRef, Html};

use super::strategy::{class_matches, compile, elements, tag_allowed};
use super::text::{element_text, is_missing};
use crate::config::ExtractSettings;
use crate::error::ScrapeError;

/// Rows in strict mode are these elements under the container.
const STRICT_ROW_TAGS: &[&str] = &["div", "li"];

/// How the specification table is located and read.
#[derive(Debug, Clone)]
pub enum SpecLayout {
    Flexible(FlexibleLayout),
    Strict(StrictLayout),
}

impl SpecLayout {
    pub fn pairs(&self, doc: &Html) -> HashMap<String, String> {
        match self {
            SpecLayout::Flexible(l) => l.pairs(doc),
            SpecLayout::Strict(l) => l.pairs(doc),
        }
    }
}

// ── Flexible ──

/// Class-pattern driven lookup with structural fallbacks at every level.
#[derive(Debug, Clone)]
pub struct FlexibleLayout {
    container_pattern: Regex,
    container_tags: Vec<String>,
    item_pattern: Regex,
    item_tags: Vec<String>,
    label_pattern: Regex,
    value_pattern: Regex,
    pair_tags: Vec<String>,
}

impl FlexibleLayout {
    pub fn new(s: &ExtractSettings) -> Result<Self, ScrapeError> {
        Ok(FlexibleLayout {
            container_pattern: compile("container_pattern", &s.container_pattern)?,
            container_tags: s.container_tags.clone(),
            item_pattern: compile("item_pattern", &s.item_pattern)?,
            item_tags: s.item_tags.clone(),
            label_pattern: compile("label_pattern", &s.label_pattern)?,
            value_pattern: compile("value_pattern", &s.value_pattern)?,
            pair_tags: s.pair_tags.clone(),
        })
    }

    /// First container-tag element with a spec-like class, else the first
    /// container-tag element at all.
    pub fn container<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        elements(doc)
            .filter(|el| tag_allowed(el, &self.container_tags))
            .find(|el| class_matches(el, &self.container_pattern))
            .or_else(|| elements(doc).find(|el| tag_allowed(el, &self.container_tags)))
    }

    fn items<'a>(&self, container: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        let all: Vec<ElementRef<'a>> = descendants(container)
            .filter(|el| tag_allowed(el, &self.item_tags))
            .collect();
        let classed: Vec<ElementRef<'a>> = all
            .iter()
            .copied()
            .filter(|el| class_matches(el, &self.item_pattern))
            .collect();
        if classed.is_empty() {
            all
        } else {
            classed
        }
    }

    fn pair(&self, item: ElementRef) -> Option<(String, String)> {
        let label = descendants(item)
            .filter(|el| tag_allowed(el, &self.pair_tags))
            .find(|el| class_matches(el, &self.label_pattern))
            .or_else(|| descendants(item).find(|el| tag_allowed(el, &self.pair_tags)))?;

        let value = descendants(item)
            .filter(|el| tag_allowed(el, &self.pair_tags))
            .find(|el| class_matches(el, &self.value_pattern))
            .or_else(|| {
                label
                    .next_siblings()
                    .filter_map(ElementRef::wrap)
                    .find(|el| tag_allowed(el, &self.pair_tags))
            })?;

        let key = element_text(label);
        let val = element_text(value);
        if is_missing(&key) || is_missing(&val) || key == val {
            return None;
        }
        Some((key, val))
    }

    pub fn pairs(&self, doc: &Html) -> HashMap<String, String> {
        let Some(container) = self.container(doc) else {
            return HashMap::new();
        };
        self.items(container)
            .into_iter()
            .filter_map(|item| self.pair(item))
            .collect()
    }
}

// ── Strict ──

/// Container by id; each row is a label paragraph followed by value
/// paragraphs. Only allow-listed labels survive.
#[derive(Debug, Clone)]
pub struct StrictLayout {
    container_id: String,
    allowed: HashSet<String>,
}

impl StrictLayout {
    pub fn new(s: &ExtractSettings) -> Self {
        StrictLayout {
            container_id: s.spec_container_id.clone(),
            allowed: s.spec_keys.iter().cloned().collect(),
        }
    }

    pub fn pairs(&self, doc: &Html) -> HashMap<String, String> {
        let mut specs = HashMap::new();
        let Some(container) = elements(doc).find(|el| el.value().id() == Some(self.container_id.as_str()))
        else {
            return specs;
        };

        // Document order: an inner row overwrites the wrapper that contains it.
        for row in descendants(container).filter(|el| STRICT_ROW_TAGS.contains(&el.value().name())) {
            let paragraphs: Vec<String> = descendants(row)
                .filter(|el| el.value().name() == "p")
                .map(element_text)
                .collect();
            let Some((key, rest)) = paragraphs.split_first() else {
                continue;
            };
            let values: Vec<&str> = rest
                .iter()
                .map(String::as_str)
                .filter(|v| !is_missing(v))
                .collect();
            if is_missing(key) || values.is_empty() || !self.allowed.contains(key) {
                continue;
            }
            specs.insert(key.clone(), values.join(" - "));
        }
        specs
    }
}

/// Element descendants, excluding `el` itself.
fn descendants<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.descendants().skip(1).filter_map(ElementRef::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flexible() -> FlexibleLayout {
        FlexibleLayout::new(&ExtractSettings::default()).unwrap()
    }

    fn strict(keys: &[&str]) -> StrictLayout {
        let mut s = ExtractSettings::default();
        s.spec_container_id = "specification".into();
        s.spec_keys = keys.iter().map(|k| k.to_string()).collect();
        StrictLayout::new(&s)
    }

    #[test]
    fn classed_container_and_pairs() {
        let doc = Html::parse_document(
            r#"<div class="header">menu</div>
               <section class="product-specs">
                 <ul>
                   <li class="spec-row"><span class="label">Volume</span><span class="value">100 ml</span></li>
                   <li class="spec-row"><span class="label">Scent</span><span>Woody</span></li>
                 </ul>
               </section>"#,
        );
        let pairs = flexible().pairs(&doc);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["Volume"], "100 ml");
        assert_eq!(pairs["Scent"], "Woody");
    }

    #[test]
    fn falls_back_to_first_container_without_classes() {
        let doc = Html::parse_document(
            "<ul><li><p>Color</p><p>Red</p></li><li><p>Size</p><p>M</p></li></ul>",
        );
        let pairs = flexible().pairs(&doc);
        assert_eq!(pairs["Color"], "Red");
        assert_eq!(pairs["Size"], "M");
    }

    #[test]
    fn rejects_identical_label_and_value() {
        let doc = Html::parse_document(
            r#"<div class="details"><p class="item"><span>Same</span><span>Same</span></p></div>"#,
        );
        assert!(flexible().pairs(&doc).is_empty());
    }

    #[test]
    fn rejects_missing_value() {
        let doc = Html::parse_document(
            r#"<div class="details"><p class="item"><span class="label">Lonely</span></p></div>"#,
        );
        assert!(flexible().pairs(&doc).is_empty());
    }

    #[test]
    fn no_container_no_pairs() {
        let doc = Html::parse_document("<p>plain</p>");
        assert!(flexible().pairs(&doc).is_empty());
    }

    #[test]
    fn strict_joins_values_and_filters_keys() {
        let doc = Html::parse_document(
            r#"<div id="specification">
                 <div><p>حجم</p><p>100 میلی‌لیتر</p></div>
                 <div><p>گروه بویایی</p><p>چوبی</p><p>گرم</p></div>
                 <div><p>Barcode</p><p>123</p></div>
                 <div><p>Only label</p></div>
               </div>"#,
        );
        let pairs = strict(&["حجم", "گروه بویایی"]).pairs(&doc);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs["حجم"], "100 میلی‌لیتر");
        assert_eq!(pairs["گروه بویایی"], "چوبی - گرم");
    }

    #[test]
    fn strict_inner_row_wins_over_wrapper() {
        let doc = Html::parse_document(
            r#"<div id="specification"><div>
                 <div><p>Volume</p><p>50 ml</p></div>
                 <div><p>Origin</p><p>France</p></div>
               </div></div>"#,
        );
        let pairs = strict(&["Volume", "Origin"]).pairs(&doc);
        assert_eq!(pairs["Volume"], "50 ml");
        assert_eq!(pairs["Origin"], "France");
    }

    #[test]
    fn strict_without_container_is_empty() {
        let doc = Html::parse_document(r#"<div class="specification"><div><p>Volume</p><p>1</p></div></div>"#);
        assert!(strict(&["Volume"]).pairs(&doc).is_empty());
    }
}
