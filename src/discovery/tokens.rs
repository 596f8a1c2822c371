use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::ngram::extract_ngrams;

/// "Slug-id" shape: a lowercase run followed by a hyphen and digits.
static SLUG_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]{2,}-\d+").unwrap());

/// Count every ngram across all hrefs and keep the ones that contain a
/// slug-id fragment and occur at least `min_freq` times. Output follows the
/// order in which each token was first seen.
pub fn identify_product_tokens<S: AsRef<str>>(
    hrefs: &[S],
    min_len: usize,
    max_len: usize,
    min_freq: usize,
) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for href in hrefs {
        for gram in extract_ngrams(href.as_ref(), min_len, max_len) {
            let count = counts.entry(gram).or_insert_with(|| {
                order.push(gram);
                0
            });
            *count += 1;
        }
    }

    order
        .into_iter()
        .filter(|t| counts[t] >= min_freq && SLUG_ID_RE.is_match(t))
        .map(String::from)
        .collect()
}
