/// Every contiguous substring of `s` whose length (in chars) lies in
/// `min_len..=max_len`, shortest windows first. Overlapping and repeated
/// windows are all kept.
pub fn extract_ngrams(s: &str, min_len: usize, max_len: usize) -> Vec<&str> {
    // Byte offset of every char boundary, including the end of the string.
    let bounds: Vec<usize> = s
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .collect();
    let char_len = bounds.len() - 1;

    let mut out = Vec::new();
    for n in min_len.max(1)..=max_len {
        if n > char_len {
            break;
        }
        for start in 0..=(char_len - n) {
            out.push(&s[bounds[start]..bounds[start + n]]);
        }
    }
    out
}
