//! Trigram similarity
//!
//! Words are lowercased and padded with two leading spaces and one trailing
//! space before being cut into trigrams, so "api" yields `"  a"`, `" ap"`,
//! `"api"`, `"pi "`. Similarity of a query to a document is the share of the
//! query's trigrams that also occur in the document.

use ahash::AHashSet;

/// Split text into lowercased alphanumeric words
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// All padded trigrams of every word in `text`
pub fn trigrams(text: &str) -> AHashSet<String> {
    let mut out = AHashSet::new();
    for word in words(text) {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            out.insert(window.iter().collect());
        }
    }
    out
}

/// Fraction of the query's trigrams present in the document, in `[0, 1]`.
///
/// A query with no trigrams has similarity 0.
pub(crate) fn similarity_of(query: &AHashSet<String>, doc: &AHashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = query.iter().filter(|t| doc.contains(*t)).count();
    shared as f64 / query.len() as f64
}

/// Unpadded trigrams used to pull candidates from the trigram text index.
///
/// Words shorter than three characters contribute nothing.
pub fn inner_trigrams(text: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for word in words(text) {
        let chars: Vec<char> = word.chars().collect();
        for window in chars.windows(3) {
            let tri: String = window.iter().collect();
            if seen.insert(tri.clone()) {
                out.push(tri);
            }
        }
    }
    out
}
