//! Term-frequency vectors and cosine similarity for lexical matching.

use std::collections::HashMap;

/// Sparse term-frequency vector.
pub type TermVector = HashMap<String, f32>;

/// Lowercased alphanumeric tokens. Diacritics are kept, so Vietnamese text
/// tokenizes the same way it is written.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

pub fn term_vector(text: &str) -> TermVector {
    let mut tf = TermVector::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

pub fn norm(v: &TermVector) -> f64 {
    v.values().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity between two sparse vectors with precomputed norms.
pub fn cosine_similarity(a: &TermVector, norm_a: f64, b: &TermVector, norm_b: f64) -> f32 {
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        return 0.0;
    }

    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| (*x as f64) * (*y as f64)))
        .sum();

    (dot / denom) as f32
}
