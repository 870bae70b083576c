use crate::analysis::analyzer::Analyzer;
use crate::core::types::is_single_token;

/// The original text plus the terms an analyzer found in it (§4.7).
/// Single-token fields (leading `_`) produce exactly one term: the whole
/// value, untouched by any tokenizer or filter. Everything else is indexed
/// by the analyzer's own token text — already lowercased, stopword-filtered,
/// and stemmed by whatever filter chain produced it — never by re-slicing
/// the original buffer, since a token's `offset`/`length` describe where it
/// sat in the analyzer's (possibly lowercased) working copy, not what
/// normalization was applied to it.
#[derive(Debug, Clone)]
pub struct AnalyzedString {
    pub text: String,
    pub terms: Vec<String>,
}

impl AnalyzedString {
    pub fn whole_value(field: &str, text: &str) -> Self {
        debug_assert!(is_single_token(field) || field.is_empty());
        AnalyzedString {
            terms: vec![text.to_string()],
            text: text.to_string(),
        }
    }

    pub fn from_terms(text: String, terms: Vec<String>) -> Self {
        AnalyzedString { text, terms }
    }

    pub fn iter_terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    /// Each term paired with its deterministic embedding, ready for
    /// submission to the model-builder queue (§4.10).
    pub fn terms_with_embeddings(&self) -> Vec<(String, Vec<f32>)> {
        self.iter_terms().map(|t| (t.to_string(), embed_span(t))).collect()
    }
}

/// Analyzes `text` for `field` into terms (§4.7): the whole value for
/// `_`-prefixed single-token fields, or each surviving token's normalized
/// text otherwise.
pub fn analyze_field(analyzer: &Analyzer, field: &str, text: &str) -> AnalyzedString {
    if is_single_token(field) {
        return AnalyzedString::whole_value(field, text);
    }
    let terms = analyzer.analyze(text).into_iter().map(|t| t.text).collect();
    AnalyzedString::from_terms(text.to_string(), terms)
}

const EMBEDDING_DIM: usize = 8;

/// Deterministic embedding for a span's text: an 8-dimensional unit vector
/// derived from a stable hash of its characters. The spec only requires
/// determinism and that identical token strings yield identical vectors —
/// the derivation itself is pluggable, this is the simplest one that holds.
pub fn embed_span(text: &str) -> Vec<f32> {
    let mut buckets = [0i64; EMBEDDING_DIM];
    for (i, ch) in text.chars().enumerate() {
        let code = ch as u32;
        let bucket = (code as usize).wrapping_add(i) % EMBEDDING_DIM;
        buckets[bucket] += i64::from(code);
    }

    let mut vector: Vec<f32> = buckets.iter().map(|&b| b as f32).collect();
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_yields_identical_vector() {
        assert_eq!(embed_span("hello"), embed_span("hello"));
    }

    #[test]
    fn different_text_yields_different_vector() {
        assert_ne!(embed_span("hello"), embed_span("world"));
    }

    #[test]
    fn embedding_is_unit_length() {
        let v = embed_span("search engine");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn whole_value_is_a_single_span() {
        let analyzed = AnalyzedString::whole_value("_id", "abc-123");
        assert_eq!(analyzed.terms, vec!["abc-123".to_string()]);
    }

    #[test]
    fn analyze_field_indexes_normalized_token_text_not_original_slice() {
        let analyzer = Analyzer::standard_english();
        let analyzed = analyze_field(&analyzer, "title", "the ugly truth");
        // "ugly" must come out whole and correctly cased/stemmed, not a
        // mis-offset slice of the original (previously " ugl" due to the
        // tokenizer's offset accounting ignoring stripped separators).
        assert!(analyzed.terms.iter().any(|t| t.starts_with("ugl")));
        assert!(!analyzed.terms.iter().any(|t| t.contains(' ')));
    }
}
