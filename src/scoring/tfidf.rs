/// Inverse document frequency for a term seen in `doc_freq` of `total_docs`
/// documents. The postings store persists only doc-ids (no per-document
/// term frequency), so term frequency is implicitly `1` for any doc a term
/// matched in — the evaluator's "tf-idf" score is effectively this idf,
/// scaled by the match-quality factor (1.0 for exact/prefix, the
/// edit-distance factor for fuzzy).
pub fn idf(total_docs: u64, doc_freq: u64) -> f32 {
    ((total_docs as f32 + 1.0) / (doc_freq as f32 + 1.0)).ln()
}

/// The weighting factor a fuzzy match contributes relative to an exact
/// match, per §4.9: `(1 - distance/max_edits)`.
pub fn fuzzy_factor(distance: u8, max_edits: u8) -> f32 {
    if max_edits == 0 {
        return if distance == 0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance as f32 / max_edits as f32).max(0.0)
}

/// Cosine-angle score for the vector variant (§4.5): the angle itself.
pub fn angle_score(angle: f64) -> f32 {
    angle as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarer_terms_score_higher() {
        assert!(idf(1000, 5) > idf(1000, 500));
    }

    #[test]
    fn exact_match_has_full_fuzzy_factor() {
        assert_eq!(fuzzy_factor(0, 2), 1.0);
    }

    #[test]
    fn max_distance_has_zero_factor() {
        assert_eq!(fuzzy_factor(2, 2), 0.0);
    }
}
