use std::collections::HashSet;

use siteqa_core::error::ModelError;
use siteqa_core::traits::RelevanceScorer;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could", "do", "does", "for", "from",
    "have", "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "our", "please", "so", "tell", "that",
    "the", "their", "there", "this", "to", "us", "we", "what", "when", "where", "which", "who", "why", "will",
    "with", "would", "you", "your",
];

const TERM_WEIGHT: f32 = 0.7;
const PHRASE_WEIGHT: f32 = 0.3;

/// Lexical relevance: the share of query terms found in the passage, blended
/// with the share of adjacent query-term pairs found as adjacent pairs.
///
/// Scores lie in `[0, 1]`. Queries with no content words score 0 everywhere.
#[derive(Debug, Clone, Default)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, query: &str, passage: &str) -> f32 {
        let q = terms(query);
        if q.is_empty() {
            return 0.0;
        }
        let p = terms(passage);
        let p_terms: HashSet<&str> = p.iter().map(String::as_str).collect();
        let p_pairs: HashSet<(&str, &str)> = p.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();

        let unique: HashSet<&str> = q.iter().map(String::as_str).collect();
        let covered = unique.iter().filter(|t| p_terms.contains(*t)).count() as f32 / unique.len() as f32;
        if q.len() < 2 {
            return covered;
        }
        let pairs: Vec<(&str, &str)> = q.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();
        let phrased = pairs.iter().filter(|pair| p_pairs.contains(*pair)).count() as f32 / pairs.len() as f32;
        (TERM_WEIGHT * covered + PHRASE_WEIGHT * phrased).clamp(0.0, 1.0)
    }
}

impl RelevanceScorer for LexicalScorer {
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<Option<f32>>, ModelError> {
        Ok(passages.iter().map(|p| Some(self.score(query, p))).collect())
    }
}

/// Lower-cased content words with a naive plural fold.
fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| match w.strip_suffix('s') {
            Some(stem) if stem.chars().count() >= 3 && !stem.ends_with('s') => stem.to_string(),
            _ => w,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_topic_match_scores_high_and_unrelated_scores_zero() {
        let s = LexicalScorer::new();
        assert!((s.score("Do you build mobile apps?", "We build mobile apps") - 1.0).abs() < 1e-6);
        assert_eq!(s.score("Do you build mobile apps?", "Unrelated cooking recipe"), 0.0);
    }

    #[test]
    fn partial_overlap_is_between_bounds() {
        let s = LexicalScorer::new();
        let score = s.score("mobile app pricing", "Our mobile team ships apps weekly");
        assert!(score > 0.0 && score < 1.0, "{score}");
    }

    #[test]
    fn stopword_only_query_scores_zero() {
        assert_eq!(LexicalScorer::new().score("what do you do", "anything at all"), 0.0);
    }
}
