//! Ranking primitives shared by the storage backends
//!
//! Exhaustive cosine similarity stands in for an ANN index, and BM25 with
//! bounded-edit fuzzy term matching stands in for an inverted text index.

use super::document::{get_path, Document};
use super::{ScoredDocument, TextQuery, VectorQuery};
use serde_json::Value;
use std::cmp::Ordering;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Weight of a fuzzy (non-exact) term hit relative to an exact one
const FUZZY_HIT_WEIGHT: f64 = 0.5;

/// Terms shorter than this only match exactly
const MIN_FUZZY_TERM_LEN: usize = 3;

/// Cosine similarity; `None` when dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Read a stored vector field
pub fn vector_field(document: &Document, field: &str) -> Option<Vec<f32>> {
    get_path(document, field)?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

/// Lowercase alphanumeric terms
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Levenshtein distance if it is at most `max_edits`
pub fn bounded_levenshtein(a: &str, b: &str, max_edits: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max_edits {
        return None;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        let mut row_min = current[0];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
            row_min = row_min.min(current[j + 1]);
        }
        if row_min > max_edits {
            return None;
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let distance = previous[b.len()];
    (distance <= max_edits).then_some(distance)
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        _ => {}
    }
}

/// Terms of the designated text fields of a document
pub fn document_terms(document: &Document, fields: &[String]) -> Vec<String> {
    let mut terms = Vec::new();
    for field in fields {
        if let Some(value) = get_path(document, field) {
            collect_text(value, &mut terms);
        }
    }
    terms
}

fn term_weight(query_term: &str, doc_term: &str, max_edits: usize) -> f64 {
    if query_term == doc_term {
        1.0
    } else if max_edits > 0
        && query_term.chars().count() >= MIN_FUZZY_TERM_LEN
        && bounded_levenshtein(query_term, doc_term, max_edits).is_some()
    {
        FUZZY_HIT_WEIGHT
    } else {
        0.0
    }
}

/// BM25 relevance of each document's terms against the query terms
///
/// Returns one score per input document; zero means no term matched.
pub fn bm25_scores(
    query_terms: &[String],
    documents: &[Vec<String>],
    max_edits: usize,
) -> Vec<f64> {
    let mut scores = vec![0.0; documents.len()];
    if documents.is_empty() || query_terms.is_empty() {
        return scores;
    }

    let total_len: usize = documents.iter().map(Vec::len).sum();
    let avg_len = (total_len as f64 / documents.len() as f64).max(1.0);
    let n = documents.len() as f64;

    for term in query_terms {
        let frequencies: Vec<f64> = documents
            .iter()
            .map(|terms| terms.iter().map(|t| term_weight(term, t, max_edits)).sum())
            .collect();
        let df = frequencies.iter().filter(|tf| **tf > 0.0).count() as f64;
        if df == 0.0 {
            continue;
        }
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

        for (i, tf) in frequencies.iter().enumerate() {
            if *tf == 0.0 {
                continue;
            }
            let len_norm = 1.0 - BM25_B + BM25_B * documents[i].len() as f64 / avg_len;
            scores[i] += idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * len_norm);
        }
    }

    scores
}

fn sort_by_score(hits: &mut [ScoredDocument]) {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Rank already-filtered documents by cosine similarity to the query vector
pub(crate) fn rank_by_vector(
    documents: impl IntoIterator<Item = Document>,
    query: &VectorQuery,
) -> Vec<ScoredDocument> {
    let mut hits: Vec<ScoredDocument> = documents
        .into_iter()
        .filter_map(|document| {
            let stored = vector_field(&document, &query.vector_field)?;
            let score = cosine_similarity(&query.query_vector, &stored)?;
            Some(ScoredDocument { document, score })
        })
        .collect();

    sort_by_score(&mut hits);
    hits.truncate(query.limit);
    hits
}

/// Rank already-filtered documents by BM25 relevance to the query text
pub(crate) fn rank_by_text(documents: Vec<Document>, query: &TextQuery) -> Vec<ScoredDocument> {
    let query_terms = tokenize(&query.query);
    let terms: Vec<Vec<String>> = documents
        .iter()
        .map(|document| document_terms(document, &query.fields))
        .collect();
    let scores = bm25_scores(&query_terms, &terms, query.fuzzy_max_edits as usize);

    let mut hits: Vec<ScoredDocument> = documents
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| *score > 0.0)
        .map(|(document, score)| ScoredDocument { document, score })
        .collect();

    sort_by_score(&mut hits);
    hits.truncate(query.limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);

        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-9);

        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_exhaustive_vector_ranking_ignores_candidate_pool() {
        let documents: Vec<Document> = (0..5)
            .map(|i| {
                let mut document = Document::new();
                document.insert("_id".to_string(), serde_json::json!(format!("d{i}")));
                document.insert("embedding".to_string(), serde_json::json!([1.0, i as f32]));
                document
            })
            .collect();
        let query = VectorQuery::new("embedding", vec![1.0, 0.0], 3).with_num_candidates(1);

        let hits = rank_by_vector(documents, &query);
        let ids: Vec<_> = hits
            .iter()
            .filter_map(|hit| hit.document.get("_id").and_then(|id| id.as_str()))
            .collect();
        assert_eq!(ids, vec!["d0", "d1", "d2"]);
    }

    #[test]
    fn test_bounded_levenshtein() {
        assert_eq!(bounded_levenshtein("design", "design", 1), Some(0));
        assert_eq!(bounded_levenshtein("desing", "design", 2), Some(2));
        assert_eq!(bounded_levenshtein("debugging", "debuging", 1), Some(1));
        assert_eq!(bounded_levenshtein("api", "apple", 1), None);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Fix the API-doc, v2!"),
            vec!["fix", "the", "api", "doc", "v2"]
        );
    }

    #[test]
    fn test_bm25_prefers_matching_documents() {
        let documents = vec![
            tokenize("Write API documentation"),
            tokenize("Plan the offsite"),
            tokenize("Review API design doc"),
        ];
        let scores = bm25_scores(&tokenize("api design"), &documents, 1);

        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > scores[0]);
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn test_bm25_fuzzy_terms() {
        let documents = vec![tokenize("Debugging notes")];
        let exact = bm25_scores(&tokenize("debugging"), &documents, 1);
        let typo = bm25_scores(&tokenize("debuging"), &documents, 1);
        let strict = bm25_scores(&tokenize("debuging"), &documents, 0);

        assert!(typo[0] > 0.0);
        assert!(exact[0] > typo[0]);
        assert_eq!(strict[0], 0.0);
    }
}
