//! Scoring used by the entity resolver
//!
//! The resolver blends two signals with fixed weights: embedding similarity
//! (what the reference means) and a character-level ratio against the
//! entity's display name (how it is spelled).

/// Weight of the embedding similarity in the combined score
pub const VECTOR_WEIGHT: f64 = 0.6;

/// Weight of the lexical ratio in the combined score
pub const LEXICAL_WEIGHT: f64 = 0.4;

/// Normalized indel similarity of two strings, case-folded
///
/// `2 * LCS / (len_a + len_b)` over characters: 1.0 for equal strings, 0.0
/// when no character lines up. Two empty strings are equal.
pub fn lexical_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    2.0 * longest_common_subsequence(&a, &b) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Cap a raw index similarity at 1.0
///
/// ANN indexes may report scores slightly above 1 for normalized vectors.
pub fn clamp_similarity(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.min(1.0)
}

/// `0.6 * vector + 0.4 * lexical`
pub fn combined_score(vector_score: f64, lexical_score: f64) -> f64 {
    VECTOR_WEIGHT * vector_score + LEXICAL_WEIGHT * lexical_score
}
