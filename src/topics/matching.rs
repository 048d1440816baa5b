// Cross-day topic identity by keyword overlap.
//
// `topic_id` is local to one partition's fit, so "the same topic on another
// day" is decided by comparing labels and keyword lists. Keywords are
// weighted by rank (the first keyword weighs most) and compared with weighted
// Jaccard similarity:
//
//   sum(min(weight_a, weight_b)) / sum(max(weight_a, weight_b))
//
// which is 0.0 for disjoint lists and 1.0 for identical ones.

use std::collections::{HashMap, HashSet};

use crate::db::models::DailyTopic;

/// Similarity at or above which two topics are treated as the same concept.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.3;

/// Rank weights for an ordered keyword list: 1.0 for the first keyword,
/// decreasing linearly to 1/n for the last.
pub fn rank_weights(keywords: &[String]) -> HashMap<String, f64> {
    let n = keywords.len() as f64;
    let mut weights = HashMap::with_capacity(keywords.len());
    for (i, kw) in keywords.iter().enumerate() {
        // A repeated keyword keeps its best rank.
        weights.entry(kw.clone()).or_insert((n - i as f64) / n);
    }
    weights
}

/// Weighted Jaccard from raw keyword weight maps.
pub fn jaccard_from_weights(
    weights_a: &HashMap<String, f64>,
    weights_b: &HashMap<String, f64>,
) -> f64 {
    let all_keys: HashSet<&String> = weights_a.keys().chain(weights_b.keys()).collect();

    if all_keys.is_empty() {
        return 0.0;
    }

    let mut min_sum = 0.0;
    let mut max_sum = 0.0;

    for key in all_keys {
        let a = weights_a.get(key).copied().unwrap_or(0.0);
        let b = weights_b.get(key).copied().unwrap_or(0.0);
        min_sum += a.min(b);
        max_sum += a.max(b);
    }

    if max_sum == 0.0 {
        0.0
    } else {
        min_sum / max_sum
    }
}

/// Similarity of two topics: 1.0 when labels match exactly, otherwise the
/// rank-weighted Jaccard of their keyword lists.
pub fn topic_similarity(a: &DailyTopic, b: &DailyTopic) -> f64 {
    if !a.topic_label.is_empty() && a.topic_label == b.topic_label {
        return 1.0;
    }
    jaccard_from_weights(&rank_weights(&a.keywords), &rank_weights(&b.keywords))
}

/// The candidate most similar to `target` at or above `threshold`.
/// Ties go to the earlier candidate.
pub fn best_match<'a>(
    target: &DailyTopic,
    candidates: impl IntoIterator<Item = &'a DailyTopic>,
    threshold: f64,
) -> Option<(&'a DailyTopic, f64)> {
    let mut best: Option<(&DailyTopic, f64)> = None;
    for candidate in candidates {
        let score = topic_similarity(target, candidate);
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best
}
