//! Hybrid result fusion
//!
//! Keyword and vector stores return independently ranked lists; the
//! service merges them with reciprocal-rank fusion, which needs no score
//! normalisation across heterogeneous scorers.

use std::collections::HashMap;

use crate::bm25::SearchHit;

const RRF_K: f64 = 60.0;

/// Fuse ranked lists into one ranking by reciprocal rank
///
/// Each snippet scores the sum of `1 / (k + rank)` over the lists it
/// appears in; ties break by snippet SHA for determinism.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchHit>], top_k: usize) -> Vec<SearchHit> {
    let mut fused: HashMap<&str, f64> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            *fused.entry(hit.snippet_sha.as_str()).or_insert(0.0) +=
                1.0 / (RRF_K + rank as f64 + 1.0);
        }
    }

    let mut merged: Vec<SearchHit> = fused
        .into_iter()
        .map(|(snippet_sha, score)| SearchHit {
            snippet_sha: snippet_sha.to_string(),
            score,
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.snippet_sha.cmp(&b.snippet_sha))
    });
    merged.truncate(top_k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(sha: &str, score: f64) -> SearchHit {
        SearchHit {
            snippet_sha: sha.to_string(),
            score,
        }
    }

    #[test]
    fn test_agreement_outranks_single_list_wins() {
        let bm25 = vec![hit("a", 9.0), hit("b", 5.0)];
        let vectors = vec![hit("b", 0.9), hit("c", 0.8)];

        let fused = reciprocal_rank_fusion(&[bm25, vectors], 10);

        // b appears in both lists and wins despite never ranking first
        assert_eq!(fused[0].snippet_sha, "b");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_truncation_and_determinism() {
        let list_a = vec![hit("a", 1.0), hit("b", 0.5)];
        let list_b = vec![hit("b", 1.0), hit("a", 0.5)];

        let first = reciprocal_rank_fusion(&[list_a.clone(), list_b.clone()], 1);
        let second = reciprocal_rank_fusion(&[list_a, list_b], 1);

        assert_eq!(first.len(), 1);
        // a and b tie; the SHA tiebreak keeps runs identical
        assert_eq!(first[0].snippet_sha, second[0].snippet_sha);
    }

    #[test]
    fn test_empty_lists_fuse_to_nothing() {
        assert!(reciprocal_rank_fusion(&[Vec::new(), Vec::new()], 5).is_empty());
    }
}
