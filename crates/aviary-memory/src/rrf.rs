//! Reciprocal Rank Fusion: merge multiple ranked id lists into one score.

use std::collections::HashMap;

const K: f64 = 60.0;

/// Fuse ranked lists (best match first) into a single score per id, summing
/// `1/(K+rank)` contributions from every list the id appears in. Returns ids
/// sorted by descending score.
pub fn fuse(lists: &[Vec<String>]) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in lists {
        for (rank, id) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (K + rank as f64 + 1.0);
        }
    }
    let mut out: Vec<(String, f64)> = scores.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_list_preserves_order() {
        let lists = vec![vec!["a".into(), "b".into(), "c".into()]];
        let fused = fuse(&lists);
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused[1].0, "b");
        assert_eq!(fused[2].0, "c");
    }

    #[test]
    fn id_in_both_lists_outranks_single_list_id() {
        let lists = vec![
            vec!["a".into(), "b".into()],
            vec!["b".into(), "a".into()],
        ];
        let fused = fuse(&lists);
        // both score the same here (symmetric), but an id absent from one
        // list should score lower than one present in both at equal ranks.
        let lists2 = vec![vec!["a".into()], vec!["b".into(), "a".into()]];
        let fused2 = fuse(&lists2);
        let score_a = fused2.iter().find(|(id, _)| id == "a").unwrap().1;
        let score_b = fused2.iter().find(|(id, _)| id == "b").unwrap().1;
        assert!(score_a > score_b);
        assert_eq!(fused.len(), 2);
    }
}
