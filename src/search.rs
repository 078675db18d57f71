use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::index::IndexModel;

/// Hit count used when callers have no preference.
pub const DEFAULT_TOP_K: usize = 10;

/// Looks up the `top_k` nearest indexed strings for every query.
///
/// Returns one list per query, each holding exactly
/// `min(top_k, collection len)` `(string, similarity)` pairs in descending
/// similarity order. Ties break arbitrarily. Because all rows are
/// L2-normalized term-frequency vectors, every similarity is the cosine of
/// the two trigram vectors and lies in `[0, 1]`; queries or documents with
/// no recognized trigrams score 0 against everything.
///
/// Query vectors are built on the host and moved to the index matrix's
/// current residency for the similarity product. The dense
/// `collection × batch` score block is materialized in full, which is why
/// batches should stay in the hundreds while the collection may reach
/// millions.
pub fn lookup<S: AsRef<str> + Sync>(
    queries: &[S],
    model: &IndexModel,
    top_k: usize,
) -> Result<Vec<Vec<(String, f32)>>> {
    if queries.is_empty() {
        return Ok(Vec::new());
    }
    debug!(batch = queries.len(), top_k, "lookup");

    // (batch, vocab) at full vocabulary width, then densified and transposed
    // to (vocab, batch) to line up with the index matrix's feature dimension.
    let query_matrix = model.vectorizer.transform(queries)?;
    let (batch, vocab) = query_matrix.shape();
    let dense = query_matrix.to_dense_transposed()?;

    // (docs, batch) similarity block, computed on the matrix's residency.
    let sims = model.matrix.matmul_dense(&dense, (vocab, batch))?;

    let docs = model.len();
    let k = top_k.min(docs);
    let results = (0..batch)
        .into_par_iter()
        .map(|j| {
            let mut scored: Vec<(usize, f32)> =
                (0..docs).map(|i| (i, sims[i * batch + j])).collect();
            top_k_desc(&mut scored, k);
            scored
                .into_iter()
                .map(|(i, sim)| (model.strings[i].clone(), sim))
                .collect()
        })
        .collect();
    Ok(results)
}

/// Keeps the `k` largest entries, sorted descending by score.
fn top_k_desc(scored: &mut Vec<(usize, f32)>, k: usize) {
    if k == 0 {
        scored.clear();
        return;
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, |a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
    }
    scored.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::matrix::DeviceSpec;

    const TOLERANCE: f32 = 1e-5;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn model() -> IndexModel {
        build_index(strings(&["cat", "cats", "dog"])).unwrap()
    }

    #[test]
    fn known_scenario_cat_cats_dog() {
        let model = model();
        let hits = lookup(&["cat"], &model, 2).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].len(), 2);

        let (first, sim1) = &hits[0][0];
        let (second, sim2) = &hits[0][1];
        assert_eq!(first, "cat");
        assert!((sim1 - 1.0).abs() < TOLERANCE);
        // "cats" shares "cat" out of {"cat", "ats"}: 1/sqrt(2).
        assert_eq!(second, "cats");
        assert!((sim2 - std::f32::consts::FRAC_1_SQRT_2).abs() < TOLERANCE);
    }

    #[test]
    fn disjoint_query_scores_zero() {
        let model = model();
        let hits = lookup(&["xyz"], &model, 1).unwrap();
        assert_eq!(hits[0].len(), 1);
        assert_eq!(hits[0][0].1, 0.0);
    }

    #[test]
    fn self_similarity_is_one_for_every_indexed_string() {
        let model = build_index(strings(&["cat", "cats", "dog", "banana"])).unwrap();
        for s in model.strings().to_vec() {
            let hits = lookup(&[s.as_str()], &model, 1).unwrap();
            assert_eq!(hits[0][0].0, s);
            assert!((hits[0][0].1 - 1.0).abs() < TOLERANCE, "{s}");
        }
    }

    #[test]
    fn similarities_are_bounded_and_non_increasing() {
        let model = build_index(strings(&["cat", "cats", "catalog", "dog", "doge", ""])).unwrap();
        let hits = lookup(&["cata", "dog", "qqq", ""], &model, 6).unwrap();
        for per_query in &hits {
            assert_eq!(per_query.len(), 6);
            for window in per_query.windows(2) {
                assert!(window[0].1 >= window[1].1);
            }
            for (_, sim) in per_query {
                assert!((0.0..=1.0 + TOLERANCE).contains(sim));
            }
        }
    }

    #[test]
    fn top_k_is_clamped_to_collection_size() {
        let model = model();
        let hits = lookup(&["cat"], &model, 100).unwrap();
        assert_eq!(hits[0].len(), 3);
    }

    #[test]
    fn empty_batch_yields_empty_result() {
        let model = model();
        let hits = lookup::<&str>(&[], &model, 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn zero_top_k_yields_empty_lists() {
        let model = model();
        let hits = lookup(&["cat"], &model, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_empty());
    }

    #[test]
    fn lookup_against_empty_collection() {
        let model = build_index(Vec::new()).unwrap();
        let hits = lookup(&["cat"], &model, 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_empty());
    }

    #[test]
    fn batched_queries_keep_row_order() {
        let model = model();
        let hits = lookup(&["dog", "cat"], &model, 1).unwrap();
        assert_eq!(hits[0][0].0, "dog");
        assert_eq!(hits[1][0].0, "cat");
    }

    #[test]
    fn device_residency_does_not_change_results() {
        let mut model = model();
        let queries = ["cat", "dgo", "xyz"];
        let host_hits = lookup(&queries, &model, 3).unwrap();

        model.place(DeviceSpec::Cpu).unwrap();
        let device_hits = lookup(&queries, &model, 3).unwrap();

        model.to_host().unwrap();
        let back_hits = lookup(&queries, &model, 3).unwrap();

        for (a, b) in host_hits.iter().zip(&device_hits) {
            for ((s1, v1), (s2, v2)) in a.iter().zip(b) {
                assert!((v1 - v2).abs() < TOLERANCE);
                // Equal-score ties may reorder; compare strings only when
                // the scores are distinct.
                if (v1 - v2).abs() < TOLERANCE && v1 > &TOLERANCE {
                    assert_eq!(s1, s2);
                }
            }
        }
        assert_eq!(host_hits.len(), back_hits.len());
    }
}
