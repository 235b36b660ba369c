//! Hybrid ranking: blend semantic, lexical, and graph signals, then pack
//! ranked results into a token budget.

use std::collections::{HashMap, HashSet};

use crate::config::estimate_tokens;
use crate::types::{Candidate, SearchResult, Signals};
use crate::weights::Weights;

/// MMR trade-off between relevance and diversity.
pub const DEFAULT_MMR_LAMBDA: f64 = 0.7;

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Share of query terms present as substrings of the lower-cased snippet.
pub fn lexical_signal(query: &str, snippet: &str) -> f64 {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = snippet.to_lowercase();
    let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// Rank candidates with the given weights. `degrees` maps file → import
/// degree; `rerank_scores` is parallel to `candidates` when present.
pub fn rank(
    candidates: &[Candidate],
    query: &str,
    weights: &Weights,
    degrees: &HashMap<String, usize>,
    rerank_scores: Option<&[f64]>,
) -> Vec<SearchResult> {
    // Graph signal normalizes against the max degree in this result set.
    let max_degree = candidates
        .iter()
        .map(|c| degrees.get(&c.file).copied().unwrap_or(0))
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let mut out: Vec<SearchResult> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let semantic = c.score.clamp(0.0, 1.0);
            let lexical = lexical_signal(query, &c.snippet);
            let graph = if degrees.is_empty() {
                0.0
            } else {
                degrees.get(&c.file).copied().unwrap_or(0) as f64 / max_degree
            };
            let reranker = rerank_scores.and_then(|s| s.get(i).copied()).unwrap_or(semantic);
            let signals = Signals { semantic, lexical, graph, reranker };
            let score = weights.semantic * semantic
                + weights.lexical * lexical
                + weights.graph * graph
                + weights.reranker * reranker;
            SearchResult {
                file: c.file.clone(),
                symbol: c.symbol.clone(),
                start_line: c.start_line,
                end_line: c.end_line,
                score,
                snippet: c.snippet.clone(),
                signals,
            }
        })
        .collect();

    // Deterministic order: composite desc, then semantic desc, then file,
    // then start line.
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.signals
                    .semantic
                    .partial_cmp(&a.signals.semantic)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
    out
}

// ---------------------------------------------------------------------------
// Context packing
// ---------------------------------------------------------------------------

fn token_cost(result: &SearchResult, chars_per_token: usize) -> usize {
    estimate_tokens(&result.snippet, chars_per_token)
}

/// Greedy packing with per-file diversity: first pass takes one snippet per
/// file in rank order; a second pass fills the remaining budget without the
/// one-per-file rule.
pub fn pack_greedy(
    ranked: &[SearchResult],
    budget: usize,
    chars_per_token: usize,
    effective_top_k: usize,
) -> Vec<SearchResult> {
    let mut chosen: Vec<SearchResult> = Vec::new();
    let mut used: HashSet<usize> = HashSet::new();
    let mut seen_files: HashSet<&str> = HashSet::new();
    let mut spent = 0usize;

    for (i, r) in ranked.iter().enumerate() {
        if chosen.len() >= effective_top_k {
            break;
        }
        if seen_files.contains(r.file.as_str()) {
            continue;
        }
        let cost = token_cost(r, chars_per_token);
        if spent + cost > budget {
            continue;
        }
        seen_files.insert(r.file.as_str());
        used.insert(i);
        spent += cost;
        chosen.push(r.clone());
    }

    for (i, r) in ranked.iter().enumerate() {
        if chosen.len() >= effective_top_k {
            break;
        }
        if used.contains(&i) {
            continue;
        }
        let cost = token_cost(r, chars_per_token);
        if spent + cost > budget {
            continue;
        }
        used.insert(i);
        spent += cost;
        chosen.push(r.clone());
    }

    fallback_if_empty(chosen, ranked, effective_top_k)
}

fn jaccard(a: &str, b: &str) -> f64 {
    let set = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    };
    let (sa, sb) = (set(a), set(b));
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

/// Maximal marginal relevance packing: each step picks the candidate
/// maximizing `lambda * score - (1 - lambda) * max_similarity_to_chosen`,
/// skipping candidates whose token cost exceeds the remaining budget.
///
/// Candidates from a file not yet represented always outrank candidates
/// from an already-chosen file, so the selection crosses files whenever a
/// viable cross-file candidate fits the budget (for any lambda < 1).
pub fn pack_mmr(
    ranked: &[SearchResult],
    budget: usize,
    lambda: f64,
    chars_per_token: usize,
    effective_top_k: usize,
) -> Vec<SearchResult> {
    let mut chosen: Vec<SearchResult> = Vec::new();
    let mut remaining: Vec<&SearchResult> = ranked.iter().collect();
    let mut seen_files: HashSet<String> = HashSet::new();
    let mut spent = 0usize;

    while chosen.len() < effective_top_k && !remaining.is_empty() {
        let mut best: Option<(usize, bool, f64)> = None;
        for (i, cand) in remaining.iter().enumerate() {
            if spent + token_cost(cand, chars_per_token) > budget {
                continue;
            }
            let fresh_file = !seen_files.contains(&cand.file);
            let max_sim = chosen
                .iter()
                .map(|c| jaccard(&cand.snippet, &c.snippet))
                .fold(0.0f64, f64::max);
            let mmr = lambda * cand.score - (1.0 - lambda) * max_sim;
            let better = match best {
                None => true,
                Some((_, best_fresh, best_score)) => {
                    (fresh_file, mmr) > (best_fresh, best_score)
                }
            };
            if better {
                best = Some((i, fresh_file, mmr));
            }
        }
        let Some((idx, _, _)) = best else { break };
        let picked = remaining.remove(idx);
        spent += token_cost(picked, chars_per_token);
        seen_files.insert(picked.file.clone());
        chosen.push(picked.clone());
    }

    fallback_if_empty(chosen, ranked, effective_top_k)
}

/// The packer never returns empty output while ranked results exist.
fn fallback_if_empty(
    chosen: Vec<SearchResult>,
    ranked: &[SearchResult],
    effective_top_k: usize,
) -> Vec<SearchResult> {
    if chosen.is_empty() && !ranked.is_empty() && effective_top_k >= 1 {
        return ranked.iter().take(effective_top_k).cloned().collect();
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(file: &str, score: f64, snippet: &str) -> Candidate {
        Candidate {
            file: file.into(),
            symbol: format!("{file}.sym"),
            start_line: 1,
            end_line: 3,
            score,
            snippet: snippet.into(),
        }
    }

    fn w(semantic: f64, lexical: f64, graph: f64, reranker: f64) -> Weights {
        Weights { semantic, lexical, graph, reranker }
    }

    #[test]
    fn lexical_signal_is_term_share() {
        assert_eq!(lexical_signal("beta", "alpha beta"), 1.0);
        assert_eq!(lexical_signal("beta delta", "alpha beta"), 0.5);
        assert_eq!(lexical_signal("", "alpha"), 0.0);
    }

    #[test]
    fn semantic_only_weights_preserve_engine_order() {
        let cands =
            vec![cand("a", 0.9, "zzz"), cand("b", 0.5, "query words here"), cand("c", 0.7, "zzz")];
        let ranked = rank(&cands, "query words", &w(1.0, 0.0, 0.0, 0.0), &HashMap::new(), None);
        let files: Vec<&str> = ranked.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["a", "c", "b"]);
    }

    #[test]
    fn lexical_only_weights_put_full_match_above_no_match() {
        let cands = vec![cand("none", 0.99, "unrelated text"), cand("full", 0.01, "create order")];
        let ranked = rank(&cands, "create order", &w(0.0, 1.0, 0.0, 0.0), &HashMap::new(), None);
        assert_eq!(ranked[0].file, "full");
    }

    #[test]
    fn hybrid_example_with_degrees() {
        // A: 0.6*0.6 + 1*0.3 + 0.5*0.1 = 0.71; B: 0.5*0.6 + 1*0.3 + 1*0.1 = 0.70
        let cands = vec![cand("a", 0.6, "alpha beta"), cand("b", 0.5, "beta gamma")];
        let mut degrees = HashMap::new();
        degrees.insert("a".to_string(), 1);
        degrees.insert("b".to_string(), 2);
        let ranked = rank(&cands, "beta", &w(0.6, 0.3, 0.1, 0.0), &degrees, None);
        assert_eq!(ranked[0].file, "a");
        assert!((ranked[0].score - 0.71).abs() < 1e-9);
        assert!((ranked[1].score - 0.70).abs() < 1e-9);
    }

    #[test]
    fn no_graph_store_means_zero_graph_signal() {
        let cands = vec![cand("a", 0.5, "x")];
        let ranked = rank(&cands, "x", &w(0.0, 0.0, 1.0, 0.0), &HashMap::new(), None);
        assert_eq!(ranked[0].signals.graph, 0.0);
    }

    #[test]
    fn reranker_defaults_to_semantic() {
        let cands = vec![cand("a", 0.42, "x")];
        let ranked = rank(&cands, "x", &w(0.5, 0.0, 0.0, 0.5), &HashMap::new(), None);
        assert!((ranked[0].signals.reranker - 0.42).abs() < 1e-12);
        let ranked = rank(&cands, "x", &w(0.5, 0.0, 0.0, 0.5), &HashMap::new(), Some(&[0.9]));
        assert!((ranked[0].signals.reranker - 0.9).abs() < 1e-12);
    }

    fn result(file: &str, score: f64, snippet: &str) -> SearchResult {
        SearchResult {
            file: file.into(),
            symbol: "s".into(),
            start_line: 1,
            end_line: 2,
            score,
            snippet: snippet.into(),
            signals: Signals::default(),
        }
    }

    #[test]
    fn greedy_prefers_one_snippet_per_file_then_fills() {
        let ranked = vec![
            result("a", 0.9, "first"),
            result("a", 0.8, "second from same file"),
            result("b", 0.7, "third"),
        ];
        let packed = pack_greedy(&ranked, 1000, 4, 3);
        let files: Vec<&str> = packed.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["a", "b", "a"]);
    }

    #[test]
    fn greedy_respects_budget() {
        let ranked = vec![result("a", 0.9, &"x".repeat(400)), result("b", 0.8, "tiny")];
        // 400 chars = 100 tokens; budget 50 only fits the tiny snippet.
        let packed = pack_greedy(&ranked, 50, 4, 5);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].file, "b");
    }

    #[test]
    fn mmr_second_pick_crosses_files_when_possible() {
        let ranked = vec![
            result("a", 0.9, "create order service handler"),
            result("a", 0.89, "create order service handler again"),
            result("b", 0.6, "totally different billing code"),
        ];
        let packed = pack_mmr(&ranked, 1000, 0.5, 4, 2);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].file, "a");
        assert_eq!(packed[1].file, "b", "diversity penalty should cross files");
    }

    #[test]
    fn mmr_diversity_holds_even_for_lambda_near_one() {
        let ranked = vec![
            result("a", 0.95, "create order service handler"),
            result("a", 0.94, "create order service handler duplicate"),
            result("b", 0.30, "unrelated billing path"),
        ];
        let packed = pack_mmr(&ranked, 1000, 0.99, 4, 2);
        assert_eq!(packed[1].file, "b");
    }

    #[test]
    fn packers_never_return_empty_when_results_exist() {
        let ranked = vec![result("a", 0.9, &"x".repeat(4000))];
        // Budget too small for anything — fall back to the head of the list.
        assert_eq!(pack_greedy(&ranked, 1, 4, 1).len(), 1);
        assert_eq!(pack_mmr(&ranked, 1, DEFAULT_MMR_LAMBDA, 4, 1).len(), 1);
    }
}
