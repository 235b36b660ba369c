//! End-to-end search pipeline: profile the query, fetch candidates, apply
//! hybrid ranking, and pack the result into the intent's token budget.

use std::collections::HashMap;

use crate::error::{CtxError, Result};
use crate::profile::{self, ContextProfile};
use crate::rank;
use crate::types::{FileMeta, SearchResult, ServerState};

/// Packing strategy for the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackStrategy {
    #[default]
    Greedy,
    Mmr,
}

/// Run one search. Sequence: profile -> candidates -> optional rerank ->
/// hybrid ranking -> pack into token budget -> clamp to effective top-K.
pub async fn search(
    state: &ServerState,
    query: &str,
    top_k: Option<usize>,
    strategy: PackStrategy,
) -> (ContextProfile, Vec<SearchResult>) {
    let prof = profile::profile(query, top_k);
    let fetch = top_k.filter(|k| *k > 0).unwrap_or(prof.effective_top_k);

    let candidates = state.engine.search(query, fetch.max(prof.effective_top_k)).await;
    let rerank_scores = state.engine.rerank(query, fetch, &candidates).await;

    let mut degrees: HashMap<String, usize> = HashMap::new();
    if let Some(graph) = &state.graph {
        for c in &candidates {
            if !degrees.contains_key(&c.file) {
                let degree = graph.degree(&c.file).unwrap_or(0);
                degrees.insert(c.file.clone(), degree);
            }
        }
    }

    let weights = state.weights.current();
    let ranked = rank::rank(&candidates, query, &weights, &degrees, rerank_scores.as_deref());

    let cpt = state.config.chars_per_token;
    let mut packed = match strategy {
        PackStrategy::Greedy => {
            rank::pack_greedy(&ranked, prof.token_budget, cpt, prof.effective_top_k)
        }
        PackStrategy::Mmr => rank::pack_mmr(
            &ranked,
            prof.token_budget,
            rank::DEFAULT_MMR_LAMBDA,
            cpt,
            prof.effective_top_k,
        ),
    };
    packed.truncate(prof.effective_top_k);

    *state.last_profile.write().unwrap() = Some(prof.clone());
    (prof, packed)
}

/// Look up an indexed file by repo-relative path. Missing means the file is
/// not indexed, not that it does not exist on disk.
pub fn get_file<'a>(state: &'a ServerState, path: &str) -> Result<&'a FileMeta> {
    state
        .files()
        .get(path)
        .ok_or_else(|| CtxError::NotFound(path.to_string()))
}
