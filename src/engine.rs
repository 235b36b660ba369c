//! Semantic engine access: HTTP client to the out-of-process engine, the
//! in-process fallback engine, and the optional reranker.
//!
//! The orchestrator treats the external engine and the fallback identically;
//! both serve `GET /search?q=&top_k=` and `GET /health`.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::types::{Candidate, SemanticEntry};

/// Per-request deadline for engine calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Health probe schedule: 40 probes x 500 ms = 20 s total budget.
const HEALTH_PROBES: usize = 40;
const HEALTH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<Candidate>,
}

// ---------------------------------------------------------------------------
// Fallback scoring — bag-of-words cosine over the snippet manifest
// ---------------------------------------------------------------------------

/// Lower-cased tokens, with camelCase identifiers split into words
/// ("createOrder" -> ["create", "order"]).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut spaced = String::with_capacity(text.len() + 8);
    let mut prev_lower = false;
    for c in text.chars() {
        if c.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        spaced.push(c);
    }
    spaced
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .flat_map(|t| t.split('_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn tf_vector(text: &str) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_default() += 1.0;
    }
    let norm: f64 = counts.values().map(|c| c * c).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in counts.values_mut() {
            *v /= norm;
        }
    }
    counts
}

/// Score manifest entries against a query by normalized token-frequency
/// cosine. Only positive scores are returned, best first.
pub fn score_entries(entries: &[SemanticEntry], query: &str, top_k: usize) -> Vec<Candidate> {
    let query_vec = tf_vector(query);
    if query_vec.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(f64, &SemanticEntry)> = entries
        .iter()
        .filter_map(|entry| {
            let entry_vec = tf_vector(&entry.text);
            let dot: f64 = query_vec
                .iter()
                .filter_map(|(t, q)| entry_vec.get(t).map(|e| q * e))
                .sum();
            (dot > 0.0).then_some((dot, entry))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(score, entry)| Candidate {
            file: entry.file.clone(),
            symbol: entry.symbol.clone(),
            start_line: entry.start_line,
            end_line: entry.end_line,
            score,
            snippet: entry.text.chars().take(200).collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Fallback engine server
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    top_k: Option<usize>,
}

async fn fallback_search(
    State(entries): State<Arc<Vec<SemanticEntry>>>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let top_k = params.top_k.unwrap_or(5);
    let results = score_entries(&entries, &params.q, top_k);
    Json(SearchResponse { query: params.q, results })
}

async fn fallback_health() -> &'static str {
    "ok"
}

/// Bind the fallback engine on an ephemeral loopback port and return its
/// base URL.
pub async fn spawn_fallback(entries: Vec<SemanticEntry>) -> crate::error::Result<String> {
    let app = Router::new()
        .route("/search", get(fallback_search))
        .route("/health", get(fallback_health))
        .with_state(Arc::new(entries));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "fallback engine stopped");
        }
    });
    Ok(format!("http://127.0.0.1:{port}"))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    rerank_url: Option<String>,
    child: Option<Mutex<Child>>,
}

impl EngineClient {
    /// Startup sequence: launch the external engine when configured and
    /// wait up to 20 s on its health endpoint; otherwise (or on failure)
    /// start the in-process fallback engine over the manifest entries.
    pub async fn start(config: &Config, entries: Vec<SemanticEntry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");

        let mut child = None;
        if let Some(cmd) = &config.engine_cmd {
            match Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(c) => {
                    info!(pid = c.id(), "launched external semantic engine");
                    child = Some(c);
                }
                Err(e) => warn!(error = %e, "could not launch external engine"),
            }
        }

        if let Some(url) = external_url(config) {
            if wait_for_health(&http, &url).await {
                info!(url = url.as_str(), "using external semantic engine");
                return Self {
                    http,
                    base_url: url,
                    rerank_url: config.rerank_url.clone(),
                    child: child.map(Mutex::new),
                };
            }
            warn!(url = url.as_str(), "external engine unavailable, using fallback");
        }

        if let Some(mut c) = child.take() {
            let _ = c.kill();
        }
        let base_url = spawn_fallback(entries).await.unwrap_or_else(|e| {
            warn!(error = %e, "fallback engine failed to bind");
            String::new()
        });
        info!(url = base_url.as_str(), "in-process fallback engine ready");
        Self { http, base_url, rerank_url: config.rerank_url.clone(), child: None }
    }

    /// Client over an already-running engine (used by tests).
    pub fn for_url(base_url: String, rerank_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http, base_url, rerank_url, child: None }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch candidates. Failures of any kind yield an empty candidate set;
    /// search never propagates engine errors to the RPC surface.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<Candidate> {
        if self.base_url.is_empty() {
            return Vec::new();
        }
        let url = format!("{}/search", self.base_url);
        let top_k = top_k.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[("q", query), ("top_k", top_k.as_str())])
            .send()
            .await;
        match resp {
            Ok(r) => match r.json::<SearchResponse>().await {
                Ok(body) => body.results,
                Err(e) => {
                    debug!(error = %e, "engine response malformed");
                    Vec::new()
                }
            },
            Err(e) => {
                debug!(error = %e, "engine search failed");
                Vec::new()
            }
        }
    }

    pub async fn health(&self) -> bool {
        if self.base_url.is_empty() {
            return false;
        }
        probe(&self.http, &self.base_url).await
    }

    /// Rerank candidates, returning a score per candidate (parallel to the
    /// input). Failures are swallowed; `None` means "use the fallback".
    pub async fn rerank(&self, query: &str, top_k: usize, candidates: &[Candidate]) -> Option<Vec<f64>> {
        let url = self.rerank_url.as_ref()?;
        let payload = serde_json::json!({
            "query": query,
            "top_k": top_k,
            "candidates": candidates
                .iter()
                .map(|c| serde_json::json!({
                    "text": c.snippet,
                    "metadata": { "file": c.file, "symbol": c.symbol },
                }))
                .collect::<Vec<_>>(),
        });

        #[derive(Deserialize)]
        struct RerankItem {
            text: String,
            score: f64,
        }
        #[derive(Deserialize)]
        struct RerankResponse {
            results: Vec<RerankItem>,
        }

        let resp = self.http.post(url).json(&payload).send().await.ok()?;
        let body: RerankResponse = resp.json().await.ok()?;
        let by_text: HashMap<String, f64> =
            body.results.into_iter().map(|r| (r.text, r.score)).collect();
        Some(
            candidates
                .iter()
                .map(|c| by_text.get(&c.snippet).copied().unwrap_or(c.score))
                .collect(),
        )
    }

    /// Stop the external engine child, if we launched one.
    pub fn stop(&self) {
        if let Some(child) = &self.child {
            if let Ok(mut c) = child.lock() {
                let _ = c.kill();
                let _ = c.wait();
            }
        }
    }
}

fn external_url(config: &Config) -> Option<String> {
    match (&config.engine_url, &config.engine_cmd) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(_)) => Some("http://127.0.0.1:8000".to_string()),
        (None, None) => None,
    }
}

async fn probe(http: &reqwest::Client, base_url: &str) -> bool {
    match http.get(format!("{base_url}/health")).send().await {
        Ok(r) => r.status().is_success(),
        Err(_) => false,
    }
}

async fn wait_for_health(http: &reqwest::Client, base_url: &str) -> bool {
    for _ in 0..HEALTH_PROBES {
        if probe(http, base_url).await {
            return true;
        }
        tokio::time::sleep(HEALTH_INTERVAL).await;
    }
    false
}
