use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::config::Config;
use crate::engine::EngineClient;
use crate::graph::GraphStore;
use crate::telemetry::Telemetry;
use crate::weights::WeightManager;

// ---------------------------------------------------------------------------
// Core data model — all paths are repo-relative, forward-slash-normalized
// ---------------------------------------------------------------------------

/// The kind of an extracted symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Unknown,
}

/// A symbol inside an indexed file. Lines are 1-based, inclusive.
/// Method names are qualified `Class.method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolMeta {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// An indexed file with its content snapshot and extracted symbols.
/// Unique by `path`; `mtime_ms` keys incremental reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub path: String,
    pub content: String,
    pub mtime_ms: u64,
    pub symbols: Vec<SymbolMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One searchable snippet derived from a symbol (or a chunk of one).
/// `id` is `<file>:<symbol>` or `<file>:<symbol>:chunk<N>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticEntry {
    pub id: String,
    pub file: String,
    pub symbol: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// An import edge between two indexed files (debug serialization shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// A candidate returned by the semantic engine before ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub file: String,
    pub symbol: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub snippet: String,
}

/// Per-candidate signal breakdown used by the hybrid ranker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Signals {
    pub semantic: f64,
    pub lexical: f64,
    pub graph: f64,
    pub reranker: f64,
}

/// A ranked search result as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub file: String,
    pub symbol: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub snippet: String,
    pub signals: Signals,
}

// ---------------------------------------------------------------------------
// Server state — constructed once at startup, injected into each handler
// ---------------------------------------------------------------------------

/// Long-lived server state shared by the stdio and HTTP transports.
pub struct ServerState {
    pub config: Config,
    pub graph: Option<Arc<GraphStore>>,
    pub engine: EngineClient,
    pub weights: WeightManager,
    pub telemetry: Telemetry,
    /// FileMeta map keyed by path. Write-once per process, loaded lazily.
    files: OnceLock<BTreeMap<String, FileMeta>>,
    /// Last-served context profile (for diagnostics).
    pub last_profile: RwLock<Option<crate::profile::ContextProfile>>,
    /// Signalled by the `shutdown` RPC method.
    pub shutdown: tokio::sync::Notify,
}

impl ServerState {
    pub fn new(
        config: Config,
        graph: Option<Arc<GraphStore>>,
        engine: EngineClient,
        weights: WeightManager,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            config,
            graph,
            engine,
            weights,
            telemetry,
            files: OnceLock::new(),
            last_profile: RwLock::new(None),
            shutdown: tokio::sync::Notify::new(),
        }
    }

    /// The FileMeta map, loaded from `index.json` on first access.
    pub fn files(&self) -> &BTreeMap<String, FileMeta> {
        self.files.get_or_init(|| {
            crate::manifest::load_file_meta(&self.config.data_dir)
                .into_iter()
                .map(|f| (f.path.clone(), f))
                .collect()
        })
    }
}
