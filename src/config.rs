//! Runtime configuration, folded together from CLI flags and environment.

use std::path::{Path, PathBuf};

/// Default HTTP port for the MCP transport.
pub const DEFAULT_HTTP_PORT: u16 = 7450;

/// Source extensions analyzed structurally (the primary language family).
pub const DEFAULT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Indexing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    Full,
    #[default]
    Incremental,
}

#[derive(Clone)]
pub struct Config {
    /// Project root being indexed.
    pub root: PathBuf,
    /// Data directory holding index.json, semantic_entries.json, graph.db, logs/.
    pub data_dir: PathBuf,
    /// Graph database path (default `<data_dir>/graph.db`).
    pub graph_db: Option<PathBuf>,
    /// External semantic engine base URL, if any.
    pub engine_url: Option<String>,
    /// Command line used to launch the external engine, if any.
    pub engine_cmd: Option<String>,
    /// Optional reranker endpoint.
    pub rerank_url: Option<String>,
    /// Optional ANN vector-service endpoint for the manifest sink.
    pub ann_url: Option<String>,
    pub http_port: u16,
    /// Start the RPC surface before the first index pass completes.
    pub fast_start: bool,
    pub mode: IndexMode,
    pub namespace: Option<String>,
    pub tenant: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub extensions: Vec<String>,
    /// Target tokens per snippet chunk.
    pub chunk_token_limit: usize,
    /// Overlap between adjacent chunks, in tokens.
    pub overlap_tokens: usize,
    /// Characters per token for all token estimates.
    pub chars_per_token: usize,
    /// Default command for the run_tests tool.
    pub test_command: String,
    /// Roots clients may read from (`root` and `data_dir` are always included).
    pub allowed_roots: Vec<PathBuf>,
}

impl Config {
    pub fn new(root: PathBuf, data_dir: PathBuf) -> Self {
        let allowed_roots = vec![root.clone(), data_dir.clone()];
        Self {
            root,
            data_dir,
            graph_db: None,
            engine_url: None,
            engine_cmd: None,
            rerank_url: None,
            ann_url: None,
            http_port: DEFAULT_HTTP_PORT,
            fast_start: false,
            mode: IndexMode::Incremental,
            namespace: None,
            tenant: None,
            metadata: serde_json::Map::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            chunk_token_limit: 120,
            overlap_tokens: 20,
            chars_per_token: 4,
            test_command: "npm test".to_string(),
            allowed_roots,
        }
    }

    /// Effective graph database path.
    pub fn graph_db_path(&self) -> PathBuf {
        self.graph_db.clone().unwrap_or_else(|| self.data_dir.join("graph.db"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Normalize an absolute path to a repo-relative, forward-slash path.
pub fn rel_path(root: &Path, abs: &Path) -> String {
    abs.strip_prefix(root)
        .unwrap_or(abs)
        .to_string_lossy()
        .replace('\\', "/")
}

/// `max(1, ceil(len / chars_per_token))` — the token estimator used for both
/// chunking and context packing.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let cpt = chars_per_token.max(1);
    text.len().div_ceil(cpt).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_floors_at_one() {
        assert_eq!(estimate_tokens("", 4), 1);
        assert_eq!(estimate_tokens("ab", 4), 1);
        assert_eq!(estimate_tokens("abcd", 4), 1);
        assert_eq!(estimate_tokens("abcde", 4), 2);
    }

    #[test]
    fn rel_path_normalizes_separators() {
        let root = Path::new("/repo");
        assert_eq!(rel_path(root, Path::new("/repo/src/a.ts")), "src/a.ts");
    }
}
