//! Snippet manifest: serialized FileMeta and SemanticEntry documents.
//!
//! Both documents are rewritten atomically (temp file + rename) at the end
//! of an indexing pass. Readers tolerate missing or malformed files by
//! treating them as empty.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{EdgeRecord, FileMeta, SemanticEntry};

pub const INDEX_FILE: &str = "index.json";
pub const ENTRIES_FILE: &str = "semantic_entries.json";
pub const EDGES_FILE: &str = "edges.json";

/// Dimension of the hash-bucket embedding used by the ANN sink.
pub const ANN_DIM: usize = 96;

// ---------------------------------------------------------------------------
// Atomic JSON documents
// ---------------------------------------------------------------------------

/// Serialize `value` to `path` via a sibling temp file and rename.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Load a JSON array document, treating a missing or malformed file as empty.
fn load_or_empty<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "malformed manifest, treating as empty");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

pub fn load_file_meta(data_dir: &Path) -> Vec<FileMeta> {
    load_or_empty(&data_dir.join(INDEX_FILE))
}

pub fn load_entries(data_dir: &Path) -> Vec<SemanticEntry> {
    load_or_empty(&data_dir.join(ENTRIES_FILE))
}

/// Rewrite all three manifest documents atomically.
pub fn write_all(
    data_dir: &Path,
    files: &[FileMeta],
    entries: &[SemanticEntry],
    edges: &[EdgeRecord],
) -> Result<()> {
    write_atomic(&data_dir.join(INDEX_FILE), &files)?;
    write_atomic(&data_dir.join(ENTRIES_FILE), &entries)?;
    write_atomic(&data_dir.join(EDGES_FILE), &edges)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ANN sink — deterministic hash-bucket embeddings, unit L2
// ---------------------------------------------------------------------------

/// Embed text into a fixed-dimension hash-bucket vector normalized to unit
/// L2. Deterministic across runs (FNV-1a over lowercased word tokens).
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; ANN_DIM];
    for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in token.to_lowercase().bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        vec[(hash % ANN_DIM as u64) as usize] += 1.0;
    }
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vec {
            *x /= norm;
        }
    }
    vec
}

/// Upsert every entry's embedding to the configured vector service.
/// Failures are logged and swallowed — the sink never fails an index pass.
pub async fn push_ann_sink(url: &str, entries: &[SemanticEntry]) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "ann sink client unavailable");
            return;
        }
    };
    for entry in entries {
        let body = serde_json::json!({
            "id": entry.id,
            "vector": hash_embedding(&entry.text),
            "metadata": { "file": entry.file, "symbol": entry.symbol },
        });
        if let Err(e) = client.post(url).json(&body).send().await {
            tracing::debug!(id = entry.id.as_str(), error = %e, "ann sink upsert failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SymbolKind;

    fn entry(id: &str, text: &str) -> SemanticEntry {
        SemanticEntry {
            id: id.into(),
            file: "a.ts".into(),
            symbol: "a".into(),
            start_line: 1,
            end_line: 2,
            text: text.into(),
            namespace: None,
            tenant: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn atomic_write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![FileMeta {
            path: "a.ts".into(),
            content: "export function a() {}".into(),
            mtime_ms: 42,
            symbols: vec![crate::types::SymbolMeta {
                name: "a".into(),
                kind: SymbolKind::Function,
                file: "a.ts".into(),
                start_line: 1,
                end_line: 1,
            }],
            namespace: None,
            tenant: None,
            metadata: serde_json::Map::new(),
        }];
        write_all(dir.path(), &files, &[entry("a.ts:a", "x")], &[]).unwrap();

        let loaded = load_file_meta(dir.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].mtime_ms, 42);
        assert_eq!(load_entries(dir.path()).len(), 1);
        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn malformed_manifest_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), "{not json").unwrap();
        assert!(load_file_meta(dir.path()).is_empty());
        assert!(load_entries(dir.path()).is_empty());
    }

    #[test]
    fn hash_embedding_is_deterministic_and_unit_length() {
        let a = hash_embedding("createOrder places an order");
        let b = hash_embedding("createOrder places an order");
        assert_eq!(a, b);
        assert_eq!(a.len(), ANN_DIM);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // Empty text stays at the origin rather than dividing by zero
        assert!(hash_embedding("").iter().all(|x| *x == 0.0));
    }
}
