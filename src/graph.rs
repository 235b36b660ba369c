//! SQLite graph store: files, symbols, and import edges.
//!
//! Readers see the pre-rebuild snapshot during a rebuild (WAL journal mode,
//! single rebuild transaction). Lock collisions back off with retry.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::Result;
use crate::types::{SymbolKind, SymbolMeta};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS edges (
    from_file INTEGER NOT NULL REFERENCES files(id),
    to_file INTEGER NOT NULL REFERENCES files(id),
    kind TEXT NOT NULL DEFAULT 'import',
    UNIQUE(from_file, to_file, kind)
);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_file);
";

/// Max attempts for a locked database before giving up.
const LOCK_RETRIES: usize = 3;

pub struct GraphStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

fn kind_label(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Function => "function",
        SymbolKind::Class => "class",
        SymbolKind::Method => "method",
        SymbolKind::Unknown => "unknown",
    }
}

fn kind_from_label(label: &str) -> SymbolKind {
    match label {
        "function" => SymbolKind::Function,
        "class" => SymbolKind::Class,
        "method" => SymbolKind::Method,
        _ => SymbolKind::Unknown,
    }
}

impl GraphStore {
    /// Open (creating if needed) the store at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(250))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a file row if absent and return its id.
    pub fn upsert_file(&self, path: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT OR IGNORE INTO files(path) VALUES (?1)", params![path])?;
        let id =
            conn.query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| r.get(0))?;
        Ok(id)
    }

    /// Replace all rows with the given files, symbols, and edges in one
    /// transaction: clear edges, then symbols, then files, then insert.
    /// Self-loops and duplicate edges are dropped here.
    pub fn rebuild(
        &self,
        files: &[String],
        symbols: &[SymbolMeta],
        edges: &[(String, String)],
    ) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..LOCK_RETRIES {
            match self.try_rebuild(files, symbols, edges) {
                Ok(()) => return Ok(()),
                Err(crate::error::CtxError::Sqlite(e)) if is_locked(&e) => {
                    tracing::debug!(attempt, "graph store locked, retrying");
                    std::thread::sleep(Duration::from_millis(50 << attempt));
                    last_err = Some(crate::error::CtxError::Sqlite(e));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap())
    }

    fn try_rebuild(
        &self,
        files: &[String],
        symbols: &[SymbolMeta],
        edges: &[(String, String)],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM edges", [])?;
        tx.execute("DELETE FROM symbols", [])?;
        tx.execute("DELETE FROM files", [])?;

        {
            let mut insert_file = tx.prepare("INSERT OR IGNORE INTO files(path) VALUES (?1)")?;
            for f in files {
                insert_file.execute(params![f])?;
            }

            let mut file_id = tx.prepare("SELECT id FROM files WHERE path = ?1")?;
            let mut insert_symbol = tx.prepare(
                "INSERT INTO symbols(file_id, name, kind, start_line, end_line) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in symbols {
                let fid: i64 = file_id.query_row(params![s.file], |r| r.get(0))?;
                insert_symbol.execute(params![
                    fid,
                    s.name,
                    kind_label(s.kind),
                    s.start_line as i64,
                    s.end_line as i64
                ])?;
            }

            let mut insert_edge = tx.prepare(
                "INSERT OR IGNORE INTO edges(from_file, to_file, kind) VALUES (?1, ?2, 'import')",
            )?;
            for (from, to) in edges {
                if from == to {
                    continue;
                }
                let from_id: Option<i64> =
                    file_id.query_row(params![from], |r| r.get(0)).optional()?;
                let to_id: Option<i64> = file_id.query_row(params![to], |r| r.get(0)).optional()?;
                // Edges whose endpoints are not indexed files are skipped,
                // keeping the referential invariant.
                if let (Some(f), Some(t)) = (from_id, to_id) {
                    insert_edge.execute(params![f, t])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// All symbols, or the symbols of one file; ordered by (file, start_line).
    pub fn list_symbols(&self, file: Option<&str>) -> Result<Vec<SymbolMeta>> {
        let conn = self.conn.lock().unwrap();
        let sql = "SELECT f.path, s.name, s.kind, s.start_line, s.end_line \
                   FROM symbols s JOIN files f ON f.id = s.file_id \
                   {W} ORDER BY f.path, s.start_line";
        let map_row = |r: &rusqlite::Row<'_>| {
            Ok(SymbolMeta {
                file: r.get::<_, String>(0)?,
                name: r.get::<_, String>(1)?,
                kind: kind_from_label(&r.get::<_, String>(2)?),
                start_line: r.get::<_, i64>(3)? as usize,
                end_line: r.get::<_, i64>(4)? as usize,
            })
        };
        let out = match file {
            Some(path) => {
                let mut stmt = conn.prepare(&sql.replace("{W}", "WHERE f.path = ?1"))?;
                let rows = stmt.query_map(params![path], map_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&sql.replace("{W}", ""))?;
                let rows = stmt.query_map([], map_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(out)
    }

    /// Files this file imports (outgoing edge targets).
    pub fn list_imports(&self, file: &str) -> Result<Vec<String>> {
        self.edge_query(
            "SELECT tf.path FROM edges e \
             JOIN files ff ON ff.id = e.from_file \
             JOIN files tf ON tf.id = e.to_file \
             WHERE ff.path = ?1 ORDER BY tf.path",
            file,
        )
    }

    /// Files importing this file (incoming edge sources).
    pub fn list_dependents(&self, file: &str) -> Result<Vec<String>> {
        self.edge_query(
            "SELECT ff.path FROM edges e \
             JOIN files ff ON ff.id = e.from_file \
             JOIN files tf ON tf.id = e.to_file \
             WHERE tf.path = ?1 ORDER BY ff.path",
            file,
        )
    }

    fn edge_query(&self, sql: &str, file: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![file], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Files that import any file containing a symbol whose name matches
    /// `%name%`. Substring match, deduplicated.
    pub fn find_refs(&self, symbol_name: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ff.path FROM edges e \
             JOIN files ff ON ff.id = e.from_file \
             WHERE e.to_file IN ( \
                 SELECT DISTINCT s.file_id FROM symbols s WHERE s.name LIKE ?1 \
             ) ORDER BY ff.path",
        )?;
        let pattern = format!("%{symbol_name}%");
        let rows = stmt.query_map(params![pattern], |r| r.get::<_, String>(0))?;
        let set: BTreeSet<String> = rows.collect::<std::result::Result<_, _>>()?;
        Ok(set.into_iter().collect())
    }

    /// Out-degree + in-degree for a file. Unknown files have degree 0.
    pub fn degree(&self, file: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn
            .query_row("SELECT id FROM files WHERE path = ?1", params![file], |r| r.get(0))
            .optional()?;
        let Some(id) = id else { return Ok(0) };
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE from_file = ?1 OR to_file = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// (files, symbols, edges) row counts for the architecture summary.
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let conn = self.conn.lock().unwrap();
        let files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let symbols: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        let edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;
        Ok((files as usize, symbols as usize, edges as usize))
    }

    /// All file paths currently in the store.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn is_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(file: &str, name: &str, kind: SymbolKind, start: usize, end: usize) -> SymbolMeta {
        SymbolMeta { name: name.into(), kind, file: file.into(), start_line: start, end_line: end }
    }

    fn store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(&dir.path().join("graph.db")).unwrap();
        (dir, store)
    }

    fn seed(store: &GraphStore) {
        let files = vec!["a.ts".to_string(), "b.ts".to_string(), "c.ts".to_string()];
        let symbols = vec![
            sym("a.ts", "Alpha", SymbolKind::Class, 1, 20),
            sym("a.ts", "Alpha.run", SymbolKind::Method, 5, 10),
            sym("b.ts", "beta", SymbolKind::Function, 1, 4),
        ];
        let edges = vec![
            ("b.ts".to_string(), "a.ts".to_string()),
            ("c.ts".to_string(), "a.ts".to_string()),
            ("c.ts".to_string(), "c.ts".to_string()), // self-loop, dropped
            ("b.ts".to_string(), "a.ts".to_string()), // duplicate, dropped
        ];
        store.rebuild(&files, &symbols, &edges).unwrap();
    }

    #[test]
    fn rebuild_drops_self_loops_and_duplicates() {
        let (_d, store) = store();
        seed(&store);
        let (files, symbols, edges) = store.counts().unwrap();
        assert_eq!((files, symbols, edges), (3, 3, 2));
    }

    #[test]
    fn symbols_ordered_by_file_then_start_line() {
        let (_d, store) = store();
        seed(&store);
        let all = store.list_symbols(None).unwrap();
        let keys: Vec<(String, usize)> =
            all.iter().map(|s| (s.file.clone(), s.start_line)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);

        let a_only = store.list_symbols(Some("a.ts")).unwrap();
        assert_eq!(a_only.len(), 2);
        assert_eq!(a_only[0].name, "Alpha");
    }

    #[test]
    fn imports_dependents_and_degree() {
        let (_d, store) = store();
        seed(&store);
        assert_eq!(store.list_imports("b.ts").unwrap(), vec!["a.ts"]);
        assert_eq!(store.list_dependents("a.ts").unwrap(), vec!["b.ts", "c.ts"]);
        assert_eq!(store.degree("a.ts").unwrap(), 2);
        assert_eq!(store.degree("b.ts").unwrap(), 1);
        assert_eq!(store.degree("missing.ts").unwrap(), 0);
    }

    #[test]
    fn find_refs_is_substring_and_deduplicated() {
        let (_d, store) = store();
        seed(&store);
        // "Alpha" and "Alpha.run" both live in a.ts; b.ts and c.ts import it.
        assert_eq!(store.find_refs("lpha").unwrap(), vec!["b.ts", "c.ts"]);
        assert!(store.find_refs("nonexistent").unwrap().is_empty());
    }

    #[test]
    fn upsert_file_is_stable_per_path() {
        let (_d, store) = store();
        let first = store.upsert_file("x.ts").unwrap();
        let again = store.upsert_file("x.ts").unwrap();
        assert_eq!(first, again);
        let other = store.upsert_file("y.ts").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (_d, store) = store();
        seed(&store);
        let before = store.list_symbols(None).unwrap();
        seed(&store);
        let after = store.list_symbols(None).unwrap();
        assert_eq!(
            serde_json::to_string(&before).unwrap(),
            serde_json::to_string(&after).unwrap()
        );
        assert_eq!(store.counts().unwrap(), (3, 3, 2));
    }
}
