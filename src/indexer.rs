//! Indexing pipeline: enumerate sources, extract symbols via tree-sitter,
//! derive the import graph, chunk snippets, and emit the stores atomically.

use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use tree_sitter::{Language, Node, Parser};

use crate::config::{estimate_tokens, rel_path, Config, IndexMode};
use crate::error::Result;
use crate::graph::GraphStore;
use crate::manifest;
use crate::policy::Policy;
use crate::types::{EdgeRecord, FileMeta, SemanticEntry, SymbolKind, SymbolMeta};

/// Directory names never descended into.
const SKIP_DIRS: &[&str] =
    &[".git", "node_modules", "dist", "build", "target", "coverage", ".next", "vendor"];

/// Summary of one indexing pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexReport {
    pub files: usize,
    pub symbols: usize,
    pub edges: usize,
    pub entries: usize,
    pub reused: usize,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Symbol extraction (tree-sitter)
// ---------------------------------------------------------------------------

fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "ts" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        _ => None,
    }
}

fn node_name(node: &Node, source: &[u8]) -> Option<String> {
    let name_node = node.child_by_field_name("name")?;
    name_node.utf8_text(source).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// 1-based start line of a node, extended backwards over attached leading
/// comments (a comment block counts as attached when it ends on the line
/// directly above).
fn start_line_with_docs(node: &Node) -> usize {
    let mut start_row = node.start_position().row;
    let mut cursor = *node;
    while let Some(prev) = cursor.prev_sibling() {
        if prev.kind() != "comment" || prev.end_position().row + 1 < start_row {
            break;
        }
        start_row = prev.start_position().row;
        cursor = prev;
    }
    start_row + 1
}

fn collect_class_methods(
    class_node: &Node,
    class_name: &str,
    file: &str,
    source: &[u8],
    out: &mut Vec<SymbolMeta>,
) {
    let Some(body) = class_node.child_by_field_name("body") else { return };
    let mut cursor = body.walk();
    for member in body.children(&mut cursor) {
        if member.kind() != "method_definition" {
            continue;
        }
        let Some(name) = node_name(&member, source) else { continue };
        out.push(SymbolMeta {
            name: format!("{class_name}.{name}"),
            kind: SymbolKind::Method,
            file: file.to_string(),
            start_line: start_line_with_docs(&member),
            end_line: member.end_position().row + 1,
        });
    }
}

fn collect_symbols<'a>(
    node: &Node<'a>,
    file: &str,
    source: &[u8],
    out: &mut Vec<SymbolMeta>,
    anchor: Option<&Node<'a>>,
) {
    // Doc comments above `export function f()` sit beside the export
    // statement, so the anchor wins for the start position.
    let start_of = |n: &Node| start_line_with_docs(anchor.unwrap_or(n));
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = node_name(node, source) {
                out.push(SymbolMeta {
                    name,
                    kind: SymbolKind::Function,
                    file: file.to_string(),
                    start_line: start_of(node),
                    end_line: node.end_position().row + 1,
                });
            }
        }
        "class_declaration" => {
            if let Some(name) = node_name(node, source) {
                out.push(SymbolMeta {
                    name: name.clone(),
                    kind: SymbolKind::Class,
                    file: file.to_string(),
                    start_line: start_of(node),
                    end_line: node.end_position().row + 1,
                });
                collect_class_methods(node, &name, file, source, out);
            }
        }
        // export function f() {} / export default class C {}
        "export_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_symbols(&child, file, source, out, Some(node));
            }
        }
        _ => {}
    }
}

/// Parse one file into its top-level symbols. Parse failures demote the
/// file to "no symbols" rather than failing the pass.
pub fn parse_symbols(content: &str, ext: &str, file: &str) -> Vec<SymbolMeta> {
    let Some(lang) = language_for_ext(ext) else { return Vec::new() };
    let mut parser = Parser::new();
    if parser.set_language(&lang).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else {
        warn!(file, "parse failed, indexing without symbols");
        return Vec::new();
    };
    let mut out = Vec::new();
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        collect_symbols(&child, file, content.as_bytes(), &mut out, None);
    }
    out.sort_by(|a, b| (a.start_line, a.end_line).cmp(&(b.start_line, b.end_line)));
    out
}

// ---------------------------------------------------------------------------
// Import derivation — AST declarations plus a regex module-graph fallback
// ---------------------------------------------------------------------------

/// Import/re-export specifiers found by the AST pass.
fn ast_import_specifiers(content: &str, ext: &str) -> Vec<String> {
    let Some(lang) = language_for_ext(ext) else { return Vec::new() };
    let mut parser = Parser::new();
    if parser.set_language(&lang).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else { return Vec::new() };

    let mut specs = Vec::new();
    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "import_statement" && child.kind() != "export_statement" {
            continue;
        }
        if let Some(source) = child.child_by_field_name("source") {
            if let Ok(text) = source.utf8_text(content.as_bytes()) {
                specs.push(text.trim_matches(['"', '\'', '`']).to_string());
            }
        }
    }
    specs
}

/// Regex pass for robustness when AST resolution comes up empty
/// (ambiguous configuration, partial parses).
fn regex_import_specifiers(content: &str) -> Vec<String> {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(
            r#"(?:from\s+['"]([^'"]+)['"]|require\s*\(\s*['"]([^'"]+)['"]\s*\)|import\s*\(\s*['"]([^'"]+)['"]\s*\))"#,
        )
        .unwrap()
    });
    re.captures_iter(content)
        .filter_map(|cap| cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Resolve an import specifier to an in-tree file, or None for externals.
fn resolve_specifier(
    spec: &str,
    importer: &str,
    paths: &HashSet<String>,
    stems: &BTreeMap<String, Vec<String>>,
) -> Option<String> {
    const CANDIDATE_EXTS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

    if spec.starts_with('.') {
        let dir = importer.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let joined = join_normalize(dir, spec);
        if paths.contains(&joined) {
            return Some(joined);
        }
        for ext in CANDIDATE_EXTS {
            let with_ext = format!("{joined}.{ext}");
            if paths.contains(&with_ext) {
                return Some(with_ext);
            }
            let index = format!("{joined}/index.{ext}");
            if paths.contains(&index) {
                return Some(index);
            }
        }
        return None;
    }

    // Bare specifier: best-effort stem match, like header-style resolution.
    let last = spec.rsplit('/').next().unwrap_or(spec);
    let stem = last.rsplit_once('.').map(|(s, _)| s).unwrap_or(last);
    stems.get(stem).and_then(|candidates| {
        candidates.iter().find(|c| c.ends_with(&format!("/{last}")) || c.as_str() == last).cloned()
    })
}

fn join_normalize(dir: &str, spec: &str) -> String {
    let mut parts: Vec<&str> = if dir.is_empty() { Vec::new() } else { dir.split('/').collect() };
    for seg in spec.split('/') {
        match seg {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Derive import edges for every file: union of the AST pass and the regex
/// fallback pass, deduplicated, self-loops dropped.
fn derive_edges(files: &[(String, String, String)]) -> Vec<(String, String)> {
    let paths: HashSet<String> = files.iter().map(|(p, _, _)| p.clone()).collect();
    let mut stems: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (path, _, _) in files {
        let name = path.rsplit('/').next().unwrap_or(path);
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
        stems.entry(stem.to_string()).or_default().push(path.clone());
    }

    let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
    for (path, ext, content) in files {
        let mut specs = ast_import_specifiers(content, ext);
        specs.extend(regex_import_specifiers(content));
        for spec in specs {
            if let Some(target) = resolve_specifier(&spec, path, &paths, &stems) {
                if target != *path {
                    edges.insert((path.clone(), target));
                }
            }
        }
    }
    edges.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Snippet chunking
// ---------------------------------------------------------------------------

/// Chunk a symbol's source lines into token-bounded windows with overlap.
/// Returns absolute (start_line, end_line, text) triples; every chunk
/// advances at least one line.
pub fn chunk_lines(
    lines: &[&str],
    first_line: usize,
    token_limit: usize,
    overlap_tokens: usize,
    chars_per_token: usize,
) -> Vec<(usize, usize, String)> {
    if lines.is_empty() {
        return Vec::new();
    }
    let cost = |line: &str| estimate_tokens(line, chars_per_token);

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let mut tokens = 0usize;
        let mut end = start;
        while end < lines.len() && (end == start || tokens + cost(lines[end]) <= token_limit) {
            tokens += cost(lines[end]);
            end += 1;
        }
        out.push((
            first_line + start,
            first_line + end - 1,
            lines[start..end].join("\n"),
        ));
        if end >= lines.len() {
            break;
        }
        // Step back to create the overlap, but always advance.
        let mut next = end;
        let mut back = 0usize;
        while next > start + 1 && back < overlap_tokens {
            next -= 1;
            back += cost(lines[next]);
        }
        start = next.max(start + 1);
    }
    out
}

fn entries_for_file(file: &FileMeta, config: &Config) -> Vec<SemanticEntry> {
    let lines: Vec<&str> = file.content.lines().collect();
    let mut out = Vec::new();
    for sym in &file.symbols {
        let start = sym.start_line.saturating_sub(1).min(lines.len());
        let end = sym.end_line.min(lines.len());
        if start >= end {
            continue;
        }
        let chunks = chunk_lines(
            &lines[start..end],
            sym.start_line,
            config.chunk_token_limit,
            config.overlap_tokens,
            config.chars_per_token,
        );
        let single = chunks.len() == 1;
        for (n, (start_line, end_line, text)) in chunks.into_iter().enumerate() {
            let id = if single {
                format!("{}:{}", file.path, sym.name)
            } else {
                format!("{}:{}:chunk{}", file.path, sym.name, n)
            };
            out.push(SemanticEntry {
                id,
                file: file.path.clone(),
                symbol: sym.name.clone(),
                start_line,
                end_line,
                text,
                namespace: file.namespace.clone(),
                tenant: file.tenant.clone(),
                metadata: file.metadata.clone(),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pass driver
// ---------------------------------------------------------------------------

fn enumerate_sources(config: &Config) -> Vec<(PathBuf, String)> {
    let policy = Policy::new(std::slice::from_ref(&config.root));
    let exts: HashSet<&str> = config.extensions.iter().map(|s| s.as_str()).collect();
    let results: Mutex<Vec<(PathBuf, String)>> = Mutex::new(Vec::new());

    WalkBuilder::new(&config.root)
        .hidden(true)
        .git_ignore(false)
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !SKIP_DIRS.contains(&name.as_ref());
            }
            true
        })
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let Ok(entry) = entry else { return ignore::WalkState::Continue };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }
                let abs = entry.path().to_path_buf();
                let ext = abs.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !exts.contains(ext) || !policy.allows(&abs) {
                    return ignore::WalkState::Continue;
                }
                let rel = rel_path(&config.root, &abs);
                results.lock().unwrap().push((abs, rel));
                ignore::WalkState::Continue
            })
        });

    let mut files = results.into_inner().unwrap();
    files.sort_by(|a, b| a.1.cmp(&b.1));
    files
}

fn mtime_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Run one indexing pass over `config.root`, writing the snippet manifest
/// and (when configured) the graph store.
pub fn run_index(config: &Config, graph: Option<&GraphStore>) -> Result<IndexReport> {
    let start = std::time::Instant::now();

    // Previous snapshot for incremental reuse.
    let (prev_files, prev_entries): (BTreeMap<String, FileMeta>, BTreeMap<String, Vec<SemanticEntry>>) =
        if config.mode == IndexMode::Incremental {
            let files = manifest::load_file_meta(&config.data_dir)
                .into_iter()
                .map(|f| (f.path.clone(), f))
                .collect();
            let mut by_file: BTreeMap<String, Vec<SemanticEntry>> = BTreeMap::new();
            for e in manifest::load_entries(&config.data_dir) {
                by_file.entry(e.file.clone()).or_default().push(e);
            }
            (files, by_file)
        } else {
            (BTreeMap::new(), BTreeMap::new())
        };

    let sources = enumerate_sources(config);
    let mut reused = 0usize;

    let parsed: Vec<(FileMeta, Vec<SemanticEntry>, bool)> = sources
        .par_iter()
        .filter_map(|(abs, rel)| {
            let content = match std::fs::read_to_string(abs) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = rel.as_str(), error = %e, "skipping unreadable file");
                    return None;
                }
            };
            let mtime = mtime_ms(abs);
            let ext = abs.extension().and_then(|e| e.to_str()).unwrap_or("");

            // Reuse the previous records verbatim when the mtime is
            // unchanged, refreshing only namespace/tenant/metadata.
            if let Some(prev) = prev_files.get(rel) {
                if prev.mtime_ms == mtime {
                    let mut meta = prev.clone();
                    meta.namespace = config.namespace.clone();
                    meta.tenant = config.tenant.clone();
                    meta.metadata = config.metadata.clone();
                    let entries = prev_entries
                        .get(rel)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|mut e| {
                            e.namespace = config.namespace.clone();
                            e.tenant = config.tenant.clone();
                            e.metadata = config.metadata.clone();
                            e
                        })
                        .collect();
                    return Some((meta, entries, true));
                }
            }

            let symbols = parse_symbols(&content, ext, rel);
            let meta = FileMeta {
                path: rel.clone(),
                content,
                mtime_ms: mtime,
                symbols,
                namespace: config.namespace.clone(),
                tenant: config.tenant.clone(),
                metadata: config.metadata.clone(),
            };
            let entries = entries_for_file(&meta, config);
            Some((meta, entries, false))
        })
        .collect();

    let mut files: Vec<FileMeta> = Vec::with_capacity(parsed.len());
    let mut entries: Vec<SemanticEntry> = Vec::new();
    for (meta, file_entries, was_reused) in parsed {
        if was_reused {
            reused += 1;
        }
        files.push(meta);
        entries.extend(file_entries);
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    entries.sort_by(|a, b| (&a.file, a.start_line, &a.id).cmp(&(&b.file, b.start_line, &b.id)));

    let edge_input: Vec<(String, String, String)> = files
        .iter()
        .map(|f| {
            let ext = f.path.rsplit_once('.').map(|(_, e)| e).unwrap_or("").to_string();
            (f.path.clone(), ext, f.content.clone())
        })
        .collect();
    let edges = derive_edges(&edge_input);

    let edge_records: Vec<EdgeRecord> =
        edges.iter().map(|(f, t)| EdgeRecord { from: f.clone(), to: t.clone() }).collect();
    manifest::write_all(&config.data_dir, &files, &entries, &edge_records)?;

    if let Some(store) = graph {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let symbols: Vec<SymbolMeta> = files.iter().flat_map(|f| f.symbols.clone()).collect();
        store.rebuild(&paths, &symbols, &edges)?;
    }

    if let Some(url) = config.ann_url.clone() {
        let sink_entries = entries.clone();
        std::thread::spawn(move || {
            if let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() {
                rt.block_on(manifest::push_ann_sink(&url, &sink_entries));
            }
        });
    }

    let report = IndexReport {
        files: files.len(),
        symbols: files.iter().map(|f| f.symbols.len()).sum(),
        edges: edges.len(),
        entries: entries.len(),
        reused,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        files = report.files,
        symbols = report.symbols,
        edges = report.edges,
        entries = report.entries,
        reused = report.reused,
        time_ms = report.duration_ms,
        "index pass complete"
    );
    debug!(data_dir = %config.data_dir.display(), "manifests written");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_SERVICE: &str = r#"// Order management service.
import { Item } from './item';

export class OrderService {
  // Create a new order from raw items.
  createOrder(items: string[]) {
    return { id: 1, items };
  }

  cancelOrder(id: number) {
    return id;
  }
}

export function formatOrder(order: { id: number }) {
  return `#${order.id}`;
}
"#;

    #[test]
    fn extracts_classes_methods_and_functions() {
        let syms = parse_symbols(ORDER_SERVICE, "ts", "orders/order.service.ts");
        let names: Vec<&str> = syms.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"OrderService"));
        assert!(names.contains(&"OrderService.createOrder"));
        assert!(names.contains(&"OrderService.cancelOrder"));
        assert!(names.contains(&"formatOrder"));

        let class = syms.iter().find(|s| s.name == "OrderService").unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        // Leading comment lines attach to the declaration start.
        let create = syms.iter().find(|s| s.name == "OrderService.createOrder").unwrap();
        assert_eq!(create.kind, SymbolKind::Method);
        assert_eq!(create.start_line, 5, "doc comment should extend the start");
        assert!(create.start_line <= create.end_line);
    }

    #[test]
    fn parse_failure_means_no_symbols_not_an_error() {
        assert!(parse_symbols("not a language we parse", "md", "README.md").is_empty());
    }

    #[test]
    fn resolves_relative_imports_and_drops_self_loops() {
        let files = vec![
            (
                "orders/order.service.ts".to_string(),
                "ts".to_string(),
                "import { Item } from './item';\nimport self from './order.service';".to_string(),
            ),
            ("orders/item.ts".to_string(), "ts".to_string(), "export class Item {}".to_string()),
        ];
        let edges = derive_edges(&files);
        assert_eq!(
            edges,
            vec![("orders/order.service.ts".to_string(), "orders/item.ts".to_string())]
        );
    }

    #[test]
    fn regex_pass_catches_require_calls() {
        let files = vec![
            (
                "a.js".to_string(),
                "js".to_string(),
                "const b = require('./b');".to_string(),
            ),
            ("b.js".to_string(), "js".to_string(), "module.exports = 1;".to_string()),
        ];
        let edges = derive_edges(&files);
        assert_eq!(edges, vec![("a.js".to_string(), "b.js".to_string())]);
    }

    #[test]
    fn chunks_cover_all_lines_and_always_advance() {
        let text: Vec<String> = (1..=40).map(|i| format!("line number {i} with some text")).collect();
        let lines: Vec<&str> = text.iter().map(|s| s.as_str()).collect();
        let chunks = chunk_lines(&lines, 10, 20, 5, 4);
        assert!(chunks.len() > 1, "long symbol should split");
        assert_eq!(chunks[0].0, 10);
        assert_eq!(chunks.last().unwrap().1, 49);
        for pair in chunks.windows(2) {
            assert!(pair[1].0 > pair[0].0, "every chunk advances at least one line");
        }
    }

    #[test]
    fn tiny_symbol_is_a_single_chunk() {
        let lines = vec!["function a() {", "  return 1;", "}"];
        let chunks = chunk_lines(&lines, 3, 120, 20, 4);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].0, chunks[0].1), (3, 5));
    }

    #[test]
    fn full_pass_then_incremental_reuses_unchanged_files() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("orders")).unwrap();
        std::fs::write(root.path().join("orders/order.service.ts"), ORDER_SERVICE).unwrap();
        std::fs::write(root.path().join("orders/item.ts"), "export class Item {}\n").unwrap();

        let mut config =
            Config::new(root.path().to_path_buf(), data.path().to_path_buf());
        config.mode = IndexMode::Full;
        let first = run_index(&config, None).unwrap();
        assert_eq!(first.files, 2);
        assert!(first.symbols >= 4);
        assert_eq!(first.edges, 1);
        assert_eq!(first.reused, 0);

        let first_entries = manifest::load_entries(data.path());

        // Touch only item.ts; order.service.ts records must be reused verbatim.
        let item = root.path().join("orders/item.ts");
        std::fs::write(&item, "export class Item { tag() { return 'x'; } }\n").unwrap();
        let bumped = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let _ = std::fs::File::open(&item).and_then(|f| f.set_modified(bumped));

        config.mode = IndexMode::Incremental;
        let second = run_index(&config, None).unwrap();
        assert!(second.reused >= 1, "unchanged file should be reused");

        let second_entries = manifest::load_entries(data.path());
        let firsts: Vec<_> =
            first_entries.iter().filter(|e| e.file == "orders/order.service.ts").collect();
        let seconds: Vec<_> =
            second_entries.iter().filter(|e| e.file == "orders/order.service.ts").collect();
        assert_eq!(
            serde_json::to_string(&firsts).unwrap(),
            serde_json::to_string(&seconds).unwrap()
        );
    }

    #[test]
    fn reindex_of_unchanged_tree_is_byte_identical() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.ts"), "export function a() { return 1; }\n").unwrap();
        std::fs::write(root.path().join("b.ts"), "import { a } from './a';\n").unwrap();

        let config = Config::new(root.path().to_path_buf(), data.path().to_path_buf());
        run_index(&config, None).unwrap();
        let index1 = std::fs::read(data.path().join(manifest::INDEX_FILE)).unwrap();
        let entries1 = std::fs::read(data.path().join(manifest::ENTRIES_FILE)).unwrap();

        run_index(&config, None).unwrap();
        let index2 = std::fs::read(data.path().join(manifest::INDEX_FILE)).unwrap();
        let entries2 = std::fs::read(data.path().join(manifest::ENTRIES_FILE)).unwrap();

        assert_eq!(index1, index2);
        assert_eq!(entries1, entries2);
    }

    #[test]
    fn graph_store_invariants_hold_after_a_pass() {
        let root = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("orders")).unwrap();
        std::fs::write(root.path().join("orders/order.service.ts"), ORDER_SERVICE).unwrap();
        std::fs::write(root.path().join("orders/item.ts"), "export class Item {}\n").unwrap();

        let store = GraphStore::open(&data.path().join("graph.db")).unwrap();
        let config = Config::new(root.path().to_path_buf(), data.path().to_path_buf());
        run_index(&config, Some(&store)).unwrap();

        // I5: manifest files equal graph files (set equality).
        let manifest_files: std::collections::BTreeSet<String> =
            manifest::load_file_meta(data.path()).into_iter().map(|f| f.path).collect();
        let graph_files: std::collections::BTreeSet<String> =
            store.list_files().unwrap().into_iter().collect();
        assert_eq!(manifest_files, graph_files);

        // I2: every entry references an indexed file; I4: symbol.file matches.
        for e in manifest::load_entries(data.path()) {
            assert!(manifest_files.contains(&e.file), "dangling entry {}", e.id);
        }
        for s in store.list_symbols(None).unwrap() {
            assert!(graph_files.contains(&s.file));
            assert!(s.start_line <= s.end_line);
        }

        // I1: both edge endpoints are indexed files.
        for s in store.list_dependents("orders/item.ts").unwrap() {
            assert!(graph_files.contains(&s));
        }
    }
}
