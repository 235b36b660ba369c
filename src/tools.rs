//! MCP tool registry: a name-keyed table of handlers.
//!
//! Handlers return `(text, is_error)`; structured payloads are serialized
//! as JSON text inside the tool result.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use crate::error::CtxError;
use crate::orchestrator::{self, PackStrategy};
use crate::policy::Policy;
use crate::types::{ServerState, SymbolKind, SymbolMeta};
use crate::weights::Feedback;

type BoxFut = Pin<Box<dyn Future<Output = (String, bool)> + Send>>;
type Handler = fn(Arc<ServerState>, Value) -> BoxFut;

fn err(msg: impl std::fmt::Display) -> (String, bool) {
    (format!("Error: {msg}"), true)
}

fn ok_json(value: &impl serde::Serialize) -> (String, bool) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => (text, false),
        Err(e) => err(e),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

macro_rules! registry_entries {
    ($($name:literal => $func:ident),+ $(,)?) => {{
        let mut map: BTreeMap<&'static str, Handler> = BTreeMap::new();
        $(map.insert(
            $name,
            (|state: Arc<ServerState>, args: Value| -> BoxFut {
                Box::pin($func(state, args))
            }) as Handler,
        );)+
        map
    }};
}

fn registry() -> &'static BTreeMap<&'static str, Handler> {
    static REGISTRY: OnceLock<BTreeMap<&'static str, Handler>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        registry_entries! {
            "search_code" => search_code,
            "get_file" => get_file,
            "list_symbols" => list_symbols,
            "find_refs" => find_refs,
            "plan_refactor" => plan_refactor,
            "gen_patch" => gen_patch,
            "apply_patch" => apply_patch,
            "analyze_performance" => analyze_performance,
            "compare_versions" => compare_versions,
            "auto_docs" => auto_docs,
            "run_tests" => run_tests,
            "run_task" => run_task,
            "generate_telemetry_panel" => generate_telemetry_panel,
            "open_telemetry_webview" => open_telemetry_webview,
            "langchain_query" => langchain_query,
            "summarize_architecture" => summarize_architecture,
            "detect_smells" => detect_smells,
            "suggest_tests" => suggest_tests,
            "submit_feedback" => submit_feedback,
            "get_weights" => get_weights,
            "roots-list" => roots_list,
        }
    })
}

/// Invoke a tool by name. Unknown tools produce an error result, not a
/// protocol error.
pub async fn call(state: Arc<ServerState>, name: &str, args: Value) -> (String, bool) {
    match registry().get(name) {
        Some(handler) => handler(state, args).await,
        None => err(format!("unknown tool '{name}'")),
    }
}

/// Tool metadata for `tools/list`.
pub fn definitions() -> Vec<Value> {
    fn schema(props: Value, required: &[&str]) -> Value {
        json!({ "type": "object", "properties": props, "required": required })
    }
    let path_prop = json!({ "path": { "type": "string", "description": "Repo-relative path" } });

    vec![
        json!({
            "name": "search_code",
            "description": "Hybrid code search: semantic + lexical + import-graph ranking, packed into an intent-derived token budget.",
            "inputSchema": schema(json!({
                "query": { "type": "string" },
                "topK": { "type": "integer" },
                "strategy": { "type": "string", "enum": ["greedy", "mmr"] }
            }), &["query"]),
        }),
        json!({
            "name": "get_file",
            "description": "Fetch an indexed file's content.",
            "inputSchema": schema(path_prop.clone(), &["path"]),
        }),
        json!({
            "name": "list_symbols",
            "description": "List indexed symbols, for one file or the whole tree.",
            "inputSchema": schema(json!({ "file": { "type": "string" } }), &[]),
        }),
        json!({
            "name": "find_refs",
            "description": "Files importing any file that defines a symbol matching the given name (substring match).",
            "inputSchema": schema(json!({ "symbol": { "type": "string" } }), &["symbol"]),
        }),
        json!({
            "name": "plan_refactor",
            "description": "Draft a refactor plan for a file: affected symbols, dependents, and suggested steps.",
            "inputSchema": schema(path_prop.clone(), &["path"]),
        }),
        json!({
            "name": "gen_patch",
            "description": "Preview a literal find/replace patch without applying it.",
            "inputSchema": schema(json!({
                "path": { "type": "string" },
                "find": { "type": "string" },
                "replace": { "type": "string" }
            }), &["path", "find", "replace"]),
        }),
        json!({
            "name": "apply_patch",
            "description": "Apply a literal find/replace patch to a file under the allowed roots.",
            "inputSchema": schema(json!({
                "path": { "type": "string" },
                "find": { "type": "string" },
                "replace": { "type": "string" }
            }), &["path", "find", "replace"]),
        }),
        json!({
            "name": "analyze_performance",
            "description": "Heuristic performance review of a file: long functions, loop density.",
            "inputSchema": schema(path_prop.clone(), &["path"]),
        }),
        json!({
            "name": "compare_versions",
            "description": "Line-level comparison between the indexed file and a provided baseline text.",
            "inputSchema": schema(json!({
                "path": { "type": "string" },
                "baseline": { "type": "string" }
            }), &["path", "baseline"]),
        }),
        json!({
            "name": "auto_docs",
            "description": "Generate a markdown outline of a file's symbols.",
            "inputSchema": schema(path_prop.clone(), &["path"]),
        }),
        json!({
            "name": "run_tests",
            "description": "Run the project's test command and capture output. No timeout is applied.",
            "inputSchema": schema(json!({ "command": { "type": "string" } }), &[]),
        }),
        json!({
            "name": "run_task",
            "description": "Run an arbitrary shell command in the project root and capture output.",
            "inputSchema": schema(json!({ "command": { "type": "string" } }), &["command"]),
        }),
        json!({
            "name": "generate_telemetry_panel",
            "description": "Render the telemetry aggregate as a static HTML panel.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "open_telemetry_webview",
            "description": "Return the file:// URL of the telemetry panel.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "langchain_query",
            "description": "Search and stitch the top snippets into a single context block for LLM chains.",
            "inputSchema": schema(json!({
                "query": { "type": "string" },
                "topK": { "type": "integer" }
            }), &["query"]),
        }),
        json!({
            "name": "summarize_architecture",
            "description": "Counts of files, symbols, and import edges plus the most connected files.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "detect_smells",
            "description": "Flag long functions, oversized files, and high fan-in hotspots.",
            "inputSchema": schema(json!({ "file": { "type": "string" } }), &[]),
        }),
        json!({
            "name": "suggest_tests",
            "description": "Suggest test cases for the functions and methods of a file.",
            "inputSchema": schema(path_prop, &["path"]),
        }),
        json!({
            "name": "submit_feedback",
            "description": "Report search relevance feedback; nudges the hybrid ranking weights.",
            "inputSchema": schema(json!({
                "direction": { "type": "string", "enum": ["up", "down"] }
            }), &["direction"]),
        }),
        json!({
            "name": "get_weights",
            "description": "Current hybrid ranking weights.",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "roots-list",
            "description": "List the allowed filesystem roots.",
            "inputSchema": schema(json!({}), &[]),
        }),
    ]
}

// ---------------------------------------------------------------------------
// Search and retrieval
// ---------------------------------------------------------------------------

async fn search_code(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let query = args["query"].as_str().unwrap_or("");
    if query.is_empty() {
        return err("'query' is required");
    }
    let top_k = args["topK"].as_u64().map(|k| k as usize);
    let strategy = match args["strategy"].as_str() {
        Some("mmr") => PackStrategy::Mmr,
        _ => PackStrategy::Greedy,
    };
    let (_, results) = orchestrator::search(&state, query, top_k, strategy).await;
    ok_json(&results)
}

async fn get_file(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    match orchestrator::get_file(&state, path) {
        Ok(meta) => (meta.content.clone(), false),
        Err(e) => err(e),
    }
}

fn symbols_from_manifest(state: &ServerState, file: Option<&str>) -> Vec<SymbolMeta> {
    let mut out: Vec<SymbolMeta> = state
        .files()
        .values()
        .filter(|f| file.map(|p| f.path == p).unwrap_or(true))
        .flat_map(|f| f.symbols.clone())
        .collect();
    out.sort_by(|a, b| (&a.file, a.start_line).cmp(&(&b.file, b.start_line)));
    out
}

async fn list_symbols(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let file = args["file"].as_str();
    let symbols = match &state.graph {
        Some(graph) => match graph.list_symbols(file) {
            Ok(syms) => syms,
            Err(e) => return err(e),
        },
        None => symbols_from_manifest(&state, file),
    };
    ok_json(&symbols)
}

async fn find_refs(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let symbol = args["symbol"].as_str().unwrap_or("");
    if symbol.is_empty() {
        return err("'symbol' is required");
    }
    let refs = match &state.graph {
        Some(graph) => match graph.find_refs(symbol) {
            Ok(refs) => refs,
            Err(e) => return err(e),
        },
        None => Vec::new(),
    };
    ok_json(&refs)
}

// ---------------------------------------------------------------------------
// Refactor / docs / perf helpers
// ---------------------------------------------------------------------------

async fn plan_refactor(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };

    let dependents = state
        .graph
        .as_ref()
        .and_then(|g| g.list_dependents(path).ok())
        .unwrap_or_default();
    let imports = state
        .graph
        .as_ref()
        .and_then(|g| g.list_imports(path).ok())
        .unwrap_or_default();

    let mut out = format!("Refactor plan for {path}\n\n");
    out.push_str(&format!("Symbols ({}):\n", meta.symbols.len()));
    for s in &meta.symbols {
        out.push_str(&format!("  {} (lines {}-{})\n", s.name, s.start_line, s.end_line));
    }
    if !imports.is_empty() {
        out.push_str(&format!("\nImports ({}):\n", imports.len()));
        for i in &imports {
            out.push_str(&format!("  {i}\n"));
        }
    }
    if !dependents.is_empty() {
        out.push_str(&format!("\nDependents to re-verify ({}):\n", dependents.len()));
        for d in &dependents {
            out.push_str(&format!("  {d}\n"));
        }
    }
    out.push_str(
        "\nSteps:\n  1. Change one symbol at a time; keep exports stable.\n  \
         2. Update each dependent listed above.\n  3. Re-run the test suite.\n",
    );
    (out, false)
}

async fn gen_patch(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let (path, find, replace) = match patch_args(&args) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };
    let occurrences = meta.content.matches(find).count();
    let preview: Vec<String> = meta
        .content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(find))
        .map(|(i, line)| format!("L{}: - {}\nL{}: + {}", i + 1, line, i + 1, line.replace(find, replace)))
        .collect();
    ok_json(&json!({
        "file": path,
        "find": find,
        "replace": replace,
        "occurrences": occurrences,
        "preview": preview,
    }))
}

async fn apply_patch(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let (path, find, replace) = match patch_args(&args) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let abs = state.config.root.join(path);
    let policy = Policy::new(&state.config.allowed_roots);
    let content = match policy.read(&abs) {
        Ok(c) => c,
        Err(e) => return err(e),
    };
    let replaced = content.matches(find).count();
    if replaced == 0 {
        return err(format!("'{find}' not found in {path}"));
    }
    if let Err(e) = std::fs::write(&abs, content.replace(find, replace)) {
        return err(CtxError::Io(e));
    }
    ok_json(&json!({ "file": path, "replaced": replaced }))
}

fn patch_args(args: &Value) -> std::result::Result<(&str, &str, &str), String> {
    let path = args["path"].as_str().unwrap_or("");
    let find = args["find"].as_str().unwrap_or("");
    let replace = args["replace"].as_str().unwrap_or("");
    if path.is_empty() || find.is_empty() {
        return Err("'path' and 'find' are required".to_string());
    }
    Ok((path, find, replace))
}

async fn analyze_performance(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };

    let long_functions: Vec<Value> = meta
        .symbols
        .iter()
        .filter(|s| s.kind != SymbolKind::Class && s.end_line - s.start_line > 60)
        .map(|s| json!({ "symbol": s.name, "lines": s.end_line - s.start_line + 1 }))
        .collect();
    let loop_count = meta
        .content
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("for ") || t.starts_with("for(") || t.starts_with("while ")
                || t.starts_with("while(")
        })
        .count();
    ok_json(&json!({
        "file": path,
        "lines": meta.content.lines().count(),
        "loops": loop_count,
        "longFunctions": long_functions,
    }))
}

async fn compare_versions(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    let baseline = args["baseline"].as_str().unwrap_or("");
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };

    let old: std::collections::HashSet<&str> = baseline.lines().collect();
    let new: std::collections::HashSet<&str> = meta.content.lines().collect();
    let added: Vec<&str> = new.difference(&old).copied().collect();
    let removed: Vec<&str> = old.difference(&new).copied().collect();
    ok_json(&json!({
        "file": path,
        "addedLines": added.len(),
        "removedLines": removed.len(),
        "added": added,
        "removed": removed,
    }))
}

async fn auto_docs(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };
    let lines: Vec<&str> = meta.content.lines().collect();
    let mut out = format!("# {path}\n\n");
    for s in &meta.symbols {
        let label = match s.kind {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Unknown => "symbol",
        };
        out.push_str(&format!("## `{}` ({label}, lines {}-{})\n\n", s.name, s.start_line, s.end_line));
        if let Some(first) = lines.get(s.start_line.saturating_sub(1)) {
            out.push_str(&format!("```\n{}\n```\n\n", first.trim()));
        }
    }
    (out, false)
}

// ---------------------------------------------------------------------------
// Shell-outs — the caller is expected to provide any timeout
// ---------------------------------------------------------------------------

async fn run_command(state: &ServerState, command: &str) -> (String, bool) {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&state.config.root)
        .output()
        .await;
    match output {
        Ok(out) => {
            let status = out.status.code().unwrap_or(-1);
            let text = format!(
                "exit: {status}\n--- stdout ---\n{}\n--- stderr ---\n{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr),
            );
            (text, !out.status.success())
        }
        Err(e) => err(e),
    }
}

async fn run_tests(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let command = args["command"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| state.config.test_command.clone());
    run_command(&state, &command).await
}

async fn run_task(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let Some(command) = args["command"].as_str() else {
        return err("'command' is required");
    };
    run_command(&state, command).await
}

// ---------------------------------------------------------------------------
// Telemetry, architecture, weights
// ---------------------------------------------------------------------------

async fn generate_telemetry_panel(state: Arc<ServerState>, _args: Value) -> (String, bool) {
    match state.telemetry.write_panel() {
        Ok(path) => (format!("panel written to {}", path.display()), false),
        Err(e) => err(e),
    }
}

async fn open_telemetry_webview(state: Arc<ServerState>, _args: Value) -> (String, bool) {
    if let Err(e) = state.telemetry.write_panel() {
        return err(e);
    }
    (format!("file://{}", state.telemetry.panel_path().display()), false)
}

async fn langchain_query(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let query = args["query"].as_str().unwrap_or("");
    if query.is_empty() {
        return err("'query' is required");
    }
    let top_k = args["topK"].as_u64().map(|k| k as usize);
    let (profile, results) =
        orchestrator::search(&state, query, top_k, PackStrategy::Greedy).await;
    let mut out = format!(
        "Context for: {query}\nIntent: {:?} | budget: {} tokens\n\n",
        profile.intent, profile.token_budget
    );
    for r in &results {
        out.push_str(&format!(
            "--- {} :: {} (lines {}-{}, score {:.3}) ---\n{}\n\n",
            r.file, r.symbol, r.start_line, r.end_line, r.score, r.snippet
        ));
    }
    (out, false)
}

async fn summarize_architecture(state: Arc<ServerState>, _args: Value) -> (String, bool) {
    let (files, symbols, edges) = match &state.graph {
        Some(graph) => match graph.counts() {
            Ok(c) => c,
            Err(e) => return err(e),
        },
        None => {
            let files = state.files();
            (files.len(), files.values().map(|f| f.symbols.len()).sum(), 0)
        }
    };

    let mut top_files: Vec<Value> = Vec::new();
    if let Some(graph) = &state.graph {
        if let Ok(paths) = graph.list_files() {
            let mut by_degree: Vec<(String, usize)> = paths
                .into_iter()
                .map(|p| {
                    let d = graph.degree(&p).unwrap_or(0);
                    (p, d)
                })
                .collect();
            by_degree.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            top_files = by_degree
                .into_iter()
                .take(10)
                .map(|(path, degree)| json!({ "path": path, "degree": degree }))
                .collect();
        }
    }
    ok_json(&json!({
        "files": files,
        "symbols": symbols,
        "edges": edges,
        "topFiles": top_files,
    }))
}

async fn detect_smells(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let only = args["file"].as_str();
    let mut smells: Vec<Value> = Vec::new();
    for meta in state.files().values() {
        if only.map(|p| meta.path != p).unwrap_or(false) {
            continue;
        }
        let line_count = meta.content.lines().count();
        if line_count > 500 {
            smells.push(json!({
                "file": meta.path, "kind": "large-file", "lines": line_count,
            }));
        }
        for s in &meta.symbols {
            if s.kind != SymbolKind::Class && s.end_line - s.start_line > 80 {
                smells.push(json!({
                    "file": meta.path, "kind": "long-function", "symbol": s.name,
                    "lines": s.end_line - s.start_line + 1,
                }));
            }
        }
        if let Some(graph) = &state.graph {
            if let Ok(deps) = graph.list_dependents(&meta.path) {
                if deps.len() > 5 {
                    smells.push(json!({
                        "file": meta.path, "kind": "high-fan-in", "dependents": deps.len(),
                    }));
                }
            }
        }
    }
    ok_json(&smells)
}

async fn suggest_tests(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let path = args["path"].as_str().unwrap_or("");
    let meta = match orchestrator::get_file(&state, path) {
        Ok(m) => m,
        Err(e) => return err(e),
    };
    let suggestions: Vec<Value> = meta
        .symbols
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        .flat_map(|s| {
            let base = s.name.rsplit('.').next().unwrap_or(&s.name).to_string();
            vec![
                json!({ "symbol": s.name, "case": format!("{base} returns the expected result for typical input") }),
                json!({ "symbol": s.name, "case": format!("{base} handles empty or invalid input") }),
            ]
        })
        .collect();
    ok_json(&suggestions)
}

async fn submit_feedback(state: Arc<ServerState>, args: Value) -> (String, bool) {
    let direction = match args["direction"].as_str() {
        Some("up") => Feedback::Up,
        Some("down") => Feedback::Down,
        _ => return err("'direction' must be 'up' or 'down'"),
    };
    match state.weights.feedback(direction) {
        Ok(weights) => ok_json(&weights),
        Err(e) => err(e),
    }
}

async fn get_weights(state: Arc<ServerState>, _args: Value) -> (String, bool) {
    ok_json(&state.weights.current())
}

async fn roots_list(state: Arc<ServerState>, _args: Value) -> (String, bool) {
    let roots: Vec<String> = state
        .config
        .allowed_roots
        .iter()
        .map(|r| r.display().to_string())
        .collect();
    ok_json(&roots)
}
