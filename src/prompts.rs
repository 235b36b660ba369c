//! Prompt templates for the three guided intents (refactor, test, perf),
//! enriched with per-target file context.

use serde_json::{json, Value};

use crate::error::{CtxError, Result};
use crate::types::ServerState;

const PROMPT_NAMES: &[&str] = &["refactor", "test", "perf"];

/// Prompt metadata for `prompts/list`.
pub fn definitions() -> Vec<Value> {
    PROMPT_NAMES
        .iter()
        .map(|name| {
            let description = match *name {
                "refactor" => "Guided refactor of a file with its dependency context",
                "test" => "Write tests for a file's symbols",
                _ => "Investigate performance characteristics of a file",
            };
            json!({
                "name": name,
                "description": description,
                "arguments": [
                    { "name": "file", "description": "Repo-relative target file", "required": true }
                ],
            })
        })
        .collect()
}

fn intro(name: &str, file: &str) -> String {
    match name {
        "refactor" => format!(
            "You are refactoring `{file}`. Keep its exported surface stable and update every dependent listed below."
        ),
        "test" => format!(
            "Write focused tests for `{file}`. Cover each listed symbol, including its edge cases."
        ),
        _ => format!(
            "Review `{file}` for performance issues. Pay attention to the symbols and callers listed below."
        ),
    }
}

/// Render a prompt. Unknown prompt names are a `-32601`-class error.
pub fn render(state: &ServerState, params: &Value) -> Result<String> {
    let name = params["name"].as_str().unwrap_or("");
    if !PROMPT_NAMES.contains(&name) {
        return Err(CtxError::Unknown(format!("prompt '{name}'")));
    }
    let file = params["arguments"]["file"]
        .as_str()
        .or_else(|| params["file"].as_str())
        .unwrap_or("");
    let meta = state
        .files()
        .get(file)
        .ok_or_else(|| CtxError::NotFound(file.to_string()))?;

    let mut out = intro(name, file);
    out.push_str("\n\n## Preview\n```\n");
    for line in meta.content.lines().take(40) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("```\n");

    if !meta.symbols.is_empty() {
        out.push_str("\n## Symbols\n");
        for s in &meta.symbols {
            out.push_str(&format!("- {} (lines {}-{})\n", s.name, s.start_line, s.end_line));
        }
    }

    if let Some(graph) = &state.graph {
        let imports = graph.list_imports(file).unwrap_or_default();
        if !imports.is_empty() {
            out.push_str("\n## Imports\n");
            for i in &imports {
                out.push_str(&format!("- {i}\n"));
            }
        }
        let dependents = graph.list_dependents(file).unwrap_or_default();
        if !dependents.is_empty() {
            out.push_str("\n## Dependents\n");
            for d in &dependents {
                out.push_str(&format!("- {d}\n"));
            }
        }
        let mut refs: Vec<String> = Vec::new();
        for s in &meta.symbols {
            let base = s.name.rsplit('.').next().unwrap_or(&s.name);
            refs.extend(graph.find_refs(base).unwrap_or_default());
        }
        refs.sort();
        refs.dedup();
        if !refs.is_empty() {
            out.push_str("\n## References\n");
            for r in &refs {
                out.push_str(&format!("- {r}\n"));
            }
        }
    }

    Ok(out)
}
