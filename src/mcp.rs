//! JSON-RPC 2.0 dispatch shared by the stdio and HTTP transports.
//!
//! stdio framing: one JSON object per newline-terminated line on stdin,
//! responses one-per-line on stdout, diagnostics on stderr. Responses are
//! emitted in handler-completion order; clients match by `id`.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::error::CtxError;
use crate::policy::Policy;
use crate::types::ServerState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "codectx";

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn rpc_error(id: &Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

pub fn error_from(id: &Value, err: &CtxError) -> Value {
    let data = match err {
        CtxError::RootViolation(p) | CtxError::PolicyDenied(p) => {
            Some(json!({ "path": p.display().to_string() }))
        }
        _ => None,
    };
    rpc_error(id, err.rpc_code(), &err.to_string(), data)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch one JSON-RPC message. Notifications (no `id`) return `None`.
pub async fn dispatch(state: Arc<ServerState>, msg: Value) -> Option<Value> {
    let method = msg["method"].as_str().unwrap_or("").to_string();
    let id = msg.get("id").cloned();

    // Notifications expect no response; `initialized` and
    // `sessionConfigured` fall through here silently.
    let Some(id) = id else {
        debug!(method = method.as_str(), "notification ignored");
        return None;
    };

    let started = std::time::Instant::now();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    let response = match method.as_str() {
        "initialize" => rpc_result(
            &id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "ping" => rpc_result(&id, json!({})),
        "shutdown" => {
            info!("shutdown requested");
            state.shutdown.notify_waiters();
            rpc_result(&id, json!({}))
        }
        "tools/list" => rpc_result(&id, json!({ "tools": crate::tools::definitions() })),
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or("");
            let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let (text, is_error) = crate::tools::call(Arc::clone(&state), name, args).await;
            rpc_result(
                &id,
                json!({ "content": [{ "type": "text", "text": text }], "isError": is_error }),
            )
        }
        "resources/list" => rpc_result(&id, json!({ "resources": list_resources(&state) })),
        "resources/read" => match read_resource(&state, &params) {
            Ok(contents) => rpc_result(&id, json!({ "contents": contents })),
            Err(e) => error_from(&id, &e),
        },
        "roots/list" => rpc_result(&id, json!({ "roots": list_roots(&state) })),
        "prompts/list" => rpc_result(&id, json!({ "prompts": crate::prompts::definitions() })),
        "prompts/call" | "prompts/get" => match crate::prompts::render(&state, &params) {
            Ok(text) => rpc_result(
                &id,
                json!({
                    "messages": [{ "role": "user", "content": { "type": "text", "text": text } }]
                }),
            ),
            Err(e) => error_from(&id, &e),
        },
        _ => rpc_error(&id, -32601, "Method not found", None),
    };

    state.telemetry.record(
        &method,
        started.elapsed().as_millis() as u64,
        json!({ "ok": response.get("error").is_none() }),
    );
    Some(response)
}

/// Dispatch inside a spawned task so an unexpected panic in any handler is
/// converted to a `-32000` response instead of taking the transport down.
pub async fn dispatch_recovered(state: Arc<ServerState>, msg: Value) -> Option<Value> {
    let id = msg.get("id").cloned();
    match tokio::spawn(dispatch(state, msg)).await {
        Ok(resp) => resp,
        Err(join_err) => {
            tracing::error!(error = %join_err, "handler panicked");
            id.map(|id| rpc_error(&id, -32000, "internal error", None))
        }
    }
}

/// Parse one frame and dispatch it. Malformed JSON yields a parse error.
pub async fn handle_frame(state: Arc<ServerState>, raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(msg) => dispatch_recovered(state, msg).await,
        Err(_) => Some(rpc_error(&Value::Null, -32700, "Parse error", None)),
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

fn file_uri(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}

fn list_roots(state: &ServerState) -> Vec<Value> {
    state
        .config
        .allowed_roots
        .iter()
        .map(|root| {
            json!({
                "uri": file_uri(root),
                "name": root.file_name().map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| root.display().to_string()),
            })
        })
        .collect()
}

fn list_resources(state: &ServerState) -> Vec<Value> {
    let policy = Policy::new(&state.config.allowed_roots);
    let mut out = Vec::new();
    for root in &state.config.allowed_roots {
        let walker = ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .filter_entry(|entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return name != ".git" && name != "node_modules" && name != "target";
                }
                true
            })
            .build();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            // Missing or denied files simply don't appear in the listing.
            if !policy.allows(entry.path()) {
                continue;
            }
            out.push(json!({
                "uri": file_uri(entry.path()),
                "name": crate::config::rel_path(root, entry.path()),
            }));
        }
    }
    out.sort_by(|a, b| a["uri"].as_str().cmp(&b["uri"].as_str()));
    out
}

fn read_resource(state: &ServerState, params: &Value) -> crate::error::Result<Vec<Value>> {
    let uri = params["uri"].as_str().unwrap_or("");
    let path_str = uri.strip_prefix("file://").unwrap_or(uri);
    let path = PathBuf::from(path_str);
    let policy = Policy::new(&state.config.allowed_roots);
    let text = policy.read(&path)?;
    Ok(vec![json!({ "uri": uri, "mimeType": "text/plain", "text": text })])
}

// ---------------------------------------------------------------------------
// stdio transport
// ---------------------------------------------------------------------------

/// Run the line-framed stdio loop until EOF or `shutdown`.
///
/// Each request runs in its own task so long-running tools don't block
/// short ones; a writer task serializes response lines onto stdout.
pub async fn run_stdio(state: Arc<ServerState>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if out.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = out.write_all(b"\n").await;
            let _ = out.flush().await;
        }
    });

    info!("MCP stdio transport ready");
    loop {
        tokio::select! {
            _ = state.shutdown.notified() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let state = Arc::clone(&state);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(resp) = handle_frame(state, &line).await {
                        let _ = tx.send(resp.to_string());
                    }
                });
            }
        }
    }
    drop(tx);
    let _ = writer.await;
}
