//! Test harness for MCP integration tests.
//!
//! Builds a `ServerState` from fixture files in a temp dir, runs a real
//! index pass, starts the in-process fallback engine, and dispatches
//! JSON-RPC requests directly (no subprocess).

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use codectx::config::{Config, IndexMode};
use codectx::engine::EngineClient;
use codectx::graph::GraphStore;
use codectx::telemetry::Telemetry;
use codectx::types::ServerState;
use codectx::weights::WeightManager;

pub struct TestHarness {
    pub state: Arc<ServerState>,
    pub root: TempDir,
    _data: TempDir,
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) {
    for entry in std::fs::read_dir(src).expect("fixture dir") {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
            copy_dir_recursive(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

impl TestHarness {
    /// Create a harness from a named fixture directory.
    pub async fn from_fixture(name: &str) -> Self {
        let fixture_src =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);

        let root = TempDir::new().expect("temp root");
        let data = TempDir::new().expect("temp data dir");
        if fixture_src.exists() {
            copy_dir_recursive(&fixture_src, root.path());
        }

        let mut config = Config::new(
            root.path().canonicalize().unwrap(),
            data.path().canonicalize().unwrap(),
        );
        config.mode = IndexMode::Full;

        let graph = GraphStore::open(&config.graph_db_path()).expect("graph store");
        codectx::indexer::run_index(&config, Some(&graph)).expect("index pass");

        let entries = codectx::manifest::load_entries(&config.data_dir);
        let engine = EngineClient::start(&config, entries).await;
        let weights = WeightManager::load(&config.data_dir);
        let telemetry = Telemetry::open(config.log_dir());

        let state = Arc::new(ServerState::new(
            config,
            Some(Arc::new(graph)),
            engine,
            weights,
            telemetry,
        ));
        TestHarness { state, root, _data: data }
    }

    /// Dispatch a JSON-RPC message and return the response (None for
    /// notifications).
    pub async fn dispatch(&self, msg: Value) -> Option<Value> {
        codectx::mcp::dispatch_recovered(Arc::clone(&self.state), msg).await
    }

    /// Call an MCP tool by name. Returns (text, is_error).
    pub async fn call_tool(&self, tool: &str, args: Value) -> (String, bool) {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": tool, "arguments": args }
        });
        let resp = self.dispatch(msg).await.expect("tools/call response");
        let result = &resp["result"];
        let text = result["content"][0]["text"].as_str().unwrap_or("").to_string();
        let is_error = result["isError"].as_bool().unwrap_or(false);
        (text, is_error)
    }

    pub async fn initialize(&self) -> Value {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "probe" }
            }
        });
        self.dispatch(msg).await.expect("initialize response")
    }
}
