//! codectx — local code-context service.
//!
//! Maintains a live structural + snippet index of a source tree and serves
//! hybrid code search and retrieval tools over a JSON-RPC ("MCP") surface
//! on stdio and HTTP.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod manifest;
pub mod mcp;
pub mod mcp_http;
pub mod orchestrator;
pub mod policy;
pub mod profile;
pub mod prompts;
pub mod queue;
pub mod rank;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod watch;
pub mod weights;

pub use config::Config;
pub use error::{CtxError, Result};
pub use types::ServerState;
