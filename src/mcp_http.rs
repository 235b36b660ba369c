//! HTTP framing for the MCP protocol: `POST /mcp` accepts a single JSON-RPC
//! request or a batch array.
//!
//! Single requests return 200 with the response body, or 204 when the
//! request was a notification. Batches return 200 with an array containing
//! only the non-notification responses, in request order.

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;
use std::sync::Arc;

use crate::mcp;
use crate::types::ServerState;

#[derive(Clone)]
pub struct HttpContext {
    pub state: Arc<ServerState>,
}

fn json_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// `POST /mcp` handler.
pub async fn handle_mcp_post(State(ctx): State<HttpContext>, body: String) -> Response {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            let err = mcp::rpc_error(&Value::Null, -32700, "Parse error", None);
            return json_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    match parsed {
        Value::Array(requests) => {
            // Spawn one handler task per element; join in element order so
            // the response array mirrors the request array.
            let handles: Vec<_> = requests
                .into_iter()
                .map(|req| {
                    let state = Arc::clone(&ctx.state);
                    tokio::spawn(mcp::dispatch_recovered(state, req))
                })
                .collect();
            let mut responses: Vec<Value> = Vec::new();
            for handle in handles {
                if let Ok(Some(resp)) = handle.await {
                    responses.push(resp);
                }
            }
            json_response(StatusCode::OK, serde_json::to_string(&responses).unwrap_or_default())
        }
        single => match mcp::dispatch_recovered(Arc::clone(&ctx.state), single).await {
            Some(resp) => json_response(StatusCode::OK, resp.to_string()),
            // Notification: acknowledged, no body.
            None => Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Body::empty())
                .unwrap(),
        },
    }
}

/// Build the MCP HTTP router (`POST /mcp`; other methods 405, other paths 404).
pub fn router(state: Arc<ServerState>) -> axum::Router {
    use tower_http::cors::CorsLayer;
    use tower_http::trace::TraceLayer;

    axum::Router::new()
        .route("/mcp", axum::routing::post(handle_mcp_post))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(HttpContext { state })
}
