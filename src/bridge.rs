//! HTTP-to-stdio bridge: fronts a line-framed stdio MCP child with a
//! per-request correlator.
//!
//! Each outgoing request registers a oneshot keyed by its `id`; the reader
//! task resolves it when a response with a matching id arrives. Pending
//! entries are reaped after 30 s and answered with `-32000`. Notifications
//! are forwarded without correlation.

use dashmap::DashMap;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{CtxError, Result};

/// How long a pending request may wait for the child's response.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<DashMap<String, oneshot::Sender<Value>>>;

pub struct Bridge {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Pending,
}

fn id_key(id: &Value) -> String {
    id.to_string()
}

impl Bridge {
    /// Bridge over arbitrary transport halves (the child's stdin/stdout).
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
    ) -> Arc<Self> {
        let pending: Pending = Arc::new(DashMap::new());
        let bridge =
            Arc::new(Self { writer: Mutex::new(Box::new(writer)), pending: Arc::clone(&pending) });

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(msg) = serde_json::from_str::<Value>(&line) else {
                    debug!("bridge: dropping unparsable child frame");
                    continue;
                };
                let Some(id) = msg.get("id").filter(|id| !id.is_null()) else {
                    continue; // child-side notification
                };
                if let Some((_, tx)) = pending.remove(&id_key(id)) {
                    let _ = tx.send(msg);
                }
            }
            debug!("bridge: child stream closed");
        });

        bridge
    }

    /// Spawn `command` (via `sh -c`) as the stdio child and bridge to it.
    pub fn spawn(command: &str) -> Result<Arc<Self>> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| CtxError::Other("no child stdin".into()))?;
        let stdout =
            child.stdout.take().ok_or_else(|| CtxError::Other("no child stdout".into()))?;
        // The child lives as long as the process; reap it in the background.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(Self::new(stdin, stdout))
    }

    async fn write_frame(&self, frame: &Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.to_string().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Forward a request and wait for the matching response. Times out with
    /// a `-32000` error response after 30 s.
    pub async fn call(&self, request: Value) -> Value {
        let Some(id) = request.get("id").filter(|id| !id.is_null()).cloned() else {
            // No id means nothing to correlate.
            if let Err(e) = self.write_frame(&request).await {
                warn!(error = %e, "bridge: notification forward failed");
            }
            return Value::Null;
        };
        let key = id_key(&id);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        if let Err(e) = self.write_frame(&request).await {
            self.pending.remove(&key);
            return crate::mcp::rpc_error(&id, -32000, &e.to_string(), None);
        }

        match tokio::time::timeout(BRIDGE_TIMEOUT, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => crate::mcp::rpc_error(&id, -32000, "bridge channel closed", None),
            Err(_) => {
                // Reap the stale entry so the map stays bounded.
                self.pending.remove(&key);
                crate::mcp::rpc_error(&id, -32000, "bridge timeout", None)
            }
        }
    }

    /// Forward a notification without correlation.
    pub async fn notify(&self, notification: Value) {
        if let Err(e) = self.write_frame(&notification).await {
            warn!(error = %e, "bridge: notification forward failed");
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
