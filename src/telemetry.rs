//! Telemetry: JSONL event log, aggregate snapshot, and Prometheus text
//! exposition. Recording failures never propagate to callers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

pub const LOG_FILE: &str = "telemetry.log";
pub const LATEST_FILE: &str = "telemetry_latest.json";
pub const PROM_FILE: &str = "telemetry.prom";
pub const PANEL_FILE: &str = "telemetry_panel.html";

#[derive(Default, Clone, Serialize)]
struct Aggregate {
    events: u64,
    by_kind: BTreeMap<String, u64>,
    total_latency_ms: u64,
}

pub struct Telemetry {
    dir: PathBuf,
    state: Mutex<Aggregate>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Telemetry {
    pub fn open(log_dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            tracing::debug!(error = %e, "telemetry dir unavailable");
        }
        Self { dir: log_dir, state: Mutex::new(Aggregate::default()) }
    }

    /// Append one event line and refresh the aggregate snapshot.
    pub fn record(&self, kind: &str, latency_ms: u64, detail: serde_json::Value) {
        let line = serde_json::json!({
            "ts": now_ms(),
            "kind": kind,
            "latencyMs": latency_ms,
            "detail": detail,
        });

        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(LOG_FILE))
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = appended {
            tracing::debug!(error = %e, "telemetry append failed");
        }

        let snapshot = {
            let mut agg = self.state.lock().unwrap();
            agg.events += 1;
            *agg.by_kind.entry(kind.to_string()).or_default() += 1;
            agg.total_latency_ms += latency_ms;
            agg.clone()
        };
        if let Err(e) = crate::manifest::write_atomic(&self.dir.join(LATEST_FILE), &snapshot) {
            tracing::debug!(error = %e, "telemetry snapshot failed");
        }
        if let Err(e) = std::fs::write(self.dir.join(PROM_FILE), prom_text(&snapshot)) {
            tracing::debug!(error = %e, "telemetry prom write failed");
        }
    }

    /// Render the aggregate as a static HTML panel, returning its path.
    pub fn write_panel(&self) -> crate::error::Result<PathBuf> {
        let agg = self.state.lock().unwrap().clone();
        let mut rows = String::new();
        for (kind, count) in &agg.by_kind {
            rows.push_str(&format!("<tr><td>{kind}</td><td>{count}</td></tr>\n"));
        }
        let avg = if agg.events > 0 { agg.total_latency_ms / agg.events } else { 0 };
        let html = format!(
            "<!doctype html><html><head><meta charset=\"utf-8\"><title>codectx telemetry</title>\
             </head><body><h1>codectx telemetry</h1>\
             <p>{} events, avg latency {} ms</p>\
             <table border=\"1\"><tr><th>kind</th><th>count</th></tr>\n{rows}</table>\
             </body></html>",
            agg.events, avg
        );
        let path = self.dir.join(PANEL_FILE);
        std::fs::write(&path, html)?;
        Ok(path)
    }

    pub fn panel_path(&self) -> PathBuf {
        self.dir.join(PANEL_FILE)
    }
}

fn prom_text(agg: &Aggregate) -> String {
    let mut out = String::new();
    out.push_str("# TYPE codectx_events_total counter\n");
    out.push_str(&format!("codectx_events_total {}\n", agg.events));
    out.push_str("# TYPE codectx_latency_ms_total counter\n");
    out.push_str(&format!("codectx_latency_ms_total {}\n", agg.total_latency_ms));
    for (kind, count) in &agg.by_kind {
        out.push_str(&format!("codectx_events{{kind=\"{kind}\"}} {count}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_jsonl_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let t = Telemetry::open(dir.path().to_path_buf());
        t.record("search", 12, serde_json::json!({"q": "x"}));
        t.record("search", 8, serde_json::json!({"q": "y"}));
        t.record("tools/call", 3, serde_json::Value::Null);

        let log = std::fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(log.lines().count(), 3);
        for line in log.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["kind"].is_string());
        }

        let latest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(LATEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(latest["events"], 3);
        assert_eq!(latest["by_kind"]["search"], 2);

        let prom = std::fs::read_to_string(dir.path().join(PROM_FILE)).unwrap();
        assert!(prom.contains("codectx_events_total 3"));
    }

    #[test]
    fn panel_renders_counts() {
        let dir = tempfile::tempdir().unwrap();
        let t = Telemetry::open(dir.path().to_path_buf());
        t.record("search", 5, serde_json::Value::Null);
        let path = t.write_panel().unwrap();
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("search"));
        assert!(html.contains("1 events") || html.contains("<td>1</td>"));
    }
}
