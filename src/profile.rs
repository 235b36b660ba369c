//! Query intent profiling: classify free-text queries and derive the token
//! budget and effective top-K for the response.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Refactor,
    Test,
    Performance,
    Docs,
    Dataflow,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProfile {
    pub intent: Intent,
    pub token_budget: usize,
    pub requested_top_k: Option<usize>,
    pub effective_top_k: usize,
    pub notes: Vec<String>,
}

struct Preset {
    token_budget: usize,
    top_k: usize,
    note: &'static str,
}

fn preset(intent: Intent) -> Preset {
    match intent {
        Intent::Refactor => Preset {
            token_budget: 900,
            top_k: 8,
            note: "refactor intent: wider symbol context",
        },
        Intent::Test => Preset { token_budget: 700, top_k: 6, note: "test intent: focus on call sites" },
        Intent::Performance => Preset {
            token_budget: 800,
            top_k: 6,
            note: "performance intent: hot paths and loops",
        },
        Intent::Docs => Preset { token_budget: 500, top_k: 4, note: "docs intent: signatures over bodies" },
        Intent::Dataflow => Preset {
            token_budget: 800,
            top_k: 7,
            note: "dataflow intent: follow imports and references",
        },
        Intent::General => Preset { token_budget: 600, top_k: 5, note: "general query" },
    }
}

/// Ordered intent patterns; the first match wins.
fn patterns() -> &'static [(regex::Regex, Intent)] {
    static PATTERNS: OnceLock<Vec<(regex::Regex, Intent)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(&str, Intent)] = &[
            (r"(?i)\b(refactor|rename|restructur|extract|clean\s*up)\b", Intent::Refactor),
            (r"(?i)\b(test|spec|coverage|mock|assert)\w*\b", Intent::Test),
            (r"(?i)\b(slow|perf|performance|optimi[sz]e|latency|bottleneck)\w*\b", Intent::Performance),
            (r"(?i)\b(doc|docs|document|comment|readme)\w*\b", Intent::Docs),
            (r"(?i)\b(flow|trace|propagat|pipeline|where\s+does)\w*\b", Intent::Dataflow),
        ];
        table
            .iter()
            .map(|(pat, intent)| (regex::Regex::new(pat).unwrap(), *intent))
            .collect()
    })
}

pub fn classify(query: &str) -> Intent {
    for (re, intent) in patterns() {
        if re.is_match(query) {
            return *intent;
        }
    }
    Intent::General
}

/// Profile a query. `requested_top_k = Some(0)` and `None` both defer to the
/// preset; the result is always clamped to `1..=preset.top_k`.
pub fn profile(query: &str, requested_top_k: Option<usize>) -> ContextProfile {
    let intent = classify(query);
    let p = preset(intent);
    let requested = requested_top_k.filter(|k| *k > 0);
    let effective = requested.unwrap_or(p.top_k).min(p.top_k).max(1);
    ContextProfile {
        intent,
        token_budget: p.token_budget,
        requested_top_k: requested,
        effective_top_k: effective,
        notes: vec![p.note.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_pattern_wins() {
        assert_eq!(classify("refactor the slow order tests"), Intent::Refactor);
        assert_eq!(classify("add tests for the parser"), Intent::Test);
        assert_eq!(classify("why is checkout slow"), Intent::Performance);
        assert_eq!(classify("document the api surface"), Intent::Docs);
        assert_eq!(classify("trace the order id through the system"), Intent::Dataflow);
        assert_eq!(classify("create order"), Intent::General);
    }

    #[test]
    fn general_fallback_is_600_5() {
        let p = profile("create order", None);
        assert_eq!(p.intent, Intent::General);
        assert_eq!(p.token_budget, 600);
        assert_eq!(p.effective_top_k, 5);
    }

    #[test]
    fn effective_top_k_clamps_to_preset() {
        let p = profile("create order", Some(3));
        assert_eq!(p.effective_top_k, 3);
        let p = profile("create order", Some(50));
        assert_eq!(p.effective_top_k, 5, "never above the preset");
        let p = profile("create order", Some(0));
        assert_eq!(p.effective_top_k, 5, "zero defers to the preset");
        assert!(p.effective_top_k >= 1);
    }
}
