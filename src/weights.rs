//! Persisted hybrid ranking weights with feedback-driven adaptation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Result;
use crate::manifest::write_atomic;

pub const WEIGHTS_FILE: &str = "weights.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub semantic: f64,
    pub lexical: f64,
    pub graph: f64,
    pub reranker: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { semantic: 0.6, lexical: 0.25, graph: 0.1, reranker: 0.05 }
    }
}

impl Weights {
    /// Clamp every component to [0, 1] and renormalize the sum to 1.
    /// A degenerate all-zero vector resets to the defaults.
    pub fn normalize(&mut self) {
        self.semantic = self.semantic.clamp(0.0, 1.0);
        self.lexical = self.lexical.clamp(0.0, 1.0);
        self.graph = self.graph.clamp(0.0, 1.0);
        self.reranker = self.reranker.clamp(0.0, 1.0);
        let sum = self.semantic + self.lexical + self.graph + self.reranker;
        if sum <= f64::EPSILON {
            *self = Weights::default();
            return;
        }
        self.semantic /= sum;
        self.lexical /= sum;
        self.graph /= sum;
        self.reranker /= sum;
    }

    pub fn sum(&self) -> f64 {
        self.semantic + self.lexical + self.graph + self.reranker
    }
}

/// Direction of a relevance-feedback signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Up,
    Down,
}

/// Owner of `weights.json`. The in-process mutex serializes writers; the
/// file itself is only ever replaced via temp + rename.
pub struct WeightManager {
    path: PathBuf,
    inner: Mutex<Weights>,
}

impl WeightManager {
    /// Load weights from the data directory, falling back to defaults when
    /// the file is missing or malformed.
    pub fn load(data_dir: &std::path::Path) -> Self {
        let path = data_dir.join(WEIGHTS_FILE);
        let mut weights = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Weights>(&text).ok())
            .unwrap_or_default();
        weights.normalize();
        Self { path, inner: Mutex::new(weights) }
    }

    /// Current weights (consulted by the ranker on every query).
    pub fn current(&self) -> Weights {
        *self.inner.lock().unwrap()
    }

    /// Apply one feedback event: nudge semantic by ±0.01 and lexical by
    /// ∓0.005, clamp, renormalize, persist. Takes effect for subsequent
    /// queries only.
    pub fn feedback(&self, direction: Feedback) -> Result<Weights> {
        let mut guard = self.inner.lock().unwrap();
        match direction {
            Feedback::Up => {
                guard.semantic += 0.01;
                guard.lexical -= 0.005;
            }
            Feedback::Down => {
                guard.semantic -= 0.01;
                guard.lexical += 0.005;
            }
        }
        guard.normalize();
        write_atomic(&self.path, &*guard)?;
        Ok(*guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sum_to_one() {
        let w = Weights::default();
        assert!((w.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn feedback_normalizes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WeightManager::load(dir.path());
        let before = mgr.current();

        let after = mgr.feedback(Feedback::Up).unwrap();
        assert!(after.semantic > before.semantic);
        assert!(after.lexical < before.lexical);
        assert!((after.sum() - 1.0).abs() < 1e-9);

        // Reload sees the persisted values.
        let reloaded = WeightManager::load(dir.path()).current();
        assert!((reloaded.semantic - after.semantic).abs() < 1e-12);
    }

    #[test]
    fn long_feedback_sequences_stay_normalized_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = WeightManager::load(dir.path());
        for i in 0..500 {
            let dir = if i % 3 == 0 { Feedback::Down } else { Feedback::Up };
            let w = mgr.feedback(dir).unwrap();
            assert!((w.sum() - 1.0).abs() < 1e-9);
            for c in [w.semantic, w.lexical, w.graph, w.reranker] {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn malformed_weights_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), "{broken").unwrap();
        let mgr = WeightManager::load(dir.path());
        assert_eq!(mgr.current(), Weights::default());
    }
}
